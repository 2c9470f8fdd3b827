use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ChatError;

macro_rules! id_newtype {
    ($name:ident) => {
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_string())
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                Self(value)
            }
        }
    };
}

id_newtype!(UserId);
id_newtype!(ConversationId);
id_newtype!(GroupId);
id_newtype!(MessageId);

impl MessageId {
    /// Fresh client-generated id for a locally-authored message.
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

impl From<GroupId> for ConversationId {
    fn from(value: GroupId) -> Self {
        Self(value.0)
    }
}

const DIRECT_CONVERSATION_PREFIX: &str = "dm";

/// Derives the stable conversation key for a direct chat between two
/// participants. Order-independent: `(a, b)` and `(b, a)` map to the same
/// key. Group conversations carry server-assigned ids and never go through
/// this derivation.
pub fn derive_conversation_id(a: &UserId, b: &UserId) -> Result<ConversationId, ChatError> {
    if a.0.is_empty() || b.0.is_empty() {
        return Err(ChatError::InvalidIdentifier(
            "participant id must not be empty".to_string(),
        ));
    }
    if a == b {
        return Err(ChatError::InvalidIdentifier(format!(
            "cannot open a direct conversation with self: {a}"
        )));
    }
    let (low, high) = if a.0 <= b.0 { (a, b) } else { (b, a) };
    Ok(ConversationId(format!(
        "{DIRECT_CONVERSATION_PREFIX}:{low}:{high}"
    )))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    Text,
    Image,
    File,
    Audio,
    Video,
}

/// Delivery lifecycle of a message: `sending -> sent -> delivered -> read`,
/// with `failed` terminal and reachable from `sending`/`sent` only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryStatus {
    Sending,
    Sent,
    Delivered,
    Read,
    Failed,
}

impl DeliveryStatus {
    fn rank(self) -> u8 {
        match self {
            DeliveryStatus::Sending => 0,
            DeliveryStatus::Sent => 1,
            DeliveryStatus::Delivered => 2,
            DeliveryStatus::Read => 3,
            // outside the delivery order; supersedes() special-cases it
            DeliveryStatus::Failed => u8::MAX,
        }
    }

    /// Whether applying `self` over `current` advances the lifecycle.
    /// Out-of-order acknowledgements resolve to the most advanced status
    /// observed; `failed` is sticky once set.
    pub fn supersedes(self, current: DeliveryStatus) -> bool {
        match (current, self) {
            (DeliveryStatus::Failed, _) => false,
            (DeliveryStatus::Sending | DeliveryStatus::Sent, DeliveryStatus::Failed) => true,
            (_, DeliveryStatus::Failed) => false,
            (current, next) => next.rank() > current.rank(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    pub conversation_id: ConversationId,
    pub sender_id: UserId,
    pub content: String,
    pub kind: MessageKind,
    pub timestamp: DateTime<Utc>,
    pub status: DeliveryStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conversation {
    pub id: ConversationId,
    pub participants: BTreeSet<UserId>,
    pub is_group: bool,
    pub last_message: Option<Message>,
    pub last_message_time: Option<DateTime<Utc>>,
    pub unread_count: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derivation_is_order_independent() {
        let a = UserId::from("alice");
        let b = UserId::from("bob");
        assert_eq!(
            derive_conversation_id(&a, &b).expect("derive"),
            derive_conversation_id(&b, &a).expect("derive")
        );
    }

    #[test]
    fn derivation_sorts_and_namespaces() {
        let id = derive_conversation_id(&UserId::from("zed"), &UserId::from("amy")).expect("derive");
        assert_eq!(id.as_str(), "dm:amy:zed");
    }

    #[test]
    fn derivation_rejects_empty_and_self() {
        let a = UserId::from("alice");
        assert!(matches!(
            derive_conversation_id(&a, &UserId::from("")),
            Err(ChatError::InvalidIdentifier(_))
        ));
        assert!(matches!(
            derive_conversation_id(&a, &a),
            Err(ChatError::InvalidIdentifier(_))
        ));
    }

    #[test]
    fn status_advances_monotonically() {
        use DeliveryStatus::*;
        assert!(Sent.supersedes(Sending));
        assert!(Delivered.supersedes(Sent));
        assert!(Read.supersedes(Delivered));
        assert!(Read.supersedes(Sending));
        assert!(!Sent.supersedes(Delivered));
        assert!(!Delivered.supersedes(Read));
        assert!(!Delivered.supersedes(Delivered));
    }

    #[test]
    fn failed_reachable_from_early_states_only_and_sticky() {
        use DeliveryStatus::*;
        assert!(Failed.supersedes(Sending));
        assert!(Failed.supersedes(Sent));
        assert!(!Failed.supersedes(Delivered));
        assert!(!Failed.supersedes(Read));
        assert!(!Delivered.supersedes(Failed));
        assert!(!Read.supersedes(Failed));
    }

    #[test]
    fn message_kind_uses_snake_case_on_the_wire() {
        assert_eq!(
            serde_json::to_string(&MessageKind::Audio).expect("serialize"),
            "\"audio\""
        );
    }
}

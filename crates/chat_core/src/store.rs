use std::{collections::HashMap, sync::Arc};

use chrono::Utc;
use shared::{
    domain::{
        derive_conversation_id, Conversation, ConversationId, DeliveryStatus, GroupId, Message,
        MessageId, MessageKind, UserId,
    },
    error::ChatError,
};
use tokio::sync::{broadcast, Mutex};
use tracing::debug;

/// Where an outgoing message should land.
#[derive(Debug, Clone)]
pub enum ConversationTarget {
    /// A conversation already known to the store (or one the caller wants
    /// created under this exact id).
    Existing(ConversationId),
    /// A direct chat; the conversation key is derived from the recipient and
    /// the local user.
    Direct { recipient: UserId },
    /// A multi-party conversation keyed by its server-assigned group id.
    Group(GroupId),
}

#[derive(Debug, Clone)]
pub struct NewOutgoingMessage {
    pub target: ConversationTarget,
    pub content: String,
    pub kind: MessageKind,
    pub metadata: Option<serde_json::Value>,
}

/// A direct message delivered over the realtime transport.
#[derive(Debug, Clone)]
pub struct InboundMessage {
    pub sender_id: UserId,
    pub recipient_id: UserId,
    /// Server-assigned id when the wire carries one; used verbatim so a
    /// redelivery after reconnect reconciles to a no-op.
    pub server_id: Option<MessageId>,
    pub content: String,
    pub kind: MessageKind,
    pub metadata: Option<serde_json::Value>,
}

/// A group message delivered over the realtime transport. Group fan-out
/// always carries the server-confirmed record, sender's own copy included.
#[derive(Debug, Clone)]
pub struct InboundGroupMessage {
    pub group_id: GroupId,
    pub server_id: MessageId,
    pub sender_id: UserId,
    pub content: String,
    pub kind: MessageKind,
    pub metadata: Option<serde_json::Value>,
}

/// Change notifications for reactive consumers. The store itself stays
/// authoritative; subscribers re-query on receipt.
#[derive(Debug, Clone)]
pub enum StoreEvent {
    MessageAppended {
        conversation_id: ConversationId,
        message: Message,
    },
    MessageStatusUpdated {
        conversation_id: ConversationId,
        message_id: MessageId,
        status: DeliveryStatus,
    },
    ConversationRead {
        conversation_id: ConversationId,
    },
    HistoryLoaded {
        conversation_id: ConversationId,
    },
}

#[derive(Default)]
struct StoreState {
    conversations: HashMap<ConversationId, Conversation>,
    messages: HashMap<ConversationId, Vec<Message>>,
    active_conversation: Option<ConversationId>,
}

/// Single owner of all conversation and message state. Every mutation runs
/// inside one critical section over the conversations+messages map, so the
/// denormalized conversation fields are never observable out of sync with
/// the message lists.
pub struct ChatStore {
    local_user: UserId,
    inner: Mutex<StoreState>,
    events: broadcast::Sender<StoreEvent>,
}

impl ChatStore {
    pub fn new(local_user: impl Into<UserId>) -> Arc<Self> {
        let (events, _) = broadcast::channel(256);
        Arc::new(Self {
            local_user: local_user.into(),
            inner: Mutex::new(StoreState::default()),
            events,
        })
    }

    pub fn local_user(&self) -> &UserId {
        &self.local_user
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StoreEvent> {
        self.events.subscribe()
    }

    /// Appends a locally-authored message optimistically, before any network
    /// confirmation. The conversation is created on first use; its
    /// denormalized tail fields update in the same critical section as the
    /// append.
    pub async fn add_local_message(
        &self,
        outgoing: NewOutgoingMessage,
    ) -> Result<Message, ChatError> {
        if matches!(outgoing.kind, MessageKind::Text) && outgoing.content.trim().is_empty() {
            return Err(ChatError::EmptyMessage);
        }
        let (conversation_id, participants, is_group) = self.resolve_target(&outgoing.target)?;

        let message = {
            let mut state = self.inner.lock().await;
            find_or_create_conversation(&mut state, &conversation_id, &participants, is_group);
            let message = Message {
                id: MessageId::generate(),
                conversation_id: conversation_id.clone(),
                sender_id: self.local_user.clone(),
                content: outgoing.content,
                kind: outgoing.kind,
                timestamp: Utc::now(),
                status: DeliveryStatus::Sending,
                metadata: outgoing.metadata,
            };
            append_message(&mut state, message.clone());
            message
        };

        let _ = self.events.send(StoreEvent::MessageAppended {
            conversation_id,
            message: message.clone(),
        });
        Ok(message)
    }

    /// Merges a direct message delivered by the transport. Messages echoed
    /// back for the local user are suppressed; a server-assigned id makes
    /// redelivery idempotent. Returns the appended message, or `None` when
    /// the event reconciled to a no-op.
    pub async fn reconcile_remote_message(
        &self,
        inbound: InboundMessage,
    ) -> Result<Option<Message>, ChatError> {
        if inbound.sender_id == self.local_user {
            debug!(sender = %inbound.sender_id, "suppressing self-echoed message");
            return Ok(None);
        }
        let conversation_id = derive_conversation_id(&inbound.sender_id, &inbound.recipient_id)?;
        let participants = [inbound.sender_id.clone(), inbound.recipient_id.clone()];

        let message = {
            let mut state = self.inner.lock().await;
            if let Some(server_id) = &inbound.server_id {
                if message_exists(&state, &conversation_id, server_id) {
                    debug!(message_id = %server_id, "redelivered message already reconciled");
                    return Ok(None);
                }
            }
            let active = state.active_conversation.as_ref() == Some(&conversation_id);
            find_or_create_conversation(&mut state, &conversation_id, &participants, false);
            let message = Message {
                id: inbound.server_id.unwrap_or_else(MessageId::generate),
                conversation_id: conversation_id.clone(),
                sender_id: inbound.sender_id,
                content: inbound.content,
                kind: inbound.kind,
                timestamp: Utc::now(),
                status: if active {
                    DeliveryStatus::Read
                } else {
                    DeliveryStatus::Delivered
                },
                metadata: inbound.metadata,
            };
            append_message(&mut state, message.clone());
            if !active {
                if let Some(conversation) = state.conversations.get_mut(&conversation_id) {
                    conversation.unread_count += 1;
                }
            }
            message
        };

        let _ = self.events.send(StoreEvent::MessageAppended {
            conversation_id,
            message: message.clone(),
        });
        Ok(Some(message))
    }

    /// Merges a group message delivered by the transport. Group deliveries
    /// always carry the server-confirmed record, so deduplication runs on
    /// its id alone; the sender's own fan-out copy is a distinct record and
    /// is appended like any other.
    pub async fn reconcile_group_message(
        &self,
        inbound: InboundGroupMessage,
    ) -> Result<Option<Message>, ChatError> {
        if inbound.group_id.as_str().is_empty() {
            return Err(ChatError::ConversationUnresolvable(
                "group message without a group id".to_string(),
            ));
        }
        let conversation_id = ConversationId::from(inbound.group_id);
        let own = inbound.sender_id == self.local_user;
        let participants = [self.local_user.clone(), inbound.sender_id.clone()];

        let message = {
            let mut state = self.inner.lock().await;
            if message_exists(&state, &conversation_id, &inbound.server_id) {
                debug!(message_id = %inbound.server_id, "redelivered group message already reconciled");
                return Ok(None);
            }
            let active = state.active_conversation.as_ref() == Some(&conversation_id);
            find_or_create_conversation(&mut state, &conversation_id, &participants, true);
            let message = Message {
                id: inbound.server_id,
                conversation_id: conversation_id.clone(),
                sender_id: inbound.sender_id,
                content: inbound.content,
                kind: inbound.kind,
                timestamp: Utc::now(),
                status: if active && !own {
                    DeliveryStatus::Read
                } else {
                    DeliveryStatus::Delivered
                },
                metadata: inbound.metadata,
            };
            append_message(&mut state, message.clone());
            if !active && !own {
                if let Some(conversation) = state.conversations.get_mut(&conversation_id) {
                    conversation.unread_count += 1;
                }
            }
            message
        };

        let _ = self.events.send(StoreEvent::MessageAppended {
            conversation_id,
            message: message.clone(),
        });
        Ok(Some(message))
    }

    /// Applies an acknowledgement to whichever conversation holds the
    /// message. The store keeps the most advanced status observed; stale or
    /// out-of-order acknowledgements are silent no-ops.
    pub async fn update_message_status(&self, message_id: &MessageId, status: DeliveryStatus) {
        let updated = {
            let mut state = self.inner.lock().await;
            let mut updated = None;
            for (conversation_id, messages) in state.messages.iter_mut() {
                if let Some(message) = messages.iter_mut().find(|m| &m.id == message_id) {
                    if status.supersedes(message.status) {
                        message.status = status;
                        updated = Some((conversation_id.clone(), message.clone()));
                    } else {
                        debug!(
                            message_id = %message_id,
                            current = ?message.status,
                            incoming = ?status,
                            "ignoring stale status update"
                        );
                    }
                    break;
                }
            }
            if let Some((conversation_id, message)) = &updated {
                if let Some(conversation) = state.conversations.get_mut(conversation_id) {
                    conversation.updated_at = Utc::now();
                    if conversation.last_message.as_ref().map(|m| &m.id) == Some(&message.id) {
                        conversation.last_message = Some(message.clone());
                    }
                }
            }
            updated
        };

        if let Some((conversation_id, message)) = updated {
            let _ = self.events.send(StoreEvent::MessageStatusUpdated {
                conversation_id,
                message_id: message.id,
                status,
            });
        }
    }

    /// Clears the unread counter and promotes every message to `read`
    /// (`failed` stays sticky). Idempotent; unknown conversations are a
    /// no-op.
    pub async fn mark_conversation_read(&self, conversation_id: &ConversationId) {
        {
            let mut state = self.inner.lock().await;
            if !state.conversations.contains_key(conversation_id) {
                return;
            }
            if let Some(messages) = state.messages.get_mut(conversation_id) {
                for message in messages.iter_mut() {
                    if DeliveryStatus::Read.supersedes(message.status) {
                        message.status = DeliveryStatus::Read;
                    }
                }
            }
            let tail = state
                .messages
                .get(conversation_id)
                .and_then(|messages| messages.last().cloned());
            if let Some(conversation) = state.conversations.get_mut(conversation_id) {
                conversation.unread_count = 0;
                conversation.updated_at = Utc::now();
                if tail.is_some() {
                    conversation.last_message = tail;
                }
            }
        }

        let _ = self.events.send(StoreEvent::ConversationRead {
            conversation_id: conversation_id.clone(),
        });
    }

    /// Declares which conversation is foregrounded; messages reconciled into
    /// it skip the unread counter. Switching away does not retroactively
    /// clear the previous conversation's counter.
    pub async fn set_active_conversation(&self, conversation_id: Option<ConversationId>) {
        let mut state = self.inner.lock().await;
        state.active_conversation = conversation_id;
    }

    pub async fn active_conversation(&self) -> Option<ConversationId> {
        self.inner.lock().await.active_conversation.clone()
    }

    /// Creates the conversation for `target` if it does not exist yet and
    /// returns its id. Used when the user opens a chat before any message
    /// flows.
    pub async fn ensure_conversation(
        &self,
        target: &ConversationTarget,
    ) -> Result<ConversationId, ChatError> {
        let (conversation_id, participants, is_group) = self.resolve_target(target)?;
        let mut state = self.inner.lock().await;
        find_or_create_conversation(&mut state, &conversation_id, &participants, is_group);
        Ok(conversation_id)
    }

    /// Replaces a conversation's message list wholesale with fetched
    /// history. This is the REST integration point used on screen mount;
    /// live events go through the reconcile paths and merge incrementally.
    pub async fn load_messages(&self, conversation_id: &ConversationId, history: Vec<Message>) {
        let mut history = history;
        history.sort_by(|a, b| a.timestamp.cmp(&b.timestamp));

        {
            let mut state = self.inner.lock().await;
            let mut participants: Vec<UserId> =
                history.iter().map(|m| m.sender_id.clone()).collect();
            participants.push(self.local_user.clone());
            find_or_create_conversation(&mut state, conversation_id, &participants, false);

            for message in &mut history {
                message.conversation_id = conversation_id.clone();
            }
            let unread = history
                .iter()
                .filter(|m| {
                    m.sender_id != self.local_user && !matches!(m.status, DeliveryStatus::Read)
                })
                .count() as u32;
            let tail = history.last().cloned();
            state.messages.insert(conversation_id.clone(), history);
            if let Some(conversation) = state.conversations.get_mut(conversation_id) {
                conversation.unread_count = unread;
                conversation.updated_at = Utc::now();
                conversation.last_message_time = tail.as_ref().map(|m| m.timestamp);
                conversation.last_message = tail;
            }
        }

        let _ = self.events.send(StoreEvent::HistoryLoaded {
            conversation_id: conversation_id.clone(),
        });
    }

    /// Snapshot of all conversations, most recent activity first; ties break
    /// on creation time, newest first.
    pub async fn conversations(&self) -> Vec<Conversation> {
        let state = self.inner.lock().await;
        let mut conversations: Vec<Conversation> = state.conversations.values().cloned().collect();
        conversations.sort_by(|a, b| {
            let a_key = a.last_message_time.unwrap_or(a.created_at);
            let b_key = b.last_message_time.unwrap_or(b.created_at);
            b_key
                .cmp(&a_key)
                .then_with(|| b.created_at.cmp(&a.created_at))
        });
        conversations
    }

    pub async fn conversation(&self, conversation_id: &ConversationId) -> Option<Conversation> {
        self.inner
            .lock()
            .await
            .conversations
            .get(conversation_id)
            .cloned()
    }

    pub async fn messages(&self, conversation_id: &ConversationId) -> Vec<Message> {
        self.inner
            .lock()
            .await
            .messages
            .get(conversation_id)
            .cloned()
            .unwrap_or_default()
    }

    pub async fn unread_count(&self, conversation_id: &ConversationId) -> u32 {
        self.inner
            .lock()
            .await
            .conversations
            .get(conversation_id)
            .map(|c| c.unread_count)
            .unwrap_or(0)
    }

    pub async fn total_unread(&self) -> u32 {
        self.inner
            .lock()
            .await
            .conversations
            .values()
            .map(|c| c.unread_count)
            .sum()
    }

    fn resolve_target(
        &self,
        target: &ConversationTarget,
    ) -> Result<(ConversationId, Vec<UserId>, bool), ChatError> {
        match target {
            ConversationTarget::Existing(conversation_id) => {
                if conversation_id.as_str().is_empty() {
                    return Err(ChatError::ConversationUnresolvable(
                        "empty conversation id".to_string(),
                    ));
                }
                Ok((
                    conversation_id.clone(),
                    vec![self.local_user.clone()],
                    false,
                ))
            }
            ConversationTarget::Direct { recipient } => {
                let conversation_id = derive_conversation_id(&self.local_user, recipient)?;
                Ok((
                    conversation_id,
                    vec![self.local_user.clone(), recipient.clone()],
                    false,
                ))
            }
            ConversationTarget::Group(group_id) => {
                if group_id.as_str().is_empty() {
                    return Err(ChatError::ConversationUnresolvable(
                        "empty group id".to_string(),
                    ));
                }
                Ok((
                    ConversationId::from(group_id.clone()),
                    vec![self.local_user.clone()],
                    true,
                ))
            }
        }
    }
}

/// Single creation path shared by the local-add, reconcile, and history
/// paths. Existing conversations keep their `is_group` discriminant; new
/// participants are merged into the set.
fn find_or_create_conversation(
    state: &mut StoreState,
    conversation_id: &ConversationId,
    participants: &[UserId],
    is_group: bool,
) {
    let now = Utc::now();
    let conversation = state
        .conversations
        .entry(conversation_id.clone())
        .or_insert_with(|| Conversation {
            id: conversation_id.clone(),
            participants: Default::default(),
            is_group,
            last_message: None,
            last_message_time: None,
            unread_count: 0,
            created_at: now,
            updated_at: now,
        });
    for participant in participants {
        conversation.participants.insert(participant.clone());
    }
}

/// Appends and refreshes the conversation's denormalized tail in the same
/// critical section as the append.
fn append_message(state: &mut StoreState, message: Message) {
    state
        .messages
        .entry(message.conversation_id.clone())
        .or_default()
        .push(message.clone());
    if let Some(conversation) = state.conversations.get_mut(&message.conversation_id) {
        conversation.last_message_time = Some(message.timestamp);
        conversation.updated_at = message.timestamp;
        conversation.last_message = Some(message);
    }
}

fn message_exists(
    state: &StoreState,
    conversation_id: &ConversationId,
    message_id: &MessageId,
) -> bool {
    state
        .messages
        .get(conversation_id)
        .is_some_and(|messages| messages.iter().any(|m| &m.id == message_id))
}

#[cfg(test)]
#[path = "tests/store_tests.rs"]
mod tests;

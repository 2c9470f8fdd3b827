use std::sync::Arc;

use shared::{
    domain::{ConversationId, GroupId, Message, MessageKind},
    error::ChatError,
};
use tracing::warn;

use crate::{
    connector::RealtimeConnector,
    rest::MessageApi,
    session::SessionProvider,
    store::{ChatStore, ConversationTarget, NewOutgoingMessage},
};

/// Multi-party messaging path. Sending is a dual-write: the optimistic
/// store append, the REST persistence call, and the socket emit are three
/// independent best-effort operations — a persistence failure is returned
/// to the caller but never rolls the local timeline back.
pub struct GroupMessenger {
    store: Arc<ChatStore>,
    api: Arc<dyn MessageApi>,
    connector: Arc<RealtimeConnector>,
    session: Arc<dyn SessionProvider>,
}

impl GroupMessenger {
    pub fn new(
        store: Arc<ChatStore>,
        api: Arc<dyn MessageApi>,
        connector: Arc<RealtimeConnector>,
        session: Arc<dyn SessionProvider>,
    ) -> Self {
        Self {
            store,
            api,
            connector,
            session,
        }
    }

    /// Registers the group locally and announces membership on the socket.
    pub async fn join(&self, group_id: &GroupId) -> Result<ConversationId, ChatError> {
        let conversation_id = self
            .store
            .ensure_conversation(&ConversationTarget::Group(group_id.clone()))
            .await?;
        self.connector.join_group(group_id).await;
        Ok(conversation_id)
    }

    pub async fn leave(&self, group_id: &GroupId) {
        self.connector.leave_group(group_id).await;
    }

    /// Sends a group message. The local append always survives; when the
    /// persistence call rejects, the error is surfaced to the caller and the
    /// optimistic record keeps whatever delivery status the transport gave
    /// it.
    pub async fn send(
        &self,
        group_id: &GroupId,
        content: &str,
        kind: MessageKind,
    ) -> Result<Message, ChatError> {
        let message = self
            .store
            .add_local_message(NewOutgoingMessage {
                target: ConversationTarget::Group(group_id.clone()),
                content: content.to_string(),
                kind,
                metadata: None,
            })
            .await?;

        if !self.connector.send_group(group_id, content, kind).await {
            warn!(group = %group_id, "socket emit skipped for group message");
        }

        let token = self.session.token().await.ok_or_else(|| {
            ChatError::AuthenticationFailure(
                "no session credential for group persistence".to_string(),
            )
        })?;
        let conversation_id = ConversationId::from(group_id.clone());
        self.api
            .send_message(&conversation_id, content, kind, &token)
            .await?;

        Ok(message)
    }

    /// Replaces local history for a group with the persisted timeline.
    pub async fn load_history(&self, group_id: &GroupId) -> Result<usize, ChatError> {
        let token = self.session.token().await.ok_or_else(|| {
            ChatError::AuthenticationFailure("no session credential for history fetch".to_string())
        })?;
        let conversation_id = self
            .store
            .ensure_conversation(&ConversationTarget::Group(group_id.clone()))
            .await?;
        let history = self.api.fetch_messages(&conversation_id, &token).await?;
        let count = history.len();
        self.store.load_messages(&conversation_id, history).await;
        Ok(count)
    }
}

#[cfg(test)]
#[path = "tests/groups_tests.rs"]
mod tests;

use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use shared::{
    domain::{ConversationId, Message, MessageKind},
    error::ChatError,
};

/// REST persistence boundary: message history on screen mount and durable
/// group sends. Live events never go through here; they arrive over the
/// realtime transport and are merged incrementally by the store.
#[async_trait]
pub trait MessageApi: Send + Sync {
    async fn fetch_messages(
        &self,
        conversation_id: &ConversationId,
        token: &str,
    ) -> Result<Vec<Message>, ChatError>;

    async fn send_message(
        &self,
        conversation_id: &ConversationId,
        content: &str,
        kind: MessageKind,
        token: &str,
    ) -> Result<Message, ChatError>;
}

/// Fallback collaborator for hosts without a persistence backend.
pub struct MissingMessageApi;

#[async_trait]
impl MessageApi for MissingMessageApi {
    async fn fetch_messages(
        &self,
        conversation_id: &ConversationId,
        _token: &str,
    ) -> Result<Vec<Message>, ChatError> {
        Err(unavailable(conversation_id))
    }

    async fn send_message(
        &self,
        conversation_id: &ConversationId,
        _content: &str,
        _kind: MessageKind,
        _token: &str,
    ) -> Result<Message, ChatError> {
        Err(unavailable(conversation_id))
    }
}

fn unavailable(conversation_id: &ConversationId) -> ChatError {
    ChatError::PersistenceFailure(
        anyhow::anyhow!("message api unavailable for conversation {conversation_id}").into(),
    )
}

#[derive(Debug, Serialize)]
struct SendMessageRequest<'a> {
    content: &'a str,
    #[serde(rename = "type")]
    kind: MessageKind,
}

pub struct HttpMessageApi {
    http: Client,
    base_url: String,
}

impl HttpMessageApi {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            http: Client::new(),
            base_url: base_url.into(),
        }
    }
}

#[async_trait]
impl MessageApi for HttpMessageApi {
    async fn fetch_messages(
        &self,
        conversation_id: &ConversationId,
        token: &str,
    ) -> Result<Vec<Message>, ChatError> {
        let messages = self
            .http
            .get(format!(
                "{}/conversations/{conversation_id}/messages",
                self.base_url
            ))
            .bearer_auth(token)
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
            .map_err(persistence_error)?
            .json()
            .await
            .map_err(persistence_error)?;
        Ok(messages)
    }

    async fn send_message(
        &self,
        conversation_id: &ConversationId,
        content: &str,
        kind: MessageKind,
        token: &str,
    ) -> Result<Message, ChatError> {
        let message = self
            .http
            .post(format!(
                "{}/conversations/{conversation_id}/messages",
                self.base_url
            ))
            .bearer_auth(token)
            .json(&SendMessageRequest { content, kind })
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
            .map_err(persistence_error)?
            .json()
            .await
            .map_err(persistence_error)?;
        Ok(message)
    }
}

fn persistence_error(err: reqwest::Error) -> ChatError {
    ChatError::PersistenceFailure(err.into())
}

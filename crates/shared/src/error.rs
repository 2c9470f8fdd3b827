use thiserror::Error;

/// Error taxonomy shared across the client core. Transport unavailability is
/// deliberately absent: outbound sends attempted while disconnected are
/// logged and skipped, and connection health is surfaced through the
/// connector's status observable instead of errors.
#[derive(Debug, Error)]
pub enum ChatError {
    #[error("invalid participant identifier: {0}")]
    InvalidIdentifier(String),

    #[error("cannot resolve a target conversation: {0}")]
    ConversationUnresolvable(String),

    #[error("text message content must not be empty")]
    EmptyMessage,

    #[error("authentication failed: {0}")]
    AuthenticationFailure(String),

    #[error("failed to persist message")]
    PersistenceFailure(#[source] Box<dyn std::error::Error + Send + Sync>),
}

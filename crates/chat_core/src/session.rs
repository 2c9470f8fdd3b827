use async_trait::async_trait;
use shared::domain::UserId;

/// Supplies the authenticated identity and the bearer credential consumed by
/// the transport handshake and REST calls. Session state is owned by the
/// host application; nothing in the core mutates it.
#[async_trait]
pub trait SessionProvider: Send + Sync {
    async fn token(&self) -> Option<String>;
    fn current_user(&self) -> Option<UserId>;
}

/// Fallback provider for hosts that wire the connector before a login
/// exists. Connecting with it is a logged no-op.
pub struct MissingSession;

#[async_trait]
impl SessionProvider for MissingSession {
    async fn token(&self) -> Option<String> {
        None
    }

    fn current_user(&self) -> Option<UserId> {
        None
    }
}

/// Fixed identity and credential, used by the demo binary and tests.
pub struct StaticSession {
    user: UserId,
    token: String,
}

impl StaticSession {
    pub fn new(user: impl Into<UserId>, token: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            token: token.into(),
        }
    }
}

#[async_trait]
impl SessionProvider for StaticSession {
    async fn token(&self) -> Option<String> {
        Some(self.token.clone())
    }

    fn current_user(&self) -> Option<UserId> {
        Some(self.user.clone())
    }
}

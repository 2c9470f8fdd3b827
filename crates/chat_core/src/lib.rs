pub mod config;
pub mod connector;
pub mod groups;
pub mod rest;
pub mod session;
pub mod store;

pub use config::{load_settings, ConnectorSettings};
pub use connector::{
    ConnectionStatus, FrameSink, FrameSource, RealtimeConnector, Transport, WebSocketTransport,
};
pub use groups::GroupMessenger;
pub use rest::{HttpMessageApi, MessageApi, MissingMessageApi};
pub use session::{MissingSession, SessionProvider, StaticSession};
pub use store::{
    ChatStore, ConversationTarget, InboundGroupMessage, InboundMessage, NewOutgoingMessage,
    StoreEvent,
};

use super::*;

use anyhow::Result;
use async_trait::async_trait;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use shared::domain::{DeliveryStatus, MessageId, UserId};
use shared::protocol::{ClientFrame, ServerFrame};
use tokio::{
    net::TcpListener,
    sync::{oneshot, Mutex},
};

use crate::config::ConnectorSettings;
use crate::connector::{FrameSink, FrameSource, Transport};
use crate::rest::HttpMessageApi;
use crate::session::{MissingSession, StaticSession};

struct AlwaysOnline {
    sent: Arc<Mutex<Vec<ClientFrame>>>,
}

#[async_trait]
impl Transport for AlwaysOnline {
    async fn open(
        &self,
        _endpoint: &str,
        _token: &str,
    ) -> Result<(Box<dyn FrameSink>, Box<dyn FrameSource>)> {
        Ok((
            Box::new(RecordingSink {
                sent: Arc::clone(&self.sent),
            }),
            Box::new(SilentSource),
        ))
    }
}

struct RecordingSink {
    sent: Arc<Mutex<Vec<ClientFrame>>>,
}

#[async_trait]
impl FrameSink for RecordingSink {
    async fn send(&mut self, frame: ClientFrame) -> Result<()> {
        self.sent.lock().await.push(frame);
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

struct SilentSource;

#[async_trait]
impl FrameSource for SilentSource {
    async fn next_frame(&mut self) -> Option<Result<ServerFrame>> {
        futures::future::pending::<()>().await;
        None
    }
}

#[derive(Clone)]
struct CaptureState {
    tx: Arc<Mutex<Option<oneshot::Sender<serde_json::Value>>>>,
}

async fn handle_group_send(
    State(state): State<CaptureState>,
    Path(conversation_id): Path<String>,
    Json(payload): Json<serde_json::Value>,
) -> Json<Message> {
    if let Some(tx) = state.tx.lock().await.take() {
        let _ = tx.send(payload.clone());
    }
    Json(Message {
        id: MessageId::from("srv-100"),
        conversation_id: ConversationId::from(conversation_id),
        sender_id: UserId::from("u1"),
        content: payload["content"].as_str().unwrap_or_default().to_string(),
        kind: MessageKind::Text,
        timestamp: "2024-01-01T00:00:00Z".parse().expect("timestamp"),
        status: DeliveryStatus::Sent,
        metadata: None,
    })
}

async fn spawn_api(router: Router) -> Result<String> {
    std::env::set_var("NO_PROXY", "127.0.0.1,localhost");
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    tokio::spawn(async move {
        let _ = axum::serve(listener, router).await;
    });
    Ok(format!("http://{addr}"))
}

async fn spawn_capture_api() -> Result<(String, oneshot::Receiver<serde_json::Value>)> {
    let (tx, rx) = oneshot::channel();
    let state = CaptureState {
        tx: Arc::new(Mutex::new(Some(tx))),
    };
    let app = Router::new()
        .route("/conversations/:id/messages", post(handle_group_send))
        .with_state(state);
    Ok((spawn_api(app).await?, rx))
}

async fn messenger_against(
    base_url: &str,
    session: Arc<dyn SessionProvider>,
) -> (GroupMessenger, Arc<ChatStore>, Arc<Mutex<Vec<ClientFrame>>>) {
    let store = ChatStore::new("u1");
    let sent = Arc::new(Mutex::new(Vec::new()));
    let transport = Arc::new(AlwaysOnline {
        sent: Arc::clone(&sent),
    });
    let connector = RealtimeConnector::with_transport(
        Arc::clone(&store),
        Arc::clone(&session),
        ConnectorSettings {
            endpoints: vec!["ws://unused/ws".to_string()],
            connect_timeout_secs: 1,
            max_attempts: 1,
            backoff_base_ms: 1,
            simulated_ack_delay_ms: None,
        },
        transport,
    );
    connector.connect().await;
    let messenger = GroupMessenger::new(
        Arc::clone(&store),
        Arc::new(HttpMessageApi::new(base_url)),
        connector,
        session,
    );
    (messenger, store, sent)
}

#[tokio::test]
async fn group_send_is_a_dual_write() {
    let (base_url, payload_rx) = spawn_capture_api().await.expect("spawn server");
    let (messenger, store, sent) = messenger_against(
        &base_url,
        Arc::new(StaticSession::new("u1", "token-1")),
    )
    .await;

    let message = messenger
        .send(&GroupId::from("grp-7"), "save 500 for friday", MessageKind::Text)
        .await
        .expect("send");

    let payload = payload_rx.await.expect("rest payload");
    assert_eq!(payload["content"], "save 500 for friday");
    assert_eq!(payload["type"], "text");

    let conversation_id = ConversationId::from("grp-7");
    let messages = store.messages(&conversation_id).await;
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].id, message.id);
    assert!(store
        .conversation(&conversation_id)
        .await
        .expect("conversation")
        .is_group);

    let frames = sent.lock().await.clone();
    assert!(frames.iter().any(|frame| matches!(
        frame,
        ClientFrame::GroupMessage { group_id, .. } if group_id.as_str() == "grp-7"
    )));
}

#[tokio::test]
async fn persistence_failure_keeps_the_optimistic_append() {
    let app = Router::new().route(
        "/conversations/:id/messages",
        post(|| async { StatusCode::INTERNAL_SERVER_ERROR }),
    );
    let base_url = spawn_api(app).await.expect("spawn server");
    let (messenger, store, sent) = messenger_against(
        &base_url,
        Arc::new(StaticSession::new("u1", "token-1")),
    )
    .await;

    let err = messenger
        .send(&GroupId::from("grp-7"), "doomed", MessageKind::Text)
        .await
        .expect_err("persistence must fail");
    assert!(matches!(err, ChatError::PersistenceFailure(_)));

    // the local timeline is unaffected by the backend outcome
    let messages = store.messages(&ConversationId::from("grp-7")).await;
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].content, "doomed");

    let frames = sent.lock().await.clone();
    assert!(frames
        .iter()
        .any(|frame| matches!(frame, ClientFrame::GroupMessage { .. })));
}

#[tokio::test]
async fn missing_credential_surfaces_authentication_failure() {
    let (base_url, _payload_rx) = spawn_capture_api().await.expect("spawn server");
    let (messenger, store, _sent) =
        messenger_against(&base_url, Arc::new(MissingSession)).await;

    let err = messenger
        .send(&GroupId::from("grp-7"), "no session", MessageKind::Text)
        .await
        .expect_err("must fail");
    assert!(matches!(err, ChatError::AuthenticationFailure(_)));

    // the optimistic append still happened before the credential check
    assert_eq!(store.messages(&ConversationId::from("grp-7")).await.len(), 1);
}

#[tokio::test]
async fn join_announces_membership_and_creates_the_conversation() {
    let (base_url, _payload_rx) = spawn_capture_api().await.expect("spawn server");
    let (messenger, store, sent) = messenger_against(
        &base_url,
        Arc::new(StaticSession::new("u1", "token-1")),
    )
    .await;

    let conversation_id = messenger.join(&GroupId::from("grp-7")).await.expect("join");
    assert_eq!(conversation_id, ConversationId::from("grp-7"));
    assert!(store.conversation(&conversation_id).await.is_some());

    let frames = sent.lock().await.clone();
    assert!(frames.iter().any(|frame| matches!(
        frame,
        ClientFrame::JoinGroup { group_id } if group_id.as_str() == "grp-7"
    )));
}

#[tokio::test]
async fn load_history_replaces_the_local_timeline() {
    let history = vec![
        Message {
            id: MessageId::from("h1"),
            conversation_id: ConversationId::from("grp-7"),
            sender_id: UserId::from("u1"),
            content: "older".to_string(),
            kind: MessageKind::Text,
            timestamp: "2024-01-01T00:00:00Z".parse().expect("timestamp"),
            status: DeliveryStatus::Read,
            metadata: None,
        },
        Message {
            id: MessageId::from("h2"),
            conversation_id: ConversationId::from("grp-7"),
            sender_id: UserId::from("u2"),
            content: "newer".to_string(),
            kind: MessageKind::Text,
            timestamp: "2024-01-02T00:00:00Z".parse().expect("timestamp"),
            status: DeliveryStatus::Delivered,
            metadata: None,
        },
    ];
    let app = Router::new().route(
        "/conversations/:id/messages",
        get(move || {
            let history = history.clone();
            async move { Json(history) }
        }),
    );
    let base_url = spawn_api(app).await.expect("spawn server");
    let (messenger, store, _sent) = messenger_against(
        &base_url,
        Arc::new(StaticSession::new("u1", "token-1")),
    )
    .await;

    let count = messenger
        .load_history(&GroupId::from("grp-7"))
        .await
        .expect("load");
    assert_eq!(count, 2);

    let conversation_id = ConversationId::from("grp-7");
    let messages = store.messages(&conversation_id).await;
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[1].content, "newer");

    let conversation = store
        .conversation(&conversation_id)
        .await
        .expect("conversation");
    assert_eq!(conversation.unread_count, 1);
    assert_eq!(
        conversation.last_message_time,
        Some("2024-01-02T00:00:00Z".parse().expect("timestamp"))
    );
}

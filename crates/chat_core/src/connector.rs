use std::{sync::Arc, time::Duration};

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use futures::{
    future::BoxFuture,
    stream::{SplitSink, SplitStream},
    SinkExt, StreamExt,
};
use shared::{
    domain::{DeliveryStatus, GroupId, Message, MessageId, MessageKind, UserId},
    protocol::{ClientFrame, ServerFrame},
};
use tokio::{
    net::TcpStream,
    sync::{watch, Mutex},
    task::JoinHandle,
    time::timeout,
};
use tokio_tungstenite::{
    connect_async, tungstenite::Message as WsMessage, MaybeTlsStream, WebSocketStream,
};
use tracing::{debug, error, info, warn};
use url::Url;

use crate::{
    config::ConnectorSettings,
    session::SessionProvider,
    store::{ChatStore, InboundGroupMessage, InboundMessage},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    Disconnected,
    Connecting,
    Connected,
}

/// Write half of one framed connection.
#[async_trait]
pub trait FrameSink: Send {
    async fn send(&mut self, frame: ClientFrame) -> Result<()>;
    async fn close(&mut self) -> Result<()>;
}

/// Read half of one framed connection. `None` means the peer closed.
#[async_trait]
pub trait FrameSource: Send {
    async fn next_frame(&mut self) -> Option<Result<ServerFrame>>;
}

/// Opens framed connections. Production code speaks JSON text frames over a
/// websocket; tests substitute scripted transports.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn open(
        &self,
        endpoint: &str,
        token: &str,
    ) -> Result<(Box<dyn FrameSink>, Box<dyn FrameSource>)>;
}

pub struct WebSocketTransport;

#[async_trait]
impl Transport for WebSocketTransport {
    async fn open(
        &self,
        endpoint: &str,
        token: &str,
    ) -> Result<(Box<dyn FrameSink>, Box<dyn FrameSource>)> {
        let mut url =
            Url::parse(endpoint).with_context(|| format!("invalid endpoint url: {endpoint}"))?;
        url.query_pairs_mut().append_pair("token", token);
        let (ws_stream, _) = connect_async(url.as_str())
            .await
            .with_context(|| format!("failed to connect websocket: {endpoint}"))?;
        let (writer, reader) = ws_stream.split();
        Ok((Box::new(WsSink { writer }), Box::new(WsSource { reader })))
    }
}

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

struct WsSink {
    writer: SplitSink<WsStream, WsMessage>,
}

#[async_trait]
impl FrameSink for WsSink {
    async fn send(&mut self, frame: ClientFrame) -> Result<()> {
        let text = serde_json::to_string(&frame)?;
        self.writer.send(WsMessage::Text(text)).await?;
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        self.writer.send(WsMessage::Close(None)).await?;
        Ok(())
    }
}

struct WsSource {
    reader: SplitStream<WsStream>,
}

#[async_trait]
impl FrameSource for WsSource {
    async fn next_frame(&mut self) -> Option<Result<ServerFrame>> {
        loop {
            match self.reader.next().await? {
                Ok(WsMessage::Text(text)) => {
                    return Some(
                        serde_json::from_str(&text)
                            .map_err(|err| anyhow!("invalid server frame: {err}")),
                    )
                }
                Ok(WsMessage::Close(_)) => return None,
                // ping/pong/binary keepalive
                Ok(_) => continue,
                Err(err) => return Some(Err(err.into())),
            }
        }
    }
}

struct ConnectorState {
    endpoint_index: usize,
    attempt: u32,
    auth_failed: bool,
    sink: Option<Box<dyn FrameSink>>,
    reader_task: Option<JoinHandle<()>>,
    reconnect_task: Option<JoinHandle<()>>,
}

/// Owns the single realtime connection: lifecycle, authentication handshake,
/// bounded reconnect with endpoint failover, and dispatch of inbound events
/// into the store. Transport failures never surface as errors; they are
/// logged and reflected in the status observable.
pub struct RealtimeConnector {
    store: Arc<ChatStore>,
    session: Arc<dyn SessionProvider>,
    transport: Arc<dyn Transport>,
    settings: ConnectorSettings,
    inner: Mutex<ConnectorState>,
    status_tx: watch::Sender<ConnectionStatus>,
}

impl RealtimeConnector {
    pub fn new(
        store: Arc<ChatStore>,
        session: Arc<dyn SessionProvider>,
        settings: ConnectorSettings,
    ) -> Arc<Self> {
        Self::with_transport(store, session, settings, Arc::new(WebSocketTransport))
    }

    pub fn with_transport(
        store: Arc<ChatStore>,
        session: Arc<dyn SessionProvider>,
        settings: ConnectorSettings,
        transport: Arc<dyn Transport>,
    ) -> Arc<Self> {
        let (status_tx, _) = watch::channel(ConnectionStatus::Disconnected);
        Arc::new(Self {
            store,
            session,
            transport,
            settings,
            inner: Mutex::new(ConnectorState {
                endpoint_index: 0,
                attempt: 0,
                auth_failed: false,
                sink: None,
                reader_task: None,
                reconnect_task: None,
            }),
            status_tx,
        })
    }

    /// Connection status observable; the UI subscribes here instead of
    /// catching transport errors.
    pub fn status(&self) -> watch::Receiver<ConnectionStatus> {
        self.status_tx.subscribe()
    }

    /// Opens the realtime connection with the current session credential. A
    /// missing credential is a logged no-op. Any existing connection is torn
    /// down first, so repeated calls never leak a second transport.
    pub async fn connect(self: &Arc<Self>) {
        let Some(token) = self.session.token().await else {
            warn!("connect skipped: no session credential available");
            return;
        };
        let Some(user_id) = self.session.current_user() else {
            warn!("connect skipped: no authenticated user");
            return;
        };
        self.teardown().await;
        {
            let mut state = self.inner.lock().await;
            state.attempt = 0;
            state.auth_failed = false;
        }
        self.try_connect(user_id, token).await;
    }

    /// Resets the endpoint cursor and retry budget, then reconnects. The
    /// only way back once every candidate endpoint has been exhausted or an
    /// authentication rejection halted retries.
    pub async fn force_reconnect(self: &Arc<Self>) {
        {
            let mut state = self.inner.lock().await;
            state.endpoint_index = 0;
            state.attempt = 0;
            state.auth_failed = false;
        }
        self.connect().await;
    }

    /// Closes the connection and cancels any pending reconnect timer. Safe
    /// to call from any state, any number of times.
    pub async fn disconnect(&self) {
        let connected = self.inner.lock().await.sink.is_some();
        if connected {
            if let Some(user_id) = self.session.current_user() {
                let _ = self.emit(ClientFrame::LeaveRoom { user_id }).await;
            }
        }
        self.teardown().await;
        info!("realtime transport disconnected");
    }

    /// Best-effort emit of an optimistic direct message. The store record
    /// already exists, so a failed or skipped emit only logs; a successful
    /// emit advances the record to `sent`.
    pub async fn send_direct(&self, recipient: &UserId, message: &Message) {
        let frame = ClientFrame::SendMessage {
            sender_id: message.sender_id.clone(),
            recipient_id: recipient.clone(),
            message: message.content.clone(),
            kind: message.kind,
        };
        if self.emit(frame).await {
            self.store
                .update_message_status(&message.id, DeliveryStatus::Sent)
                .await;
        } else {
            self.simulate_ack(&message.id);
        }
    }

    /// Best-effort emit of a group message. Returns whether the frame left
    /// the socket; persistence is the group messenger's concern.
    pub async fn send_group(&self, group_id: &GroupId, content: &str, kind: MessageKind) -> bool {
        self.emit(ClientFrame::GroupMessage {
            group_id: group_id.clone(),
            content: content.to_string(),
            kind,
        })
        .await
    }

    pub async fn join_group(&self, group_id: &GroupId) {
        let _ = self
            .emit(ClientFrame::JoinGroup {
                group_id: group_id.clone(),
            })
            .await;
    }

    pub async fn leave_group(&self, group_id: &GroupId) {
        let _ = self
            .emit(ClientFrame::LeaveGroup {
                group_id: group_id.clone(),
            })
            .await;
    }

    fn try_connect(self: &Arc<Self>, user_id: UserId, token: String) -> BoxFuture<'static, ()> {
        let connector = Arc::clone(self);
        Box::pin(async move {
            let endpoint = {
                let state = connector.inner.lock().await;
                match connector.settings.endpoints.get(state.endpoint_index) {
                    Some(endpoint) => endpoint.clone(),
                    None => {
                        warn!("no transport endpoints configured");
                        return;
                    }
                }
            };
            connector.status_tx.send_replace(ConnectionStatus::Connecting);
            debug!(%endpoint, "opening realtime transport");

            let opened = timeout(
                connector.settings.connect_timeout(),
                connector.transport.open(&endpoint, &token),
            )
            .await;

            match opened {
                Ok(Ok((mut sink, source))) => {
                    let join = sink
                        .send(ClientFrame::JoinRoom {
                            user_id: user_id.clone(),
                        })
                        .await;
                    if let Err(err) = join {
                        warn!(%endpoint, "handshake emit failed: {err}");
                        connector.handle_connection_failure(user_id, token).await;
                        return;
                    }
                    {
                        let mut state = connector.inner.lock().await;
                        state.attempt = 0;
                        state.sink = Some(sink);
                        state.reader_task = Some(connector.spawn_reader(source, user_id, token));
                    }
                    connector.status_tx.send_replace(ConnectionStatus::Connected);
                    info!(%endpoint, "realtime transport connected");
                }
                Ok(Err(err)) => {
                    warn!(%endpoint, "transport connect failed: {err}");
                    connector.handle_connection_failure(user_id, token).await;
                }
                Err(_) => {
                    warn!(
                        %endpoint,
                        timeout_secs = connector.settings.connect_timeout_secs,
                        "transport connect timed out"
                    );
                    connector.handle_connection_failure(user_id, token).await;
                }
            }
        })
    }

    fn spawn_reader(
        self: &Arc<Self>,
        mut source: Box<dyn FrameSource>,
        user_id: UserId,
        token: String,
    ) -> JoinHandle<()> {
        let connector = Arc::clone(self);
        tokio::spawn(async move {
            while let Some(frame) = source.next_frame().await {
                match frame {
                    Ok(frame) => connector.dispatch(frame).await,
                    Err(err) => {
                        warn!("transport receive failed: {err}");
                        break;
                    }
                }
                if connector.inner.lock().await.auth_failed {
                    break;
                }
            }
            connector.on_connection_lost(user_id, token).await;
        })
    }

    async fn dispatch(&self, frame: ServerFrame) {
        match frame {
            ServerFrame::Message {
                sender_id,
                recipient_id,
                content,
                kind,
                id,
                metadata,
            } => {
                let inbound = InboundMessage {
                    sender_id,
                    recipient_id,
                    server_id: id,
                    content,
                    kind,
                    metadata,
                };
                if let Err(err) = self.store.reconcile_remote_message(inbound).await {
                    warn!("failed to reconcile inbound message: {err}");
                }
            }
            ServerFrame::GroupMessage {
                group_id,
                id,
                sender_id,
                content,
                kind,
                metadata,
            } => {
                let inbound = InboundGroupMessage {
                    group_id,
                    server_id: id,
                    sender_id,
                    content,
                    kind,
                    metadata,
                };
                if let Err(err) = self.store.reconcile_group_message(inbound).await {
                    warn!("failed to reconcile inbound group message: {err}");
                }
            }
            ServerFrame::MessageDelivered { message_id, .. } => {
                self.store
                    .update_message_status(&message_id, DeliveryStatus::Delivered)
                    .await;
            }
            ServerFrame::MessageRead { message_id, .. } => {
                self.store
                    .update_message_status(&message_id, DeliveryStatus::Read)
                    .await;
            }
            // ephemeral UI state; acknowledged here so the events are not
            // dropped silently
            ServerFrame::TypingStart { sender_id } => {
                debug!(sender = %sender_id, "typing started")
            }
            ServerFrame::TypingStop { sender_id } => {
                debug!(sender = %sender_id, "typing stopped")
            }
            ServerFrame::AuthError { message } => {
                error!("transport authentication rejected: {message}");
                self.inner.lock().await.auth_failed = true;
            }
        }
    }

    async fn on_connection_lost(self: &Arc<Self>, user_id: UserId, token: String) {
        {
            let mut state = self.inner.lock().await;
            state.sink = None;
            state.reader_task = None;
        }
        self.handle_connection_failure(user_id, token).await;
    }

    async fn handle_connection_failure(self: &Arc<Self>, user_id: UserId, token: String) {
        self.status_tx.send_replace(ConnectionStatus::Disconnected);
        let delay = {
            let mut state = self.inner.lock().await;
            if state.auth_failed {
                warn!("reconnect halted until forced: authentication was rejected");
                None
            } else {
                state.attempt += 1;
                if state.attempt >= self.settings.max_attempts {
                    if state.endpoint_index + 1 < self.settings.endpoints.len() {
                        state.endpoint_index += 1;
                        state.attempt = 0;
                        info!(
                            endpoint_index = state.endpoint_index,
                            "advancing to next candidate endpoint"
                        );
                        Some(Duration::ZERO)
                    } else {
                        warn!("all candidate endpoints exhausted; staying disconnected");
                        None
                    }
                } else {
                    Some(self.settings.backoff_base() * state.attempt)
                }
            }
        };

        let Some(delay) = delay else {
            return;
        };
        let connector = Arc::clone(self);
        let handle = tokio::spawn(async move {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            connector.try_connect(user_id, token).await;
        });
        self.inner.lock().await.reconnect_task = Some(handle);
    }

    async fn teardown(&self) {
        let (sink, reader_task, reconnect_task) = {
            let mut state = self.inner.lock().await;
            (
                state.sink.take(),
                state.reader_task.take(),
                state.reconnect_task.take(),
            )
        };
        if let Some(task) = reader_task {
            task.abort();
        }
        if let Some(task) = reconnect_task {
            task.abort();
        }
        if let Some(mut sink) = sink {
            if let Err(err) = sink.close().await {
                debug!("transport close failed: {err}");
            }
        }
        self.status_tx.send_replace(ConnectionStatus::Disconnected);
    }

    async fn emit(&self, frame: ClientFrame) -> bool {
        let mut state = self.inner.lock().await;
        match state.sink.as_mut() {
            Some(sink) => match sink.send(frame).await {
                Ok(()) => true,
                Err(err) => {
                    warn!("transport emit failed: {err}");
                    false
                }
            },
            None => {
                warn!("transport not connected; outbound frame skipped");
                false
            }
        }
    }

    fn simulate_ack(&self, message_id: &MessageId) {
        let Some(delay) = self.settings.simulated_ack_delay() else {
            return;
        };
        let store = Arc::clone(&self.store);
        let message_id = message_id.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            store
                .update_message_status(&message_id, DeliveryStatus::Sent)
                .await;
        });
    }
}

#[cfg(test)]
#[path = "tests/connector_tests.rs"]
mod tests;

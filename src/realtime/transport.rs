//! Remote realtime endpoint seam and its WebSocket implementation.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::{
    net::TcpStream,
    sync::{mpsc, watch},
    task::JoinHandle,
    time::{self, MissedTickBehavior},
};
use tokio_tungstenite::{
    connect_async,
    tungstenite::{
        client::IntoClientRequest,
        handshake::client::Request,
        http::{header::AUTHORIZATION, HeaderValue, StatusCode},
        Error as WsError, Message,
    },
    MaybeTlsStream, WebSocketStream,
};

use super::protocol::{ServerEvent, ServerEventKind};
use crate::config::{Endpoint, SessionConfig};
use crate::error::{ParleyError, Result};

type RealtimeWebSocket = WebSocketStream<MaybeTlsStream<TcpStream>>;

const TRANSPORT_ERROR_TYPE: &str = "transport.error";

/// Connection to the remote realtime endpoint.
///
/// `next_event` must be cancel-safe: the session controller polls it inside
/// `tokio::select!` alongside captured audio.
#[async_trait]
pub trait RealtimeTransport: Send {
    /// Open the connection. Returns once the remote side has accepted it.
    async fn connect(&mut self) -> Result<()>;

    /// Close the connection. Safe to call when already closed.
    async fn disconnect(&mut self) -> Result<()>;

    fn is_connected(&self) -> bool;

    /// Send one serialized client event.
    async fn send(&mut self, payload: Value) -> Result<()>;

    /// Next server event, or `None` once the connection is closed.
    async fn next_event(&mut self) -> Option<ServerEvent>;
}

struct Runtime {
    outgoing_tx: mpsc::UnboundedSender<String>,
    shutdown_tx: watch::Sender<bool>,
    task: JoinHandle<()>,
}

/// Realtime transport over a WebSocket.
pub struct WebSocketTransport {
    endpoint: Endpoint,
    heartbeat_interval: Duration,
    connected: Arc<AtomicBool>,
    events_rx: Option<mpsc::UnboundedReceiver<ServerEvent>>,
    runtime: Option<Runtime>,
}

impl WebSocketTransport {
    pub fn new(endpoint: Endpoint, heartbeat_interval: Duration) -> Self {
        Self {
            endpoint,
            heartbeat_interval,
            connected: Arc::new(AtomicBool::new(false)),
            events_rx: None,
            runtime: None,
        }
    }

    /// Build from a session config, resolving the endpoint and credential.
    pub fn from_config(config: &SessionConfig) -> Result<Self> {
        Ok(Self::new(config.endpoint()?, config.heartbeat_interval))
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }
}

#[async_trait]
impl RealtimeTransport for WebSocketTransport {
    async fn connect(&mut self) -> Result<()> {
        if self.runtime.is_some() {
            return Err(ParleyError::InvalidState(
                "Realtime transport is already connected".into(),
            ));
        }

        let request = handshake_request(&self.endpoint)?;
        let (socket, _) = connect_async(request).await.map_err(handshake_error)?;
        tracing::debug!(url = %self.endpoint.url(), "realtime websocket connected");

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (outgoing_tx, outgoing_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        self.connected.store(true, Ordering::SeqCst);
        let task = tokio::spawn(run_connection(
            socket,
            events_tx,
            outgoing_rx,
            shutdown_rx,
            self.heartbeat_interval,
            Arc::clone(&self.connected),
        ));

        self.events_rx = Some(events_rx);
        self.runtime = Some(Runtime {
            outgoing_tx,
            shutdown_tx,
            task,
        });
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<()> {
        self.connected.store(false, Ordering::SeqCst);
        if let Some(runtime) = self.runtime.take() {
            let _ = runtime.shutdown_tx.send(true);
            runtime.task.await.map_err(|error| {
                ParleyError::RemoteConnectionFailed(format!(
                    "Realtime connection task failed: {error}"
                ))
            })?;
        }
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn send(&mut self, payload: Value) -> Result<()> {
        let runtime = self.runtime.as_ref().ok_or_else(|| {
            ParleyError::InvalidState("Realtime transport is not connected".into())
        })?;
        let text = serde_json::to_string(&payload)?;
        runtime.outgoing_tx.send(text).map_err(|_| {
            ParleyError::RemoteConnectionFailed("Realtime connection is closed".into())
        })
    }

    async fn next_event(&mut self) -> Option<ServerEvent> {
        self.events_rx.as_mut()?.recv().await
    }
}

impl Drop for WebSocketTransport {
    fn drop(&mut self) {
        if let Some(runtime) = self.runtime.take() {
            let _ = runtime.shutdown_tx.send(true);
            runtime.task.abort();
        }
    }
}

async fn run_connection(
    mut socket: RealtimeWebSocket,
    events_tx: mpsc::UnboundedSender<ServerEvent>,
    mut outgoing_rx: mpsc::UnboundedReceiver<String>,
    mut shutdown_rx: watch::Receiver<bool>,
    heartbeat_interval: Duration,
    connected: Arc<AtomicBool>,
) {
    let mut heartbeat = time::interval(heartbeat_interval);
    heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);
    heartbeat.tick().await;

    loop {
        tokio::select! {
            changed = shutdown_rx.changed() => {
                if changed.is_err() || *shutdown_rx.borrow() {
                    let _ = socket.send(Message::Close(None)).await;
                    break;
                }
            }
            outgoing = outgoing_rx.recv() => {
                let Some(text) = outgoing else {
                    let _ = socket.send(Message::Close(None)).await;
                    break;
                };
                if let Err(error) = socket.send(Message::Text(text.into())).await {
                    report_error(&events_tx, format!("Realtime send failed: {error}"));
                    break;
                }
            }
            _ = heartbeat.tick() => {
                if let Err(error) = socket.send(Message::Ping(Default::default())).await {
                    report_error(&events_tx, format!("Realtime heartbeat failed: {error}"));
                    break;
                }
            }
            frame = socket.next() => {
                let message = match frame {
                    Some(Ok(message)) => message,
                    Some(Err(error)) => {
                        report_error(&events_tx, format!("Realtime receive failed: {error}"));
                        break;
                    }
                    None => break,
                };
                match message {
                    Message::Text(text) => forward_event(&events_tx, text.as_str()),
                    Message::Binary(bytes) => match std::str::from_utf8(&bytes) {
                        Ok(text) => forward_event(&events_tx, text),
                        Err(_) => tracing::debug!(len = bytes.len(), "ignoring non-utf8 binary frame"),
                    },
                    Message::Ping(payload) => {
                        if let Err(error) = socket.send(Message::Pong(payload)).await {
                            report_error(&events_tx, format!("Realtime pong failed: {error}"));
                            break;
                        }
                    }
                    Message::Close(close) => {
                        tracing::debug!(reason = ?close, "remote endpoint sent close");
                        break;
                    }
                    Message::Pong(_) | Message::Frame(_) => {}
                }
            }
        }
    }

    connected.store(false, Ordering::SeqCst);
    tracing::debug!("realtime websocket closed");
}

fn forward_event(events_tx: &mpsc::UnboundedSender<ServerEvent>, text: &str) {
    match ServerEvent::parse(text) {
        Ok(event) => {
            let _ = events_tx.send(event);
        }
        Err(error) => report_error(events_tx, format!("Unparseable realtime payload: {error}")),
    }
}

/// Surface a local transport failure to the controller.
///
/// The event is typed `transport.error` so the log can tell it apart from an
/// `error` the remote endpoint sent, while still reaching the controller as
/// [`ServerEventKind::Error`].
fn report_error(events_tx: &mpsc::UnboundedSender<ServerEvent>, message: String) {
    tracing::warn!(error = %message, "realtime transport error");
    let _ = events_tx.send(local_error_event(message));
}

fn local_error_event(message: String) -> ServerEvent {
    ServerEvent {
        event_type: TRANSPORT_ERROR_TYPE.to_string(),
        payload: json!({"type": TRANSPORT_ERROR_TYPE, "error": {"message": message}}),
        kind: ServerEventKind::Error { message },
    }
}

/// Handshake request for `endpoint`. Only a direct endpoint carries a credential.
fn handshake_request(endpoint: &Endpoint) -> Result<Request> {
    let mut request = endpoint.url().into_client_request().map_err(|error| {
        ParleyError::Configuration(format!("Invalid realtime websocket URL: {error}"))
    })?;
    if let Endpoint::Direct { api_key, .. } = endpoint {
        let bearer = HeaderValue::from_str(&format!("Bearer {api_key}"))
            .map_err(|_| ParleyError::Configuration("API key is not a valid header value".into()))?;
        let headers = request.headers_mut();
        headers.insert(AUTHORIZATION, bearer);
        headers.insert("OpenAI-Beta", HeaderValue::from_static("realtime=v1"));
    }
    Ok(request)
}

fn handshake_error(error: WsError) -> ParleyError {
    match error {
        WsError::Http(response) => match response.status() {
            status @ (StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN) => {
                ParleyError::Authentication(format!("Realtime endpoint refused credentials ({status})"))
            }
            status => ParleyError::RemoteConnectionFailed(format!(
                "Realtime endpoint rejected the handshake ({status})"
            )),
        },
        WsError::Url(error) => {
            ParleyError::Configuration(format!("Invalid realtime websocket URL: {error}"))
        }
        other => ParleyError::RemoteConnectionFailed(format!("Realtime connect failed: {other}")),
    }
}

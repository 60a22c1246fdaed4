use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};
use url::Url;

use crate::client::models::events::{parse_channel_event, ChannelEvent, OutgoingEvent};
use crate::client::session::SessionIdentity;

#[derive(Debug, Clone, Error)]
pub enum ChannelError {
    #[error("connection failed: {0}")]
    ConnectionFailed(String),
    #[error("authentication failed: {0}")]
    AuthenticationFailed(String),
    #[error("operation timed out")]
    Timeout,
    #[error("channel not connected")]
    NotConnected,
}

/// Outbound half of the transport channel. Emissions are fire-and-forget;
/// an error only means "not connected right now".
pub trait ChannelSink: Send + Sync {
    fn emit(&self, event: OutgoingEvent) -> Result<(), ChannelError>;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct AuthMessage {
    pub message_type: String, // "auth"
    pub session_token: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct AuthResponse {
    pub message_type: String, // "auth_response"
    pub success: bool,
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
}

type WsSink = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>;
type WsStream = SplitStream<WebSocketStream<MaybeTlsStream<TcpStream>>>;

const INITIAL_RETRY_DELAY: tokio::time::Duration = tokio::time::Duration::from_secs(2);
const MAX_RETRY_DELAY: tokio::time::Duration = tokio::time::Duration::from_secs(30);
const AUTH_TIMEOUT: tokio::time::Duration = tokio::time::Duration::from_secs(10);

/// One live connection per authenticated session.
///
/// The initial connect is awaited so callers learn about bad credentials; from
/// then on a supervision task reconnects with exponential backoff for the
/// client's lifetime. `Connected`/`Disconnected` are pushed into the event
/// stream around each (re)connection so the sync engine can re-issue
/// `join_chat` (join state does not survive a reconnect) and drive the
/// connection indicator.
pub struct SocketClient {
    url: String,
    session: SessionIdentity,
    max_retry_attempts: u32,
    event_tx: mpsc::UnboundedSender<ChannelEvent>,
    event_rx: Option<mpsc::UnboundedReceiver<ChannelEvent>>,
    outgoing: Arc<Mutex<Option<mpsc::UnboundedSender<OutgoingEvent>>>>,
    connected: Arc<AtomicBool>,
}

impl SocketClient {
    pub fn new(url: String, session: SessionIdentity) -> Self {
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        Self {
            url,
            session,
            max_retry_attempts: 5,
            event_tx,
            event_rx: Some(event_rx),
            outgoing: Arc::new(Mutex::new(None)),
            connected: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Hand the single event receiver to the sync engine. Can only be taken once.
    pub fn take_receiver(&mut self) -> Option<mpsc::UnboundedReceiver<ChannelEvent>> {
        self.event_rx.take()
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// Connect and authenticate, then hand the connection to the supervision
    /// task that keeps it alive.
    pub async fn connect(&mut self) -> Result<(), ChannelError> {
        let mut delay = INITIAL_RETRY_DELAY;
        let mut last_err = ChannelError::ConnectionFailed("no attempts made".to_string());
        for attempt in 1..=self.max_retry_attempts {
            match try_connect(&self.url, &self.session.token).await {
                Ok((sink, stream)) => {
                    let recv_done = install_connection(
                        sink,
                        stream,
                        self.event_tx.clone(),
                        self.outgoing.clone(),
                        self.connected.clone(),
                    );
                    self.spawn_supervisor(recv_done);
                    log::info!("[WS:CLIENT] connected and authenticated to {}", self.url);
                    return Ok(());
                }
                Err(e) => {
                    log::warn!("[WS:CLIENT] connection attempt {} failed: {}", attempt, e);
                    last_err = e;
                    if attempt < self.max_retry_attempts {
                        tokio::time::sleep(delay).await;
                        delay = std::cmp::min(delay * 2, MAX_RETRY_DELAY);
                    }
                }
            }
        }
        Err(last_err)
    }

    fn spawn_supervisor(&self, mut recv_done: tokio::task::JoinHandle<()>) {
        let url = self.url.clone();
        let token = self.session.token.clone();
        let event_tx = self.event_tx.clone();
        let outgoing = self.outgoing.clone();
        let connected = self.connected.clone();

        tokio::spawn(async move {
            loop {
                let _ = (&mut recv_done).await;
                connected.store(false, Ordering::SeqCst);
                outgoing.lock().unwrap().take();
                if event_tx.send(ChannelEvent::Disconnected).is_err() {
                    // engine gone, nobody left to reconnect for
                    return;
                }
                log::warn!("[WS:CLIENT] connection lost, reconnecting...");

                let mut delay = INITIAL_RETRY_DELAY;
                loop {
                    match try_connect(&url, &token).await {
                        Ok((sink, stream)) => {
                            recv_done = install_connection(
                                sink,
                                stream,
                                event_tx.clone(),
                                outgoing.clone(),
                                connected.clone(),
                            );
                            log::info!("[WS:CLIENT] reconnected to {}", url);
                            break;
                        }
                        Err(e) => {
                            log::warn!("[WS:CLIENT] reconnect failed: {}, retrying in {:?}", e, delay);
                            tokio::time::sleep(delay).await;
                            delay = std::cmp::min(delay * 2, MAX_RETRY_DELAY);
                        }
                    }
                    if event_tx.is_closed() {
                        return;
                    }
                }
            }
        });
    }
}

impl ChannelSink for SocketClient {
    fn emit(&self, event: OutgoingEvent) -> Result<(), ChannelError> {
        let guard = self.outgoing.lock().unwrap();
        match guard.as_ref() {
            Some(tx) => tx.send(event).map_err(|_| ChannelError::NotConnected),
            None => Err(ChannelError::NotConnected),
        }
    }
}

/// Dial, upgrade, and run the auth handshake. Returns the split stream halves.
async fn try_connect(url: &str, token: &str) -> Result<(WsSink, WsStream), ChannelError> {
    let url = Url::parse(url).map_err(|e| ChannelError::ConnectionFailed(e.to_string()))?;
    let (ws_stream, _) = connect_async(url.as_str())
        .await
        .map_err(|e| ChannelError::ConnectionFailed(format!("failed to connect: {}", e)))?;

    let (mut ws_sender, mut ws_receiver) = ws_stream.split();

    let auth = AuthMessage {
        message_type: "auth".to_string(),
        session_token: token.to_string(),
    };
    let auth_json = serde_json::to_string(&auth)
        .map_err(|e| ChannelError::AuthenticationFailed(format!("serialize auth: {}", e)))?;
    ws_sender
        .send(Message::Text(auth_json))
        .await
        .map_err(|e| ChannelError::AuthenticationFailed(format!("send auth: {}", e)))?;

    let response = match tokio::time::timeout(AUTH_TIMEOUT, ws_receiver.next()).await {
        Ok(Some(Ok(Message::Text(text)))) => serde_json::from_str::<AuthResponse>(&text)
            .map_err(|e| ChannelError::AuthenticationFailed(format!("invalid auth response: {}", e)))?,
        Ok(Some(Ok(Message::Close(_)))) => {
            return Err(ChannelError::AuthenticationFailed(
                "server closed connection during auth".to_string(),
            ));
        }
        Ok(Some(Ok(_))) => {
            return Err(ChannelError::AuthenticationFailed(
                "unexpected frame during auth".to_string(),
            ));
        }
        Ok(Some(Err(e))) => {
            return Err(ChannelError::AuthenticationFailed(format!(
                "websocket error during auth: {}",
                e
            )));
        }
        Ok(None) => {
            return Err(ChannelError::AuthenticationFailed(
                "connection closed during auth".to_string(),
            ));
        }
        Err(_) => return Err(ChannelError::Timeout),
    };

    if !response.success {
        let reason = response
            .error
            .unwrap_or_else(|| "unknown authentication error".to_string());
        return Err(ChannelError::AuthenticationFailed(reason));
    }

    log::debug!("[WS:CLIENT] authenticated as {:?}", response.user_id);
    Ok((ws_sender, ws_receiver))
}

/// Wire a freshly-authenticated connection into the client: spawn the
/// incoming and outgoing io tasks, publish the outgoing sender, flip the
/// connected flag, and announce `Connected`. Returns the incoming task handle
/// the supervisor waits on.
fn install_connection(
    mut ws_sender: WsSink,
    ws_receiver: WsStream,
    event_tx: mpsc::UnboundedSender<ChannelEvent>,
    outgoing: Arc<Mutex<Option<mpsc::UnboundedSender<OutgoingEvent>>>>,
    connected: Arc<AtomicBool>,
) -> tokio::task::JoinHandle<()> {
    let (outgoing_tx, mut outgoing_rx) = mpsc::unbounded_channel::<OutgoingEvent>();
    *outgoing.lock().unwrap() = Some(outgoing_tx);
    connected.store(true, Ordering::SeqCst);
    let _ = event_tx.send(ChannelEvent::Connected);

    tokio::spawn(async move {
        while let Some(event) = outgoing_rx.recv().await {
            let json = match serde_json::to_string(&event) {
                Ok(json) => json,
                Err(e) => {
                    log::warn!("[WS:CLIENT] failed to serialize outgoing event: {}", e);
                    continue;
                }
            };
            if let Err(e) = ws_sender.send(Message::Text(json)).await {
                log::warn!("[WS:CLIENT] failed to send event: {}", e);
                break;
            }
        }
    });

    tokio::spawn(handle_incoming(ws_receiver, event_tx))
}

/// Forward inbound frames to the engine, validating each at the boundary.
async fn handle_incoming(mut ws_receiver: WsStream, event_tx: mpsc::UnboundedSender<ChannelEvent>) {
    while let Some(message) = ws_receiver.next().await {
        match message {
            Ok(Message::Text(text)) => match parse_channel_event(&text) {
                Ok(event) => {
                    if event_tx.send(event).is_err() {
                        log::debug!("[WS:CLIENT] event receiver dropped, stopping");
                        return;
                    }
                }
                Err(e) => {
                    log::warn!("[WS:CLIENT] dropping unparseable frame: {} - raw: {}", e, text);
                }
            },
            Ok(Message::Close(_)) => {
                log::info!("[WS:CLIENT] connection closed by server");
                break;
            }
            Ok(_) => {
                // binary, ping, pong: nothing for us
            }
            Err(e) => {
                log::warn!("[WS:CLIENT] websocket error: {}", e);
                break;
            }
        }
    }
}

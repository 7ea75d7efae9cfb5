//! ConnectionActor - owns the WebSocket, heartbeat and reconnect timers
//!
//! ## Message Flow
//!
//! ```text
//! Socket frame → decode JSON → heartbeat? → ConnectionEvent::Heartbeat
//!                                   └────→ ConnectionEvent::Message → [Monitor, ...]
//!     ↑
//!     └─── Commands (Connect, Disconnect, Send, Subscribe, GetStatus, Shutdown)
//! ```
//!
//! Timers are plain values owned by the actor. Cancelling one means dropping it, so a
//! disconnect can never be followed by a stray reconnect or heartbeat.

use std::future::{Future, pending};
use std::pin::Pin;

use anyhow::{Context, Result};
use futures::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::net::TcpStream;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{Instant, Interval, MissedTickBehavior, Sleep, interval_at, sleep};
use tokio_tungstenite::{
    MaybeTlsStream, WebSocketStream, connect_async,
    tungstenite::{
        Error as WsError, Message,
        client::IntoClientRequest,
        http::{HeaderValue, header::USER_AGENT},
    },
};
use tracing::{debug, error, info, instrument, trace, warn};

use crate::config::ConnectionConfig;
use crate::messages::WireMessage;

use super::{
    ConnectionCommand, ConnectionError, ConnectionEvent, ConnectionState, ConnectionStatus,
    EVENT_BUFFER,
};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

type Handshake = Pin<Box<dyn Future<Output = Result<WsStream, ConnectionError>> + Send>>;

const USER_AGENT_VALUE: &str = concat!("fleet-viewer/", env!("CARGO_PKG_VERSION"));

/// Actor that maintains a single push connection
pub struct ConnectionActor {
    /// Target WebSocket URL
    url: String,

    /// Reconnect and heartbeat limits
    config: ConnectionConfig,

    state: ConnectionState,

    /// Reconnect attempts since the last successful handshake
    reconnect_attempts: u32,

    dropped_sends: u64,

    decode_errors: u64,

    dropped_events: u64,

    /// Command receiver for control messages
    command_rx: mpsc::Receiver<ConnectionCommand>,

    /// One sender per consumer, pruned when the consumer goes away
    subscribers: Vec<mpsc::Sender<ConnectionEvent>>,

    /// In-flight handshake while `Connecting`
    handshake: Option<Handshake>,

    /// Open socket while `Open`
    socket: Option<WsStream>,

    /// Outbound heartbeat timer while `Open`
    heartbeat: Option<Interval>,

    /// Pending reconnect while `Closed`
    reconnect: Option<Pin<Box<Sleep>>>,
}

impl ConnectionActor {
    /// Create a new connection actor in the `Idle` state
    pub fn new(
        url: String,
        config: ConnectionConfig,
        command_rx: mpsc::Receiver<ConnectionCommand>,
    ) -> Self {
        Self {
            url,
            config,
            state: ConnectionState::Idle,
            reconnect_attempts: 0,
            dropped_sends: 0,
            decode_errors: 0,
            dropped_events: 0,
            command_rx,
            subscribers: Vec::new(),
            handshake: None,
            socket: None,
            heartbeat: None,
            reconnect: None,
        }
    }

    /// Run the actor's main loop
    ///
    /// Runs until a Shutdown command is received or every handle is dropped.
    #[instrument(skip(self), fields(url = %self.url))]
    pub async fn run(mut self) {
        debug!("starting connection actor");

        loop {
            tokio::select! {
                cmd = self.command_rx.recv() => {
                    let Some(cmd) = cmd else {
                        warn!("command channel closed, shutting down");
                        self.disconnect().await;
                        break;
                    };

                    if !self.handle_command(cmd).await {
                        break;
                    }
                }

                result = wait_handshake(&mut self.handshake) => {
                    self.handshake = None;
                    self.on_handshake(result);
                }

                frame = next_frame(&mut self.socket) => {
                    self.on_frame(frame);
                }

                _ = tick(&mut self.heartbeat) => {
                    trace!("sending heartbeat");
                    self.send(WireMessage::heartbeat()).await;
                }

                _ = wait_reconnect(&mut self.reconnect) => {
                    self.reconnect = None;
                    self.start_connect();
                }
            }
        }

        debug!("connection actor stopped");
    }

    /// Returns `false` when the actor should stop
    async fn handle_command(&mut self, cmd: ConnectionCommand) -> bool {
        match cmd {
            ConnectionCommand::Connect => {
                if matches!(
                    self.state,
                    ConnectionState::Open | ConnectionState::Connecting
                ) {
                    debug!("connect ignored, connection is {}", self.state);
                } else {
                    self.reconnect_attempts = 0;
                    self.reconnect = None;
                    self.start_connect();
                }
            }

            ConnectionCommand::Disconnect { respond_to } => {
                self.disconnect().await;
                let _ = respond_to.send(());
            }

            ConnectionCommand::Send { payload } => {
                self.send(payload).await;
            }

            ConnectionCommand::Subscribe { respond_to } => {
                let (tx, rx) = mpsc::channel(EVENT_BUFFER);
                self.subscribers.push(tx);
                let _ = respond_to.send(rx);
            }

            ConnectionCommand::GetStatus { respond_to } => {
                let _ = respond_to.send(self.status());
            }

            ConnectionCommand::Shutdown => {
                debug!("received shutdown command");
                self.disconnect().await;
                return false;
            }
        }

        true
    }

    fn status(&self) -> ConnectionStatus {
        ConnectionStatus {
            state: self.state,
            reconnect_attempts: self.reconnect_attempts,
            dropped_sends: self.dropped_sends,
            decode_errors: self.decode_errors,
            dropped_events: self.dropped_events,
        }
    }

    fn start_connect(&mut self) {
        info!("connecting to {}", self.url);
        self.state = ConnectionState::Connecting;
        self.handshake = Some(handshake(self.url.clone()));
    }

    fn on_handshake(&mut self, result: Result<WsStream, ConnectionError>) {
        match result {
            Ok(socket) => {
                info!("WebSocket connected");
                self.socket = Some(socket);
                self.state = ConnectionState::Open;
                self.reconnect_attempts = 0;
                self.heartbeat = self.config.heartbeat_interval().map(|period| {
                    let mut timer = interval_at(Instant::now() + period, period);
                    timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
                    timer
                });
                self.emit(ConnectionEvent::Connected);
            }
            Err(e) => {
                warn!("WebSocket handshake failed: {e}");
                self.state = ConnectionState::Closed;
                self.emit(ConnectionEvent::Error(e));
                self.schedule_reconnect();
            }
        }
    }

    fn on_frame(&mut self, frame: Option<Result<Message, WsError>>) {
        match frame {
            Some(Ok(Message::Text(text))) => self.dispatch(serde_json::from_str(&text)),
            Some(Ok(Message::Binary(bytes))) => self.dispatch(serde_json::from_slice(&bytes)),
            Some(Ok(Message::Close(frame))) => {
                debug!("close frame received: {frame:?}");
            }
            Some(Ok(_)) => {
                // ping/pong are answered by tungstenite
            }
            Some(Err(e)) => {
                warn!("WebSocket read error: {e}");
                self.emit(ConnectionEvent::Error(ConnectionError::Transport(
                    e.to_string(),
                )));
                self.handle_close();
            }
            None => self.handle_close(),
        }
    }

    fn dispatch(&mut self, decoded: serde_json::Result<Value>) {
        match decoded {
            Ok(value) if WireMessage::is_heartbeat(&value) => {
                trace!("heartbeat received");
                self.emit(ConnectionEvent::Heartbeat);
            }
            Ok(value) => self.emit(ConnectionEvent::Message(value)),
            Err(e) => {
                self.decode_errors += 1;
                warn!("failed to decode WebSocket message: {e}");
                self.emit(ConnectionEvent::Error(ConnectionError::Decode(
                    e.to_string(),
                )));
            }
        }
    }

    /// Transport went away while open
    fn handle_close(&mut self) {
        info!("WebSocket disconnected");
        self.socket = None;
        self.heartbeat = None;
        self.state = ConnectionState::Closed;
        self.emit(ConnectionEvent::Disconnected);
        self.schedule_reconnect();
    }

    fn schedule_reconnect(&mut self) {
        if self.reconnect_attempts < self.config.max_reconnect_attempts {
            self.reconnect_attempts += 1;
            info!(
                "attempting to reconnect in {:?} ({}/{})",
                self.config.reconnect_delay(),
                self.reconnect_attempts,
                self.config.max_reconnect_attempts
            );
            self.reconnect = Some(Box::pin(sleep(self.config.reconnect_delay())));
        } else {
            error!("max reconnection attempts reached");
            self.emit(ConnectionEvent::MaxReconnectAttemptsReached);
        }
    }

    /// Hard stop: cancel every timer and close the socket without retrying
    async fn disconnect(&mut self) {
        self.reconnect = None;
        self.heartbeat = None;
        self.handshake = None;

        let was_open = self.state == ConnectionState::Open;

        if let Some(mut socket) = self.socket.take() {
            self.state = ConnectionState::Closing;
            if let Err(e) = socket.close(None).await {
                debug!("error while closing WebSocket: {e}");
            }
        }

        self.state = ConnectionState::Closed;

        if was_open {
            info!("WebSocket closed by client");
            self.emit(ConnectionEvent::Disconnected);
        }
    }

    async fn send(&mut self, payload: Value) {
        let Some(socket) = self.socket.as_mut() else {
            self.dropped_sends += 1;
            warn!("WebSocket is not connected, dropping outbound message");
            return;
        };

        if let Err(e) = socket.send(Message::Text(payload.to_string())).await {
            warn!("failed to send WebSocket message: {e}");
            self.emit(ConnectionEvent::Error(ConnectionError::Transport(
                e.to_string(),
            )));
        }
    }

    /// Deliver to every subscriber without waiting on slow ones
    fn emit(&mut self, event: ConnectionEvent) {
        let mut dropped = 0;
        self.subscribers
            .retain(|tx| match tx.try_send(event.clone()) {
                Ok(()) => true,
                Err(TrySendError::Full(_)) => {
                    dropped += 1;
                    true
                }
                Err(TrySendError::Closed(_)) => false,
            });

        if dropped > 0 {
            warn!("{dropped} subscribers are full, dropped {event:?}");
            self.dropped_events += dropped;
        }
    }
}

fn handshake(url: String) -> Handshake {
    Box::pin(async move {
        let mut request = url
            .as_str()
            .into_client_request()
            .map_err(|e| ConnectionError::Transport(format!("invalid URL {url}: {e}")))?;

        request
            .headers_mut()
            .insert(USER_AGENT, HeaderValue::from_static(USER_AGENT_VALUE));

        let (socket, _) = connect_async(request)
            .await
            .map_err(|e| ConnectionError::Transport(format!("failed to connect to {url}: {e}")))?;

        Ok::<_, ConnectionError>(socket)
    })
}

async fn wait_handshake(handshake: &mut Option<Handshake>) -> Result<WsStream, ConnectionError> {
    match handshake {
        Some(fut) => fut.await,
        None => pending().await,
    }
}

async fn next_frame(socket: &mut Option<WsStream>) -> Option<Result<Message, WsError>> {
    match socket {
        Some(socket) => socket.next().await,
        None => pending().await,
    }
}

async fn tick(heartbeat: &mut Option<Interval>) {
    match heartbeat {
        Some(timer) => {
            timer.tick().await;
        }
        None => pending().await,
    }
}

async fn wait_reconnect(reconnect: &mut Option<Pin<Box<Sleep>>>) {
    match reconnect {
        Some(delay) => delay.as_mut().await,
        None => pending().await,
    }
}

/// Handle for controlling a ConnectionActor
///
/// Cheap to clone; all clones talk to the same actor.
#[derive(Clone)]
pub struct ConnectionHandle {
    sender: mpsc::Sender<ConnectionCommand>,
    url: String,
}

impl ConnectionHandle {
    /// Spawn a new connection actor in the `Idle` state
    pub fn spawn(url: impl Into<String>, config: ConnectionConfig) -> Self {
        let url = url.into();
        let (cmd_tx, cmd_rx) = mpsc::channel(32);

        let actor = ConnectionActor::new(url.clone(), config, cmd_rx);
        tokio::spawn(actor.run());

        Self {
            sender: cmd_tx,
            url,
        }
    }

    /// Request a connection; a no-op while open or connecting
    pub async fn connect(&self) -> Result<()> {
        self.sender
            .send(ConnectionCommand::Connect)
            .await
            .context("failed to send Connect command")
    }

    /// Close the connection and wait until all timers are cancelled
    pub async fn disconnect(&self) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(ConnectionCommand::Disconnect { respond_to: tx })
            .await
            .context("failed to send Disconnect command")?;

        rx.await.context("failed to receive response")
    }

    /// Queue a payload; dropped with a warning unless the connection is open
    pub async fn send(&self, payload: Value) -> Result<()> {
        self.sender
            .send(ConnectionCommand::Send { payload })
            .await
            .context("failed to send Send command")
    }

    /// Register a new event consumer
    pub async fn subscribe(&self) -> Result<mpsc::Receiver<ConnectionEvent>> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(ConnectionCommand::Subscribe { respond_to: tx })
            .await
            .context("failed to send Subscribe command")?;

        rx.await.context("failed to receive response")
    }

    pub async fn status(&self) -> Result<ConnectionStatus> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(ConnectionCommand::GetStatus { respond_to: tx })
            .await
            .context("failed to send GetStatus command")?;

        rx.await.context("failed to receive response")
    }

    /// Disconnect and stop the actor
    pub async fn shutdown(&self) -> Result<()> {
        self.sender
            .send(ConnectionCommand::Shutdown)
            .await
            .context("failed to send Shutdown command")
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

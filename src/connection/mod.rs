//! Resilient push connection to the monitoring feed
//!
//! A single actor task owns the WebSocket and every timer attached to it. Callers talk
//! to it through a [`ConnectionHandle`] and observe it through per-consumer event
//! receivers.
//!
//! ## State Machine
//!
//! ```text
//!            connect()                handshake ok
//!   Idle ───────────────► Connecting ───────────────► Open
//!                          ▲      │ handshake failed   │ close / read error
//!           reconnect timer│      ▼                    ▼
//!                          └──── Closed ◄──────────────┘
//!                                  │ attempts exhausted
//!                                  ▼
//!                     MaxReconnectAttemptsReached (terminal until connect())
//!
//!   disconnect(): any state → Closing → Closed, all timers cancelled, no retry
//! ```

mod manager;

pub use manager::{ConnectionActor, ConnectionHandle};

/// Events buffered per subscriber; further events are dropped until it catches up
pub const EVENT_BUFFER: usize = 256;

use serde_json::Value;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

/// Lifecycle state of the push connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Idle,
    Connecting,
    Open,
    Closing,
    Closed,
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ConnectionState::Idle => "idle",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Open => "open",
            ConnectionState::Closing => "closing",
            ConnectionState::Closed => "closed",
        };
        f.write_str(name)
    }
}

/// Non-fatal failures reported on the event feed
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConnectionError {
    /// Handshake, read or write failure on the socket
    #[error("transport error: {0}")]
    Transport(String),

    /// Inbound payload that is not valid JSON
    #[error("failed to decode message: {0}")]
    Decode(String),
}

/// Events delivered to every subscriber
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionEvent {
    Connected,
    Disconnected,
    /// Application payload, forwarded verbatim
    Message(Value),
    /// Heartbeat received from the peer
    Heartbeat,
    Error(ConnectionError),
    /// Reconnect attempts are used up; only an explicit connect restarts the connection
    MaxReconnectAttemptsReached,
}

/// Point-in-time view of the connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionStatus {
    pub state: ConnectionState,

    /// Reconnect attempts since the last successful handshake
    pub reconnect_attempts: u32,

    /// Outbound messages dropped because the connection was not open
    pub dropped_sends: u64,

    /// Inbound frames that failed to decode
    pub decode_errors: u64,

    /// Events not delivered because a subscriber's buffer was full
    pub dropped_events: u64,
}

/// Commands that can be sent to the ConnectionActor
#[derive(Debug)]
pub enum ConnectionCommand {
    /// Open the connection unless it is already open or connecting
    Connect,

    /// Close the connection and cancel all timers
    Disconnect { respond_to: oneshot::Sender<()> },

    /// Send a JSON payload if the connection is open
    Send { payload: Value },

    /// Register a new event consumer
    Subscribe {
        respond_to: oneshot::Sender<mpsc::Receiver<ConnectionEvent>>,
    },

    /// Get the current connection status
    GetStatus {
        respond_to: oneshot::Sender<ConnectionStatus>,
    },

    /// Disconnect and stop the actor
    Shutdown,
}

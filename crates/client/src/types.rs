//! Public types for the client connection session.

use std::time::Duration;

use mobilelink_protocol::FramingError;
use mobilelink_protocol::constants::{
    CONNECTION_TIMEOUT, HEARTBEAT_INTERVAL, MAX_RECONNECT_ATTEMPTS, RECONNECT_DELAY,
};
use mobilelink_protocol::envelope::Envelope;

/// Lifecycle state of a [`ConnectionSession`](crate::ConnectionSession).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// No socket and no connect in progress.
    Disconnected,
    /// A connect cycle is running.
    Connecting,
    /// Socket established; read and heartbeat loops are running.
    Connected,
    /// The connection was lost and a new connect cycle is being scheduled.
    Reconnecting,
    /// Every attempt of the last connect cycle failed.
    Failed,
}

impl SessionState {
    /// Returns `true` while a socket is up or being established.
    pub fn is_active(self) -> bool {
        matches!(self, Self::Connecting | Self::Connected | Self::Reconnecting)
    }
}

/// Notifications emitted by the session, drained from
/// [`ConnectionSession::take_events`](crate::ConnectionSession::take_events).
#[derive(Debug, Clone)]
pub enum SessionEvent {
    /// The socket is up.
    Connected,
    /// An established connection was lost.
    Disconnected,
    /// A decoded envelope arrived from the hub.
    Message(Envelope),
    /// A frame was written; `bytes` includes the length prefix.
    SendComplete { bytes: usize },
    StateChanged(SessionState),
    /// A single connect attempt failed; more may follow.
    ConnectAttemptFailed { attempt: u32, error: String },
    /// A lost connection is being re-established.
    Reconnecting,
}

/// Tunables for a session. Defaults mirror the protocol constants.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub heartbeat_interval: Duration,
    pub reconnect_delay: Duration,
    pub max_attempts: u32,
    pub connect_timeout: Duration,
    /// Capacity of the event channel.
    pub event_buffer: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval: HEARTBEAT_INTERVAL,
            reconnect_delay: RECONNECT_DELAY,
            max_attempts: MAX_RECONNECT_ATTEMPTS,
            connect_timeout: CONNECTION_TIMEOUT,
            event_buffer: 256,
        }
    }
}

/// Errors from [`ConnectionSession::connect`](crate::ConnectionSession::connect).
#[derive(Debug, thiserror::Error)]
pub enum ConnectError {
    #[error("session is already connected or connecting")]
    AlreadyConnected,

    #[error("connect attempt timed out")]
    Timeout,

    #[error("connection refused: {0}")]
    Refused(#[from] std::io::Error),

    #[error("giving up after {attempts} connect attempts")]
    AttemptsExhausted { attempts: u32 },

    #[error("session closed")]
    Closed,
}

/// Errors from [`ConnectionSession::send`](crate::ConnectionSession::send).
#[derive(Debug, thiserror::Error)]
pub enum SendError {
    #[error("not connected")]
    NotConnected,

    #[error("write failed: {0}")]
    WriteFailed(#[from] std::io::Error),

    #[error("encode failed: {0}")]
    Encode(#[from] FramingError),
}

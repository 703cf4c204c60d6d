//! MobileLink hub server.
//!
//! Accepts client connections over TCP, runs one session task per client,
//! answers heartbeats, and streams the serving directory on request with
//! chunk size and pacing adapted to the client's reported network quality.

mod sender;
mod server;
mod session;
mod stats;

pub use sender::{BatchSummary, FileTransferSender};
pub use server::{ServerConfig, ServerListener};
pub use session::{ClientRecord, ClientSession};
pub use stats::{ConnectionGuard, StatsRegistry, StatsSnapshot, spawn_monitor};

use mobilelink_protocol::FramingError;

/// Errors produced by the listener.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("server already running")]
    AlreadyRunning,
}

/// Reasons a client session ends abnormally.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("framing error: {0}")]
    Framing(#[from] FramingError),

    #[error("write failed: {0}")]
    Write(std::io::Error),

    #[error("cancelled")]
    Cancelled,
}

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Default TCP port the hub listens on.
pub const DEFAULT_PORT: u16 = 11011;

/// Maximum JSON body size of a single frame (100 MiB).
pub const MAX_MESSAGE_SIZE: usize = 100 * 1024 * 1024;

/// Maximum size of a file that may be transferred (100 MiB).
pub const MAX_FILE_SIZE: u64 = 100 * 1024 * 1024;

/// Size of the big-endian length prefix in front of every frame.
pub const FRAME_HEADER_LEN: usize = 4;

/// Smallest chunk the sender will emit (4 KiB).
pub const MIN_CHUNK_SIZE: usize = 4 * 1024;

/// Chunk size at network quality 1.0 (16 KiB).
pub const DEFAULT_CHUNK_SIZE: usize = 16 * 1024;

/// Largest chunk the sender will emit (64 KiB).
pub const MAX_CHUNK_SIZE: usize = 64 * 1024;

/// Delay between two consecutive connect attempts.
pub const RECONNECT_DELAY: Duration = Duration::from_millis(5000);

/// Number of connect attempts before a session gives up.
pub const MAX_RECONNECT_ATTEMPTS: u32 = 5;

/// How often the client sends a `heartbeat`.
pub const HEARTBEAT_INTERVAL: Duration = Duration::from_millis(10_000);

/// Upper bound for a single TCP connect attempt.
pub const CONNECTION_TIMEOUT: Duration = Duration::from_millis(5000);

/// Pacing delay between chunks at network quality 1.0.
pub const BASE_CHUNK_DELAY: Duration = Duration::from_millis(100);

/// Floor applied to network quality before dividing by it.
pub const MIN_PACING_QUALITY: f64 = 0.05;

/// Interval of the periodic stats report on the hub.
pub const STATS_REPORT_INTERVAL: Duration = Duration::from_secs(10);

/// Envelope type identifier.
///
/// Types outside the known set are kept verbatim in [`MessageType::Other`]
/// so they survive a decode/encode cycle and can be logged by dispatch.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum MessageType {
    Heartbeat,
    HeartbeatAck,
    Chat,
    FileRequest,
    FileStart,
    FileChunk,
    FileEnd,
    NetworkQuality,
    /// Forward compatibility: any other type string.
    Other(String),
}

impl MessageType {
    /// Returns the wire name of this type.
    pub fn as_str(&self) -> &str {
        match self {
            Self::Heartbeat => "heartbeat",
            Self::HeartbeatAck => "heartbeat_ack",
            Self::Chat => "chat",
            Self::FileRequest => "filerequest",
            Self::FileStart => "file_start",
            Self::FileChunk => "file_chunk",
            Self::FileEnd => "file_end",
            Self::NetworkQuality => "network_quality",
            Self::Other(name) => name,
        }
    }

    /// Returns `true` for the three file transfer types.
    pub fn is_file_transfer(&self) -> bool {
        matches!(self, Self::FileStart | Self::FileChunk | Self::FileEnd)
    }
}

impl From<String> for MessageType {
    fn from(name: String) -> Self {
        match name.as_str() {
            "heartbeat" => Self::Heartbeat,
            "heartbeat_ack" => Self::HeartbeatAck,
            "chat" => Self::Chat,
            "filerequest" => Self::FileRequest,
            "file_start" => Self::FileStart,
            "file_chunk" => Self::FileChunk,
            "file_end" => Self::FileEnd,
            "network_quality" => Self::NetworkQuality,
            _ => Self::Other(name),
        }
    }
}

impl From<&str> for MessageType {
    fn from(name: &str) -> Self {
        Self::from(name.to_string())
    }
}

impl From<MessageType> for String {
    fn from(msg_type: MessageType) -> Self {
        match msg_type {
            MessageType::Other(name) => name,
            known => known.as_str().to_string(),
        }
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_type_serialization() {
        assert_eq!(
            serde_json::to_string(&MessageType::HeartbeatAck).unwrap(),
            "\"heartbeat_ack\""
        );
        assert_eq!(
            serde_json::to_string(&MessageType::FileRequest).unwrap(),
            "\"filerequest\""
        );
        assert_eq!(
            serde_json::to_string(&MessageType::NetworkQuality).unwrap(),
            "\"network_quality\""
        );
    }

    #[test]
    fn message_type_deserialization() {
        let mt: MessageType = serde_json::from_str("\"file_chunk\"").unwrap();
        assert_eq!(mt, MessageType::FileChunk);
    }

    #[test]
    fn unknown_message_type_is_kept_verbatim() {
        let mt: MessageType = serde_json::from_str("\"reboot_now\"").unwrap();
        assert_eq!(mt, MessageType::Other("reboot_now".into()));
        assert_eq!(serde_json::to_string(&mt).unwrap(), "\"reboot_now\"");
    }

    #[test]
    fn file_transfer_types() {
        assert!(MessageType::FileStart.is_file_transfer());
        assert!(MessageType::FileEnd.is_file_transfer());
        assert!(!MessageType::Chat.is_file_transfer());
    }

    #[test]
    fn chunk_bounds_are_ordered() {
        assert!(MIN_CHUNK_SIZE <= DEFAULT_CHUNK_SIZE);
        assert!(DEFAULT_CHUNK_SIZE <= MAX_CHUNK_SIZE);
    }
}

//! Wire protocol shared by the MobileLink hub and its clients.

pub mod codec;
pub mod constants;
pub mod envelope;
pub mod messages;
pub mod pacing;

// Re-export primary types for convenience.
pub use codec::{FramingError, decode, encode};
pub use constants::MessageType;
pub use envelope::{Envelope, decode_chunk};
pub use messages::{FileEnd, FileStart};
pub use pacing::{chunk_size, pacing_delay, quality_from_bandwidth};

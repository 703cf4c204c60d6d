//! Client side of the MobileLink protocol.
//!
//! Provides the hub connection session with heartbeat and bounded
//! reconnection, reassembly of streamed files, and small persistence
//! helpers for the last used hub address.

pub mod address;
pub mod assembler;
mod pumps;
pub(crate) mod reconnection;
pub mod session;
pub mod sink;
pub mod types;

pub use address::{AddressStore, AddressStoreError};
pub use assembler::{FileTransferAssembler, TransferError, TransferEvent, TransferState};
pub use session::ConnectionSession;
pub use sink::{DirectorySink, MemorySink, Sink, SinkError};
pub use types::{ConnectError, SendError, SessionConfig, SessionEvent, SessionState};

//! Per-connection background loops.

pub(crate) mod heartbeat;
pub(crate) mod read;

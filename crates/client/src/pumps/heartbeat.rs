//! Heartbeat pump: periodic `heartbeat` frames while connected.

use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use mobilelink_protocol::envelope::Envelope;

use crate::reconnection::SessionContext;

/// Sends a heartbeat every `heartbeat_interval` until cancelled.
///
/// A failed write has already been handed to the reconnect logic by
/// [`SessionContext::send`], so the pump just stops.
pub(crate) async fn heartbeat_pump(ctx: SessionContext, generation: u64, cancel: CancellationToken) {
    let mut interval = tokio::time::interval(ctx.config.heartbeat_interval);
    interval.tick().await; // Skip immediate first tick.

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = interval.tick() => {
                match ctx.send(&Envelope::heartbeat()).await {
                    Ok(bytes) => trace!(generation, bytes, "heartbeat sent"),
                    Err(e) => {
                        debug!(generation, "heartbeat failed: {e}");
                        break;
                    }
                }
            }
        }
    }
}

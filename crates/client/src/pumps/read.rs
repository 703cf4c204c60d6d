//! Read pump: decodes frames and forwards them as session events.

use tokio::io::{AsyncRead, BufReader};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use mobilelink_protocol::codec::{self, FramingError};

use crate::reconnection::{SessionContext, connection_lost};
use crate::types::SessionEvent;

/// Reads envelopes until the connection fails or `cancel` fires.
///
/// Any framing error ends the loop and hands connection `generation` to
/// the reconnect logic. Cancellation exits silently.
pub(crate) async fn read_pump<R>(
    reader: R,
    ctx: SessionContext,
    generation: u64,
    cancel: CancellationToken,
) where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(reader);

    let reason = loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                debug!(generation, "read pump cancelled");
                return;
            }
            result = codec::decode(&mut reader) => match result {
                Ok(envelope) => {
                    trace!(msg_type = %envelope.msg_type, "received message");
                    ctx.deliver(SessionEvent::Message(envelope)).await;
                }
                Err(FramingError::EndOfStream) => {
                    info!(generation, "hub closed the connection");
                    break "end of stream".to_string();
                }
                Err(e) => {
                    warn!(generation, "read failed: {e}");
                    break e.to_string();
                }
            }
        }
    };

    connection_lost(&ctx, generation, &reason).await;
}

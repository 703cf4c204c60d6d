//! Per-client session: reads frames, dispatches them, and owns the
//! client's network quality.

use std::sync::Arc;
use std::time::Instant;

use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use mobilelink_protocol::codec::{self, FramingError};
use mobilelink_protocol::constants::MessageType;
use mobilelink_protocol::envelope::Envelope;

use crate::SessionError;
use crate::sender::FileTransferSender;
use crate::server::ServerConfig;
use crate::stats::{ConnectionGuard, StatsRegistry};

/// State kept for one connected client.
#[derive(Debug, Clone)]
pub struct ClientRecord {
    /// Peer address of the connection.
    pub id: String,
    /// Last reported quality, stored as received.
    pub network_quality: f64,
    pub last_seen: Instant,
}

impl ClientRecord {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            network_quality: 1.0,
            last_seen: Instant::now(),
        }
    }
}

/// One accepted connection.
///
/// Counts as active in the [`StatsRegistry`] from construction until it is
/// dropped, whichever way [`run`](Self::run) ends.
pub struct ClientSession<R, W> {
    record: ClientRecord,
    reader: BufReader<R>,
    writer: W,
    config: Arc<ServerConfig>,
    stats: Arc<StatsRegistry>,
    cancel: CancellationToken,
    _guard: ConnectionGuard,
}

impl<R, W> ClientSession<R, W>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    pub fn new(
        id: impl Into<String>,
        reader: R,
        writer: W,
        config: Arc<ServerConfig>,
        stats: Arc<StatsRegistry>,
        cancel: CancellationToken,
    ) -> Self {
        let guard = stats.track();
        Self {
            record: ClientRecord::new(id),
            reader: BufReader::new(reader),
            writer,
            config,
            stats,
            cancel,
            _guard: guard,
        }
    }

    pub fn record(&self) -> &ClientRecord {
        &self.record
    }

    /// Serves the client until it disconnects, a framing or write error
    /// occurs, or the session is cancelled.
    ///
    /// A clean close by the client returns `Ok`.
    pub async fn run(mut self) -> Result<(), SessionError> {
        let peer = self.record.id.clone();
        info!(%peer, "client connected");

        let result = self.read_loop().await;
        match &result {
            Ok(()) => info!(%peer, "client disconnected"),
            Err(SessionError::Cancelled) => debug!(%peer, "session cancelled"),
            Err(e) => warn!(%peer, "session ended: {e}"),
        }
        result
    }

    async fn read_loop(&mut self) -> Result<(), SessionError> {
        loop {
            let envelope = tokio::select! {
                _ = self.cancel.cancelled() => return Err(SessionError::Cancelled),
                result = codec::decode(&mut self.reader) => match result {
                    Ok(envelope) => envelope,
                    Err(FramingError::EndOfStream) => return Ok(()),
                    Err(e) => return Err(e.into()),
                },
            };

            self.dispatch(envelope).await?;
            self.record.last_seen = Instant::now();
        }
    }

    async fn dispatch(&mut self, envelope: Envelope) -> Result<(), SessionError> {
        let peer = &self.record.id;
        match &envelope.msg_type {
            MessageType::Heartbeat => {
                trace!(%peer, "heartbeat");
                write_envelope(&mut self.writer, &Envelope::heartbeat_ack()).await?;
            }
            MessageType::Chat => match envelope.content_str() {
                Some(text) => info!(%peer, "chat: {text}"),
                None => warn!(%peer, "chat without text content, ignoring"),
            },
            MessageType::FileRequest => {
                info!(
                    %peer,
                    quality = self.record.network_quality,
                    "file request"
                );
                let sender = FileTransferSender::new(
                    &self.config.serving_dir,
                    self.record.network_quality,
                    self.config.base_delay,
                    &self.stats,
                );
                let summary = sender.send_all(&mut self.writer, &self.cancel).await?;
                info!(
                    %peer,
                    files = summary.files_sent,
                    skipped = summary.files_skipped,
                    bytes = summary.bytes_sent,
                    "file batch complete"
                );
            }
            MessageType::NetworkQuality => match envelope.content_f64() {
                Some(quality) => {
                    info!(%peer, quality, "network quality updated");
                    self.record.network_quality = quality;
                }
                None => warn!(%peer, "network_quality without numeric content, ignoring"),
            },
            other => warn!(%peer, msg_type = %other, "unsupported message type, ignoring"),
        }
        Ok(())
    }
}

/// Encodes and writes one frame. Returns the number of bytes written.
pub(crate) async fn write_envelope<W: AsyncWrite + Unpin>(
    writer: &mut W,
    envelope: &Envelope,
) -> Result<usize, SessionError> {
    let frame = codec::encode(envelope)?;
    writer
        .write_all(&frame)
        .await
        .map_err(SessionError::Write)?;
    writer.flush().await.map_err(SessionError::Write)?;
    Ok(frame.len())
}

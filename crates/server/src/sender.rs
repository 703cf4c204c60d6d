//! Streams the serving directory to one client.
//!
//! # Per-file sequence
//!
//! ```text
//! file_start {filename, filesize}
//! file_chunk "<base64>"   (repeated, chunk size fixed for the file)
//! file_end   {filename}
//! ```
//!
//! Chunk size and the pause after each chunk follow the client's network
//! quality at the time of the request.

use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use mobilelink_protocol::constants::MAX_FILE_SIZE;
use mobilelink_protocol::envelope::Envelope;
use mobilelink_protocol::pacing::{chunk_size, pacing_delay};

use crate::SessionError;
use crate::session::write_envelope;
use crate::stats::StatsRegistry;

/// Outcome of one file batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchSummary {
    pub files_sent: usize,
    pub files_skipped: usize,
    /// Raw file bytes sent in chunks.
    pub bytes_sent: u64,
}

/// A regular file queued for sending.
#[derive(Debug, Clone)]
struct FileEntry {
    name: String,
    path: PathBuf,
    size: u64,
}

/// Why a single file stopped early.
enum FileFailure {
    /// Reading the local file failed; only this file is affected.
    Read(std::io::Error),
    /// Writing to the client failed or the session was cancelled.
    Session(SessionError),
}

impl From<SessionError> for FileFailure {
    fn from(e: SessionError) -> Self {
        Self::Session(e)
    }
}

/// Sends every regular file of a directory, one at a time.
pub struct FileTransferSender<'a> {
    dir: &'a Path,
    quality: f64,
    base_delay: Duration,
    stats: &'a StatsRegistry,
}

impl<'a> FileTransferSender<'a> {
    pub fn new(dir: &'a Path, quality: f64, base_delay: Duration, stats: &'a StatsRegistry) -> Self {
        Self {
            dir,
            quality,
            base_delay,
            stats,
        }
    }

    /// Streams the directory to `writer`.
    ///
    /// A missing or unreadable directory sends nothing and succeeds. A
    /// write failure or cancellation aborts the batch.
    pub async fn send_all<W: AsyncWrite + Unpin>(
        &self,
        writer: &mut W,
        cancel: &CancellationToken,
    ) -> Result<BatchSummary, SessionError> {
        let mut summary = BatchSummary::default();

        let files = match list_files(self.dir).await {
            Ok(files) => files,
            Err(e) => {
                warn!(dir = %self.dir.display(), "cannot list serving directory: {e}");
                return Ok(summary);
            }
        };
        if files.is_empty() {
            info!(dir = %self.dir.display(), "no files to send");
        }

        for entry in &files {
            if cancel.is_cancelled() {
                return Err(SessionError::Cancelled);
            }

            if entry.size > MAX_FILE_SIZE {
                warn!(
                    filename = %entry.name,
                    size = entry.size,
                    max = MAX_FILE_SIZE,
                    "file too large, skipping"
                );
                summary.files_skipped += 1;
                continue;
            }

            match self.send_file(writer, entry, cancel).await {
                Ok(bytes) => {
                    summary.files_sent += 1;
                    summary.bytes_sent += bytes;
                }
                Err(FileFailure::Read(e)) => {
                    warn!(filename = %entry.name, "read failed, aborting file: {e}");
                    summary.files_skipped += 1;
                }
                Err(FileFailure::Session(e)) => return Err(e),
            }
        }

        Ok(summary)
    }

    async fn send_file<W: AsyncWrite + Unpin>(
        &self,
        writer: &mut W,
        entry: &FileEntry,
        cancel: &CancellationToken,
    ) -> Result<u64, FileFailure> {
        let mut file = tokio::fs::File::open(&entry.path)
            .await
            .map_err(FileFailure::Read)?;

        let chunk = chunk_size(self.quality);
        let delay = pacing_delay(self.quality, self.base_delay);
        info!(
            filename = %entry.name,
            size = entry.size,
            chunk,
            delay_ms = delay.as_millis() as u64,
            "sending file"
        );

        write_envelope(writer, &Envelope::file_start(&entry.name, entry.size)).await?;

        let mut buf = vec![0u8; chunk];
        let mut sent: u64 = 0;
        loop {
            let n = fill(&mut file, &mut buf)
                .await
                .map_err(FileFailure::Read)?;
            if n == 0 {
                break;
            }

            write_envelope(writer, &Envelope::file_chunk(&buf[..n])).await?;
            sent += n as u64;
            self.stats.add_bytes(n as u64);
            debug!(
                filename = %entry.name,
                sent,
                total = entry.size,
                "chunk sent"
            );

            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(SessionError::Cancelled.into()),
                _ = tokio::time::sleep(delay) => {}
            }

            if n < chunk {
                break;
            }
        }

        write_envelope(writer, &Envelope::file_end(&entry.name)).await?;
        info!(filename = %entry.name, bytes = sent, "file sent");
        Ok(sent)
    }
}

/// Lists regular files (following symlinks) directly inside `dir`,
/// sorted by name.
async fn list_files(dir: &Path) -> std::io::Result<Vec<FileEntry>> {
    let mut entries = tokio::fs::read_dir(dir).await?;
    let mut files = Vec::new();

    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        let metadata = match tokio::fs::metadata(&path).await {
            Ok(m) => m,
            Err(e) => {
                debug!(path = %path.display(), "skipping unreadable entry: {e}");
                continue;
            }
        };
        if !metadata.is_file() {
            continue;
        }
        let Ok(name) = entry.file_name().into_string() else {
            warn!(path = %path.display(), "skipping file with non UTF-8 name");
            continue;
        };
        files.push(FileEntry {
            name,
            path,
            size: metadata.len(),
        });
    }

    files.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(files)
}

/// Reads until `buf` is full or the source is exhausted.
async fn fill<R: AsyncRead + Unpin>(reader: &mut R, buf: &mut [u8]) -> std::io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        let n = reader.read(&mut buf[filled..]).await?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    Ok(filled)
}

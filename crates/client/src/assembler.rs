//! Reassembly of files streamed by the hub.
//!
//! A transfer is framed by `file_start`, any number of `file_chunk`s and a
//! `file_end` carrying the same file name. At most one transfer is live at
//! a time; a new `file_start` replaces the previous one.

use tracing::{debug, error, info, warn};

use mobilelink_protocol::constants::{MAX_FILE_SIZE, MessageType};
use mobilelink_protocol::envelope::{Envelope, decode_chunk};
use mobilelink_protocol::messages::{FileEnd, FileStart};

use crate::sink::Sink;

/// Reasons a transfer or a part of it is dropped.
#[derive(Debug, thiserror::Error)]
pub enum TransferError {
    #[error("file {filename} is {size} bytes, exceeding the {limit} byte limit", limit = MAX_FILE_SIZE)]
    FileSizeExceeded { filename: String, size: u64 },

    #[error("file_end for {received} does not match active transfer {expected:?}")]
    FileMismatch {
        expected: Option<String>,
        received: String,
    },

    #[error("chunk decode failed: {0}")]
    ChunkDecode(#[from] base64::DecodeError),

    #[error("chunk content is not a string")]
    ChunkContent,

    #[error("chunk received with no active transfer")]
    NoActiveTransfer,

    #[error("chunk would grow {filename} past the {limit} byte limit", limit = MAX_FILE_SIZE)]
    Overflow { filename: String },

    #[error("bad {msg_type} content: {source}")]
    BadContent {
        msg_type: MessageType,
        source: serde_json::Error,
    },
}

/// Progress of a file being received.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferState {
    pub filename: String,
    pub expected_size: u64,
    pub received_bytes: u64,
    pub buffer: Vec<u8>,
}

impl TransferState {
    fn new(filename: String, expected_size: u64) -> Self {
        Self {
            filename,
            expected_size,
            received_bytes: 0,
            buffer: Vec::with_capacity(expected_size as usize),
        }
    }

    /// Fraction received so far; `1.0` for an empty file.
    pub fn progress(&self) -> f64 {
        if self.expected_size == 0 {
            1.0
        } else {
            self.received_bytes as f64 / self.expected_size as f64
        }
    }
}

/// What the assembler did with one envelope.
#[derive(Debug, Clone, PartialEq)]
pub enum TransferEvent {
    Started {
        filename: String,
        size: u64,
    },
    Progress {
        filename: String,
        received: u64,
        expected: u64,
    },
    /// The sink accepted the file. `verified` is `received == expected`.
    Completed {
        filename: String,
        size: u64,
        verified: bool,
    },
    /// The announced size is over the limit; its chunks will be ignored.
    Rejected {
        filename: String,
        size: u64,
    },
    /// The transfer was dropped without reaching the sink.
    Discarded {
        filename: String,
        reason: String,
    },
    ChunkDropped {
        reason: String,
    },
    SinkFailed {
        filename: String,
        error: String,
    },
}

impl TransferEvent {
    /// Returns `received / expected` for progress events.
    pub fn fraction(&self) -> Option<f64> {
        match self {
            Self::Progress {
                received, expected, ..
            } if *expected > 0 => Some(*received as f64 / *expected as f64),
            Self::Progress { .. } => Some(1.0),
            _ => None,
        }
    }
}

/// Consumes file transfer envelopes and hands completed files to a [`Sink`].
pub struct FileTransferAssembler<S: Sink> {
    sink: S,
    current: Option<TransferState>,
    rejected: Option<String>,
}

impl<S: Sink> FileTransferAssembler<S> {
    pub fn new(sink: S) -> Self {
        Self {
            sink,
            current: None,
            rejected: None,
        }
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    /// The live transfer, if any.
    pub fn current(&self) -> Option<&TransferState> {
        self.current.as_ref()
    }

    /// Processes one envelope. Returns `None` for envelopes that are not
    /// part of a file transfer or that are silently ignored.
    pub fn handle(&mut self, envelope: &Envelope) -> Option<TransferEvent> {
        match envelope.msg_type {
            MessageType::FileStart => self.on_start(envelope),
            MessageType::FileChunk => self.on_chunk(envelope),
            MessageType::FileEnd => Some(self.on_end(envelope)),
            _ => None,
        }
    }

    fn on_start(&mut self, envelope: &Envelope) -> Option<TransferEvent> {
        let start: FileStart = match envelope.parse_content() {
            Ok(start) => start,
            Err(source) => {
                warn!(
                    "{}",
                    TransferError::BadContent {
                        msg_type: MessageType::FileStart,
                        source,
                    }
                );
                return None;
            }
        };

        if let Some(prev) = self.current.take() {
            warn!(
                filename = %prev.filename,
                received = prev.received_bytes,
                "new file_start, discarding unfinished transfer"
            );
        }

        if start.filesize > MAX_FILE_SIZE {
            let err = TransferError::FileSizeExceeded {
                filename: start.filename.clone(),
                size: start.filesize,
            };
            warn!("{err}");
            self.rejected = Some(start.filename.clone());
            return Some(TransferEvent::Rejected {
                filename: start.filename,
                size: start.filesize,
            });
        }

        info!(filename = %start.filename, size = start.filesize, "receiving file");
        self.rejected = None;
        self.current = Some(TransferState::new(
            start.filename.clone(),
            start.filesize,
        ));
        Some(TransferEvent::Started {
            filename: start.filename,
            size: start.filesize,
        })
    }

    fn on_chunk(&mut self, envelope: &Envelope) -> Option<TransferEvent> {
        let Some(state) = self.current.as_mut() else {
            if self.rejected.is_some() {
                return None;
            }
            return Some(drop_chunk(TransferError::NoActiveTransfer));
        };

        let Some(content) = envelope.content_str() else {
            return Some(drop_chunk(TransferError::ChunkContent));
        };
        let data = match decode_chunk(content) {
            Ok(data) => data,
            Err(e) => return Some(drop_chunk(e.into())),
        };

        let received = state.received_bytes + data.len() as u64;
        if received > MAX_FILE_SIZE {
            return Some(drop_chunk(TransferError::Overflow {
                filename: state.filename.clone(),
            }));
        }

        state.buffer.extend_from_slice(&data);
        state.received_bytes = received;
        debug!(
            filename = %state.filename,
            received,
            expected = state.expected_size,
            "chunk received"
        );
        Some(TransferEvent::Progress {
            filename: state.filename.clone(),
            received,
            expected: state.expected_size,
        })
    }

    fn on_end(&mut self, envelope: &Envelope) -> TransferEvent {
        let filename = match envelope.parse_content::<FileEnd>() {
            Ok(end) => end.filename,
            Err(source) => {
                warn!(
                    "{}",
                    TransferError::BadContent {
                        msg_type: MessageType::FileEnd,
                        source,
                    }
                );
                String::new()
            }
        };

        let rejected = self.rejected.take();
        let current = self.current.take();

        let state = match current {
            Some(state) if state.filename == filename => state,
            other => {
                if rejected.as_deref() == Some(filename.as_str()) {
                    debug!(filename = %filename, "end of rejected file");
                    return TransferEvent::Discarded {
                        filename,
                        reason: "file was rejected".into(),
                    };
                }
                let err = TransferError::FileMismatch {
                    expected: other.map(|s| s.filename),
                    received: filename.clone(),
                };
                warn!("{err}");
                return TransferEvent::Discarded {
                    filename,
                    reason: err.to_string(),
                };
            }
        };

        let verified = state.received_bytes == state.expected_size;
        if !verified {
            warn!(
                filename = %filename,
                received = state.received_bytes,
                expected = state.expected_size,
                "size mismatch at file_end"
            );
        }

        let size = state.received_bytes;
        match self.sink.accept(&filename, state.buffer) {
            Ok(()) => {
                info!(filename = %filename, size, verified, "file received");
                TransferEvent::Completed {
                    filename,
                    size,
                    verified,
                }
            }
            Err(e) => {
                error!(filename = %filename, "failed to save file: {e}");
                TransferEvent::SinkFailed {
                    filename,
                    error: e.to_string(),
                }
            }
        }
    }
}

fn drop_chunk(err: TransferError) -> TransferEvent {
    warn!("dropping chunk: {err}");
    TransferEvent::ChunkDropped {
        reason: err.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::{MemorySink, SinkError};

    fn assembler() -> FileTransferAssembler<MemorySink> {
        FileTransferAssembler::new(MemorySink::new())
    }

    fn feed_file(asm: &mut FileTransferAssembler<MemorySink>, name: &str, data: &[u8], chunk: usize) {
        asm.handle(&Envelope::file_start(name, data.len() as u64));
        for part in data.chunks(chunk) {
            asm.handle(&Envelope::file_chunk(part));
        }
        asm.handle(&Envelope::file_end(name));
    }

    #[test]
    fn assembles_chunks_in_order() {
        let mut asm = assembler();
        let data: Vec<u8> = (0..50_000u32).map(|i| (i % 251) as u8).collect();

        assert_eq!(
            asm.handle(&Envelope::file_start("data.bin", 50_000)),
            Some(TransferEvent::Started {
                filename: "data.bin".into(),
                size: 50_000
            })
        );
        let mut last = None;
        for part in data.chunks(16_384) {
            last = asm.handle(&Envelope::file_chunk(part));
        }
        assert_eq!(last.and_then(|e| e.fraction()), Some(1.0));

        let done = asm.handle(&Envelope::file_end("data.bin"));
        assert_eq!(
            done,
            Some(TransferEvent::Completed {
                filename: "data.bin".into(),
                size: 50_000,
                verified: true
            })
        );
        assert_eq!(asm.sink().files().len(), 1);
        assert_eq!(asm.sink().files()[0].1, data);
        assert!(asm.current().is_none());
    }

    #[test]
    fn progress_is_reported_per_chunk() {
        let mut asm = assembler();
        asm.handle(&Envelope::file_start("a", 8));
        let event = asm.handle(&Envelope::file_chunk(&[0; 2])).unwrap();
        assert_eq!(event.fraction(), Some(0.25));
        assert_eq!(asm.current().unwrap().progress(), 0.25);
    }

    #[test]
    fn mismatched_end_discards_and_clears() {
        let mut asm = assembler();
        asm.handle(&Envelope::file_start("a.txt", 3));
        asm.handle(&Envelope::file_chunk(b"abc"));

        let event = asm.handle(&Envelope::file_end("b.txt")).unwrap();
        assert!(matches!(event, TransferEvent::Discarded { .. }));
        assert!(asm.sink().files().is_empty());
        assert!(asm.current().is_none());

        // A later well-formed transfer still assembles.
        feed_file(&mut asm, "c.txt", b"hello", 2);
        assert_eq!(asm.sink().files().len(), 1);
        assert_eq!(asm.sink().files()[0].0, "c.txt");
        assert_eq!(asm.sink().files()[0].1, b"hello");
    }

    #[test]
    fn end_without_start_is_discarded() {
        let mut asm = assembler();
        let event = asm.handle(&Envelope::file_end("ghost")).unwrap();
        assert!(matches!(event, TransferEvent::Discarded { .. }));
        assert!(asm.sink().files().is_empty());
    }

    #[test]
    fn new_start_replaces_live_transfer() {
        let mut asm = assembler();
        asm.handle(&Envelope::file_start("first", 10));
        asm.handle(&Envelope::file_chunk(b"xxxxx"));

        feed_file(&mut asm, "second", b"yy", 1);

        assert_eq!(asm.sink().files().len(), 1);
        assert_eq!(asm.sink().files()[0].0, "second");
        assert_eq!(asm.sink().files()[0].1, b"yy");
    }

    #[test]
    fn bad_chunk_drops_only_that_chunk() {
        let mut asm = assembler();
        asm.handle(&Envelope::file_start("f", 4));
        asm.handle(&Envelope::file_chunk(b"ab"));
        let bad = Envelope::new(MessageType::FileChunk, serde_json::json!("@@not-base64@@"));
        assert!(matches!(
            asm.handle(&bad),
            Some(TransferEvent::ChunkDropped { .. })
        ));
        asm.handle(&Envelope::file_chunk(b"cd"));
        asm.handle(&Envelope::file_end("f"));

        assert_eq!(asm.sink().files()[0].1, b"abcd");
    }

    #[test]
    fn non_string_chunk_is_dropped() {
        let mut asm = assembler();
        asm.handle(&Envelope::file_start("f", 1));
        let bad = Envelope::new(MessageType::FileChunk, serde_json::json!(42));
        assert!(matches!(
            asm.handle(&bad),
            Some(TransferEvent::ChunkDropped { .. })
        ));
    }

    #[test]
    fn chunk_without_transfer_is_dropped() {
        let mut asm = assembler();
        assert!(matches!(
            asm.handle(&Envelope::file_chunk(b"zz")),
            Some(TransferEvent::ChunkDropped { .. })
        ));
    }

    #[test]
    fn oversized_file_is_rejected_and_chunks_ignored() {
        let mut asm = assembler();
        let event = asm
            .handle(&Envelope::file_start("huge.iso", MAX_FILE_SIZE + 1))
            .unwrap();
        assert!(matches!(event, TransferEvent::Rejected { .. }));

        assert_eq!(asm.handle(&Envelope::file_chunk(b"data")), None);
        let end = asm.handle(&Envelope::file_end("huge.iso")).unwrap();
        assert!(matches!(end, TransferEvent::Discarded { .. }));
        assert!(asm.sink().files().is_empty());

        // The next file is unaffected.
        feed_file(&mut asm, "small.txt", b"ok", 8);
        assert_eq!(asm.sink().files().len(), 1);
    }

    #[test]
    fn size_mismatch_delivers_unverified() {
        let mut asm = assembler();
        asm.handle(&Envelope::file_start("short.bin", 10));
        asm.handle(&Envelope::file_chunk(b"1234"));
        let event = asm.handle(&Envelope::file_end("short.bin")).unwrap();

        assert_eq!(
            event,
            TransferEvent::Completed {
                filename: "short.bin".into(),
                size: 4,
                verified: false
            }
        );
        assert_eq!(asm.sink().files()[0].1, b"1234");
    }

    #[test]
    fn empty_file_completes() {
        let mut asm = assembler();
        feed_file(&mut asm, "empty", b"", 4);
        assert_eq!(asm.sink().files().len(), 1);
        assert!(asm.sink().files()[0].1.is_empty());
    }

    #[test]
    fn other_messages_are_ignored() {
        let mut asm = assembler();
        assert_eq!(asm.handle(&Envelope::chat("hi")), None);
        assert_eq!(asm.handle(&Envelope::heartbeat_ack()), None);
    }

    struct FailingSink;

    impl Sink for FailingSink {
        fn accept(&mut self, _filename: &str, _data: Vec<u8>) -> Result<(), SinkError> {
            Err(SinkError::InvalidName("refused".into()))
        }
    }

    #[test]
    fn sink_failure_is_reported() {
        let mut asm = FileTransferAssembler::new(FailingSink);
        asm.handle(&Envelope::file_start("x", 1));
        asm.handle(&Envelope::file_chunk(b"x"));
        let event = asm.handle(&Envelope::file_end("x")).unwrap();
        assert!(matches!(event, TransferEvent::SinkFailed { .. }));
        assert!(asm.current().is_none());
    }
}

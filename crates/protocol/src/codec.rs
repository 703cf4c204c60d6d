//! Length-prefixed framing for [`Envelope`]s.
//!
//! # Wire format
//!
//! ```text
//! [4 bytes BE: L]
//! [L bytes: UTF-8 JSON envelope]
//! ```
//!
//! `L` never exceeds [`MAX_MESSAGE_SIZE`]. A frame that announces more is
//! rejected before any of its payload is read.

use tokio::io::{AsyncRead, AsyncReadExt};

use crate::constants::{FRAME_HEADER_LEN, MAX_MESSAGE_SIZE};
use crate::envelope::Envelope;

/// Errors produced while encoding or decoding a frame.
///
/// Every variant is fatal to the connection it was read from.
#[derive(Debug, thiserror::Error)]
pub enum FramingError {
    /// The source closed cleanly before a full length prefix arrived.
    #[error("end of stream")]
    EndOfStream,

    #[error("frame of {len} bytes exceeds maximum of {max}", max = MAX_MESSAGE_SIZE)]
    Oversized { len: usize },

    #[error("frame truncated: expected {expected} bytes, received {received}")]
    Truncated { expected: usize, received: usize },

    #[error("malformed envelope: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Serializes an envelope and prepends its 4-byte big-endian length.
pub fn encode(envelope: &Envelope) -> Result<Vec<u8>, FramingError> {
    let body = serde_json::to_vec(envelope)?;
    if body.len() > MAX_MESSAGE_SIZE {
        return Err(FramingError::Oversized { len: body.len() });
    }

    let mut frame = Vec::with_capacity(FRAME_HEADER_LEN + body.len());
    frame.extend_from_slice(&(body.len() as u32).to_be_bytes());
    frame.extend_from_slice(&body);
    Ok(frame)
}

/// Reads exactly one frame from `reader` and parses its envelope.
///
/// Consumes `4 + L` bytes on success. On `Oversized` only the length
/// prefix has been consumed.
pub async fn decode<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Envelope, FramingError> {
    let mut header = [0u8; FRAME_HEADER_LEN];
    let got = read_full(reader, &mut header).await?;
    if got < FRAME_HEADER_LEN {
        return Err(FramingError::EndOfStream);
    }

    let len = u32::from_be_bytes(header) as usize;
    if len > MAX_MESSAGE_SIZE {
        return Err(FramingError::Oversized { len });
    }

    let mut body = vec![0u8; len];
    let received = read_full(reader, &mut body).await?;
    if received < len {
        return Err(FramingError::Truncated {
            expected: len,
            received,
        });
    }

    Ok(serde_json::from_slice(&body)?)
}

/// Fills `buf` across as many reads as needed; returns fewer bytes only
/// when the source reaches EOF.
async fn read_full<R: AsyncRead + Unpin>(
    reader: &mut R,
    buf: &mut [u8],
) -> Result<usize, std::io::Error> {
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

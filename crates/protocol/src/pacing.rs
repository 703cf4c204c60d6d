//! Adaptive chunk sizing and pacing derived from a network quality sample.
//!
//! Quality is nominally in `[0.0, 1.0]` but is accepted as received; the
//! functions here clamp their outputs rather than their inputs.

use std::time::Duration;

use crate::constants::{DEFAULT_CHUNK_SIZE, MAX_CHUNK_SIZE, MIN_CHUNK_SIZE, MIN_PACING_QUALITY};

/// Chunk size for one file: `DEFAULT_CHUNK_SIZE * quality`, clamped to
/// `[MIN_CHUNK_SIZE, MAX_CHUNK_SIZE]`.
///
/// Non-finite or negative qualities resolve to the bounds.
pub fn chunk_size(quality: f64) -> usize {
    if quality.is_nan() {
        return MIN_CHUNK_SIZE;
    }
    let scaled = DEFAULT_CHUNK_SIZE as f64 * quality;
    if scaled <= MIN_CHUNK_SIZE as f64 {
        MIN_CHUNK_SIZE
    } else if scaled >= MAX_CHUNK_SIZE as f64 {
        MAX_CHUNK_SIZE
    } else {
        scaled as usize
    }
}

/// Delay between two chunks: `base / max(quality, MIN_PACING_QUALITY)`.
pub fn pacing_delay(quality: f64, base: Duration) -> Duration {
    let quality = if quality.is_nan() {
        MIN_PACING_QUALITY
    } else {
        quality.max(MIN_PACING_QUALITY)
    };
    base.div_f64(quality)
}

/// Maps a measured bandwidth sample to a quality value.
pub fn quality_from_bandwidth(down_kbps: u64, up_kbps: u64) -> f64 {
    match down_kbps.saturating_add(up_kbps) {
        t if t > 10_000 => 1.0,
        t if t > 5_000 => 0.75,
        t if t > 2_000 => 0.5,
        t if t > 1_000 => 0.25,
        _ => 0.1,
    }
}

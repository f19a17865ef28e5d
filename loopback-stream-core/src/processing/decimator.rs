//! Frame-aligned integer decimation.
//!
//! Keeps the first frame of every group of `factor` frames and discards the
//! rest. No filtering or interpolation is applied.

use crate::models::audio_models::WaveFormat;
use crate::models::error::StreamError;

/// Decimate `buffer[..byte_count]`, a run of interleaved frames of
/// `frame_size_bytes` each.
///
/// Output length is `floor(byte_count / frame_size_bytes / factor) * frame_size_bytes`.
/// A trailing partial frame, and a trailing group shorter than `factor`
/// frames, are dropped. `byte_count` past the end of `buffer` is clamped.
/// A zero frame size or factor yields an empty buffer.
pub fn decimate(buffer: &[u8], byte_count: usize, frame_size_bytes: usize, factor: usize) -> Vec<u8> {
    if frame_size_bytes == 0 || factor == 0 {
        return Vec::new();
    }

    let byte_count = byte_count.min(buffer.len());
    let frame_count = byte_count / frame_size_bytes;
    let kept = frame_count / factor;

    let mut output = Vec::with_capacity(kept * frame_size_bytes);
    for frame in buffer[..frame_count * frame_size_bytes]
        .chunks_exact(frame_size_bytes)
        .step_by(factor)
        .take(kept)
    {
        output.extend_from_slice(frame);
    }
    output
}

/// Decimation settings for one capture run.
///
/// Derived from the selected device's native format at capture start and
/// stale for any other format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecimationParameters {
    pub factor: u32,
    pub frame_size_bytes: usize,
}

impl DecimationParameters {
    pub fn for_format(format: &WaveFormat, factor: u32) -> Result<Self, StreamError> {
        if factor == 0 {
            return Err(StreamError::InvalidConfiguration(
                "downsample factor must be at least 1".into(),
            ));
        }
        let frame_size_bytes = format.frame_size_bytes();
        if frame_size_bytes == 0 {
            return Err(StreamError::InvalidConfiguration(format!(
                "unsupported wave format: {}",
                format
            )));
        }
        Ok(Self {
            factor,
            frame_size_bytes,
        })
    }

    pub fn apply(&self, data: &[u8]) -> Vec<u8> {
        decimate(data, data.len(), self.frame_size_bytes, self.factor as usize)
    }
}

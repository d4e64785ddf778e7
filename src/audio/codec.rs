//! PCM16 frame codec.
//!
//! - Encode: f32 samples in [-1, 1] → clamp → i16 → little-endian bytes
//! - Decode: little-endian bytes → i16 → f32 samples in [-1, 1]

use bytes::{BufMut, BytesMut};

use super::frame::{AudioFrame, EncodedChunk, PcmFormat};
use crate::error::{SessionError, SessionResult};

const SCALE: f32 = 32768.0;

/// Convert one float sample to PCM16. Out-of-range input is clamped, NaN maps to 0.
pub fn sample_to_i16(sample: f32) -> i16 {
    // `as` saturates, so +1.0 * 32768 lands on i16::MAX
    (sample.clamp(-1.0, 1.0) * SCALE) as i16
}

pub fn i16_to_sample(sample: i16) -> f32 {
    sample as f32 / SCALE
}

/// Encode float samples into a wire chunk tagged with `format`.
pub fn encode(samples: &[f32], format: PcmFormat) -> EncodedChunk {
    let mut buf = BytesMut::with_capacity(samples.len() * 2);
    for &s in samples {
        buf.put_i16_le(sample_to_i16(s));
    }
    EncodedChunk::new(buf.freeze(), format)
}

pub fn encode_frame(frame: &AudioFrame) -> EncodedChunk {
    let mut buf = BytesMut::with_capacity(frame.len() * 2);
    for &s in frame.samples() {
        buf.put_i16_le(s);
    }
    EncodedChunk::new(buf.freeze(), PcmFormat::mono(frame.sample_rate()))
}

/// Decode a chunk back to float samples. An empty payload decodes to an empty vec.
pub fn decode(chunk: &EncodedChunk) -> SessionResult<Vec<f32>> {
    Ok(pcm16_samples(chunk)?.into_iter().map(i16_to_sample).collect())
}

/// Decode a chunk into a playable mono frame.
pub fn decode_frame(chunk: &EncodedChunk) -> SessionResult<AudioFrame> {
    if chunk.format.channels != 1 {
        return Err(SessionError::Decode(format!(
            "expected mono audio, got {} channels",
            chunk.format.channels
        )));
    }
    Ok(AudioFrame::new(pcm16_samples(chunk)?, chunk.format.sample_rate))
}

fn pcm16_samples(chunk: &EncodedChunk) -> SessionResult<Vec<i16>> {
    if chunk.data.len() % 2 != 0 {
        return Err(SessionError::Decode(format!(
            "pcm16 payload has odd length {}",
            chunk.data.len()
        )));
    }
    Ok(chunk
        .data
        .chunks_exact(2)
        .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
        .collect())
}

//! Audio frame and wire chunk types.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;

use crate::error::{SessionError, SessionResult};

const NANOS_PER_SEC: u64 = 1_000_000_000;

/// Sample rate / channel tag carried alongside every encoded chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PcmFormat {
    pub sample_rate: u32,
    pub channels: u16,
}

impl PcmFormat {
    pub fn mono(sample_rate: u32) -> Self {
        Self {
            sample_rate,
            channels: 1,
        }
    }

    /// MIME tag used on the wire, e.g. `audio/pcm;rate=16000`.
    pub fn mime_type(&self) -> String {
        if self.channels == 1 {
            format!("audio/pcm;rate={}", self.sample_rate)
        } else {
            format!("audio/pcm;rate={};channels={}", self.sample_rate, self.channels)
        }
    }

    /// Parse a MIME tag. A missing `rate` parameter falls back to `fallback_rate`.
    pub fn from_mime(mime: &str, fallback_rate: u32) -> SessionResult<Self> {
        let mut parts = mime.split(';').map(str::trim);
        let essence = parts.next().unwrap_or_default();
        if !essence.eq_ignore_ascii_case("audio/pcm") {
            return Err(SessionError::Decode(format!("unsupported mime type '{}'", mime)));
        }

        let mut format = PcmFormat::mono(fallback_rate);
        for param in parts {
            let Some((key, value)) = param.split_once('=') else {
                continue;
            };
            match key.trim() {
                "rate" => {
                    format.sample_rate = value.trim().parse().map_err(|_| {
                        SessionError::Decode(format!("bad rate in mime type '{}'", mime))
                    })?;
                }
                "channels" => {
                    format.channels = value.trim().parse().map_err(|_| {
                        SessionError::Decode(format!("bad channels in mime type '{}'", mime))
                    })?;
                }
                _ => {}
            }
        }

        if format.sample_rate == 0 || format.channels == 0 {
            return Err(SessionError::Decode(format!("invalid pcm format '{}'", mime)));
        }
        Ok(format)
    }
}

impl fmt::Display for PcmFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}Hz/{}ch", self.sample_rate, self.channels)
    }
}

/// One unit of audio on the wire: PCM16 little-endian bytes plus its format tag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedChunk {
    pub data: Bytes,
    pub format: PcmFormat,
}

impl EncodedChunk {
    pub fn new(data: impl Into<Bytes>, format: PcmFormat) -> Self {
        Self {
            data: data.into(),
            format,
        }
    }

    pub fn mime_type(&self) -> String {
        self.format.mime_type()
    }
}

/// Immutable mono PCM16 audio at a known sample rate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioFrame {
    samples: Arc<[i16]>,
    sample_rate: u32,
}

impl AudioFrame {
    pub fn new(samples: impl Into<Arc<[i16]>>, sample_rate: u32) -> Self {
        Self {
            samples: samples.into(),
            sample_rate,
        }
    }

    /// A frame of `len` zero samples, mostly useful for tests and priming.
    pub fn silence(len: usize, sample_rate: u32) -> Self {
        Self::new(vec![0i16; len], sample_rate)
    }

    pub fn samples(&self) -> &[i16] {
        &self.samples
    }

    /// Cheap shared handle to the sample buffer for audio threads.
    pub fn shared_samples(&self) -> Arc<[i16]> {
        Arc::clone(&self.samples)
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Playback length, computed in whole nanoseconds so that `start + duration`
    /// of one frame is exactly the start of the next.
    pub fn duration(&self) -> Duration {
        samples_to_duration(self.samples.len() as u64, self.sample_rate)
    }
}

pub fn samples_to_duration(samples: u64, sample_rate: u32) -> Duration {
    if sample_rate == 0 {
        return Duration::ZERO;
    }
    let nanos = (samples as u128 * NANOS_PER_SEC as u128) / sample_rate as u128;
    Duration::from_nanos(nanos as u64)
}

pub fn duration_to_samples(duration: Duration, sample_rate: u32) -> u64 {
    ((duration.as_nanos() * sample_rate as u128) / NANOS_PER_SEC as u128) as u64
}

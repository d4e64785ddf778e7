//! audio - Frame codec, capture pipeline, playback scheduling and device backends
//!
//! The codec and scheduler are pure and device-agnostic. With the `alsa`
//! feature, `AlsaInput` / `AlsaOutput` drive real hardware from dedicated
//! threads.

pub mod capture;
pub mod codec;
pub mod device;
pub mod frame;
pub mod scheduler;

#[cfg(feature = "alsa")]
mod alsa_device;
#[cfg(feature = "alsa")]
mod play;
#[cfg(feature = "alsa")]
mod record;

pub use capture::CapturePipeline;
pub use device::{InputDevice, OutputDevice};
pub use frame::{AudioFrame, EncodedChunk, PcmFormat};
pub use scheduler::{PlaybackHandle, PlaybackId, PlaybackScheduler, ScheduleTicket};

#[cfg(feature = "alsa")]
pub use alsa_device::{AlsaInput, AlsaOutput};

//! Boundary traits for the microphone and speaker.
//!
//! The session controller owns exactly one input and one output device for the
//! lifetime of a call; nothing else in the crate touches them.

use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;

use super::frame::{AudioFrame, PcmFormat};
use super::scheduler::PlaybackId;
use crate::error::SessionResult;

/// A live microphone.
#[async_trait]
pub trait InputDevice: Send {
    /// Start capturing. Buffers of mono float samples at `format.sample_rate`
    /// arrive on the returned channel; `frame_samples` is a sizing hint only.
    ///
    /// Fails with `DeviceUnavailable` on permission or hardware errors.
    async fn open(
        &mut self,
        format: PcmFormat,
        frame_samples: usize,
    ) -> SessionResult<mpsc::Receiver<Vec<f32>>>;

    /// Stop capturing and release the device. Must be safe to call when closed.
    async fn close(&mut self);
}

/// A speaker with its own monotonic playback clock.
///
/// Everything except `close` is called from the session event loop and must
/// not block.
#[async_trait]
pub trait OutputDevice: Send {
    /// Acquire the device. Ids of naturally finished playbacks are sent on
    /// `completions`; stopped playbacks are not reported.
    fn open(
        &mut self,
        format: PcmFormat,
        completions: mpsc::UnboundedSender<PlaybackId>,
    ) -> SessionResult<()>;

    /// Current output clock, measured from `open`. Audio scheduled at or after
    /// this instant plays in full.
    fn now(&self) -> Duration;

    /// Play `frame` starting at `start_at` on the output clock.
    fn schedule(&mut self, id: PlaybackId, frame: &AudioFrame, start_at: Duration) -> SessionResult<()>;

    /// Stop one playback. Unknown or already finished ids are ignored.
    fn stop(&mut self, id: PlaybackId);

    fn stop_all(&mut self);

    /// Release the device. Must be safe to call when closed.
    async fn close(&mut self);
}

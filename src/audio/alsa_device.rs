//! ALSA-backed microphone and speaker.
//!
//! Uses std::thread (NOT tokio tasks) for real-time audio I/O to avoid
//! contention with async network tasks.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc as std_mpsc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use alsa::pcm::{Access, Format, HwParams, PCM};
use alsa::{Direction, ValueOr};
use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot};
use tracing::{error, info, warn};

use super::device::{InputDevice, OutputDevice};
use super::frame::{AudioFrame, PcmFormat, duration_to_samples, samples_to_duration};
use super::play::{self, PlayCommand, Voice};
use super::record;
use super::scheduler::PlaybackId;
use crate::error::{SessionError, SessionResult};

/// Microphone channels requested from ALSA; the record thread downmixes
/// whatever the hardware grants.
const CAPTURE_CHANNELS: u32 = 1;

/// Playback buffer depth in periods. Audio already handed to ALSA can only be
/// cut off by dropping the whole buffer, so it is kept short.
const PLAYBACK_BUFFER_PERIODS: usize = 4;

/// Parameters negotiated with the ALSA hardware.
#[derive(Debug, Clone)]
pub struct AlsaParams {
    /// Actual sample rate after negotiation
    pub sample_rate: u32,
    /// Actual number of channels
    pub channels: u32,
    /// Period size in frames (one frame = channels × sample_width)
    pub period_size: usize,
}

/// Open a PCM device for capture (recording).
pub fn open_capture(device: &str, sample_rate: u32, channels: u32) -> SessionResult<(PCM, AlsaParams)> {
    open_pcm(device, Direction::Capture, sample_rate, channels, None, "Capture")
}

/// Open a PCM device for playback.
pub fn open_playback(
    device: &str,
    sample_rate: u32,
    channels: u32,
    period_size: Option<usize>,
) -> SessionResult<(PCM, AlsaParams)> {
    open_pcm(
        device,
        Direction::Playback,
        sample_rate,
        channels,
        period_size,
        "Playback",
    )
}

fn open_pcm(
    device: &str,
    direction: Direction,
    sample_rate: u32,
    channels: u32,
    period_size: Option<usize>,
    dir_name: &str,
) -> SessionResult<(PCM, AlsaParams)> {
    let pcm = PCM::new(device, direction, false).map_err(|e| {
        SessionError::DeviceUnavailable(format!(
            "Failed to open PCM device '{}' for {}: {}",
            device, dir_name, e
        ))
    })?;

    // Configure hardware parameters
    {
        let hwp = HwParams::any(&pcm)?;
        hwp.set_access(Access::RWInterleaved)?;
        hwp.set_format(Format::S16LE)?;
        hwp.set_channels(channels)?;
        hwp.set_rate_near(sample_rate, ValueOr::Nearest)?;
        if let Some(ps) = period_size {
            hwp.set_period_size_near(ps as alsa::pcm::Frames, ValueOr::Nearest)?;
            hwp.set_buffer_size_near((ps * PLAYBACK_BUFFER_PERIODS) as alsa::pcm::Frames)?;
        }
        pcm.hw_params(&hwp)?;
    }

    // Read back actual negotiated parameters
    let (actual_rate, actual_channels, period_size, buffer_size) = {
        let hwp = pcm.hw_params_current()?;
        let rate = hwp.get_rate()?;
        let ch = hwp.get_channels()?;
        let ps = hwp.get_period_size()? as usize;
        let bs = hwp.get_buffer_size()? as usize;
        (rate, ch, ps, bs)
    };

    if actual_rate != sample_rate {
        warn!(
            device,
            requested = sample_rate,
            actual = actual_rate,
            "ALSA {} rate differs from stream rate; use a plug device to resample",
            dir_name
        );
    }

    info!(
        device,
        rate = actual_rate,
        channels = actual_channels,
        period_size,
        buffer_size,
        "ALSA {} opened",
        dir_name
    );

    Ok((
        pcm,
        AlsaParams {
            sample_rate: actual_rate,
            channels: actual_channels,
            period_size,
        },
    ))
}

// ======================== Input ========================

/// Microphone on an ALSA capture device, read from a dedicated thread.
pub struct AlsaInput {
    device: String,
    running: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl AlsaInput {
    pub fn new(device: impl Into<String>) -> Self {
        Self {
            device: device.into(),
            running: Arc::new(AtomicBool::new(false)),
            handle: None,
        }
    }

    /// Ask the record thread to exit and hand back its handle.
    fn signal_stop(&mut self) -> Option<JoinHandle<()>> {
        self.running.store(false, Ordering::SeqCst);
        self.handle.take()
    }
}

#[async_trait]
impl InputDevice for AlsaInput {
    async fn open(
        &mut self,
        format: PcmFormat,
        frame_samples: usize,
    ) -> SessionResult<mpsc::Receiver<Vec<f32>>> {
        self.close().await;

        let (ready_tx, ready_rx) = oneshot::channel();
        let (frame_tx, frame_rx) = mpsc::channel(8);
        self.running.store(true, Ordering::SeqCst);

        let running = self.running.clone();
        let device = self.device.clone();
        let handle = thread::Builder::new()
            .name("audio-record".into())
            .spawn(move || {
                if let Err(e) = record::record_thread(
                    &device,
                    format.sample_rate,
                    CAPTURE_CHANNELS,
                    frame_samples,
                    frame_tx,
                    ready_tx,
                    &running,
                ) {
                    error!("Recording thread error: {}", e);
                }
            })
            .map_err(|e| SessionError::DeviceUnavailable(format!("spawn capture thread: {}", e)))?;
        self.handle = Some(handle);

        match ready_rx.await {
            Ok(Ok(())) => Ok(frame_rx),
            Ok(Err(e)) => {
                self.close().await;
                Err(e)
            }
            Err(_) => {
                self.close().await;
                Err(SessionError::DeviceUnavailable("capture thread exited during open".into()))
            }
        }
    }

    async fn close(&mut self) {
        if let Some(handle) = self.signal_stop() {
            // readi returns within one period
            join_audio_thread(handle, "audio-record").await;
        }
    }
}

impl Drop for AlsaInput {
    fn drop(&mut self) {
        // 不能在这里阻塞等待，线程看到 running=false 后自行退出
        self.signal_stop();
    }
}

async fn join_audio_thread(handle: JoinHandle<()>, name: &'static str) {
    match tokio::task::spawn_blocking(move || handle.join()).await {
        Ok(Ok(())) => {}
        Ok(Err(_)) => error!(thread = name, "Audio thread panicked"),
        Err(e) => warn!(thread = name, "Failed to join audio thread: {}", e),
    }
}

// ======================== Output ========================

struct PlaybackThread {
    commands: std_mpsc::Sender<PlayCommand>,
    write_head: Arc<AtomicU64>,
    sample_rate: u32,
    running: Arc<AtomicBool>,
    handle: JoinHandle<()>,
}

/// Speaker on an ALSA playback device.
///
/// The playback thread mixes scheduled voices into period-sized buffers and
/// writes silence in between, so the output clock (frames handed to ALSA)
/// always advances while the device is open.
pub struct AlsaOutput {
    device: String,
    channels: u32,
    period_size: usize,
    thread: Option<PlaybackThread>,
}

impl AlsaOutput {
    pub fn new(device: impl Into<String>, channels: u32, period_size: usize) -> Self {
        Self {
            device: device.into(),
            channels: channels.max(1),
            period_size,
            thread: None,
        }
    }

    /// Ask the play thread to exit and hand back its handle.
    fn signal_stop(&mut self) -> Option<JoinHandle<()>> {
        let t = self.thread.take()?;
        t.running.store(false, Ordering::SeqCst);
        Some(t.handle)
    }
}

#[async_trait]
impl OutputDevice for AlsaOutput {
    fn open(
        &mut self,
        format: PcmFormat,
        completions: mpsc::UnboundedSender<PlaybackId>,
    ) -> SessionResult<()> {
        if let Some(handle) = self.signal_stop() {
            warn!("Playback device reopened without close");
            let _ = handle.join();
        }

        let period_size_opt = if self.period_size > 0 {
            Some(self.period_size)
        } else {
            None
        };
        let (pcm, params) =
            open_playback(&self.device, format.sample_rate, self.channels, period_size_opt)?;

        let (commands, command_rx) = std_mpsc::channel();
        let write_head = Arc::new(AtomicU64::new(0));
        let running = Arc::new(AtomicBool::new(true));
        let sample_rate = params.sample_rate;

        let handle = {
            let write_head = write_head.clone();
            let running = running.clone();
            thread::Builder::new()
                .name("audio-play".into())
                .spawn(move || {
                    if let Err(e) =
                        play::play_thread(pcm, params, command_rx, completions, &write_head, &running)
                    {
                        error!("Playback thread error: {}", e);
                    }
                })
                .map_err(|e| SessionError::DeviceUnavailable(format!("spawn playback thread: {}", e)))?
        };

        self.thread = Some(PlaybackThread {
            commands,
            write_head,
            sample_rate,
            running,
            handle,
        });
        Ok(())
    }

    fn now(&self) -> Duration {
        match &self.thread {
            Some(t) => samples_to_duration(t.write_head.load(Ordering::Acquire), t.sample_rate),
            None => Duration::ZERO,
        }
    }

    fn schedule(&mut self, id: PlaybackId, frame: &AudioFrame, start_at: Duration) -> SessionResult<()> {
        let t = self
            .thread
            .as_ref()
            .ok_or_else(|| SessionError::DeviceUnavailable("playback device not open".into()))?;
        let voice = Voice {
            id,
            samples: frame.shared_samples(),
            start_frame: duration_to_samples(start_at, t.sample_rate),
        };
        t.commands
            .send(PlayCommand::Schedule(voice))
            .map_err(|_| SessionError::DeviceUnavailable("playback thread stopped".into()))
    }

    fn stop(&mut self, id: PlaybackId) {
        if let Some(t) = &self.thread {
            let _ = t.commands.send(PlayCommand::Stop(id));
        }
    }

    fn stop_all(&mut self) {
        if let Some(t) = &self.thread {
            let _ = t.commands.send(PlayCommand::StopAll);
        }
    }

    async fn close(&mut self) {
        if let Some(handle) = self.signal_stop() {
            // writei returns within one period
            join_audio_thread(handle, "audio-play").await;
        }
    }
}

impl Drop for AlsaOutput {
    fn drop(&mut self) {
        self.signal_stop();
    }
}

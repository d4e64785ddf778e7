use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc::{Receiver, TryRecvError};

use alsa::pcm::PCM;
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, error, info, warn};

use super::alsa_device::AlsaParams;
use super::scheduler::PlaybackId;
use crate::error::SessionResult;

/// A frame placed on the output timeline, in device frames.
pub struct Voice {
    pub id: PlaybackId,
    pub samples: Arc<[i16]>,
    pub start_frame: u64,
}

impl Voice {
    fn end_frame(&self) -> u64 {
        self.start_frame + self.samples.len() as u64
    }
}

pub enum PlayCommand {
    Schedule(Voice),
    Stop(PlaybackId),
    StopAll,
}

/// Playback loop for the ALSA speaker thread.
///
/// Every iteration mixes the period `[written, written + period)` from the
/// pending voices (silence if none) and writes it. Before mixing, the write
/// head is published one period ahead: anything scheduled at or after it is
/// guaranteed to be mixed in full.
pub fn play_thread(
    pcm: PCM,
    params: AlsaParams,
    commands: Receiver<PlayCommand>,
    completions: UnboundedSender<PlaybackId>,
    write_head: &AtomicU64,
    running: &AtomicBool,
) -> SessionResult<()> {
    let channels = params.channels as usize;
    let period = params.period_size.max(1);
    let io = pcm.io_i16()?;

    let mut pending: VecDeque<Voice> = VecDeque::new();
    let mut mix = vec![0i32; period];
    let mut out = vec![0i16; period * channels];
    let mut written: u64 = 0;

    info!(rate = params.sample_rate, channels, period, "Playback started");

    while running.load(Ordering::Relaxed) {
        write_head.store(written + period as u64, Ordering::Release);

        let mut flush = false;
        loop {
            match commands.try_recv() {
                Ok(PlayCommand::Schedule(voice)) => pending.push_back(voice),
                Ok(PlayCommand::Stop(id)) => flush |= remove_voice(&mut pending, id, written),
                Ok(PlayCommand::StopAll) => {
                    pending.clear();
                    flush = true;
                }
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    info!("Playback command channel closed");
                    return Ok(());
                }
            }
        }
        if flush {
            // 丢弃 ALSA 缓冲区中已写入但未播放的数据
            let _ = pcm.drop();
            let _ = pcm.prepare();
            debug!(written, "Flushed playback buffer");
        }

        // Mix the period
        mix.fill(0);
        let period_end = written + period as u64;
        for voice in &pending {
            let from = voice.start_frame.max(written);
            let to = voice.end_frame().min(period_end);
            for pos in from..to {
                mix[(pos - written) as usize] += voice.samples[(pos - voice.start_frame) as usize] as i32;
            }
        }
        for (i, &s) in mix.iter().enumerate() {
            let s = s.clamp(i16::MIN as i32, i16::MAX as i32) as i16;
            out[i * channels..(i + 1) * channels].fill(s);
        }

        // Write with retry loop to handle short writes and XRUN recovery
        let mut frames_written = 0;
        let mut retry_count = 0u32;
        while frames_written < period {
            match io.writei(&out[frames_written * channels..]) {
                Ok(n) => {
                    frames_written += n;
                    retry_count = 0;
                }
                Err(e) => {
                    warn!("ALSA XRUN or error: {}, recovering...", e);
                    retry_count += 1;
                    if let Err(e2) = pcm.prepare() {
                        error!("Failed to recover PCM playback: {}", e2);
                        return Err(e2.into());
                    }
                    // 熔断器：底层持续跟不上写入速度时，丢弃剩余帧防止死循环
                    if retry_count >= 3 {
                        error!(
                            dropped = period - frames_written,
                            "Max recovery retries reached, dropping rest of period"
                        );
                        break;
                    }
                }
            }
        }
        written = period_end;

        // A voice is done once the hardware has played past its end
        let delay = pcm.delay().unwrap_or(0).max(0) as u64;
        let played = written.saturating_sub(delay);
        pending.retain(|v| {
            if v.end_frame() <= played {
                debug!(id = %v.id, "Playback finished");
                let _ = completions.send(v.id);
                false
            } else {
                true
            }
        });
    }

    info!("Playback stopped");
    Ok(())
}

/// Forget voice `id`. Returns true if part of it was already handed to ALSA,
/// in which case the device buffer has to be dropped to silence it.
fn remove_voice(pending: &mut VecDeque<Voice>, id: PlaybackId, written: u64) -> bool {
    let mut audible = false;
    pending.retain(|v| {
        if v.id != id {
            return true;
        }
        audible = v.start_frame < written;
        false
    });
    audible
}

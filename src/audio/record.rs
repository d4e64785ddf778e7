use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::oneshot;
use tracing::{error, info, warn};

use super::alsa_device;
use super::codec::i16_to_sample;
use crate::error::{SessionError, SessionResult};

/// Capture loop for the ALSA microphone thread.
///
/// Reads one period at a time, averages the channels down to mono and hands
/// float buffers to the capture pipeline. Buffers are dropped rather than
/// blocking if the pipeline falls behind.
pub fn record_thread(
    device: &str,
    sample_rate: u32,
    channels: u32,
    frame_samples: usize,
    frame_tx: mpsc::Sender<Vec<f32>>,
    ready_tx: oneshot::Sender<SessionResult<()>>,
    running: &AtomicBool,
) -> SessionResult<()> {
    // 1. Open ALSA capture device, report the result to `open()`
    let (pcm, params) = match alsa_device::open_capture(device, sample_rate, channels) {
        Ok(opened) => opened,
        Err(e) => {
            let _ = ready_tx.send(Err(e.clone()));
            return Err(e);
        }
    };

    let actual_channels = params.channels as usize;
    let period_size = params.period_size;

    let io = match pcm.io_i16() {
        Ok(io) => io,
        Err(e) => {
            let err = SessionError::from(e);
            let _ = ready_tx.send(Err(err.clone()));
            return Err(err);
        }
    };
    let _ = ready_tx.send(Ok(()));

    // ALSA read buffer (interleaved i16, one period)
    let mut read_buf = vec![0i16; period_size * actual_channels];
    let mut dropped: u64 = 0;

    info!(
        rate = params.sample_rate,
        channels = actual_channels,
        period = period_size,
        frame_samples,
        "Recording started"
    );

    while running.load(Ordering::Relaxed) {
        match io.readi(&mut read_buf) {
            Ok(frames) => {
                let mono: Vec<f32> = read_buf[..frames * actual_channels]
                    .chunks_exact(actual_channels)
                    .map(|frame| {
                        let sum: i32 = frame.iter().map(|&s| s as i32).sum();
                        i16_to_sample((sum / actual_channels as i32) as i16)
                    })
                    .collect();

                match frame_tx.try_send(mono) {
                    Ok(()) => {}
                    Err(TrySendError::Full(_)) => {
                        dropped += 1;
                        if dropped % 50 == 1 {
                            warn!(dropped, "Capture consumer behind, dropping periods");
                        }
                    }
                    Err(TrySendError::Closed(_)) => {
                        info!("Capture receiver dropped");
                        break;
                    }
                }
            }
            Err(e) => {
                warn!("ALSA capture error: {}, recovering...", e);
                if let Err(e2) = pcm.prepare() {
                    error!("Failed to recover PCM capture: {}", e2);
                    break;
                }
            }
        }
    }

    info!("Recording stopped");
    Ok(())
}

//! Microphone → transport pipeline.
//!
//! Device buffers of any size are accumulated into fixed frames, encoded, and
//! pushed onto the transport's outbound queue without waiting. When the queue
//! is full the frame is dropped and counted; the microphone is never stalled.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::codec;
use super::frame::{EncodedChunk, PcmFormat};
use crate::error::SessionError;

#[derive(Debug, Default)]
pub struct CaptureStats {
    sent: AtomicU64,
    dropped: AtomicU64,
}

impl CaptureStats {
    pub fn sent(&self) -> u64 {
        self.sent.load(Ordering::Relaxed)
    }

    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

pub struct CapturePipeline {
    task: JoinHandle<()>,
    stats: Arc<CaptureStats>,
}

impl CapturePipeline {
    /// Spawn the capture task.
    ///
    /// * `frames`        - raw buffers from the input device
    /// * `outbound`      - transport send queue
    /// * `format`        - capture format, tagged onto every chunk
    /// * `frame_samples` - samples per outbound frame (e.g. 4096)
    /// * `exit_tx`       - receives `DeviceUnavailable` if the device stream ends on its own
    pub fn start(
        frames: mpsc::Receiver<Vec<f32>>,
        outbound: mpsc::Sender<EncodedChunk>,
        format: PcmFormat,
        frame_samples: usize,
        exit_tx: mpsc::Sender<SessionError>,
    ) -> Self {
        let stats = Arc::new(CaptureStats::default());
        let task = tokio::spawn(capture_loop(
            frames,
            outbound,
            format,
            frame_samples.max(1),
            exit_tx,
            stats.clone(),
        ));
        info!(format = %format, frame_samples, "Capture started");
        Self { task, stats }
    }

    pub fn stats(&self) -> &CaptureStats {
        &self.stats
    }

    /// Stop immediately. Buffered but unsent samples are discarded.
    pub fn stop(self) {
        self.task.abort();
        info!(
            sent = self.stats.sent(),
            dropped = self.stats.dropped(),
            "Capture stopped"
        );
    }
}

async fn capture_loop(
    mut frames: mpsc::Receiver<Vec<f32>>,
    outbound: mpsc::Sender<EncodedChunk>,
    format: PcmFormat,
    frame_samples: usize,
    exit_tx: mpsc::Sender<SessionError>,
    stats: Arc<CaptureStats>,
) {
    let mut accum_buf: Vec<f32> = Vec::with_capacity(frame_samples * 2);

    while let Some(buffer) = frames.recv().await {
        accum_buf.extend_from_slice(&buffer);

        while accum_buf.len() >= frame_samples {
            let chunk = codec::encode(&accum_buf[..frame_samples], format);
            accum_buf.drain(..frame_samples);

            match outbound.try_send(chunk) {
                Ok(()) => {
                    stats.sent.fetch_add(1, Ordering::Relaxed);
                }
                Err(TrySendError::Full(_)) => {
                    let dropped = stats.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                    debug!(dropped, "Outbound queue full, dropping capture frame");
                }
                Err(TrySendError::Closed(_)) => {
                    // 传输层已关闭，由控制器通过传输事件处理
                    debug!("Outbound queue closed, capture exiting");
                    return;
                }
            }
        }
    }

    warn!("Input device stream ended");
    let _ = exit_tx
        .send(SessionError::DeviceUnavailable("input stream ended".into()))
        .await;
}

//! Scripted devices and transport shared by unit tests.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::audio::{AudioFrame, EncodedChunk, InputDevice, OutputDevice, PcmFormat, PlaybackId};
use crate::config::Config;
use crate::error::{SessionError, SessionResult};
use crate::transport::{Transport, TransportEvent, TransportLink};

// ======================== Output ========================

#[derive(Debug, Clone, PartialEq)]
pub struct ScheduledCall {
    pub id: PlaybackId,
    pub start: Duration,
    pub duration: Duration,
}

#[derive(Default)]
pub struct OutputLog {
    pub now: Duration,
    pub fail_open: bool,
    pub opened: u32,
    pub closed: u32,
    pub stop_all: u32,
    pub scheduled: Vec<ScheduledCall>,
    pub stopped: Vec<PlaybackId>,
    pub completions: Option<mpsc::UnboundedSender<PlaybackId>>,
}

/// Output device with a manually driven clock.
#[derive(Clone, Default)]
pub struct FakeOutput {
    pub log: Arc<Mutex<OutputLog>>,
}

impl FakeOutput {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_now(&self, now: Duration) {
        self.log.lock().unwrap().now = now;
    }

    pub fn advance(&self, by: Duration) {
        self.log.lock().unwrap().now += by;
    }

    pub fn scheduled(&self) -> Vec<ScheduledCall> {
        self.log.lock().unwrap().scheduled.clone()
    }

    pub fn stopped(&self) -> Vec<PlaybackId> {
        self.log.lock().unwrap().stopped.clone()
    }

    /// Report natural completion of `id`, as the audio thread would.
    pub fn finish(&self, id: PlaybackId) {
        if let Some(tx) = &self.log.lock().unwrap().completions {
            let _ = tx.send(id);
        }
    }
}

#[async_trait]
impl OutputDevice for FakeOutput {
    fn open(&mut self, _format: PcmFormat, completions: mpsc::UnboundedSender<PlaybackId>) -> SessionResult<()> {
        let mut log = self.log.lock().unwrap();
        if log.fail_open {
            return Err(SessionError::DeviceUnavailable("speaker busy".into()));
        }
        log.opened += 1;
        log.completions = Some(completions);
        Ok(())
    }

    fn now(&self) -> Duration {
        self.log.lock().unwrap().now
    }

    fn schedule(&mut self, id: PlaybackId, frame: &AudioFrame, start_at: Duration) -> SessionResult<()> {
        self.log.lock().unwrap().scheduled.push(ScheduledCall {
            id,
            start: start_at,
            duration: frame.duration(),
        });
        Ok(())
    }

    fn stop(&mut self, id: PlaybackId) {
        self.log.lock().unwrap().stopped.push(id);
    }

    fn stop_all(&mut self) {
        self.log.lock().unwrap().stop_all += 1;
    }

    async fn close(&mut self) {
        let mut log = self.log.lock().unwrap();
        log.closed += 1;
        log.completions = None;
    }
}

// ======================== Input ========================

#[derive(Default)]
pub struct InputLog {
    pub fail_open: bool,
    pub opened: u32,
    pub closed: u32,
    pub frames: Option<mpsc::Sender<Vec<f32>>>,
}

#[derive(Clone, Default)]
pub struct FakeInput {
    pub log: Arc<Mutex<InputLog>>,
}

impl FakeInput {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing() -> Self {
        let input = Self::default();
        input.log.lock().unwrap().fail_open = true;
        input
    }

    /// Push one device buffer. Returns false if the device is not open.
    pub fn push(&self, samples: Vec<f32>) -> bool {
        let tx = self.log.lock().unwrap().frames.clone();
        match tx {
            Some(tx) => tx.try_send(samples).is_ok(),
            None => false,
        }
    }

    /// Simulate the microphone disappearing.
    pub fn unplug(&self) {
        self.log.lock().unwrap().frames = None;
    }
}

#[async_trait]
impl InputDevice for FakeInput {
    async fn open(&mut self, _format: PcmFormat, _frame_samples: usize) -> SessionResult<mpsc::Receiver<Vec<f32>>> {
        let mut log = self.log.lock().unwrap();
        if log.fail_open {
            return Err(SessionError::DeviceUnavailable("microphone permission denied".into()));
        }
        let (tx, rx) = mpsc::channel(16);
        log.opened += 1;
        log.frames = Some(tx);
        Ok(rx)
    }

    async fn close(&mut self) {
        let mut log = self.log.lock().unwrap();
        log.closed += 1;
        log.frames = None;
    }
}

// ======================== Transport ========================

#[derive(Default)]
pub struct TransportLog {
    pub fail_open: Option<String>,
    pub hang_open: bool,
    pub open_calls: u32,
    pub closed: u32,
    pub events: Option<mpsc::Sender<TransportEvent>>,
    pub outbound: Option<mpsc::Receiver<EncodedChunk>>,
}

#[derive(Clone, Default)]
pub struct FakeTransport {
    pub log: Arc<Mutex<TransportLog>>,
}

impl FakeTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn emit(&self, event: TransportEvent) {
        let tx = self.log.lock().unwrap().events.clone();
        if let Some(tx) = tx {
            let _ = tx.send(event).await;
        }
    }

    pub fn take_outbound(&self) -> Option<mpsc::Receiver<EncodedChunk>> {
        self.log.lock().unwrap().outbound.take()
    }
}

#[async_trait]
impl Transport for FakeTransport {
    async fn open(&mut self, _config: &Config) -> SessionResult<TransportLink> {
        let hang = {
            let mut log = self.log.lock().unwrap();
            log.open_calls += 1;
            if let Some(reason) = &log.fail_open {
                return Err(SessionError::Transport(reason.clone()));
            }
            log.hang_open
        };
        if hang {
            std::future::pending::<()>().await;
        }

        let (event_tx, event_rx) = mpsc::channel(32);
        let (out_tx, out_rx) = mpsc::channel(2);
        let mut log = self.log.lock().unwrap();
        log.events = Some(event_tx);
        log.outbound = Some(out_rx);
        Ok(TransportLink {
            outbound: out_tx,
            events: event_rx,
        })
    }

    async fn close(&mut self) {
        let mut log = self.log.lock().unwrap();
        log.closed += 1;
        log.events = None;
    }
}

/// Poll `cond` until it holds or a second elapses.
pub async fn wait_until(mut cond: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(1);
    while !cond() {
        assert!(tokio::time::Instant::now() < deadline, "condition not reached in time");
        tokio::time::sleep(Duration::from_millis(2)).await;
    }
}

pub fn pcm_chunk(samples: usize, sample_rate: u32) -> EncodedChunk {
    EncodedChunk::new(vec![0u8; samples * 2], PcmFormat::mono(sample_rate))
}

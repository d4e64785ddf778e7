//! Session controller: owns the devices, the transport and the playback
//! scheduler for one call, and drives `Connecting → Open → Closed`.
//!
//! Everything that touches scheduler state runs on one event loop, so no locks
//! are needed around it. Stop wins ties in the `select!`, then interrupt.

use std::sync::Arc;

use futures_util::FutureExt;
use tokio::sync::{Notify, broadcast, mpsc};
use tracing::{Instrument, debug, error, info, info_span, warn};
use uuid::Uuid;

use crate::audio::{
    AudioFrame, CapturePipeline, EncodedChunk, InputDevice, OutputDevice, PlaybackId, PlaybackScheduler, codec,
};
use crate::config::Config;
use crate::error::{SessionError, SessionResult};
use crate::status::{SessionState, SessionStatus};
use crate::transport::{Transport, TransportEvent};

/// Pending stop / interrupt requests. A `Notify` keeps at most one permit, so
/// repeated requests coalesce and a stop can't be crowded out by interrupts.
#[derive(Debug, Default)]
struct ControlSignals {
    stop: Notify,
    interrupt: Notify,
}

impl ControlSignals {
    /// Discard requests left over from a previous call.
    fn clear(&self) {
        let _ = self.stop.notified().now_or_never();
        let _ = self.interrupt.notified().now_or_never();
    }
}

/// Cloneable remote control for a running session.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    signals: Arc<ControlSignals>,
}

impl SessionHandle {
    /// End the call. Also cancels a connect in progress.
    pub fn stop(&self) {
        self.signals.stop.notify_one();
    }

    /// Cut off whatever the remote side is saying.
    pub fn interrupt(&self) {
        self.signals.interrupt.notify_one();
    }
}

/// Receivers that only exist while the session is open.
struct LiveChannels {
    events: mpsc::Receiver<TransportEvent>,
    completions: mpsc::UnboundedReceiver<PlaybackId>,
    capture_exit: mpsc::Receiver<SessionError>,
}

pub struct SessionController<T, I, O> {
    config: Config,
    transport: T,
    input: I,
    output: O,
    state: SessionState,
    scheduler: PlaybackScheduler,
    capture: Option<CapturePipeline>,
    status_tx: broadcast::Sender<SessionStatus>,
    signals: Arc<ControlSignals>,
    // 已获取的资源，关闭时各释放一次
    input_open: bool,
    output_open: bool,
    transport_open: bool,
}

impl<T, I, O> SessionController<T, I, O>
where
    T: Transport,
    I: InputDevice,
    O: OutputDevice,
{
    pub fn new(config: Config, transport: T, input: I, output: O) -> Self {
        let (status_tx, _) = broadcast::channel(config.status_channel_capacity.max(1));
        Self {
            config,
            transport,
            input,
            output,
            state: SessionState::Closed,
            scheduler: PlaybackScheduler::new(),
            capture: None,
            status_tx,
            signals: Arc::default(),
            input_open: false,
            output_open: false,
            transport_open: false,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionStatus> {
        self.status_tx.subscribe()
    }

    pub fn handle(&self) -> SessionHandle {
        SessionHandle {
            signals: self.signals.clone(),
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn scheduler(&self) -> &PlaybackScheduler {
        &self.scheduler
    }

    /// Run one call to completion.
    ///
    /// Returns `Ok` when the call ends by user stop or a clean remote close,
    /// and the fatal error otherwise. Either way every resource acquired along
    /// the way has been released by the time this returns.
    pub async fn run(&mut self) -> SessionResult<()> {
        let span = info_span!("session", session_id = %Uuid::new_v4());
        self.run_session().instrument(span).await
    }

    async fn run_session(&mut self) -> SessionResult<()> {
        self.signals.clear();
        self.scheduler = PlaybackScheduler::new();
        self.state = SessionState::Connecting;
        self.publish(SessionStatus::Connecting);

        let result = match self.connect().await {
            Ok(Some(live)) => self.event_loop(live).await,
            Ok(None) => Ok(()),
            Err(e) => Err(e),
        };

        if let Err(e) = &result {
            error!("Session failed: {}", e);
            self.state = SessionState::Error;
            self.publish(SessionStatus::Error(e.to_string()));
        }
        self.close().await;
        result
    }

    /// Microphone, then speaker, then transport. `Ok(None)` means the user
    /// stopped the call before the transport finished opening.
    async fn connect(&mut self) -> SessionResult<Option<LiveChannels>> {
        let capture_format = self.config.capture_format();
        let frame_samples = self.config.capture_frame_samples;

        let frames = self.input.open(capture_format, frame_samples).await?;
        self.input_open = true;

        let (completion_tx, completions) = mpsc::unbounded_channel();
        self.output.open(self.config.playback_format(), completion_tx)?;
        self.output_open = true;

        // 先置位：打开过程中被取消的传输也要关闭
        self.transport_open = true;
        let link = {
            let open = self.transport.open(&self.config);
            tokio::pin!(open);
            loop {
                tokio::select! {
                    biased;
                    _ = self.signals.stop.notified() => {
                        info!("Stop requested while connecting");
                        return Ok(None);
                    }
                    _ = self.signals.interrupt.notified() => debug!("Nothing to interrupt while connecting"),
                    link = &mut open => break link?,
                }
            }
        };

        self.state = SessionState::Open;
        self.publish(SessionStatus::Listening);
        info!("Session open");

        let (exit_tx, capture_exit) = mpsc::channel(1);
        self.capture = Some(CapturePipeline::start(
            frames,
            link.outbound,
            capture_format,
            frame_samples,
            exit_tx,
        ));

        Ok(Some(LiveChannels {
            events: link.events,
            completions,
            capture_exit,
        }))
    }

    async fn event_loop(&mut self, mut live: LiveChannels) -> SessionResult<()> {
        loop {
            tokio::select! {
                biased;
                _ = self.signals.stop.notified() => {
                    info!("Session stopped by user");
                    return Ok(());
                }
                _ = self.signals.interrupt.notified() => self.interrupt_playback("local"),
                Some(err) = live.capture_exit.recv() => return Err(err),
                event = live.events.recv() => match event {
                    Some(TransportEvent::ChunkReceived(chunk)) => self.play_chunk(&chunk)?,
                    Some(TransportEvent::Interrupted) => self.interrupt_playback("remote"),
                    Some(TransportEvent::TurnComplete) => debug!("Remote turn complete"),
                    Some(TransportEvent::Closed) | None => {
                        info!("Transport closed");
                        return Ok(());
                    }
                    Some(TransportEvent::Error(reason)) => return Err(SessionError::Transport(reason)),
                },
                completion = live.completions.recv() => match completion {
                    Some(id) => {
                        if self.scheduler.complete(id) {
                            self.publish(SessionStatus::Talking(false));
                        }
                    }
                    // 输出设备持有发送端，通道关闭说明播放线程已退出
                    None => return Err(SessionError::DeviceUnavailable("output device stopped".into())),
                },
            }
        }
    }

    fn play_chunk(&mut self, chunk: &EncodedChunk) -> SessionResult<()> {
        // 解码前取票，解码期间发生的打断会使其失效
        let ticket = self.scheduler.ticket();
        let frame = match self.decode_playable(chunk) {
            Ok(frame) => frame,
            Err(e) if !e.is_fatal() => {
                warn!("Dropping inbound chunk: {}", e);
                return Ok(());
            }
            Err(e) => return Err(e),
        };

        let was_talking = self.scheduler.is_talking();
        let scheduled = self.scheduler.schedule(ticket, &frame, &mut self.output)?;
        if scheduled.is_some() && !was_talking {
            self.publish(SessionStatus::Talking(true));
        }
        Ok(())
    }

    /// The output device plays at one fixed rate; a frame at any other rate
    /// would occupy a different span than the scheduler reserved for it.
    fn decode_playable(&self, chunk: &EncodedChunk) -> SessionResult<AudioFrame> {
        let frame = codec::decode_frame(chunk)?;
        let rate = self.config.playback_sample_rate;
        if frame.sample_rate() != rate {
            return Err(SessionError::Decode(format!(
                "chunk is {}Hz but playback runs at {}Hz",
                frame.sample_rate(),
                rate
            )));
        }
        Ok(frame)
    }

    fn interrupt_playback(&mut self, source: &'static str) {
        let outstanding = self.scheduler.outstanding_len();
        if self.scheduler.interrupt(&mut self.output) {
            self.publish(SessionStatus::Talking(false));
        }
        info!(source, outstanding, "Playback interrupted");
    }

    /// Release everything this session acquired. Safe to call any number of
    /// times; each resource is released once and `Closed` is published once.
    pub async fn close(&mut self) {
        if let Some(capture) = self.capture.take() {
            capture.stop();
        }
        if std::mem::take(&mut self.input_open) {
            self.input.close().await;
        }
        if std::mem::take(&mut self.output_open) {
            if self.scheduler.shutdown(&mut self.output) {
                self.publish(SessionStatus::Talking(false));
            }
            self.output.close().await;
        }
        if std::mem::take(&mut self.transport_open) {
            self.transport.close().await;
        }
        self.signals.clear();

        if self.state != SessionState::Closed {
            self.state = SessionState::Closed;
            self.publish(SessionStatus::Closed);
            info!(resyncs = self.scheduler.resyncs(), "Session closed");
        }
    }

    fn publish(&self, status: SessionStatus) {
        debug!(?status, "Status");
        // 没有订阅者时发送失败，忽略
        let _ = self.status_tx.send(status);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::PcmFormat;
    use crate::test_support::{FakeInput, FakeOutput, FakeTransport, pcm_chunk, wait_until};
    use std::time::Duration;
    use tokio::sync::broadcast::error::TryRecvError;
    use tokio::task::JoinHandle;

    type Controller = SessionController<FakeTransport, FakeInput, FakeOutput>;

    const RATE: u32 = 24000;

    fn config() -> Config {
        let mut config = Config::new().unwrap();
        config.capture_frame_samples = 4;
        config.playback_sample_rate = RATE;
        config
    }

    fn setup(input: FakeInput) -> (Controller, FakeTransport, FakeInput, FakeOutput) {
        let transport = FakeTransport::new();
        let output = FakeOutput::new();
        let ctrl = SessionController::new(config(), transport.clone(), input.clone(), output.clone());
        (ctrl, transport, input, output)
    }

    fn spawn(mut ctrl: Controller) -> JoinHandle<(Controller, SessionResult<()>)> {
        tokio::spawn(async move {
            let result = ctrl.run().await;
            (ctrl, result)
        })
    }

    fn drain(status: &mut broadcast::Receiver<SessionStatus>) -> Vec<SessionStatus> {
        let mut out = Vec::new();
        loop {
            match status.try_recv() {
                Ok(s) => out.push(s),
                Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => return out,
                Err(TryRecvError::Lagged(_)) => continue,
            }
        }
    }

    async fn next(status: &mut broadcast::Receiver<SessionStatus>) -> SessionStatus {
        tokio::time::timeout(Duration::from_secs(1), status.recv())
            .await
            .expect("status not published in time")
            .unwrap()
    }

    /// 200 ms of 24 kHz audio.
    fn chunk_200ms() -> TransportEvent {
        TransportEvent::ChunkReceived(pcm_chunk(4800, RATE))
    }

    #[tokio::test]
    async fn test_device_failure_releases_nothing() {
        let (mut ctrl, transport, input, output) = setup(FakeInput::failing());
        let mut status = ctrl.subscribe();

        let err = ctrl.run().await.unwrap_err();
        assert!(matches!(err, SessionError::DeviceUnavailable(_)));
        assert_eq!(
            drain(&mut status),
            vec![
                SessionStatus::Connecting,
                SessionStatus::Error(err.to_string()),
                SessionStatus::Closed,
            ]
        );
        assert_eq!(ctrl.state(), SessionState::Closed);
        assert_eq!(ctrl.scheduler().outstanding_len(), 0);

        assert_eq!(input.log.lock().unwrap().closed, 0);
        let out = output.log.lock().unwrap();
        assert_eq!((out.opened, out.closed), (0, 0));
        let t = transport.log.lock().unwrap();
        assert_eq!((t.open_calls, t.closed), (0, 0));
    }

    #[tokio::test]
    async fn test_full_call() {
        let (ctrl, transport, input, output) = setup(FakeInput::new());
        let mut status = ctrl.subscribe();
        let handle = ctrl.handle();
        let task = spawn(ctrl);

        assert_eq!(next(&mut status).await, SessionStatus::Connecting);
        assert_eq!(next(&mut status).await, SessionStatus::Listening);

        // microphone → transport
        let mut outbound = transport.take_outbound().unwrap();
        assert!(input.push(vec![0.5; 8]));
        for _ in 0..2 {
            let chunk = outbound.recv().await.unwrap();
            assert_eq!(chunk.data.len(), 8);
            assert_eq!(chunk.format, PcmFormat::mono(16000));
        }

        // two chunks play back to back
        transport.emit(chunk_200ms()).await;
        transport.emit(chunk_200ms()).await;
        wait_until(|| output.scheduled().len() == 2).await;
        let first = output.scheduled();
        assert_eq!(first[0].start, Duration::ZERO);
        assert_eq!(first[1].start, Duration::from_millis(200));
        assert_eq!(next(&mut status).await, SessionStatus::Talking(true));

        // barge-in while the second chunk is queued
        output.set_now(Duration::from_millis(250));
        transport.emit(TransportEvent::Interrupted).await;
        transport.emit(chunk_200ms()).await;
        wait_until(|| output.scheduled().len() == 3).await;
        assert_eq!(next(&mut status).await, SessionStatus::Talking(false));
        assert_eq!(next(&mut status).await, SessionStatus::Talking(true));
        assert_eq!(output.stopped(), vec![first[0].id, first[1].id]);
        let third = output.scheduled()[2].clone();
        assert_eq!(third.start, Duration::from_millis(250));

        output.finish(third.id);
        assert_eq!(next(&mut status).await, SessionStatus::Talking(false));

        handle.stop();
        let (mut ctrl, result) = task.await.unwrap();
        assert!(result.is_ok());
        assert_eq!(next(&mut status).await, SessionStatus::Closed);

        let counts = || {
            let i = input.log.lock().unwrap();
            let o = output.log.lock().unwrap();
            let t = transport.log.lock().unwrap();
            (i.opened, i.closed, o.opened, o.closed, o.stop_all, t.open_calls, t.closed)
        };
        assert_eq!(counts(), (1, 1, 1, 1, 1, 1, 1));

        // closing again touches nothing and publishes nothing
        ctrl.close().await;
        ctrl.close().await;
        assert_eq!(counts(), (1, 1, 1, 1, 1, 1, 1));
        assert!(drain(&mut status).is_empty());
        assert_eq!(ctrl.state(), SessionState::Closed);
    }

    #[tokio::test]
    async fn test_stop_while_connecting_closes_transport() {
        let (ctrl, transport, input, output) = setup(FakeInput::new());
        transport.log.lock().unwrap().hang_open = true;
        let mut status = ctrl.subscribe();
        let handle = ctrl.handle();
        let task = spawn(ctrl);

        wait_until(|| transport.log.lock().unwrap().open_calls == 1).await;
        handle.stop();
        let (ctrl, result) = task.await.unwrap();

        assert!(result.is_ok());
        assert_eq!(ctrl.state(), SessionState::Closed);
        assert_eq!(drain(&mut status), vec![SessionStatus::Connecting, SessionStatus::Closed]);
        assert_eq!(transport.log.lock().unwrap().closed, 1);
        assert_eq!(input.log.lock().unwrap().closed, 1);
        assert_eq!(output.log.lock().unwrap().closed, 1);
    }

    #[tokio::test]
    async fn test_transport_open_failure() {
        let (mut ctrl, transport, input, output) = setup(FakeInput::new());
        transport.log.lock().unwrap().fail_open = Some("handshake rejected".into());
        let mut status = ctrl.subscribe();

        let err = ctrl.run().await.unwrap_err();
        assert_eq!(err, SessionError::Transport("handshake rejected".into()));
        assert_eq!(
            drain(&mut status),
            vec![
                SessionStatus::Connecting,
                SessionStatus::Error(err.to_string()),
                SessionStatus::Closed,
            ]
        );
        assert_eq!(transport.log.lock().unwrap().closed, 1);
        assert_eq!(input.log.lock().unwrap().closed, 1);
        assert_eq!(output.log.lock().unwrap().closed, 1);
    }

    #[tokio::test]
    async fn test_transport_error_ends_session() {
        let (ctrl, transport, _input, output) = setup(FakeInput::new());
        let mut status = ctrl.subscribe();
        let task = spawn(ctrl);

        assert_eq!(next(&mut status).await, SessionStatus::Connecting);
        assert_eq!(next(&mut status).await, SessionStatus::Listening);
        transport.emit(TransportEvent::Error("connection reset".into())).await;

        let (ctrl, result) = task.await.unwrap();
        let err = result.unwrap_err();
        assert_eq!(err, SessionError::Transport("connection reset".into()));
        assert_eq!(
            drain(&mut status),
            vec![SessionStatus::Error(err.to_string()), SessionStatus::Closed]
        );
        assert_eq!(ctrl.state(), SessionState::Closed);
        assert_eq!(output.log.lock().unwrap().closed, 1);
        assert_eq!(transport.log.lock().unwrap().closed, 1);
    }

    #[tokio::test]
    async fn test_malformed_chunk_is_dropped() {
        let (ctrl, transport, _input, output) = setup(FakeInput::new());
        let mut status = ctrl.subscribe();
        let task = spawn(ctrl);

        assert_eq!(next(&mut status).await, SessionStatus::Connecting);
        assert_eq!(next(&mut status).await, SessionStatus::Listening);

        // odd byte count is not PCM16
        let bad = EncodedChunk::new(vec![1u8, 2, 3], PcmFormat::mono(RATE));
        transport.emit(TransportEvent::ChunkReceived(bad)).await;
        transport.emit(chunk_200ms()).await;
        wait_until(|| output.scheduled().len() == 1).await;
        assert_eq!(output.scheduled()[0].start, Duration::ZERO);

        transport.emit(TransportEvent::TurnComplete).await;
        transport.emit(TransportEvent::Closed).await;
        let (_ctrl, result) = task.await.unwrap();
        assert!(result.is_ok());
        assert_eq!(
            drain(&mut status),
            vec![
                SessionStatus::Talking(true),
                SessionStatus::Talking(false),
                SessionStatus::Closed,
            ]
        );
        assert_eq!(output.log.lock().unwrap().stop_all, 1);
    }

    #[tokio::test]
    async fn test_local_interrupt() {
        let (ctrl, transport, _input, output) = setup(FakeInput::new());
        let mut status = ctrl.subscribe();
        let handle = ctrl.handle();
        let task = spawn(ctrl);

        assert_eq!(next(&mut status).await, SessionStatus::Connecting);
        assert_eq!(next(&mut status).await, SessionStatus::Listening);
        transport.emit(chunk_200ms()).await;
        assert_eq!(next(&mut status).await, SessionStatus::Talking(true));

        handle.interrupt();
        assert_eq!(next(&mut status).await, SessionStatus::Talking(false));
        assert_eq!(output.stopped().len(), 1);

        handle.stop();
        let (_ctrl, result) = task.await.unwrap();
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_lost_microphone_is_fatal() {
        let (ctrl, transport, input, _output) = setup(FakeInput::new());
        let mut status = ctrl.subscribe();
        let task = spawn(ctrl);

        assert_eq!(next(&mut status).await, SessionStatus::Connecting);
        assert_eq!(next(&mut status).await, SessionStatus::Listening);
        input.unplug();

        let (_ctrl, result) = task.await.unwrap();
        assert!(matches!(result, Err(SessionError::DeviceUnavailable(_))));
        assert_eq!(transport.log.lock().unwrap().closed, 1);
    }

    #[tokio::test]
    async fn test_completion_after_teardown_is_ignored() {
        let (ctrl, transport, _input, output) = setup(FakeInput::new());
        let mut status = ctrl.subscribe();
        let handle = ctrl.handle();
        let task = spawn(ctrl);

        assert_eq!(next(&mut status).await, SessionStatus::Connecting);
        assert_eq!(next(&mut status).await, SessionStatus::Listening);
        transport.emit(chunk_200ms()).await;
        wait_until(|| output.scheduled().len() == 1).await;
        let id = output.scheduled()[0].id;

        handle.stop();
        let (ctrl, _) = task.await.unwrap();
        output.finish(id);

        assert_eq!(ctrl.scheduler().outstanding_len(), 0);
        assert!(!ctrl.scheduler().is_talking());
        assert_eq!(ctrl.scheduler().cursor(), None);
    }

    #[tokio::test]
    async fn test_output_failure_closes_input_once() {
        let (mut ctrl, transport, input, output) = setup(FakeInput::new());
        output.log.lock().unwrap().fail_open = true;
        let mut status = ctrl.subscribe();

        let err = ctrl.run().await.unwrap_err();
        assert!(matches!(err, SessionError::DeviceUnavailable(_)));
        assert_eq!(
            drain(&mut status),
            vec![
                SessionStatus::Connecting,
                SessionStatus::Error(err.to_string()),
                SessionStatus::Closed,
            ]
        );

        let i = input.log.lock().unwrap();
        assert_eq!((i.opened, i.closed), (1, 1));
        let o = output.log.lock().unwrap();
        assert_eq!((o.opened, o.closed), (0, 0));
        let t = transport.log.lock().unwrap();
        assert_eq!((t.open_calls, t.closed), (0, 0));
    }

    #[tokio::test]
    async fn test_dead_speaker_ends_session() {
        let (ctrl, transport, input, output) = setup(FakeInput::new());
        let mut status = ctrl.subscribe();
        let task = spawn(ctrl);

        assert_eq!(next(&mut status).await, SessionStatus::Connecting);
        assert_eq!(next(&mut status).await, SessionStatus::Listening);
        transport.emit(chunk_200ms()).await;
        wait_until(|| output.scheduled().len() == 1).await;
        assert_eq!(next(&mut status).await, SessionStatus::Talking(true));

        // 播放线程退出，完成通知的发送端随之释放
        output.log.lock().unwrap().completions = None;

        let (ctrl, result) = tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .expect("session kept running without a speaker")
            .unwrap();
        let err = result.unwrap_err();
        assert_eq!(err, SessionError::DeviceUnavailable("output device stopped".into()));
        assert_eq!(
            drain(&mut status),
            vec![
                SessionStatus::Error(err.to_string()),
                SessionStatus::Talking(false),
                SessionStatus::Closed,
            ]
        );
        assert_eq!(ctrl.state(), SessionState::Closed);
        assert_eq!(input.log.lock().unwrap().closed, 1);
        assert_eq!(output.log.lock().unwrap().closed, 1);
        assert_eq!(transport.log.lock().unwrap().closed, 1);
    }

    #[tokio::test]
    async fn test_mismatched_rate_is_dropped() {
        let (ctrl, transport, _input, output) = setup(FakeInput::new());
        let mut status = ctrl.subscribe();
        let handle = ctrl.handle();
        let task = spawn(ctrl);

        assert_eq!(next(&mut status).await, SessionStatus::Connecting);
        assert_eq!(next(&mut status).await, SessionStatus::Listening);

        // 48 kHz chunk on a 24 kHz speaker
        transport.emit(TransportEvent::ChunkReceived(pcm_chunk(9600, 48000))).await;
        transport.emit(chunk_200ms()).await;
        wait_until(|| output.scheduled().len() == 1).await;
        let played = output.scheduled();
        assert_eq!(played[0].start, Duration::ZERO);
        assert_eq!(next(&mut status).await, SessionStatus::Talking(true));

        handle.stop();
        let (ctrl, result) = task.await.unwrap();
        assert!(result.is_ok());
        assert_eq!(ctrl.scheduler().outstanding_len(), 0);
        assert_eq!(output.scheduled().len(), 1);
    }

    #[tokio::test]
    async fn test_stop_after_interrupt_burst() {
        let (ctrl, transport, _input, output) = setup(FakeInput::new());
        let mut status = ctrl.subscribe();
        let handle = ctrl.handle();
        let task = spawn(ctrl);

        assert_eq!(next(&mut status).await, SessionStatus::Connecting);
        assert_eq!(next(&mut status).await, SessionStatus::Listening);
        transport.emit(chunk_200ms()).await;
        wait_until(|| output.scheduled().len() == 1).await;

        for _ in 0..20 {
            handle.interrupt();
        }
        handle.stop();

        let (ctrl, result) = tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .expect("stop lost behind interrupts")
            .unwrap();
        assert!(result.is_ok());
        assert_eq!(ctrl.state(), SessionState::Closed);
        assert_eq!(transport.log.lock().unwrap().closed, 1);
    }

    #[tokio::test]
    async fn test_stop_before_run_is_discarded() {
        let (ctrl, transport, _input, _output) = setup(FakeInput::new());
        let mut status = ctrl.subscribe();
        let handle = ctrl.handle();
        handle.stop();
        let task = spawn(ctrl);

        assert_eq!(next(&mut status).await, SessionStatus::Connecting);
        assert_eq!(next(&mut status).await, SessionStatus::Listening);

        transport.emit(TransportEvent::Closed).await;
        let (_ctrl, result) = task.await.unwrap();
        assert!(result.is_ok());
    }
}

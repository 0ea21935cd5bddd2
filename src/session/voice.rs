//! One live voice session: devices, transport, capture and playback.
//!
//! All state changes happen on the thread that calls [`VoiceSession::poll`].
//! Transport callbacks, playback completions and device faults arrive as
//! channel messages and are applied one at a time.

use crate::audio::device::{AudioBackend, DeviceFault, InputDevice};
use crate::audio::frame::SourceId;
use crate::config::Config;
use crate::defaults;
use crate::error::{OmniVoiceError, Result};
use crate::pipeline::capture::{CaptureConfig, CapturePipeline, CaptureStats, PacketSink};
use crate::pipeline::error::{ErrorReporter, LogReporter, RecoveredError};
use crate::pipeline::scheduler::{Completion, PlaybackScheduler};
use crate::session::failure::{FailureKind, SessionFailure, classify};
use crate::session::state::{Activity, SessionAction, SessionInput, SessionMachine, SessionState};
use crate::transport::{ServerMessage, Transport, TransportEvent};
use crossbeam_channel::{Receiver, Sender, select, unbounded};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Audio parameters for one session.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub capture_sample_rate: u32,
    pub playback_sample_rate: u32,
    pub playback_channels: u16,
    pub capture: CaptureConfig,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            capture_sample_rate: defaults::CAPTURE_SAMPLE_RATE,
            playback_sample_rate: defaults::PLAYBACK_SAMPLE_RATE,
            playback_channels: defaults::CHANNELS,
            capture: CaptureConfig::default(),
        }
    }
}

impl From<&Config> for SessionConfig {
    fn from(config: &Config) -> Self {
        Self {
            capture_sample_rate: config.audio.capture_sample_rate,
            playback_sample_rate: config.audio.playback_sample_rate,
            playback_channels: defaults::CHANNELS,
            capture: CaptureConfig {
                frame_window: config.audio.frame_window,
                poll_interval: Duration::from_millis(config.audio.poll_interval_ms),
                ..CaptureConfig::default()
            },
        }
    }
}

/// Snapshot of a session for display.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionStatus {
    pub state: SessionState,
    pub active_sources: usize,
    pub cursor: f64,
    pub chunks_played: u64,
    pub decode_errors: u64,
    pub capture_running: bool,
}

/// A single streaming conversation. Build a new one for every connect.
pub struct VoiceSession {
    machine: SessionMachine,
    config: SessionConfig,
    backend: Arc<dyn AudioBackend>,
    transport: Box<dyn Transport>,
    reporter: Arc<dyn ErrorReporter>,
    events_tx: Sender<TransportEvent>,
    events_rx: Receiver<TransportEvent>,
    ended_tx: Sender<SourceId>,
    ended_rx: Receiver<SourceId>,
    faults_tx: Sender<DeviceFault>,
    faults_rx: Receiver<DeviceFault>,
    pending_input: Option<Box<dyn InputDevice>>,
    sink: Option<Arc<dyn PacketSink>>,
    capture: CapturePipeline,
    scheduler: Option<PlaybackScheduler>,
    released: bool,
    chunks_played: u64,
    decode_errors: u64,
    last_capture: Option<CaptureStats>,
}

impl VoiceSession {
    pub fn new(
        config: SessionConfig,
        backend: Arc<dyn AudioBackend>,
        transport: Box<dyn Transport>,
    ) -> Self {
        let reporter: Arc<dyn ErrorReporter> = Arc::new(LogReporter);
        let (events_tx, events_rx) = unbounded();
        let (ended_tx, ended_rx) = unbounded();
        let (faults_tx, faults_rx) = unbounded();
        Self {
            machine: SessionMachine::new(),
            capture: CapturePipeline::new(config.capture.clone())
                .with_error_reporter(Arc::clone(&reporter))
                .with_fault_sender(faults_tx.clone()),
            config,
            backend,
            transport,
            reporter,
            events_tx,
            events_rx,
            ended_tx,
            ended_rx,
            faults_tx,
            faults_rx,
            pending_input: None,
            sink: None,
            scheduler: None,
            released: false,
            chunks_played: 0,
            decode_errors: 0,
            last_capture: None,
        }
    }

    /// Route recovered errors (decode, delivery) to a custom reporter.
    pub fn with_error_reporter(mut self, reporter: Arc<dyn ErrorReporter>) -> Self {
        self.capture = CapturePipeline::new(self.config.capture.clone())
            .with_error_reporter(Arc::clone(&reporter))
            .with_fault_sender(self.faults_tx.clone());
        self.reporter = reporter;
        self
    }

    /// Acquire devices and start connecting.
    ///
    /// A no-op unless the session is `Idle`. On failure the session is torn
    /// down, left in `Error`, and the error is returned.
    pub fn connect(&mut self) -> Result<()> {
        if self.machine.apply(SessionInput::Connect) != SessionAction::Dial {
            debug!(state = %self.machine.state(), "connect ignored");
            return Ok(());
        }

        if let Err(e) = self.dial() {
            warn!("connect failed: {}", e);
            self.fail(SessionFailure::from_error(&e));
            return Err(e);
        }
        Ok(())
    }

    fn dial(&mut self) -> Result<()> {
        let output = self.backend.open_output(
            self.config.playback_sample_rate,
            self.ended_tx.clone(),
            self.faults_tx.clone(),
        )?;
        self.scheduler = Some(PlaybackScheduler::new(
            output,
            self.config.playback_sample_rate,
            self.config.playback_channels,
        ));

        self.pending_input = Some(
            self.backend
                .open_input(self.config.capture_sample_rate, self.faults_tx.clone())?,
        );
        self.sink = Some(self.transport.open(self.events_tx.clone())?);
        info!("connecting");
        Ok(())
    }

    /// End the session from any state. Idempotent.
    pub fn stop(&mut self) {
        let action = self.machine.apply(SessionInput::Stop);
        self.execute(action);
    }

    /// Cut off model playback (barge-in). No-op unless connected.
    pub fn interrupt(&mut self) {
        let action = self.machine.apply(SessionInput::Interrupt);
        self.execute(action);
    }

    /// Wait up to `timeout` for activity, then apply everything pending.
    ///
    /// Returns how many events were applied.
    pub fn poll(&mut self, timeout: Duration) -> usize {
        let events = self.events_rx.clone();
        let ended = self.ended_rx.clone();
        let faults = self.faults_rx.clone();
        let mut applied = 0;
        select! {
            recv(events) -> event => if let Ok(event) = event {
                self.handle_event(event);
                applied += 1;
            },
            recv(ended) -> id => if let Ok(id) = id {
                self.handle_source_ended(id);
                applied += 1;
            },
            recv(faults) -> fault => if let Ok(fault) = fault {
                self.handle_device_fault(fault);
                applied += 1;
            },
            default(timeout) => {}
        }
        applied + self.drain()
    }

    /// Apply every pending event without waiting.
    pub fn drain(&mut self) -> usize {
        let mut applied = 0;
        loop {
            if let Ok(fault) = self.faults_rx.try_recv() {
                self.handle_device_fault(fault);
            } else if let Ok(event) = self.events_rx.try_recv() {
                self.handle_event(event);
            } else if let Ok(id) = self.ended_rx.try_recv() {
                self.handle_source_ended(id);
            } else {
                return applied;
            }
            applied += 1;
        }
    }

    /// Apply one transport event.
    pub fn handle_event(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::Opened => {
                let action = self.machine.apply(SessionInput::RemoteOpen);
                self.execute(action);
            }
            TransportEvent::Message(message) => self.handle_message(message),
            TransportEvent::Error(reason) => {
                error!(%reason, "transport error");
                self.fail(SessionFailure::from_reason(reason));
            }
            TransportEvent::Closed { code, reason } => {
                info!(?code, %reason, "remote closed");
                match classify(&reason) {
                    FailureKind::Transport => {
                        let action = self.machine.apply(SessionInput::RemoteClose);
                        self.execute(action);
                    }
                    kind => self.fail(SessionFailure::new(kind, reason)),
                }
            }
        }
    }

    fn handle_message(&mut self, message: ServerMessage) {
        for payload in &message.audio {
            if self.machine.apply(SessionInput::RemoteAudio) == SessionAction::Play {
                self.play(payload);
            }
        }
        if message.interrupted {
            debug!("server interrupted playback");
            let action = self.machine.apply(SessionInput::Interrupt);
            self.execute(action);
        }
        if message.turn_complete {
            debug!("model turn complete");
        }
    }

    fn play(&mut self, payload: &str) {
        let Some(scheduler) = self.scheduler.as_mut() else {
            return;
        };
        match scheduler.enqueue_encoded(payload) {
            Ok(id) => {
                self.chunks_played += 1;
                debug!(%id, cursor = scheduler.cursor(), "scheduled response audio");
            }
            Err(e) => {
                let recovered = match e {
                    OmniVoiceError::Decode(decode) => {
                        self.decode_errors += 1;
                        RecoveredError::Decode(decode.to_string())
                    }
                    other => RecoveredError::Device(other.to_string()),
                };
                self.reporter.report("playback", &recovered);
                if scheduler.is_idle() {
                    self.machine.apply(SessionInput::PlaybackIdle);
                }
            }
        }
    }

    fn handle_source_ended(&mut self, id: SourceId) {
        let Some(scheduler) = self.scheduler.as_mut() else {
            return;
        };
        if scheduler.on_source_ended(id) == Completion::Idle {
            self.machine.apply(SessionInput::PlaybackIdle);
        }
    }

    /// A device died mid-session. Ignored unless the session is live.
    pub fn handle_device_fault(&mut self, fault: DeviceFault) {
        if !self.machine.state().is_live() {
            debug!(%fault, "device fault after session end");
            return;
        }
        error!(%fault, "device failed");
        self.fail(SessionFailure::new(FailureKind::Device, fault.to_string()));
    }

    fn fail(&mut self, failure: SessionFailure) {
        let action = self.machine.apply(SessionInput::Failure(failure));
        self.execute(action);
    }

    fn execute(&mut self, action: SessionAction) {
        match action {
            SessionAction::None | SessionAction::Dial | SessionAction::Play => {}
            SessionAction::StartCapture => self.start_capture(),
            SessionAction::Flush => {
                if let Some(scheduler) = self.scheduler.as_mut() {
                    let stopped = scheduler.interrupt();
                    debug!(stopped, "playback flushed");
                }
            }
            SessionAction::Teardown => self.teardown(),
        }
    }

    fn start_capture(&mut self) {
        let (Some(input), Some(sink)) = (self.pending_input.take(), self.sink.clone()) else {
            self.fail(SessionFailure::new(
                FailureKind::Device,
                "capture resources missing at open",
            ));
            return;
        };
        if let Err(e) = self.capture.start(input, sink) {
            error!("capture failed to start: {}", e);
            self.fail(SessionFailure::from_error(&e));
        }
    }

    /// Close the transport, then release every device once.
    fn teardown(&mut self) {
        self.transport.close();
        if self.released {
            return;
        }
        self.released = true;

        self.last_capture = self.capture.stop();
        self.pending_input.take();
        self.sink.take();
        if let Some(mut scheduler) = self.scheduler.take()
            && let Err(e) = scheduler.shutdown()
        {
            warn!("failed to release output device: {}", e);
        }
        info!(
            chunks_played = self.chunks_played,
            decode_errors = self.decode_errors,
            "session resources released"
        );
    }

    pub fn state(&self) -> &SessionState {
        self.machine.state()
    }

    pub fn activity(&self) -> Option<Activity> {
        self.machine.state().activity()
    }

    pub fn failure(&self) -> Option<&SessionFailure> {
        self.machine.state().failure()
    }

    pub fn is_terminal(&self) -> bool {
        self.machine.state().is_terminal()
    }

    /// True once a finite input (WAV file) has been fully sent.
    pub fn capture_finished(&self) -> bool {
        self.capture.is_exhausted()
    }

    /// Capture counters from the last teardown.
    pub fn capture_stats(&self) -> Option<CaptureStats> {
        self.last_capture
    }

    pub fn status(&self) -> SessionStatus {
        SessionStatus {
            state: self.machine.state().clone(),
            active_sources: self.scheduler.as_ref().map_or(0, |s| s.active_count()),
            cursor: self.scheduler.as_ref().map_or(0.0, |s| s.cursor()),
            chunks_played: self.chunks_played,
            decode_errors: self.decode_errors,
            capture_running: self.capture.is_running(),
        }
    }
}

impl Drop for VoiceSession {
    fn drop(&mut self) {
        if self.machine.state().is_live() {
            self.stop();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::device::MockAudioBackend;
    use crate::audio::pcm::encode_frame;
    use crate::pipeline::error::CollectingReporter;
    use crate::transport::{MockTransport, MockTransportHandle};

    fn session_with(backend: MockAudioBackend) -> (VoiceSession, MockTransportHandle, Arc<MockAudioBackend>) {
        let backend = Arc::new(backend);
        let (transport, handle) = MockTransport::new();
        let session = VoiceSession::new(
            SessionConfig::default(),
            Arc::clone(&backend) as Arc<dyn AudioBackend>,
            Box::new(transport),
        );
        (session, handle, backend)
    }

    fn chunk(seconds: f64) -> String {
        encode_frame(&vec![0.1; (seconds * 24000.0) as usize], 24000).data
    }

    #[test]
    fn test_connect_acquires_devices_and_opens_transport() {
        let (mut session, handle, backend) = session_with(MockAudioBackend::new());
        session.connect().unwrap();

        assert_eq!(session.state(), &SessionState::Connecting);
        assert_eq!(backend.inputs().held(), 1);
        assert_eq!(backend.outputs().held(), 1);
        assert_eq!(handle.opens(), 1);
    }

    #[test]
    fn test_second_connect_is_ignored() {
        let (mut session, handle, backend) = session_with(MockAudioBackend::new());
        session.connect().unwrap();
        session.connect().unwrap();
        assert_eq!(handle.opens(), 1);
        assert_eq!(backend.inputs().acquired(), 1);
    }

    #[test]
    fn test_audio_makes_session_speak_then_listen() {
        let (mut session, handle, backend) = session_with(MockAudioBackend::new());
        session.connect().unwrap();
        handle.open();
        session.drain();
        assert_eq!(session.activity(), Some(Activity::Listening));

        handle.audio(chunk(0.5));
        session.drain();
        assert_eq!(session.activity(), Some(Activity::Speaking));
        assert_eq!(session.status().active_sources, 1);

        let output = backend.output_handle().unwrap();
        output.finish_all();
        session.drain();
        assert_eq!(session.activity(), Some(Activity::Listening));
    }

    #[test]
    fn test_decode_error_is_recovered() {
        let reporter = Arc::new(CollectingReporter::new());
        let (session, handle, _backend) = session_with(MockAudioBackend::new());
        let mut session = session.with_error_reporter(reporter.clone());
        session.connect().unwrap();
        handle.open();
        handle.audio("***not base64***");
        session.drain();

        assert_eq!(session.activity(), Some(Activity::Listening));
        assert_eq!(session.status().decode_errors, 1);
        assert!(matches!(
            reporter.reports()[0].1,
            RecoveredError::Decode(_)
        ));
    }

    #[test]
    fn test_local_interrupt_flushes_playback() {
        let (mut session, handle, backend) = session_with(MockAudioBackend::new());
        session.connect().unwrap();
        handle.open();
        handle.audio(chunk(1.0));
        handle.audio(chunk(1.0));
        session.drain();

        session.interrupt();
        assert_eq!(session.activity(), Some(Activity::Listening));
        assert_eq!(session.status().active_sources, 0);
        assert_eq!(backend.output_handle().unwrap().stopped().len(), 2);
    }

    #[test]
    fn test_transport_error_tears_down_before_error_is_visible() {
        let (mut session, handle, backend) = session_with(MockAudioBackend::new());
        session.connect().unwrap();
        handle.open();
        session.drain();
        handle.error("connection reset by peer");
        session.drain();

        assert_eq!(session.failure().map(|f| f.kind), Some(FailureKind::Transport));
        assert_eq!(backend.inputs().held(), 0);
        assert_eq!(backend.outputs().held(), 0);
        assert!(handle.is_closed());
    }

    #[test]
    fn test_quota_close_reason_is_a_quota_failure() {
        let (mut session, handle, _backend) = session_with(MockAudioBackend::new());
        session.connect().unwrap();
        handle.open();
        handle.remote_close(Some(1011), "You exceeded your current quota");
        session.drain();
        assert_eq!(session.failure().map(|f| f.kind), Some(FailureKind::Quota));
    }

    #[test]
    fn test_plain_remote_close_is_closed() {
        let (mut session, handle, backend) = session_with(MockAudioBackend::new());
        session.connect().unwrap();
        handle.open();
        handle.remote_close(Some(1000), "");
        session.drain();
        assert_eq!(session.state(), &SessionState::Closed);
        assert_eq!(backend.outputs().held(), 0);
    }

    #[test]
    fn test_output_failure_fails_connect_without_leaks() {
        let (mut session, handle, backend) = session_with(MockAudioBackend::new().with_output_failure());
        assert!(session.connect().is_err());
        assert_eq!(session.failure().map(|f| f.kind), Some(FailureKind::Device));
        assert_eq!(backend.inputs().acquired(), 0);
        assert_eq!(handle.opens(), 0);
    }

    #[test]
    fn test_drop_releases_live_session() {
        let (mut session, handle, backend) = session_with(MockAudioBackend::new());
        session.connect().unwrap();
        handle.open();
        session.drain();
        drop(session);
        assert_eq!(backend.inputs().held(), 0);
        assert_eq!(backend.outputs().held(), 0);
        assert_eq!(handle.close_calls(), 1);
    }

    #[test]
    fn test_speaker_fault_while_speaking_ends_in_device_error() {
        let (mut session, handle, backend) = session_with(MockAudioBackend::new());
        session.connect().unwrap();
        handle.open();
        handle.audio(chunk(1.0));
        session.drain();
        assert_eq!(session.activity(), Some(Activity::Speaking));

        assert!(backend.fail_device(DeviceFault::output("device no longer available")));
        session.drain();

        let failure = session.failure().cloned().unwrap();
        assert_eq!(failure.kind, FailureKind::Device);
        assert!(failure.reason.contains("speaker"));
        assert_eq!(backend.inputs().held(), 0);
        assert_eq!(backend.outputs().held(), 0);
        assert!(handle.is_closed());
    }

    #[test]
    fn test_fault_while_connecting_fails_session() {
        let (mut session, handle, backend) = session_with(MockAudioBackend::new());
        session.connect().unwrap();
        backend.fail_device(DeviceFault::input("stream invalidated"));
        session.drain();

        assert_eq!(session.failure().map(|f| f.kind), Some(FailureKind::Device));
        assert_eq!(backend.inputs().held(), 0);
        assert_eq!(handle.close_calls(), 1);
    }

    #[test]
    fn test_fault_after_stop_is_ignored() {
        let (mut session, handle, backend) = session_with(MockAudioBackend::new());
        session.connect().unwrap();
        handle.open();
        session.drain();
        session.stop();

        backend.fail_device(DeviceFault::output("late"));
        session.drain();
        assert_eq!(session.state(), &SessionState::Closed);
    }

    #[test]
    fn test_session_config_from_config() {
        let mut config = Config::default();
        config.audio.frame_window = 1024;
        config.audio.poll_interval_ms = 5;
        let session_config = SessionConfig::from(&config);
        assert_eq!(session_config.capture.frame_window, 1024);
        assert_eq!(session_config.capture.poll_interval, Duration::from_millis(5));
        assert_eq!(session_config.playback_sample_rate, 24000);
    }
}

//! Presentation layer over at most one voice session.
//!
//! The overlay never touches devices. It forwards connect/stop intents, pumps
//! session events, and turns session state into the text a front-end shows.

use crate::audio::device::AudioBackend;
use crate::error::Result;
use crate::pipeline::error::ErrorReporter;
use crate::session::{Activity, SessionConfig, SessionFailure, SessionState, VoiceSession};
use crate::transport::TransportFactory;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// What the user can do next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OverlayAction {
    Connect,
    Disconnect,
}

impl OverlayAction {
    pub fn label(self) -> &'static str {
        match self {
            OverlayAction::Connect => "Establish Neural Link",
            OverlayAction::Disconnect => "Terminate Link",
        }
    }
}

/// Text for one frame of the overlay.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OverlayView {
    /// Short machine-friendly state name (`idle`, `connecting`, `speaking`, ...).
    pub state: &'static str,
    pub headline: &'static str,
    pub caption: &'static str,
    pub action: OverlayAction,
    /// Set only when the last session ended in an error.
    pub error: Option<String>,
    pub speaking: bool,
}

impl OverlayView {
    pub fn for_state(state: &SessionState) -> Self {
        let headline = match state {
            SessionState::Connecting => "Initializing...",
            SessionState::Connected(_) => "Neural Link Active",
            SessionState::Idle | SessionState::Closed | SessionState::Error(_) => {
                "Neural Link Offline"
            }
        };
        let caption = match state {
            SessionState::Connected(Activity::Speaking) => "Transmitting Data...",
            SessionState::Connected(Activity::Listening) => "Awaiting Voice Input...",
            _ => "System ready for linkup",
        };
        let action = if state.is_live() {
            OverlayAction::Disconnect
        } else {
            OverlayAction::Connect
        };
        Self {
            state: state.label(),
            headline,
            caption,
            action,
            error: state.failure().map(|f| f.user_message().to_string()),
            speaking: state.activity() == Some(Activity::Speaking),
        }
    }
}

/// Owns the current session and builds a fresh one per connect.
pub struct OverlayController {
    backend: Arc<dyn AudioBackend>,
    transports: Arc<dyn TransportFactory>,
    config: SessionConfig,
    reporter: Option<Arc<dyn ErrorReporter>>,
    session: Option<VoiceSession>,
    setup_failure: Option<SessionFailure>,
    sessions_started: usize,
}

impl OverlayController {
    pub fn new(
        config: SessionConfig,
        backend: Arc<dyn AudioBackend>,
        transports: Arc<dyn TransportFactory>,
    ) -> Self {
        Self {
            backend,
            transports,
            config,
            reporter: None,
            session: None,
            setup_failure: None,
            sessions_started: 0,
        }
    }

    pub fn with_error_reporter(mut self, reporter: Arc<dyn ErrorReporter>) -> Self {
        self.reporter = Some(reporter);
        self
    }

    /// Start a new session unless one is already live.
    pub fn connect(&mut self) -> Result<()> {
        if self.session.as_ref().is_some_and(|s| s.state().is_live()) {
            debug!("connect ignored, session already live");
            return Ok(());
        }
        // Release the previous session before acquiring devices again.
        self.session = None;
        self.setup_failure = None;

        let transport = match self.transports.create() {
            Ok(transport) => transport,
            Err(e) => {
                self.setup_failure = Some(SessionFailure::from_error(&e));
                return Err(e);
            }
        };
        let mut session = VoiceSession::new(self.config.clone(), Arc::clone(&self.backend), transport);
        if let Some(reporter) = &self.reporter {
            session = session.with_error_reporter(Arc::clone(reporter));
        }
        self.sessions_started += 1;
        let result = session.connect();
        self.session = Some(session);
        result
    }

    pub fn stop(&mut self) {
        if let Some(session) = self.session.as_mut() {
            session.stop();
        }
    }

    pub fn interrupt(&mut self) {
        if let Some(session) = self.session.as_mut() {
            session.interrupt();
        }
    }

    /// Pump the current session. Without one, just waits out `timeout`.
    pub fn poll(&mut self, timeout: Duration) -> usize {
        match self.session.as_mut() {
            Some(session) => session.poll(timeout),
            None => {
                std::thread::sleep(timeout);
                0
            }
        }
    }

    pub fn state(&self) -> SessionState {
        match (&self.session, &self.setup_failure) {
            (_, Some(failure)) => SessionState::Error(failure.clone()),
            (Some(session), None) => session.state().clone(),
            (None, None) => SessionState::Idle,
        }
    }

    pub fn view(&self) -> OverlayView {
        OverlayView::for_state(&self.state())
    }

    pub fn session(&self) -> Option<&VoiceSession> {
        self.session.as_ref()
    }

    /// Sessions created so far.
    pub fn sessions_started(&self) -> usize {
        self.sessions_started
    }
}

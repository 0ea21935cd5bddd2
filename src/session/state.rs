//! Session lifecycle as a pure state machine.
//!
//! `SessionMachine::apply` maps every (state, input) pair to the next state and
//! an action for the session to carry out. It owns no resources, so the whole
//! table is testable without devices or a network.

use crate::session::failure::SessionFailure;
use std::fmt;
use tracing::{debug, info};

/// Whether the model is currently producing audio.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Activity {
    Listening,
    Speaking,
}

/// Lifecycle state of one session.
///
/// Devices are held exactly while the state is `Connecting` or `Connected`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Connecting,
    Connected(Activity),
    Closed,
    Error(SessionFailure),
}

impl SessionState {
    /// `Closed` and `Error` never change again.
    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionState::Closed | SessionState::Error(_))
    }

    /// States in which the session holds devices and a connection.
    pub fn is_live(&self) -> bool {
        matches!(self, SessionState::Connecting | SessionState::Connected(_))
    }

    pub fn activity(&self) -> Option<Activity> {
        match self {
            SessionState::Connected(activity) => Some(*activity),
            _ => None,
        }
    }

    pub fn failure(&self) -> Option<&SessionFailure> {
        match self {
            SessionState::Error(failure) => Some(failure),
            _ => None,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            SessionState::Idle => "idle",
            SessionState::Connecting => "connecting",
            SessionState::Connected(Activity::Listening) => "listening",
            SessionState::Connected(Activity::Speaking) => "speaking",
            SessionState::Closed => "closed",
            SessionState::Error(_) => "error",
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionState::Error(failure) => write!(f, "error ({})", failure),
            other => f.write_str(other.label()),
        }
    }
}

/// Something that happened to the session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionInput {
    /// User asked to connect.
    Connect,
    /// The transport finished its handshake.
    RemoteOpen,
    /// A model audio payload arrived.
    RemoteAudio,
    /// Playback must stop now (server "interrupted" or a local barge-in).
    Interrupt,
    /// The last scheduled source finished playing.
    PlaybackIdle,
    /// The remote end closed the connection.
    RemoteClose,
    /// User asked to stop.
    Stop,
    /// Unrecoverable failure.
    Failure(SessionFailure),
}

/// What the session must do after a transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionAction {
    /// Nothing; the input was absorbed or ignored.
    None,
    /// Acquire devices and open the transport.
    Dial,
    /// Start capture wired to the transport.
    StartCapture,
    /// Decode and schedule the payload.
    Play,
    /// Stop all playback and reset the cursor.
    Flush,
    /// Close the transport and release every device.
    Teardown,
}

/// The transition table.
#[derive(Debug, Clone)]
pub struct SessionMachine {
    state: SessionState,
}

impl Default for SessionMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionMachine {
    pub fn new() -> Self {
        Self {
            state: SessionState::Idle,
        }
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    /// Apply an input and return the action to perform.
    pub fn apply(&mut self, input: SessionInput) -> SessionAction {
        use SessionAction as A;
        use SessionInput as I;
        use SessionState as S;

        let (next, action) = match (&self.state, input) {
            (S::Idle, I::Connect) => (Some(S::Connecting), A::Dial),
            // Nothing is running yet.
            (S::Idle, _) => (None, A::None),

            (S::Connecting, I::RemoteOpen) => (Some(S::Connected(Activity::Listening)), A::StartCapture),
            (S::Connecting, I::Stop) => (Some(S::Closed), A::Teardown),
            (S::Connecting, I::RemoteClose) => (
                Some(S::Error(SessionFailure::from_reason(
                    "connection closed before the session opened",
                ))),
                A::Teardown,
            ),
            (S::Connecting, I::Failure(failure)) => (Some(S::Error(failure)), A::Teardown),
            // Audio cannot arrive before open; a second connect is redundant.
            (S::Connecting, I::Connect | I::RemoteAudio | I::Interrupt | I::PlaybackIdle) => {
                (None, A::None)
            }

            (S::Connected(_), I::RemoteAudio) => (Some(S::Connected(Activity::Speaking)), A::Play),
            (S::Connected(_), I::Interrupt) => (Some(S::Connected(Activity::Listening)), A::Flush),
            (S::Connected(_), I::PlaybackIdle) => (Some(S::Connected(Activity::Listening)), A::None),
            (S::Connected(_), I::RemoteClose | I::Stop) => (Some(S::Closed), A::Teardown),
            (S::Connected(_), I::Failure(failure)) => (Some(S::Error(failure)), A::Teardown),
            (S::Connected(_), I::Connect | I::RemoteOpen) => (None, A::None),

            // A connection that opens after stop must be closed again.
            (S::Closed | S::Error(_), I::RemoteOpen) => (None, A::Teardown),
            // Terminal: the first outcome sticks.
            (S::Closed | S::Error(_), _) => (None, A::None),
        };

        if let Some(next) = next
            && next != self.state
        {
            if next.is_terminal() || self.state == S::Idle {
                info!(from = %self.state, to = %next, "session state");
            } else {
                debug!(from = %self.state, to = %next, "session state");
            }
            self.state = next;
        }
        action
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::failure::FailureKind;

    fn quota() -> SessionFailure {
        SessionFailure::new(FailureKind::Quota, "429")
    }

    fn all_inputs() -> Vec<SessionInput> {
        vec![
            SessionInput::Connect,
            SessionInput::RemoteOpen,
            SessionInput::RemoteAudio,
            SessionInput::Interrupt,
            SessionInput::PlaybackIdle,
            SessionInput::RemoteClose,
            SessionInput::Stop,
            SessionInput::Failure(quota()),
        ]
    }

    fn machine_in(state: SessionState) -> SessionMachine {
        SessionMachine { state }
    }

    fn all_states() -> Vec<SessionState> {
        vec![
            SessionState::Idle,
            SessionState::Connecting,
            SessionState::Connected(Activity::Listening),
            SessionState::Connected(Activity::Speaking),
            SessionState::Closed,
            SessionState::Error(SessionFailure::new(FailureKind::Transport, "reset")),
        ]
    }

    #[test]
    fn test_happy_path() {
        let mut machine = SessionMachine::new();
        assert_eq!(machine.apply(SessionInput::Connect), SessionAction::Dial);
        assert_eq!(machine.state(), &SessionState::Connecting);

        assert_eq!(machine.apply(SessionInput::RemoteOpen), SessionAction::StartCapture);
        assert_eq!(machine.state(), &SessionState::Connected(Activity::Listening));

        assert_eq!(machine.apply(SessionInput::RemoteAudio), SessionAction::Play);
        assert_eq!(machine.state().activity(), Some(Activity::Speaking));

        assert_eq!(machine.apply(SessionInput::PlaybackIdle), SessionAction::None);
        assert_eq!(machine.state().activity(), Some(Activity::Listening));

        assert_eq!(machine.apply(SessionInput::Stop), SessionAction::Teardown);
        assert_eq!(machine.state(), &SessionState::Closed);
    }

    #[test]
    fn test_interrupt_returns_to_listening() {
        let mut machine = machine_in(SessionState::Connected(Activity::Speaking));
        assert_eq!(machine.apply(SessionInput::Interrupt), SessionAction::Flush);
        assert_eq!(machine.state(), &SessionState::Connected(Activity::Listening));
    }

    #[test]
    fn test_failure_while_connecting() {
        let mut machine = machine_in(SessionState::Connecting);
        assert_eq!(machine.apply(SessionInput::Failure(quota())), SessionAction::Teardown);
        assert_eq!(machine.state().failure().map(|f| f.kind), Some(FailureKind::Quota));
    }

    #[test]
    fn test_remote_close_before_open_is_an_error() {
        let mut machine = machine_in(SessionState::Connecting);
        assert_eq!(machine.apply(SessionInput::RemoteClose), SessionAction::Teardown);
        assert_eq!(
            machine.state().failure().map(|f| f.kind),
            Some(FailureKind::Transport)
        );
    }

    #[test]
    fn test_stop_during_connect_then_late_open() {
        let mut machine = machine_in(SessionState::Connecting);
        assert_eq!(machine.apply(SessionInput::Stop), SessionAction::Teardown);
        assert_eq!(machine.apply(SessionInput::RemoteOpen), SessionAction::Teardown);
        assert_eq!(machine.state(), &SessionState::Closed);
    }

    #[test]
    fn test_idle_stop_and_interrupt_are_noops() {
        let mut machine = SessionMachine::new();
        assert_eq!(machine.apply(SessionInput::Stop), SessionAction::None);
        assert_eq!(machine.apply(SessionInput::Interrupt), SessionAction::None);
        assert_eq!(machine.state(), &SessionState::Idle);
    }

    #[test]
    fn test_terminal_states_keep_first_outcome() {
        let mut machine = machine_in(SessionState::Error(quota()));
        machine.apply(SessionInput::Failure(SessionFailure::new(
            FailureKind::Transport,
            "later",
        )));
        machine.apply(SessionInput::Connect);
        assert_eq!(machine.state(), &SessionState::Error(quota()));
    }

    #[test]
    fn test_every_pair_is_a_transition_or_documented_noop() {
        for state in all_states() {
            for input in all_inputs() {
                let mut machine = machine_in(state.clone());
                let action = machine.apply(input.clone());
                let next = machine.state().clone();

                // Leaving the live states always tears down exactly there.
                if state.is_live() && !next.is_live() {
                    assert_eq!(action, SessionAction::Teardown, "{state:?} + {input:?}");
                }
                // Terminal states never move.
                if state.is_terminal() {
                    assert_eq!(next, state, "{state:?} + {input:?}");
                    let expected = if input == SessionInput::RemoteOpen {
                        SessionAction::Teardown
                    } else {
                        SessionAction::None
                    };
                    assert_eq!(action, expected, "{state:?} + {input:?}");
                }
                // Idle only moves on connect.
                if state == SessionState::Idle {
                    let moved = next != SessionState::Idle;
                    assert_eq!(moved, input == SessionInput::Connect, "{input:?}");
                }
                // Resources are only acquired from Idle.
                if action == SessionAction::Dial {
                    assert_eq!(state, SessionState::Idle);
                }
                // No action other than Teardown leaves a live state.
                if action != SessionAction::Teardown && state.is_live() {
                    assert!(next.is_live(), "{state:?} + {input:?} -> {next:?}");
                }
            }
        }
    }

    #[test]
    fn test_labels() {
        assert_eq!(SessionState::Connected(Activity::Speaking).label(), "speaking");
        assert_eq!(
            SessionState::Error(quota()).to_string(),
            "error (quota failure: 429)"
        );
    }
}

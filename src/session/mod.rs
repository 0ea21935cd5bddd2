//! Voice session lifecycle.
//!
//! `state` holds the pure transition table, `failure` the terminal error
//! taxonomy, and `voice` the session that wires devices, transport, capture
//! and playback together.

pub mod failure;
pub mod state;
pub mod voice;

pub use failure::{FailureKind, SessionFailure, classify};
pub use state::{Activity, SessionAction, SessionInput, SessionMachine, SessionState};
pub use voice::{SessionConfig, SessionStatus, VoiceSession};

//! omnivoice - Realtime voice sessions from the terminal
//!
//! Streams microphone audio to a hosted speech model and plays its spoken
//! replies back gaplessly, with barge-in and a small session overlay.

#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]
#![warn(clippy::let_underscore_must_use)]

pub mod audio;
#[cfg(feature = "cli")]
pub mod cli;
pub mod config;
pub mod defaults;
pub mod error;
pub mod logging;
pub mod output;
pub mod overlay;
pub mod pipeline;
pub mod session;
pub mod transport;

// Composition root - needs real devices, the live transport and the CLI
#[cfg(all(feature = "cpal-audio", feature = "live", feature = "cli"))]
pub mod app;

// Device seams
pub use audio::device::{AudioBackend, DeviceFault, InputDevice, OutputDevice};
pub use audio::frame::{AudioBuffer, AudioFrame, EncodedPacket, SourceId};

// Pipeline
pub use pipeline::capture::{CaptureConfig, CapturePipeline, PacketSink};
pub use pipeline::error::{ErrorReporter, LogReporter};
pub use pipeline::scheduler::PlaybackScheduler;

// Session
pub use overlay::{OverlayController, OverlayView};
pub use session::{SessionConfig, SessionFailure, SessionState, VoiceSession};
pub use transport::{Transport, TransportEvent, TransportFactory};

// Error handling
pub use error::{OmniVoiceError, Result};

// Config
pub use config::Config;

/// Build version string with optional git commit hash.
///
/// Returns `"0.1.0+abc1234"` when git hash is available, `"0.1.0"` otherwise.
pub fn version_string() -> String {
    let version = env!("CARGO_PKG_VERSION");
    match option_env!("GIT_HASH") {
        Some(hash) if !hash.is_empty() => format!("{}+{}", version, hash),
        _ => version.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_string_starts_with_cargo_version() {
        let ver = version_string();
        assert!(
            ver.starts_with(env!("CARGO_PKG_VERSION")),
            "version_string should start with CARGO_PKG_VERSION, got: {}",
            ver
        );
    }

    #[test]
    fn version_string_has_hash_suffix_only_with_git() {
        let ver = version_string();
        if option_env!("GIT_HASH").is_some_and(|h| !h.is_empty()) {
            let hash_part = ver.split('+').nth(1).unwrap_or("");
            assert_eq!(hash_part.len(), 7, "Git hash should be 7 chars, got: {}", hash_part);
        } else {
            assert_eq!(ver, env!("CARGO_PKG_VERSION"));
        }
    }
}

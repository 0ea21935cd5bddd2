//! Why a session ended in `Error`, and what to tell the user.

use crate::error::OmniVoiceError;
use std::fmt;

/// Category of a terminal session failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureKind {
    /// Microphone or speaker access was refused.
    Permission,
    /// The provider rejected the credentials.
    Authentication,
    /// Quota or rate limit exhausted. Retry is manual only.
    Quota,
    /// Audio hardware missing or failing.
    Device,
    /// Network or protocol failure.
    Transport,
}

impl FailureKind {
    pub fn user_message(self) -> &'static str {
        match self {
            FailureKind::Permission => {
                "Microphone access was denied. Allow audio access and connect again."
            }
            FailureKind::Authentication => "The API key was rejected. Check your key and connect again.",
            FailureKind::Quota => "Quota exceeded (429). Wait a moment, then connect again.",
            FailureKind::Device => "Audio device unavailable. Check your microphone and speakers.",
            FailureKind::Transport => "Connection failed. Check API key quota or mic permissions.",
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FailureKind::Permission => "permission",
            FailureKind::Authentication => "authentication",
            FailureKind::Quota => "quota",
            FailureKind::Device => "device",
            FailureKind::Transport => "transport",
        };
        f.write_str(name)
    }
}

/// A terminal failure with the raw reason kept for logs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionFailure {
    pub kind: FailureKind,
    pub reason: String,
}

impl SessionFailure {
    pub fn new(kind: FailureKind, reason: impl Into<String>) -> Self {
        Self {
            kind,
            reason: reason.into(),
        }
    }

    /// Failure from a transport-reported reason string.
    pub fn from_reason(reason: impl Into<String>) -> Self {
        let reason = reason.into();
        Self {
            kind: classify(&reason),
            reason,
        }
    }

    /// Failure from an error raised while acquiring resources or connecting.
    pub fn from_error(error: &OmniVoiceError) -> Self {
        let kind = match error {
            OmniVoiceError::DevicePermissionDenied { .. } => FailureKind::Permission,
            OmniVoiceError::AuthenticationFailed { .. } => FailureKind::Authentication,
            OmniVoiceError::QuotaExceeded { .. } => FailureKind::Quota,
            OmniVoiceError::AudioDeviceNotFound { .. }
            | OmniVoiceError::AudioCapture { .. }
            | OmniVoiceError::AudioPlayback { .. } => FailureKind::Device,
            other => classify(&other.to_string()),
        };
        Self::new(kind, error.to_string())
    }

    pub fn user_message(&self) -> &'static str {
        self.kind.user_message()
    }
}

impl fmt::Display for SessionFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} failure: {}", self.kind, self.reason)
    }
}

/// Classify a free-text reason from the provider or the network stack.
///
/// Status codes only count as whole numbers: `"HTTP 429"` is quota,
/// `"read 4290 bytes"` is not.
pub fn classify(reason: &str) -> FailureKind {
    let lower = reason.to_lowercase();
    let has = |needles: &[&str]| needles.iter().any(|n| lower.contains(n));
    let has_code = |codes: &[&str]| {
        lower
            .split(|c: char| !c.is_ascii_digit())
            .any(|number| codes.contains(&number))
    };

    if has_code(&["429"]) || has(&["resource_exhausted", "quota", "rate limit"]) {
        FailureKind::Quota
    } else if has(&["permission", "not allowed"]) {
        FailureKind::Permission
    } else if has_code(&["401", "403"]) || has(&["api key", "unauthenticated"]) {
        FailureKind::Authentication
    } else {
        FailureKind::Transport
    }
}

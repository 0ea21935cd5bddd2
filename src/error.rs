//! Error types for omnivoice.

use crate::audio::pcm::DecodeError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum OmniVoiceError {
    // Configuration errors
    #[error("Configuration file not found at {path}")]
    ConfigFileNotFound { path: String },

    #[error("Failed to parse configuration: {message}")]
    ConfigParse { message: String },

    #[error("Invalid configuration value for {key}: {message}")]
    ConfigInvalidValue { key: String, message: String },

    #[error("Configuration error: {0}")]
    Config(#[from] toml::de::Error),

    // Audio device errors
    #[error("Audio device not found: {device}")]
    AudioDeviceNotFound { device: String },

    #[error("Audio device permission denied: {message}")]
    DevicePermissionDenied { message: String },

    #[error("Audio capture failed: {message}")]
    AudioCapture { message: String },

    #[error("Audio playback failed: {message}")]
    AudioPlayback { message: String },

    // Codec errors
    #[error("Audio decode error: {0}")]
    Decode(#[from] DecodeError),

    // Transport errors
    #[error("Transport connection failed: {message}")]
    TransportConnect { message: String },

    #[error("Transport error: {message}")]
    Transport { message: String },

    #[error("Packet delivery failed: {message}")]
    Delivery { message: String },

    #[error("Provider quota exceeded: {message}")]
    QuotaExceeded { message: String },

    #[error("Provider rejected credentials: {message}")]
    AuthenticationFailed { message: String },

    // General I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // Generic error for cases not covered above
    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, OmniVoiceError>;

//! Default configuration constants for omnivoice.
//!
//! Shared by the config layer, the codec and the audio stations so the
//! capture and playback formats agree everywhere.

/// Microphone capture rate in Hz.
///
/// The provider expects 16kHz mono PCM on the input side.
pub const CAPTURE_SAMPLE_RATE: u32 = 16000;

/// Playback rate in Hz for response audio.
pub const PLAYBACK_SAMPLE_RATE: u32 = 24000;

/// Channel count for both directions.
pub const CHANNELS: u16 = 1;

/// Samples per capture window (256ms at 16kHz).
pub const FRAME_WINDOW: usize = 4096;

/// How often the capture thread drains the input device.
pub const CAPTURE_POLL_INTERVAL_MS: u64 = 20;

/// Scale between float samples and 16-bit integer PCM.
pub const PCM_SCALE: f32 = 32768.0;

/// MIME type prefix for raw little-endian 16-bit PCM.
pub const PCM_MIME_PREFIX: &str = "audio/pcm;rate=";

/// Default live endpoint for the bidirectional generate-content stream.
pub const LIVE_ENDPOINT: &str = "wss://generativelanguage.googleapis.com/ws/google.ai.generativelanguage.v1beta.GenerativeService.BidiGenerateContent";

/// Native-audio model used for voice sessions.
pub const LIVE_MODEL: &str = "gemini-2.5-flash-native-audio-preview-12-2025";

/// Prebuilt voice for response audio.
pub const LIVE_VOICE: &str = "Puck";

/// System instruction sent with the session setup.
pub const SYSTEM_INSTRUCTION: &str = "You are NewAI Omni. Be brief, witty and natural.";

/// How long `VoiceSession::poll` waits for an event before returning.
pub const EVENT_POLL_MS: u64 = 50;

/// After a WAV input is fully sent, how long playback must stay quiet before the
/// session ends on its own.
pub const WAV_REPLY_GRACE_MS: u64 = 6000;

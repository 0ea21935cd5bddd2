//! Audio pipeline for a live voice session.
//!
//! Two independent paths share nothing but the session that owns them:
//! capture runs on its own thread and pushes encoded frames to a packet sink,
//! while playback is scheduled on the session thread as model audio arrives.

pub mod capture;
pub mod error;
pub mod scheduler;

pub use capture::{CaptureConfig, CapturePipeline, CaptureStats, FrameWindower, PacketSink};
pub use error::{CollectingReporter, ErrorReporter, LogReporter, RecoveredError};
pub use scheduler::{ActiveSource, Completion, PlaybackScheduler};

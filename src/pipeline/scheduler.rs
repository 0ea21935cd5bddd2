//! Gapless, interruptible playback of response audio.
//!
//! Each decoded buffer becomes a source scheduled at `max(cursor, now)`; the
//! cursor then advances by the buffer's duration. The cursor moves at enqueue
//! time, so sources play in arrival order regardless of how long decoding
//! took. Every source lives in the active set until it either completes or is
//! flushed by `interrupt`, and is removed exactly once.

use crate::audio::device::OutputDevice;
use crate::audio::frame::{AudioBuffer, SourceId};
use crate::audio::pcm::{self, DecodeError};
use crate::error::{OmniVoiceError, Result};
use std::collections::BTreeMap;
use tracing::debug;

/// Bookkeeping for one scheduled source.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ActiveSource {
    pub id: SourceId,
    pub start_at: f64,
    pub duration: f64,
}

impl ActiveSource {
    pub fn end_at(&self) -> f64 {
        self.start_at + self.duration
    }
}

/// Result of a completion notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Completion {
    /// Source removed; others are still playing.
    Removed,
    /// Source removed and nothing else is playing.
    Idle,
    /// Source was not active (already flushed or unknown).
    Stale,
}

/// Schedules decoded buffers on an output device.
pub struct PlaybackScheduler {
    output: Option<Box<dyn OutputDevice>>,
    active: BTreeMap<SourceId, ActiveSource>,
    cursor: f64,
    next_id: u64,
    sample_rate: u32,
    channels: u16,
}

impl PlaybackScheduler {
    /// Create a scheduler for inbound audio at `sample_rate`/`channels`.
    ///
    /// The cursor starts at the device's current time.
    pub fn new(output: Box<dyn OutputDevice>, sample_rate: u32, channels: u16) -> Self {
        let cursor = output.current_time();
        Self {
            output: Some(output),
            active: BTreeMap::new(),
            cursor,
            next_id: 0,
            sample_rate,
            channels,
        }
    }

    /// Decode a base64 PCM16 payload and schedule it.
    ///
    /// Decode failures leave the scheduler untouched.
    pub fn enqueue_encoded(&mut self, data: &str) -> Result<SourceId> {
        let buffer = pcm::decode_buffer(data, self.sample_rate, self.channels)?;
        self.enqueue(buffer)
    }

    /// Decode raw interleaved samples and schedule them.
    pub fn enqueue_samples(
        &mut self,
        samples: &[f32],
        sample_rate: u32,
        channel_count: u16,
    ) -> Result<SourceId> {
        if channel_count == 0 {
            return Err(DecodeError::ZeroChannels.into());
        }
        let channels = channel_count as usize;
        let mut split = vec![Vec::with_capacity(samples.len() / channels); channels];
        for (i, &sample) in samples
            .iter()
            .take(samples.len() / channels * channels)
            .enumerate()
        {
            split[i % channels].push(sample);
        }
        self.enqueue(AudioBuffer::new(split, sample_rate))
    }

    /// Schedule a decoded buffer right after everything already queued.
    pub fn enqueue(&mut self, buffer: AudioBuffer) -> Result<SourceId> {
        let output = self
            .output
            .as_mut()
            .ok_or_else(|| OmniVoiceError::AudioPlayback {
                message: "playback scheduler is shut down".to_string(),
            })?;

        let now = output.current_time();
        let start_at = self.cursor.max(now);
        let duration = buffer.duration_secs();
        let id = SourceId(self.next_id);

        output.schedule(id, buffer, start_at)?;

        self.next_id += 1;
        self.cursor = start_at + duration;
        self.active.insert(
            id,
            ActiveSource {
                id,
                start_at,
                duration,
            },
        );
        debug!(%id, start_at, duration, cursor = self.cursor, "scheduled playback");
        Ok(id)
    }

    /// Completion hook: remove `id` from the active set.
    pub fn on_source_ended(&mut self, id: SourceId) -> Completion {
        if self.active.remove(&id).is_none() {
            return Completion::Stale;
        }
        if self.active.is_empty() {
            debug!(%id, "playback idle");
            Completion::Idle
        } else {
            Completion::Removed
        }
    }

    /// Stop every active source and rewind the cursor to now.
    ///
    /// Returns the number of sources stopped.
    pub fn interrupt(&mut self) -> usize {
        let stopped = self.active.len();
        match self.output.as_mut() {
            Some(output) => {
                for id in self.active.keys() {
                    output.stop_source(*id);
                }
                self.cursor = output.current_time();
            }
            None => self.cursor = 0.0,
        }
        self.active.clear();
        if stopped > 0 {
            debug!(stopped, cursor = self.cursor, "playback interrupted");
        }
        stopped
    }

    /// Interrupt and release the output device. Idempotent.
    pub fn shutdown(&mut self) -> Result<()> {
        self.interrupt();
        self.cursor = 0.0;
        match self.output.take() {
            Some(mut output) => output.close(),
            None => Ok(()),
        }
    }

    pub fn cursor(&self) -> f64 {
        self.cursor
    }

    pub fn active_count(&self) -> usize {
        self.active.len()
    }

    /// Active sources in scheduling order.
    pub fn active_sources(&self) -> Vec<ActiveSource> {
        self.active.values().copied().collect()
    }

    pub fn is_idle(&self) -> bool {
        self.active.is_empty()
    }

    pub fn is_shut_down(&self) -> bool {
        self.output.is_none()
    }
}

impl Drop for PlaybackScheduler {
    fn drop(&mut self) {
        if let Err(e) = self.shutdown() {
            tracing::warn!("failed to release output device: {e}");
        }
    }
}

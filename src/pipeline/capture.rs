//! Capture pipeline: microphone → fixed windows → PCM16/base64 → packet sink.
//!
//! Runs on its own polling thread. Delivery is fire-and-forget: a failed send
//! is reported and the frame dropped, and the next window is captured on
//! schedule regardless. A device that keeps failing is different: capture
//! gives up and sends a [`DeviceFault`] so the session can end.

use crate::audio::device::{DeviceFault, InputDevice};
use crate::audio::frame::{AudioFrame, EncodedPacket};
use crate::audio::pcm;
use crate::defaults;
use crate::error::{OmniVoiceError, Result};
use crate::pipeline::error::{ErrorReporter, LogReporter, RecoveredError};
use crossbeam_channel::Sender;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Destination for encoded capture packets (the session transport's send).
pub trait PacketSink: Send + Sync {
    /// Hand a packet to the transport. Must not block for long.
    fn send(&self, packet: EncodedPacket) -> Result<()>;
}

/// Configuration for the capture pipeline.
#[derive(Debug, Clone)]
pub struct CaptureConfig {
    /// Samples per encoded frame.
    pub frame_window: usize,
    /// How often the input device is drained.
    pub poll_interval: Duration,
    /// Consecutive read failures tolerated before capture gives up.
    pub max_consecutive_errors: u32,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            frame_window: defaults::FRAME_WINDOW,
            poll_interval: Duration::from_millis(defaults::CAPTURE_POLL_INTERVAL_MS),
            max_consecutive_errors: 10,
        }
    }
}

/// Counters from one capture run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CaptureStats {
    /// Frames handed to the sink successfully.
    pub frames_sent: u64,
    /// Frames the sink rejected.
    pub frames_dropped: u64,
}

/// Splits a sample stream into fixed windows.
#[derive(Debug)]
pub struct FrameWindower {
    window: usize,
    pending: Vec<f32>,
}

impl FrameWindower {
    pub fn new(window: usize) -> Self {
        Self {
            window: window.max(1),
            pending: Vec::with_capacity(window * 2),
        }
    }

    /// Append samples and return every complete window now available.
    pub fn push(&mut self, samples: &[f32]) -> Vec<Vec<f32>> {
        self.pending.extend_from_slice(samples);
        let complete = self.pending.len() / self.window;
        let mut windows = Vec::with_capacity(complete);
        for _ in 0..complete {
            windows.push(self.pending.drain(..self.window).collect());
        }
        windows
    }

    /// Take whatever partial window is left.
    pub fn flush(&mut self) -> Option<Vec<f32>> {
        if self.pending.is_empty() {
            None
        } else {
            Some(std::mem::take(&mut self.pending))
        }
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }
}

/// Captures from an input device and pushes packets to a sink.
pub struct CapturePipeline {
    config: CaptureConfig,
    error_reporter: Arc<dyn ErrorReporter>,
    faults: Option<Sender<DeviceFault>>,
    running: Arc<AtomicBool>,
    exhausted: Arc<AtomicBool>,
    handle: Option<JoinHandle<CaptureStats>>,
}

impl CapturePipeline {
    /// Creates a new pipeline with default error reporter.
    pub fn new(config: CaptureConfig) -> Self {
        Self {
            config,
            error_reporter: Arc::new(LogReporter),
            faults: None,
            running: Arc::new(AtomicBool::new(false)),
            exhausted: Arc::new(AtomicBool::new(false)),
            handle: None,
        }
    }

    /// Sets a custom error reporter.
    pub fn with_error_reporter(mut self, reporter: Arc<dyn ErrorReporter>) -> Self {
        self.error_reporter = reporter;
        self
    }

    /// Where to report that the input device stopped working.
    pub fn with_fault_sender(mut self, faults: Sender<DeviceFault>) -> Self {
        self.faults = Some(faults);
        self
    }

    /// Start the device and the capture thread.
    ///
    /// The pipeline takes ownership of `input`; it is stopped and dropped
    /// (releasing the hardware) when capture ends.
    pub fn start(&mut self, mut input: Box<dyn InputDevice>, sink: Arc<dyn PacketSink>) -> Result<()> {
        if self.handle.is_some() {
            return Err(OmniVoiceError::AudioCapture {
                message: "capture pipeline already started".to_string(),
            });
        }

        input.start()?;
        self.running.store(true, Ordering::SeqCst);

        let running = Arc::clone(&self.running);
        let exhausted = Arc::clone(&self.exhausted);
        let reporter = Arc::clone(&self.error_reporter);
        let faults = self.faults.clone();
        let config = self.config.clone();

        let handle = thread::Builder::new()
            .name("omnivoice-capture".to_string())
            .spawn(move || {
                let (stats, end) = capture_loop(input, sink, config, running, reporter);
                match end {
                    CaptureEnd::Exhausted => exhausted.store(true, Ordering::SeqCst),
                    CaptureEnd::Stopped => {}
                    CaptureEnd::Failed(fault) => {
                        if let Some(faults) = faults
                            && faults.send(fault).is_err()
                        {
                            debug!("device fault dropped, session gone");
                        }
                    }
                }
                stats
            })
            .map_err(|e| {
                self.running.store(false, Ordering::SeqCst);
                OmniVoiceError::AudioCapture {
                    message: format!("Failed to spawn capture thread: {}", e),
                }
            })?;

        self.handle = Some(handle);
        info!("capture started");
        Ok(())
    }

    /// Stop capturing and release the input device.
    ///
    /// Returns `None` if capture was never started (or already stopped).
    pub fn stop(&mut self) -> Option<CaptureStats> {
        self.running.store(false, Ordering::SeqCst);
        let handle = self.handle.take()?;
        match handle.join() {
            Ok(stats) => {
                info!(
                    frames_sent = stats.frames_sent,
                    frames_dropped = stats.frames_dropped,
                    "capture stopped"
                );
                Some(stats)
            }
            Err(panic_info) => {
                let msg = panic_info
                    .downcast_ref::<&str>()
                    .copied()
                    .or_else(|| panic_info.downcast_ref::<String>().map(|s| s.as_str()))
                    .unwrap_or("unknown panic");
                warn!("capture thread panicked: {msg}");
                None
            }
        }
    }

    /// True while the capture thread is alive.
    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// True once capture was started and its thread has exited on its own.
    pub fn is_finished(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| h.is_finished())
    }

    /// True once a finite input has been read to the end and fully sent.
    ///
    /// A device that failed is finished but not exhausted.
    pub fn is_exhausted(&self) -> bool {
        self.exhausted.load(Ordering::SeqCst)
    }

    pub fn is_started(&self) -> bool {
        self.handle.is_some()
    }
}

impl Drop for CapturePipeline {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Why the capture thread exited.
enum CaptureEnd {
    Stopped,
    Exhausted,
    Failed(DeviceFault),
}

fn capture_loop(
    mut input: Box<dyn InputDevice>,
    sink: Arc<dyn PacketSink>,
    config: CaptureConfig,
    running: Arc<AtomicBool>,
    reporter: Arc<dyn ErrorReporter>,
) -> (CaptureStats, CaptureEnd) {
    let sample_rate = input.sample_rate();
    let finite = input.is_finite();
    let mut windower = FrameWindower::new(config.frame_window);
    let mut stats = CaptureStats::default();
    let mut sequence: u64 = 0;
    let mut consecutive_errors: u32 = 0;
    let mut end = CaptureEnd::Stopped;

    let mut deliver = |samples: Vec<f32>, stats: &mut CaptureStats| {
        let frame = AudioFrame::new(pcm::quantize(&samples), sample_rate, sequence);
        sequence += 1;
        match sink.send(pcm::encode_audio_frame(&frame)) {
            Ok(()) => stats.frames_sent += 1,
            Err(e) => {
                stats.frames_dropped += 1;
                reporter.report("capture", &RecoveredError::Delivery(e.to_string()));
            }
        }
    };

    while running.load(Ordering::SeqCst) {
        let samples = match input.read_samples() {
            Ok(s) => {
                consecutive_errors = 0;
                s
            }
            Err(e) => {
                consecutive_errors += 1;
                reporter.report("capture", &RecoveredError::Device(e.to_string()));
                if consecutive_errors >= config.max_consecutive_errors {
                    warn!("audio capture failed {consecutive_errors} times in a row, giving up");
                    end = CaptureEnd::Failed(DeviceFault::input(e.to_string()));
                    break;
                }
                thread::sleep(config.poll_interval);
                continue;
            }
        };

        if samples.is_empty() {
            if finite {
                if let Some(tail) = windower.flush() {
                    deliver(tail, &mut stats);
                }
                debug!("finite input exhausted");
                end = CaptureEnd::Exhausted;
                break;
            }
            thread::sleep(config.poll_interval);
            continue;
        }

        for window in windower.push(&samples) {
            deliver(window, &mut stats);
        }

        thread::sleep(config.poll_interval);
    }

    if let Err(e) = input.stop() {
        warn!("failed to stop audio input: {e}");
    }
    (stats, end)
}

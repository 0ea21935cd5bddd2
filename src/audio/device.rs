//! Device seams for a voice session: microphone input, speaker output, and the
//! backend that hands both out.
//!
//! The traits let sessions run against real hardware (cpal), a WAV file, or the
//! mocks in this module.

use crate::audio::frame::{AudioBuffer, SourceId};
use crate::error::{OmniVoiceError, Result};
use crossbeam_channel::Sender;
use std::collections::{HashSet, VecDeque};
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Which device a fault came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceRole {
    Input,
    Output,
}

impl fmt::Display for DeviceRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceRole::Input => write!(f, "microphone"),
            DeviceRole::Output => write!(f, "speaker"),
        }
    }
}

/// A device that was acquired successfully has stopped working.
///
/// Sent on the fault channel handed to `AudioBackend` at open time. The
/// session treats every fault as terminal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceFault {
    pub role: DeviceRole,
    pub message: String,
}

impl DeviceFault {
    pub fn input(message: impl Into<String>) -> Self {
        Self {
            role: DeviceRole::Input,
            message: message.into(),
        }
    }

    pub fn output(message: impl Into<String>) -> Self {
        Self {
            role: DeviceRole::Output,
            message: message.into(),
        }
    }
}

impl fmt::Display for DeviceFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} failed: {}", self.role, self.message)
    }
}

/// Trait for audio input devices (capture taps).
///
/// An instance represents an acquired device; dropping it releases the device.
pub trait InputDevice: Send {
    /// Start capturing audio.
    fn start(&mut self) -> Result<()>;

    /// Stop capturing audio. Safe to call when not started.
    fn stop(&mut self) -> Result<()>;

    /// Drain the samples captured since the last call.
    ///
    /// Returns mono float samples at `sample_rate()`. An empty result means no
    /// new audio yet (or, for finite sources, end of input).
    fn read_samples(&mut self) -> Result<Vec<f32>>;

    /// Sample rate of the samples returned by `read_samples`.
    fn sample_rate(&self) -> u32;

    /// Whether the source ends on its own (file) rather than streaming forever.
    fn is_finite(&self) -> bool {
        false
    }
}

/// Trait for audio output devices with a playback clock.
///
/// An instance represents an acquired output context; `close` releases it.
pub trait OutputDevice: Send {
    /// Monotonic playback clock in seconds.
    fn current_time(&self) -> f64;

    /// Schedule `buffer` to start playing at `start_at` (seconds on the
    /// device clock). When it finishes on its own, `id` is sent on the
    /// completion channel given to `AudioBackend::open_output`.
    fn schedule(&mut self, id: SourceId, buffer: AudioBuffer, start_at: f64) -> Result<()>;

    /// Stop a source immediately. Stopped sources do not report completion.
    fn stop_source(&mut self, id: SourceId);

    /// Release the output context. Idempotent.
    fn close(&mut self) -> Result<()>;
}

/// Hands out the devices for one session.
///
/// Failures after a successful open (a device unplugged mid-stream) go to
/// `faults` instead of being returned.
pub trait AudioBackend: Send + Sync {
    /// Acquire the microphone at `sample_rate`.
    fn open_input(&self, sample_rate: u32, faults: Sender<DeviceFault>) -> Result<Box<dyn InputDevice>>;

    /// Acquire the speaker at `sample_rate`; completions go to `ended`.
    fn open_output(
        &self,
        sample_rate: u32,
        ended: Sender<SourceId>,
        faults: Sender<DeviceFault>,
    ) -> Result<Box<dyn OutputDevice>>;
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Acquire/release counters for one kind of device.
#[derive(Debug, Default)]
pub struct ResourceCounter {
    acquired: AtomicUsize,
    released: AtomicUsize,
}

impl ResourceCounter {
    pub fn acquire(&self) {
        self.acquired.fetch_add(1, Ordering::SeqCst);
    }

    pub fn release(&self) {
        self.released.fetch_add(1, Ordering::SeqCst);
    }

    pub fn acquired(&self) -> usize {
        self.acquired.load(Ordering::SeqCst)
    }

    pub fn released(&self) -> usize {
        self.released.load(Ordering::SeqCst)
    }

    /// Devices currently held (acquired minus released).
    pub fn held(&self) -> isize {
        self.acquired() as isize - self.released() as isize
    }
}

/// Mock input device for testing.
///
/// Returns one queued chunk per `read_samples` call, then empty reads.
#[derive(Debug)]
pub struct MockInputDevice {
    chunks: VecDeque<Vec<f32>>,
    sample_rate: u32,
    is_started: bool,
    finite: bool,
    should_fail_start: bool,
    should_fail_read: bool,
    error_message: String,
    counter: Option<Arc<ResourceCounter>>,
}

impl MockInputDevice {
    /// Create a live (never-ending) mock input at 16kHz with no audio queued.
    pub fn new() -> Self {
        Self {
            chunks: VecDeque::new(),
            sample_rate: crate::defaults::CAPTURE_SAMPLE_RATE,
            is_started: false,
            finite: false,
            should_fail_start: false,
            should_fail_read: false,
            error_message: "mock audio error".to_string(),
            counter: None,
        }
    }

    /// Queue chunks to be returned by successive reads.
    pub fn with_chunks(mut self, chunks: Vec<Vec<f32>>) -> Self {
        self.chunks = chunks.into();
        self
    }

    /// Report end of input once the queued chunks run out.
    pub fn finite(mut self) -> Self {
        self.finite = true;
        self
    }

    pub fn with_sample_rate(mut self, sample_rate: u32) -> Self {
        self.sample_rate = sample_rate;
        self
    }

    pub fn with_start_failure(mut self) -> Self {
        self.should_fail_start = true;
        self
    }

    pub fn with_read_failure(mut self) -> Self {
        self.should_fail_read = true;
        self
    }

    pub fn with_error_message(mut self, message: &str) -> Self {
        self.error_message = message.to_string();
        self
    }

    /// Count this device as acquired now and released when dropped.
    pub fn with_counter(mut self, counter: Arc<ResourceCounter>) -> Self {
        counter.acquire();
        self.counter = Some(counter);
        self
    }

    pub fn is_started(&self) -> bool {
        self.is_started
    }
}

impl Default for MockInputDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl InputDevice for MockInputDevice {
    fn start(&mut self) -> Result<()> {
        if self.should_fail_start {
            return Err(OmniVoiceError::AudioCapture {
                message: self.error_message.clone(),
            });
        }
        self.is_started = true;
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        self.is_started = false;
        Ok(())
    }

    fn read_samples(&mut self) -> Result<Vec<f32>> {
        if self.should_fail_read {
            return Err(OmniVoiceError::AudioCapture {
                message: self.error_message.clone(),
            });
        }
        Ok(self.chunks.pop_front().unwrap_or_default())
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn is_finite(&self) -> bool {
        self.finite
    }
}

impl Drop for MockInputDevice {
    fn drop(&mut self) {
        if let Some(counter) = self.counter.take() {
            counter.release();
        }
    }
}

/// A source as seen by `MockOutputDevice`.
#[derive(Debug, Clone, PartialEq)]
pub struct ScheduledSource {
    pub id: SourceId,
    pub start_at: f64,
    pub duration: f64,
}

#[derive(Debug, Default)]
struct MockOutputState {
    now: f64,
    scheduled: Vec<ScheduledSource>,
    playing: HashSet<SourceId>,
    stopped: Vec<SourceId>,
    close_calls: usize,
}

/// Test handle onto a `MockOutputDevice`: drive its clock and fire completions.
#[derive(Debug, Clone)]
pub struct MockOutputHandle {
    state: Arc<Mutex<MockOutputState>>,
    ended: Sender<SourceId>,
}

impl MockOutputHandle {
    /// Set the device clock.
    pub fn set_time(&self, now: f64) {
        lock(&self.state).now = now;
    }

    pub fn time(&self) -> f64 {
        lock(&self.state).now
    }

    /// Simulate natural completion of a playing source.
    ///
    /// Returns false (and sends nothing) if the source is not playing.
    pub fn finish(&self, id: SourceId) -> bool {
        let was_playing = lock(&self.state).playing.remove(&id);
        if was_playing {
            // Receiver gone means the session already shut down; nothing to notify.
            if self.ended.send(id).is_err() {
                tracing::debug!(%id, "completion dropped, receiver closed");
            }
        }
        was_playing
    }

    /// Complete every playing source in start order.
    pub fn finish_all(&self) -> usize {
        let ids: Vec<SourceId> = {
            let state = lock(&self.state);
            state
                .scheduled
                .iter()
                .filter(|s| state.playing.contains(&s.id))
                .map(|s| s.id)
                .collect()
        };
        ids.into_iter().filter(|id| self.finish(*id)).count()
    }

    /// Every source ever scheduled, in scheduling order.
    pub fn scheduled(&self) -> Vec<ScheduledSource> {
        lock(&self.state).scheduled.clone()
    }

    /// Sources stopped through `stop_source`.
    pub fn stopped(&self) -> Vec<SourceId> {
        lock(&self.state).stopped.clone()
    }

    pub fn playing_count(&self) -> usize {
        lock(&self.state).playing.len()
    }

    /// Number of times `close` was called on the device.
    pub fn close_calls(&self) -> usize {
        lock(&self.state).close_calls
    }
}

/// Mock output device with a manually driven clock.
#[derive(Debug)]
pub struct MockOutputDevice {
    state: Arc<Mutex<MockOutputState>>,
    closed: bool,
    should_fail_schedule: bool,
    counter: Option<Arc<ResourceCounter>>,
}

impl MockOutputDevice {
    /// Create a device and the handle tests use to drive it.
    pub fn new(ended: Sender<SourceId>) -> (Self, MockOutputHandle) {
        let state = Arc::new(Mutex::new(MockOutputState::default()));
        let device = Self {
            state: Arc::clone(&state),
            closed: false,
            should_fail_schedule: false,
            counter: None,
        };
        (device, MockOutputHandle { state, ended })
    }

    pub fn with_schedule_failure(mut self) -> Self {
        self.should_fail_schedule = true;
        self
    }

    /// Count this device as acquired now and released on first close.
    pub fn with_counter(mut self, counter: Arc<ResourceCounter>) -> Self {
        counter.acquire();
        self.counter = Some(counter);
        self
    }
}

impl OutputDevice for MockOutputDevice {
    fn current_time(&self) -> f64 {
        lock(&self.state).now
    }

    fn schedule(&mut self, id: SourceId, buffer: AudioBuffer, start_at: f64) -> Result<()> {
        if self.closed {
            return Err(OmniVoiceError::AudioPlayback {
                message: "output device closed".to_string(),
            });
        }
        if self.should_fail_schedule {
            return Err(OmniVoiceError::AudioPlayback {
                message: "mock schedule failure".to_string(),
            });
        }
        let mut state = lock(&self.state);
        state.scheduled.push(ScheduledSource {
            id,
            start_at,
            duration: buffer.duration_secs(),
        });
        state.playing.insert(id);
        Ok(())
    }

    fn stop_source(&mut self, id: SourceId) {
        let mut state = lock(&self.state);
        if state.playing.remove(&id) {
            state.stopped.push(id);
        }
    }

    fn close(&mut self) -> Result<()> {
        lock(&self.state).close_calls += 1;
        if !self.closed {
            self.closed = true;
            if let Some(counter) = self.counter.take() {
                counter.release();
            }
        }
        Ok(())
    }
}

impl Drop for MockOutputDevice {
    fn drop(&mut self) {
        if let Some(counter) = self.counter.take() {
            counter.release();
        }
    }
}

/// Mock backend handing out mock devices and counting acquisitions.
#[derive(Debug, Default)]
pub struct MockAudioBackend {
    input_chunks: Vec<Vec<f32>>,
    deny_input: bool,
    fail_input_reads: bool,
    fail_output: bool,
    inputs: Arc<ResourceCounter>,
    outputs: Arc<ResourceCounter>,
    output_handle: Mutex<Option<MockOutputHandle>>,
    faults: Mutex<Option<Sender<DeviceFault>>>,
}

impl MockAudioBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Audio the microphone will produce, one chunk per read.
    pub fn with_input_chunks(mut self, chunks: Vec<Vec<f32>>) -> Self {
        self.input_chunks = chunks;
        self
    }

    /// Refuse microphone access as a user denying permission would.
    pub fn with_input_permission_denied(mut self) -> Self {
        self.deny_input = true;
        self
    }

    /// Microphone opens fine, then every read fails.
    pub fn with_input_read_failure(mut self) -> Self {
        self.fail_input_reads = true;
        self
    }

    pub fn with_output_failure(mut self) -> Self {
        self.fail_output = true;
        self
    }

    /// Simulate a stream error callback on an open device.
    ///
    /// Returns false if no device was opened or the session is gone.
    pub fn fail_device(&self, fault: DeviceFault) -> bool {
        lock(&self.faults)
            .as_ref()
            .is_some_and(|faults| faults.send(fault).is_ok())
    }

    pub fn inputs(&self) -> Arc<ResourceCounter> {
        Arc::clone(&self.inputs)
    }

    pub fn outputs(&self) -> Arc<ResourceCounter> {
        Arc::clone(&self.outputs)
    }

    /// Handle onto the most recently opened output device.
    pub fn output_handle(&self) -> Option<MockOutputHandle> {
        lock(&self.output_handle).clone()
    }
}

impl AudioBackend for MockAudioBackend {
    fn open_input(&self, sample_rate: u32, faults: Sender<DeviceFault>) -> Result<Box<dyn InputDevice>> {
        if self.deny_input {
            return Err(OmniVoiceError::DevicePermissionDenied {
                message: "microphone access denied".to_string(),
            });
        }
        *lock(&self.faults) = Some(faults);
        let mut input = MockInputDevice::new()
            .with_sample_rate(sample_rate)
            .with_chunks(self.input_chunks.clone());
        if self.fail_input_reads {
            input = input
                .with_read_failure()
                .with_error_message("microphone disconnected");
        }
        Ok(Box::new(input.with_counter(self.inputs())))
    }

    fn open_output(
        &self,
        _sample_rate: u32,
        ended: Sender<SourceId>,
        faults: Sender<DeviceFault>,
    ) -> Result<Box<dyn OutputDevice>> {
        *lock(&self.faults) = Some(faults);
        if self.fail_output {
            return Err(OmniVoiceError::AudioPlayback {
                message: "no output device".to_string(),
            });
        }
        let (device, handle) = MockOutputDevice::new(ended);
        *lock(&self.output_handle) = Some(handle);
        Ok(Box::new(device.with_counter(self.outputs())))
    }
}

//! Talk command entry point.
//!
//! Wires config, devices, the live transport and the overlay together, then
//! pumps the session on a blocking thread until it ends.

use crate::audio::device::{AudioBackend, DeviceFault, InputDevice, OutputDevice};
use crate::audio::frame::SourceId;
use crate::audio::output::CpalBackend;
use crate::audio::wav::WavInputDevice;
use crate::config::Config;
use crate::defaults;
use crate::error::Result as OmniResult;
use crate::output::{clear_line, print_status_line};
use crate::overlay::OverlayController;
use crate::session::{Activity, SessionConfig, SessionState};
use crate::transport::LiveTransportFactory;
use anyhow::{Context, Result};
use crossbeam_channel::Sender;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Command-line overrides for a talk session.
#[derive(Debug, Clone, Default)]
pub struct TalkOptions {
    pub device: Option<String>,
    pub output_device: Option<String>,
    pub model: Option<String>,
    pub voice: Option<String>,
    pub input_wav: Option<PathBuf>,
    pub max_duration: Option<Duration>,
    pub quiet: bool,
}

impl TalkOptions {
    /// Apply CLI overrides on top of file and environment configuration.
    pub fn apply(&self, config: &mut Config) {
        if let Some(device) = &self.device {
            config.audio.input_device = Some(device.clone());
        }
        if let Some(device) = &self.output_device {
            config.audio.output_device = Some(device.clone());
        }
        if let Some(model) = &self.model {
            config.live.model = model.clone();
        }
        if let Some(voice) = &self.voice {
            config.live.voice = voice.clone();
        }
    }
}

/// Why the talk loop returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// Ctrl+C.
    Interrupted,
    /// `--max-duration` elapsed.
    MaxDuration,
    /// A WAV input was fully sent and the reply finished playing.
    InputFinished,
    /// The session reached `Closed` or `Error` by itself.
    Ended,
}

/// Bounds on how long the talk loop runs.
#[derive(Debug, Clone, Copy)]
pub struct LoopLimits {
    pub max_duration: Option<Duration>,
    pub reply_grace: Duration,
    pub poll_interval: Duration,
}

impl Default for LoopLimits {
    fn default() -> Self {
        Self {
            max_duration: None,
            reply_grace: Duration::from_millis(defaults::WAV_REPLY_GRACE_MS),
            poll_interval: Duration::from_millis(defaults::EVENT_POLL_MS),
        }
    }
}

/// Reads the microphone side from a WAV file, plays through real speakers.
struct WavBackend {
    path: PathBuf,
    speakers: CpalBackend,
}

impl AudioBackend for WavBackend {
    fn open_input(
        &self,
        sample_rate: u32,
        _faults: Sender<DeviceFault>,
    ) -> OmniResult<Box<dyn InputDevice>> {
        Ok(Box::new(WavInputDevice::open(&self.path, sample_rate)?))
    }

    fn open_output(
        &self,
        sample_rate: u32,
        ended: Sender<SourceId>,
        faults: Sender<DeviceFault>,
    ) -> OmniResult<Box<dyn OutputDevice>> {
        self.speakers.open_output(sample_rate, ended, faults)
    }
}

/// Run one talk session with real devices and the live transport.
///
/// Returns the state the session ended in.
pub async fn run_talk_command(mut config: Config, options: TalkOptions) -> Result<SessionState> {
    options.apply(&mut config);
    config.validate().context("invalid configuration")?;

    let devices = CpalBackend::new(
        config.audio.input_device.clone(),
        config.audio.output_device.clone(),
    );
    let backend: Arc<dyn AudioBackend> = match &options.input_wav {
        Some(path) => {
            info!(path = %path.display(), "streaming WAV file as microphone");
            Arc::new(WavBackend {
                path: path.clone(),
                speakers: devices,
            })
        }
        None => Arc::new(devices),
    };

    let runtime = tokio::runtime::Handle::current();
    let transports = Arc::new(LiveTransportFactory::new(config.live.clone(), runtime));
    let overlay = OverlayController::new(SessionConfig::from(&config), backend, transports);

    let stop = Arc::new(AtomicBool::new(false));
    let ctrl_c = Arc::clone(&stop);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            ctrl_c.store(true, Ordering::SeqCst);
        }
    });

    let limits = LoopLimits {
        max_duration: options.max_duration,
        ..LoopLimits::default()
    };
    let quiet = options.quiet;

    let state = tokio::task::spawn_blocking(move || {
        let mut overlay = overlay;
        let reason = run_session_loop(&mut overlay, limits, &stop, |overlay, elapsed| {
            if !quiet {
                let status = overlay.session().map(|s| s.status());
                print_status_line(&overlay.view(), status.as_ref(), elapsed);
            }
        });
        if !quiet {
            clear_line();
        }
        info!(?reason, "talk loop finished");
        overlay.state()
    })
    .await
    .context("session thread panicked")?;

    Ok(state)
}

/// Connect the overlay and pump it until the session ends.
///
/// `on_tick` runs after every poll with the time since start.
pub fn run_session_loop(
    overlay: &mut OverlayController,
    limits: LoopLimits,
    stop: &AtomicBool,
    mut on_tick: impl FnMut(&OverlayController, Duration),
) -> StopReason {
    let started = Instant::now();
    if let Err(e) = overlay.connect() {
        warn!("session failed to start: {}", e);
    }

    let mut quiet_since: Option<Instant> = None;
    loop {
        if stop.load(Ordering::SeqCst) {
            debug!("stop requested");
            overlay.stop();
            return StopReason::Interrupted;
        }
        if let Some(max) = limits.max_duration
            && started.elapsed() >= max
        {
            info!(?max, "max duration reached");
            overlay.stop();
            return StopReason::MaxDuration;
        }

        overlay.poll(limits.poll_interval);
        on_tick(overlay, started.elapsed());

        if overlay.state().is_terminal() {
            return StopReason::Ended;
        }

        let Some(session) = overlay.session() else {
            continue;
        };
        if !session.capture_finished() {
            continue;
        }
        let status = session.status();
        if status.active_sources > 0 || status.state.activity() == Some(Activity::Speaking) {
            quiet_since = None;
            continue;
        }
        let since = *quiet_since.get_or_insert_with(Instant::now);
        if since.elapsed() >= limits.reply_grace {
            info!("input finished and reply played");
            overlay.stop();
            return StopReason::InputFinished;
        }
    }
}

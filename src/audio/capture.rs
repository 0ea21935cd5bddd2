//! Microphone capture through cpal.

use crate::audio::device::{DeviceFault, DeviceRole, InputDevice};
use crate::audio::wav::{downmix, resample};
use crate::error::{OmniVoiceError, Result};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use crossbeam_channel::Sender;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};

/// Run a closure with stderr temporarily redirected to /dev/null.
///
/// cpal probing makes ALSA/JACK/PipeWire print harmless noise on stderr,
/// which would garble the status line.
///
/// # Safety
/// Uses `libc::dup`/`libc::dup2` to save and restore fd 2. Safe as long as no
/// other thread is concurrently manipulating fd 2.
pub(crate) fn with_suppressed_stderr<F, R>(f: F) -> R
where
    F: FnOnce() -> R,
{
    unsafe {
        let saved_fd = libc::dup(2);
        let devnull = libc::open(c"/dev/null".as_ptr(), libc::O_WRONLY);
        if saved_fd >= 0 && devnull >= 0 {
            libc::dup2(devnull, 2);
            libc::close(devnull);
        }

        let result = f();

        if saved_fd >= 0 {
            libc::dup2(saved_fd, 2);
            libc::close(saved_fd);
        }

        result
    }
}

/// Keep JACK from trying to start a server while cpal probes backends.
///
/// # Safety
/// Modifies environment variables; call before any threads are spawned.
pub fn suppress_audio_warnings() {
    // SAFETY: called from main before the runtime starts
    unsafe {
        std::env::set_var("JACK_NO_START_SERVER", "1");
        std::env::set_var("JACK_NO_AUDIO_RESERVATION", "1");
        std::env::set_var("PIPEWIRE_DEBUG", "0");
        std::env::set_var("ALSA_DEBUG", "0");
        std::env::set_var("PW_LOG", "0");
    }
}

/// Preferred device names for PipeWire/PulseAudio desktops.
const PREFERRED_DEVICES: &[&str] = &["pipewire", "pulse", "PulseAudio"];

/// Device name patterns that are never useful for a voice session.
const FILTERED_PATTERNS: &[&str] = &[
    "surround",
    "front:",
    "rear:",
    "center:",
    "side:",
    "Digital Output",
    "S/PDIF",
];

pub(crate) fn should_filter_device(name: &str) -> bool {
    let lower = name.to_lowercase();
    FILTERED_PATTERNS
        .iter()
        .any(|pattern| lower.contains(&pattern.to_lowercase()))
}

pub(crate) fn is_preferred_device(name: &str) -> bool {
    let lower = name.to_lowercase();
    PREFERRED_DEVICES
        .iter()
        .any(|pref| lower.contains(&pref.to_lowercase()))
}

/// Map a cpal failure to an error, recognising OS permission refusals.
pub(crate) fn device_error(context: &str, err: impl std::fmt::Display, playback: bool) -> OmniVoiceError {
    let message = format!("{}: {}", context, err);
    let lower = message.to_lowercase();
    if lower.contains("permission") || lower.contains("not allowed") || lower.contains("access denied") {
        OmniVoiceError::DevicePermissionDenied { message }
    } else if playback {
        OmniVoiceError::AudioPlayback { message }
    } else {
        OmniVoiceError::AudioCapture { message }
    }
}

/// Stream error callback: log every error, report the first as a fault.
pub(crate) fn forward_stream_errors<E: std::fmt::Display>(
    faults: Sender<DeviceFault>,
    role: DeviceRole,
) -> impl FnMut(E) + Send + 'static {
    let mut reported = false;
    move |err| {
        warn!(%role, "audio stream error: {}", err);
        if reported {
            return;
        }
        reported = true;
        let fault = DeviceFault {
            role,
            message: err.to_string(),
        };
        if faults.send(fault).is_err() {
            debug!(%role, "device fault dropped, session gone");
        }
    }
}

/// List usable input devices, marking preferred ones with "\[recommended\]".
pub fn list_input_devices() -> Result<Vec<String>> {
    let devices = with_suppressed_stderr(|| cpal::default_host().input_devices());
    let devices = devices.map_err(|e| device_error("Failed to enumerate input devices", e, false))?;

    Ok(devices
        .filter_map(|device| device.name().ok())
        .filter(|name| !should_filter_device(name))
        .map(|name| {
            if is_preferred_device(&name) {
                format!("{} [recommended]", name)
            } else {
                name
            }
        })
        .collect())
}

fn find_input_device(device_name: Option<&str>) -> Result<cpal::Device> {
    with_suppressed_stderr(|| {
        let host = cpal::default_host();

        if let Some(name) = device_name {
            let devices = host
                .input_devices()
                .map_err(|e| device_error("Failed to enumerate devices", e, false))?;
            for dev in devices {
                if let Ok(dev_name) = dev.name()
                    && dev_name == name
                {
                    return Ok(dev);
                }
            }
            return Err(OmniVoiceError::AudioDeviceNotFound {
                device: name.to_string(),
            });
        }

        if let Ok(devices) = host.input_devices() {
            for device in devices {
                if let Ok(name) = device.name()
                    && is_preferred_device(&name)
                {
                    return Ok(device);
                }
            }
        }

        host.default_input_device()
            .ok_or_else(|| OmniVoiceError::AudioDeviceNotFound {
                device: "default".to_string(),
            })
    })
}

/// Wrapper for cpal::Stream to make it Send.
///
/// SAFETY: the stream is only touched through the Mutex in `CpalInputDevice`,
/// never concurrently from two threads.
pub(crate) struct SendableStream(pub(crate) cpal::Stream);

unsafe impl Send for SendableStream {}

/// Microphone input producing mono f32 samples at the capture rate.
///
/// Tries f32 at the target rate first, then i16, then the device's native
/// format with software downmix and resampling.
pub struct CpalInputDevice {
    device: cpal::Device,
    stream: Arc<Mutex<Option<SendableStream>>>,
    buffer: Arc<Mutex<Vec<f32>>>,
    callback_count: Arc<AtomicU64>,
    sample_rate: u32,
    faults: Sender<DeviceFault>,
}

impl CpalInputDevice {
    /// Acquire an input device by name, or the best default.
    ///
    /// Stream errors after `start` are sent to `faults`.
    pub fn new(device_name: Option<&str>, sample_rate: u32, faults: Sender<DeviceFault>) -> Result<Self> {
        let device = find_input_device(device_name)?;
        if let Ok(name) = device.name() {
            info!(device = %name, sample_rate, "input device selected");
        }
        Ok(Self {
            device,
            stream: Arc::new(Mutex::new(None)),
            buffer: Arc::new(Mutex::new(Vec::new())),
            callback_count: Arc::new(AtomicU64::new(0)),
            sample_rate,
            faults,
        })
    }

    fn build_stream(&self) -> Result<cpal::Stream> {
        let preferred_config = cpal::StreamConfig {
            channels: 1,
            sample_rate: cpal::SampleRate(self.sample_rate),
            buffer_size: cpal::BufferSize::Default,
        };

        let buffer = Arc::clone(&self.buffer);
        let counter = Arc::clone(&self.callback_count);
        if let Ok(stream) = self.device.build_input_stream(
            &preferred_config,
            move |data: &[f32], _: &cpal::InputCallbackInfo| {
                counter.fetch_add(1, Ordering::Relaxed);
                if let Ok(mut buf) = buffer.lock() {
                    buf.extend_from_slice(data);
                }
            },
            forward_stream_errors(self.faults.clone(), DeviceRole::Input),
            None,
        ) {
            return Ok(stream);
        }

        let buffer = Arc::clone(&self.buffer);
        let counter = Arc::clone(&self.callback_count);
        if let Ok(stream) = self.device.build_input_stream(
            &preferred_config,
            move |data: &[i16], _: &cpal::InputCallbackInfo| {
                counter.fetch_add(1, Ordering::Relaxed);
                if let Ok(mut buf) = buffer.lock() {
                    buf.extend(data.iter().map(|&s| s as f32 / 32768.0));
                }
            },
            forward_stream_errors(self.faults.clone(), DeviceRole::Input),
            None,
        ) {
            return Ok(stream);
        }

        self.build_stream_native()
    }

    /// Capture at the device's native config and convert in software.
    fn build_stream_native(&self) -> Result<cpal::Stream> {
        use cpal::SampleFormat;

        let default_config = self
            .device
            .default_input_config()
            .map_err(|e| device_error("Failed to query default input config", e, false))?;

        let native_rate = default_config.sample_rate().0;
        let native_channels = default_config.channels();
        let target_rate = self.sample_rate;
        let stream_config: cpal::StreamConfig = default_config.clone().into();

        info!(
            channels = native_channels,
            rate = native_rate,
            format = ?default_config.sample_format(),
            "using native input format, converting in software"
        );

        let buffer = Arc::clone(&self.buffer);
        let counter = Arc::clone(&self.callback_count);
        let push = move |samples: Vec<f32>| {
            counter.fetch_add(1, Ordering::Relaxed);
            let mono = downmix(&samples, native_channels);
            let converted = resample(&mono, native_rate, target_rate);
            if let Ok(mut buf) = buffer.lock() {
                buf.extend_from_slice(&converted);
            }
        };

        match default_config.sample_format() {
            SampleFormat::F32 => self
                .device
                .build_input_stream(
                    &stream_config,
                    move |data: &[f32], _: &cpal::InputCallbackInfo| push(data.to_vec()),
                    forward_stream_errors(self.faults.clone(), DeviceRole::Input),
                    None,
                )
                .map_err(|e| device_error("Failed to build native f32 stream", e, false)),
            SampleFormat::I16 => self
                .device
                .build_input_stream(
                    &stream_config,
                    move |data: &[i16], _: &cpal::InputCallbackInfo| {
                        push(data.iter().map(|&s| s as f32 / 32768.0).collect())
                    },
                    forward_stream_errors(self.faults.clone(), DeviceRole::Input),
                    None,
                )
                .map_err(|e| device_error("Failed to build native i16 stream", e, false)),
            fmt => Err(OmniVoiceError::AudioCapture {
                message: format!(
                    "Unsupported native sample format: {:?}. Try another device with --device.",
                    fmt
                ),
            }),
        }
    }

    fn lock_stream(&self) -> Result<std::sync::MutexGuard<'_, Option<SendableStream>>> {
        self.stream.lock().map_err(|e| OmniVoiceError::AudioCapture {
            message: format!("Failed to lock stream: {}", e),
        })
    }
}

impl InputDevice for CpalInputDevice {
    fn start(&mut self) -> Result<()> {
        if self.lock_stream()?.is_some() {
            return Ok(());
        }

        let stream = self.build_stream()?;
        stream
            .play()
            .map_err(|e| device_error("Failed to start audio stream", e, false))?;

        // Some PipeWire-ALSA setups accept a non-native config but never call back.
        std::thread::sleep(std::time::Duration::from_millis(200));

        let final_stream = if self.callback_count.load(Ordering::Relaxed) == 0 {
            drop(stream);
            if let Ok(mut buf) = self.buffer.lock() {
                buf.clear();
            }
            let native_stream = self.build_stream_native()?;
            native_stream
                .play()
                .map_err(|e| device_error("Failed to start native audio stream", e, false))?;
            native_stream
        } else {
            stream
        };

        *self.lock_stream()? = Some(SendableStream(final_stream));
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        if let Some(sendable_stream) = self.lock_stream()?.take() {
            sendable_stream
                .0
                .pause()
                .map_err(|e| device_error("Failed to stop audio stream", e, false))?;
        }
        Ok(())
    }

    fn read_samples(&mut self) -> Result<Vec<f32>> {
        let mut buffer = self.buffer.lock().map_err(|e| OmniVoiceError::AudioCapture {
            message: format!("Failed to lock audio buffer: {}", e),
        })?;
        Ok(std::mem::take(&mut *buffer))
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_should_filter_device() {
        assert!(should_filter_device("surround51"));
        assert!(should_filter_device("front:CARD=PCH"));
        assert!(should_filter_device("Digital Output S/PDIF"));
        assert!(!should_filter_device("pipewire"));
        assert!(!should_filter_device("Built-in Audio"));
    }

    #[test]
    fn test_is_preferred_device() {
        assert!(is_preferred_device("PipeWire"));
        assert!(is_preferred_device("pulse"));
        assert!(!is_preferred_device("hw:0,0"));
        assert!(!is_preferred_device("default"));
    }

    #[test]
    fn test_device_error_recognises_permission_refusal() {
        let err = device_error("Failed to open", "Permission denied (os error 13)", false);
        assert!(matches!(err, OmniVoiceError::DevicePermissionDenied { .. }));

        let err = device_error("Failed to open", "device busy", false);
        assert!(matches!(err, OmniVoiceError::AudioCapture { .. }));

        let err = device_error("Failed to open", "device busy", true);
        assert!(matches!(err, OmniVoiceError::AudioPlayback { .. }));
    }

    #[test]
    fn test_stream_errors_report_one_fault() {
        let (faults, faults_rx) = crossbeam_channel::unbounded();
        let mut on_error = forward_stream_errors(faults, DeviceRole::Input);
        on_error("The requested device is no longer available");
        on_error("The requested device is no longer available");

        let fault = faults_rx.try_recv().unwrap();
        assert_eq!(fault, DeviceFault::input("The requested device is no longer available"));
        assert!(faults_rx.try_recv().is_err());
    }

    #[test]
    fn test_stream_error_after_session_end_is_dropped() {
        let (faults, faults_rx) = crossbeam_channel::unbounded::<DeviceFault>();
        drop(faults_rx);
        let mut on_error = forward_stream_errors(faults, DeviceRole::Output);
        on_error("backend error");
    }

    #[test]
    fn test_unknown_device_name_is_not_found() {
        let (faults, _faults_rx) = crossbeam_channel::unbounded();
        match CpalInputDevice::new(Some("NonExistentDevice12345"), 16000, faults) {
            Err(OmniVoiceError::AudioDeviceNotFound { device }) => {
                assert_eq!(device, "NonExistentDevice12345");
            }
            Err(OmniVoiceError::AudioCapture { .. }) => {} // no audio host in CI
            Err(other) => panic!("Expected AudioDeviceNotFound, got {other:?}"),
            Ok(_) => panic!("Expected an error"),
        }
    }

    #[test]
    #[ignore] // Requires audio hardware
    fn test_capture_from_default_device() {
        let (faults, _faults_rx) = crossbeam_channel::unbounded();
        let mut device = CpalInputDevice::new(None, 16000, faults).unwrap();
        device.start().unwrap();
        std::thread::sleep(std::time::Duration::from_millis(100));
        assert!(device.read_samples().is_ok());
        device.stop().unwrap();
    }

    #[test]
    #[ignore] // Requires audio hardware
    fn test_list_input_devices_filters_unusable() {
        let devices = list_input_devices().unwrap();
        assert!(devices.iter().all(|d| !d.to_lowercase().contains("surround")));
    }
}

//! Speaker output through cpal, plus the cpal-backed `AudioBackend`.
//!
//! Playback time is derived from frames rendered by the device callback, so the
//! scheduler's cursor and the mixer agree on a sample-accurate timeline.

use crate::audio::capture::{
    CpalInputDevice, SendableStream, device_error, forward_stream_errors, is_preferred_device,
    should_filter_device, with_suppressed_stderr,
};
use crate::audio::device::{AudioBackend, DeviceFault, DeviceRole, InputDevice, OutputDevice};
use crate::audio::frame::{AudioBuffer, SourceId};
use crate::audio::wav::resample;
use crate::error::{OmniVoiceError, Result};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use crossbeam_channel::Sender;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, info, trace};

struct MixSource {
    id: SourceId,
    start_frame: u64,
    samples: Vec<f32>,
}

impl MixSource {
    fn end_frame(&self) -> u64 {
        self.start_frame + self.samples.len() as u64
    }
}

/// Sample-accurate mixer shared with the device callback.
pub(crate) struct Mixer {
    frames_rendered: u64,
    sources: Vec<MixSource>,
    ended: Sender<SourceId>,
}

impl Mixer {
    pub(crate) fn new(ended: Sender<SourceId>) -> Self {
        Self {
            frames_rendered: 0,
            sources: Vec::new(),
            ended,
        }
    }

    pub(crate) fn add(&mut self, id: SourceId, start_frame: u64, samples: Vec<f32>) {
        self.sources.push(MixSource {
            id,
            start_frame,
            samples,
        });
    }

    pub(crate) fn remove(&mut self, id: SourceId) -> bool {
        let before = self.sources.len();
        self.sources.retain(|s| s.id != id);
        self.sources.len() != before
    }

    pub(crate) fn frames_rendered(&self) -> u64 {
        self.frames_rendered
    }

    /// Fill an interleaved buffer, duplicating mono across `channels`, then
    /// report sources that played out.
    pub(crate) fn render(&mut self, out: &mut [f32], channels: usize) {
        let channels = channels.max(1);
        let frames = out.len() / channels;
        for (i, frame) in out.chunks_mut(channels).enumerate() {
            let position = self.frames_rendered + i as u64;
            let mut value = 0.0f32;
            for source in &self.sources {
                if position >= source.start_frame && position < source.end_frame() {
                    value += source.samples[(position - source.start_frame) as usize];
                }
            }
            frame.fill(value.clamp(-1.0, 1.0));
        }
        self.frames_rendered += frames as u64;

        let rendered = self.frames_rendered;
        let ended = &self.ended;
        self.sources.retain(|source| {
            if source.end_frame() <= rendered {
                if ended.try_send(source.id).is_err() {
                    trace!(id = %source.id, "completion dropped, session gone");
                }
                false
            } else {
                true
            }
        });
    }
}

fn lock(mixer: &Mutex<Mixer>) -> MutexGuard<'_, Mixer> {
    mixer.lock().unwrap_or_else(PoisonError::into_inner)
}

/// List usable output devices, marking preferred ones with "\[recommended\]".
pub fn list_output_devices() -> Result<Vec<String>> {
    let devices = with_suppressed_stderr(|| cpal::default_host().output_devices());
    let devices = devices.map_err(|e| device_error("Failed to enumerate output devices", e, true))?;

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

fn find_output_device(device_name: Option<&str>) -> Result<cpal::Device> {
    with_suppressed_stderr(|| {
        let host = cpal::default_host();
        if let Some(name) = device_name {
            let devices = host
                .output_devices()
                .map_err(|e| device_error("Failed to enumerate devices", e, true))?;
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
        host.default_output_device()
            .ok_or_else(|| OmniVoiceError::AudioDeviceNotFound {
                device: "default output".to_string(),
            })
    })
}

/// Speaker output with its own playback clock.
pub struct CpalOutputDevice {
    stream: Option<SendableStream>,
    mixer: Arc<Mutex<Mixer>>,
    device_rate: u32,
}

impl CpalOutputDevice {
    /// Open an output stream, preferring `sample_rate` mono.
    ///
    /// Falls back to the device's native config; scheduled buffers are then
    /// resampled and duplicated across channels. Stream errors go to `faults`.
    pub fn open(
        device_name: Option<&str>,
        sample_rate: u32,
        ended: Sender<SourceId>,
        faults: Sender<DeviceFault>,
    ) -> Result<Self> {
        let device = find_output_device(device_name)?;
        let mixer = Arc::new(Mutex::new(Mixer::new(ended)));

        let preferred = cpal::StreamConfig {
            channels: 1,
            sample_rate: cpal::SampleRate(sample_rate),
            buffer_size: cpal::BufferSize::Default,
        };

        let callback_mixer = Arc::clone(&mixer);
        let (stream, device_rate) = match device.build_output_stream(
            &preferred,
            move |data: &mut [f32], _: &cpal::OutputCallbackInfo| lock(&callback_mixer).render(data, 1),
            forward_stream_errors(faults.clone(), DeviceRole::Output),
            None,
        ) {
            Ok(stream) => (stream, sample_rate),
            Err(e) => {
                debug!("preferred output config refused ({}), using native format", e);
                Self::build_native(&device, Arc::clone(&mixer), faults)?
            }
        };

        stream
            .play()
            .map_err(|e| device_error("Failed to start output stream", e, true))?;
        info!(device_rate, "output device opened");

        Ok(Self {
            stream: Some(SendableStream(stream)),
            mixer,
            device_rate,
        })
    }

    fn build_native(
        device: &cpal::Device,
        mixer: Arc<Mutex<Mixer>>,
        faults: Sender<DeviceFault>,
    ) -> Result<(cpal::Stream, u32)> {
        use cpal::SampleFormat;

        let default_config = device
            .default_output_config()
            .map_err(|e| device_error("Failed to query default output config", e, true))?;
        let native_rate = default_config.sample_rate().0;
        let channels = default_config.channels() as usize;
        let stream_config: cpal::StreamConfig = default_config.clone().into();

        let stream = match default_config.sample_format() {
            SampleFormat::F32 => device.build_output_stream(
                &stream_config,
                move |data: &mut [f32], _: &cpal::OutputCallbackInfo| lock(&mixer).render(data, channels),
                forward_stream_errors(faults, DeviceRole::Output),
                None,
            ),
            SampleFormat::I16 => {
                let mut scratch = Vec::new();
                device.build_output_stream(
                    &stream_config,
                    move |data: &mut [i16], _: &cpal::OutputCallbackInfo| {
                        scratch.resize(data.len(), 0.0);
                        lock(&mixer).render(&mut scratch, channels);
                        for (out, &s) in data.iter_mut().zip(&scratch) {
                            *out = (s * i16::MAX as f32) as i16;
                        }
                    },
                    forward_stream_errors(faults, DeviceRole::Output),
                    None,
                )
            }
            fmt => {
                return Err(OmniVoiceError::AudioPlayback {
                    message: format!("Unsupported output sample format: {:?}", fmt),
                });
            }
        }
        .map_err(|e| device_error("Failed to build output stream", e, true))?;

        Ok((stream, native_rate))
    }
}

impl OutputDevice for CpalOutputDevice {
    fn current_time(&self) -> f64 {
        lock(&self.mixer).frames_rendered() as f64 / self.device_rate as f64
    }

    fn schedule(&mut self, id: SourceId, buffer: AudioBuffer, start_at: f64) -> Result<()> {
        if self.stream.is_none() {
            return Err(OmniVoiceError::AudioPlayback {
                message: "output device closed".to_string(),
            });
        }
        let samples = resample(&buffer.to_mono(), buffer.sample_rate, self.device_rate);
        let start_frame = (start_at.max(0.0) * self.device_rate as f64).round() as u64;
        lock(&self.mixer).add(id, start_frame, samples);
        Ok(())
    }

    fn stop_source(&mut self, id: SourceId) {
        lock(&self.mixer).remove(id);
    }

    fn close(&mut self) -> Result<()> {
        if let Some(stream) = self.stream.take() {
            lock(&self.mixer).sources.clear();
            stream
                .0
                .pause()
                .map_err(|e| device_error("Failed to stop output stream", e, true))?;
        }
        Ok(())
    }
}

/// Real devices chosen by name (or the defaults).
#[derive(Debug, Clone, Default)]
pub struct CpalBackend {
    input_device: Option<String>,
    output_device: Option<String>,
}

impl CpalBackend {
    pub fn new(input_device: Option<String>, output_device: Option<String>) -> Self {
        Self {
            input_device,
            output_device,
        }
    }
}

impl AudioBackend for CpalBackend {
    fn open_input(&self, sample_rate: u32, faults: Sender<DeviceFault>) -> Result<Box<dyn InputDevice>> {
        Ok(Box::new(CpalInputDevice::new(
            self.input_device.as_deref(),
            sample_rate,
            faults,
        )?))
    }

    fn open_output(
        &self,
        sample_rate: u32,
        ended: Sender<SourceId>,
        faults: Sender<DeviceFault>,
    ) -> Result<Box<dyn OutputDevice>> {
        Ok(Box::new(CpalOutputDevice::open(
            self.output_device.as_deref(),
            sample_rate,
            ended,
            faults,
        )?))
    }
}

//! WAV file input: drive a session from a recording instead of the microphone.

use crate::audio::device::InputDevice;
use crate::error::{OmniVoiceError, Result};
use std::io::Read;
use std::path::Path;

/// Finite input device backed by a decoded WAV file.
///
/// Any rate and channel count is accepted; audio is downmixed to mono and
/// resampled to the requested rate up front.
pub struct WavInputDevice {
    samples: Vec<f32>,
    sample_rate: u32,
    position: usize,
    chunk_size: usize,
}

impl WavInputDevice {
    /// Decode from any reader, resampling to `target_rate`.
    pub fn from_reader(reader: impl Read, target_rate: u32) -> Result<Self> {
        let mut wav_reader = hound::WavReader::new(reader).map_err(|e| OmniVoiceError::AudioCapture {
            message: format!("Failed to parse WAV file: {}", e),
        })?;

        let spec = wav_reader.spec();
        let interleaved: Vec<f32> = match spec.sample_format {
            hound::SampleFormat::Float => wav_reader
                .samples::<f32>()
                .collect::<std::result::Result<Vec<_>, _>>(),
            hound::SampleFormat::Int => {
                let scale = (1i64 << (spec.bits_per_sample.saturating_sub(1))) as f32;
                wav_reader
                    .samples::<i32>()
                    .map(|s| s.map(|v| v as f32 / scale))
                    .collect::<std::result::Result<Vec<_>, _>>()
            }
        }
        .map_err(|e| OmniVoiceError::AudioCapture {
            message: format!("Failed to read WAV samples: {}", e),
        })?;

        let mono = downmix(&interleaved, spec.channels);
        let samples = resample(&mono, spec.sample_rate, target_rate);

        Ok(Self {
            samples,
            sample_rate: target_rate,
            position: 0,
            // 100ms per read
            chunk_size: (target_rate / 10).max(1) as usize,
        })
    }

    /// Open a WAV file on disk.
    pub fn open(path: &Path, target_rate: u32) -> Result<Self> {
        let file = std::fs::File::open(path).map_err(|e| OmniVoiceError::AudioCapture {
            message: format!("Failed to open {}: {}", path.display(), e),
        })?;
        Self::from_reader(std::io::BufReader::new(file), target_rate)
    }

    /// Total decoded samples.
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

impl InputDevice for WavInputDevice {
    fn start(&mut self) -> Result<()> {
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        Ok(())
    }

    fn read_samples(&mut self) -> Result<Vec<f32>> {
        if self.position >= self.samples.len() {
            return Ok(Vec::new());
        }
        let end = (self.position + self.chunk_size).min(self.samples.len());
        let chunk = self.samples[self.position..end].to_vec();
        self.position = end;
        Ok(chunk)
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn is_finite(&self) -> bool {
        true
    }
}

/// Average interleaved channels into mono.
pub fn downmix(interleaved: &[f32], channels: u16) -> Vec<f32> {
    if channels <= 1 {
        return interleaved.to_vec();
    }
    let channels = channels as usize;
    interleaved
        .chunks_exact(channels)
        .map(|frame| frame.iter().sum::<f32>() / channels as f32)
        .collect()
}

/// Linear interpolation resampling.
pub fn resample(samples: &[f32], from_rate: u32, to_rate: u32) -> Vec<f32> {
    if from_rate == to_rate || samples.is_empty() || from_rate == 0 || to_rate == 0 {
        return samples.to_vec();
    }

    let ratio = from_rate as f64 / to_rate as f64;
    let output_len = (samples.len() as f64 / ratio).ceil() as usize;

    (0..output_len)
        .map(|i| {
            let source_pos = i as f64 * ratio;
            let source_idx = (source_pos.floor() as usize).min(samples.len() - 1);
            let fraction = (source_pos - source_idx as f64) as f32;

            if source_idx + 1 >= samples.len() {
                samples[source_idx]
            } else {
                let left = samples[source_idx];
                let right = samples[source_idx + 1];
                left + (right - left) * fraction
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn make_wav_i16(sample_rate: u32, channels: u16, samples: &[i16]) -> Vec<u8> {
        let mut cursor = Cursor::new(Vec::new());
        let spec = hound::WavSpec {
            channels,
            sample_rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::new(&mut cursor, spec).unwrap();
        for &s in samples {
            writer.write_sample(s).unwrap();
        }
        writer.finalize().unwrap();
        cursor.into_inner()
    }

    fn make_wav_f32(sample_rate: u32, samples: &[f32]) -> Vec<u8> {
        let mut cursor = Cursor::new(Vec::new());
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate,
            bits_per_sample: 32,
            sample_format: hound::SampleFormat::Float,
        };
        let mut writer = hound::WavWriter::new(&mut cursor, spec).unwrap();
        for &s in samples {
            writer.write_sample(s).unwrap();
        }
        writer.finalize().unwrap();
        cursor.into_inner()
    }

    #[test]
    fn int_samples_are_scaled_to_unit_range() {
        let data = make_wav_i16(16000, 1, &[16384, -32768, 0]);
        let mut device = WavInputDevice::from_reader(Cursor::new(data), 16000).unwrap();
        assert_eq!(device.read_samples().unwrap(), vec![0.5, -1.0, 0.0]);
    }

    #[test]
    fn float_samples_pass_through() {
        let data = make_wav_f32(16000, &[0.25, -0.75]);
        let mut device = WavInputDevice::from_reader(Cursor::new(data), 16000).unwrap();
        assert_eq!(device.read_samples().unwrap(), vec![0.25, -0.75]);
    }

    #[test]
    fn stereo_is_downmixed() {
        let data = make_wav_i16(16000, 2, &[16384, 0, -16384, -16384]);
        let device = WavInputDevice::from_reader(Cursor::new(data), 16000).unwrap();
        assert_eq!(device.samples, vec![0.25, -0.5]);
    }

    #[test]
    fn resamples_to_capture_rate() {
        let data = make_wav_i16(48000, 1, &vec![1000; 48000]);
        let device = WavInputDevice::from_reader(Cursor::new(data), 16000).unwrap();
        assert!((15900..=16100).contains(&device.len()));
        assert_eq!(device.sample_rate(), 16000);
    }

    #[test]
    fn reads_in_100ms_chunks_then_ends() {
        let data = make_wav_i16(16000, 1, &vec![0; 3500]);
        let mut device = WavInputDevice::from_reader(Cursor::new(data), 16000).unwrap();
        assert!(device.is_finite());
        assert_eq!(device.read_samples().unwrap().len(), 1600);
        assert_eq!(device.read_samples().unwrap().len(), 1600);
        assert_eq!(device.read_samples().unwrap().len(), 300);
        assert!(device.read_samples().unwrap().is_empty());
    }

    #[test]
    fn invalid_data_is_a_capture_error() {
        let result = WavInputDevice::from_reader(Cursor::new(vec![0u8, 1, 2, 3]), 16000);
        match result {
            Err(OmniVoiceError::AudioCapture { message }) => {
                assert!(message.contains("Failed to parse WAV file"));
            }
            _ => panic!("Expected AudioCapture error"),
        }
    }

    #[test]
    fn open_missing_file_fails() {
        let result = WavInputDevice::open(Path::new("/nonexistent/input.wav"), 16000);
        assert!(result.is_err());
    }

    #[test]
    fn resample_interpolates_when_upsampling() {
        let resampled = resample(&[0.0, 0.5, 1.0], 8000, 16000);
        assert_eq!(resampled.len(), 6);
        assert_eq!(resampled[0], 0.0);
        assert_eq!(resampled[1], 0.25);
        assert_eq!(resampled[2], 0.5);
    }

    #[test]
    fn resample_edge_cases() {
        assert!(resample(&[], 16000, 8000).is_empty());
        assert_eq!(resample(&[0.1], 16000, 8000), vec![0.1]);
        assert_eq!(resample(&[0.1, 0.2], 16000, 16000), vec![0.1, 0.2]);
    }

    #[test]
    fn downmix_ignores_trailing_partial_frame() {
        assert_eq!(downmix(&[0.25, 0.75, 0.5], 2), vec![0.5_f32]);
    }
}

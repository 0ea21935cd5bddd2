//! Audio data types shared by the codec, the capture pipeline and playback.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A window of 16-bit PCM samples, one channel.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioFrame {
    /// PCM samples (16-bit signed integers).
    pub samples: Vec<i16>,
    /// Sample rate in Hz, fixed per stream.
    pub sample_rate: u32,
    /// Sequence number for ordering.
    pub sequence: u64,
}

impl AudioFrame {
    /// Creates a new audio frame.
    pub fn new(samples: Vec<i16>, sample_rate: u32, sequence: u64) -> Self {
        Self {
            samples,
            sample_rate,
            sequence,
        }
    }

    /// Raw byte length of the frame once packed as PCM16.
    pub fn byte_len(&self) -> usize {
        self.samples.len() * 2
    }

    /// Frame duration in seconds.
    pub fn duration_secs(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.samples.len() as f64 / self.sample_rate as f64
    }
}

/// Transport-safe audio: base64 PCM16 payload plus its MIME tag.
///
/// Serializes as `{"mimeType": ..., "data": ...}`, the shape the live
/// provider expects inside `mediaChunks`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EncodedPacket {
    pub mime_type: String,
    pub data: String,
}

impl EncodedPacket {
    /// Sample rate parsed from the `rate=` parameter of the MIME tag.
    pub fn sample_rate(&self) -> Option<u32> {
        self.mime_type
            .split(';')
            .filter_map(|param| param.trim().strip_prefix("rate="))
            .find_map(|rate| rate.parse().ok())
    }
}

/// Decoded float audio, one `Vec<f32>` per channel.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioBuffer {
    pub channels: Vec<Vec<f32>>,
    pub sample_rate: u32,
}

impl AudioBuffer {
    pub fn new(channels: Vec<Vec<f32>>, sample_rate: u32) -> Self {
        Self {
            channels,
            sample_rate,
        }
    }

    /// Mono buffer from a single channel of samples.
    pub fn mono(samples: Vec<f32>, sample_rate: u32) -> Self {
        Self::new(vec![samples], sample_rate)
    }

    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    /// Samples per channel.
    pub fn frame_count(&self) -> usize {
        self.channels.first().map_or(0, Vec::len)
    }

    /// Playback duration in seconds (`frame_count / sample_rate`).
    pub fn duration_secs(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.frame_count() as f64 / self.sample_rate as f64
    }

    /// Average all channels down to one.
    pub fn to_mono(&self) -> Vec<f32> {
        match self.channels.len() {
            0 => Vec::new(),
            1 => self.channels[0].clone(),
            n => (0..self.frame_count())
                .map(|i| self.channels.iter().map(|ch| ch[i]).sum::<f32>() / n as f32)
                .collect(),
        }
    }
}

/// Identifier of one scheduled playback source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SourceId(pub u64);

impl fmt::Display for SourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "source#{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_audio_frame_byte_len_and_duration() {
        let frame = AudioFrame::new(vec![0; 4096], 16000, 0);
        assert_eq!(frame.byte_len(), 8192);
        assert!((frame.duration_secs() - 0.256).abs() < 1e-9);
    }

    #[test]
    fn test_packet_sample_rate_from_mime() {
        let packet = EncodedPacket {
            mime_type: "audio/pcm;rate=16000".to_string(),
            data: String::new(),
        };
        assert_eq!(packet.sample_rate(), Some(16000));

        let untagged = EncodedPacket {
            mime_type: "audio/pcm".to_string(),
            data: String::new(),
        };
        assert_eq!(untagged.sample_rate(), None);
    }

    #[test]
    fn test_packet_serializes_camel_case() {
        let packet = EncodedPacket {
            mime_type: "audio/pcm;rate=16000".to_string(),
            data: "AAA=".to_string(),
        };
        let json = serde_json::to_string(&packet).unwrap();
        assert_eq!(json, r#"{"mimeType":"audio/pcm;rate=16000","data":"AAA="}"#);
    }

    #[test]
    fn test_buffer_duration() {
        let buffer = AudioBuffer::mono(vec![0.0; 12000], 24000);
        assert_eq!(buffer.frame_count(), 12000);
        assert!((buffer.duration_secs() - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_buffer_to_mono_averages_channels() {
        let buffer = AudioBuffer::new(vec![vec![1.0, 0.5], vec![0.0, -0.5]], 24000);
        assert_eq!(buffer.to_mono(), vec![0.5, 0.0]);
    }

    #[test]
    fn test_empty_buffer() {
        let buffer = AudioBuffer::new(Vec::new(), 24000);
        assert_eq!(buffer.frame_count(), 0);
        assert_eq!(buffer.duration_secs(), 0.0);
        assert!(buffer.to_mono().is_empty());
    }
}

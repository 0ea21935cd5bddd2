//! PCM16 codec: float samples <-> little-endian 16-bit frames <-> base64 text.
//!
//! Quantization multiplies by 32768 and truncates toward zero, then wraps into
//! the i16 range. There is no clamping: a full-scale `1.0` becomes `-32768`.
//! Callers that want saturation must clamp before encoding.

use crate::audio::frame::{AudioBuffer, AudioFrame, EncodedPacket};
use crate::defaults::{PCM_MIME_PREFIX, PCM_SCALE};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use thiserror::Error;

/// Errors from decoding an inbound audio payload.
#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("invalid base64 payload: {0}")]
    Base64(#[from] base64::DecodeError),

    #[error("payload length {0} is not a whole number of 16-bit samples")]
    OddByteLength(usize),

    #[error("channel count must be at least 1")]
    ZeroChannels,
}

/// Quantize one float sample with wraparound.
///
/// `as i32` truncates toward zero (saturating only far outside any audio
/// range); the `as i16` step then wraps modulo 2^16.
#[inline]
pub fn quantize_sample(sample: f32) -> i16 {
    (sample * PCM_SCALE) as i32 as i16
}

/// Quantize a window of float samples.
pub fn quantize(samples: &[f32]) -> Vec<i16> {
    samples.iter().map(|&s| quantize_sample(s)).collect()
}

/// Pack samples as little-endian bytes.
pub fn to_le_bytes(samples: &[i16]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(samples.len() * 2);
    for sample in samples {
        bytes.extend_from_slice(&sample.to_le_bytes());
    }
    bytes
}

/// MIME tag for raw PCM at the given rate.
pub fn pcm_mime_type(sample_rate: u32) -> String {
    format!("{PCM_MIME_PREFIX}{sample_rate}")
}

/// Encode float samples into a transport-safe packet.
pub fn encode_frame(samples: &[f32], sample_rate: u32) -> EncodedPacket {
    encode_pcm(&quantize(samples), sample_rate)
}

/// Encode already-quantized PCM into a packet.
pub fn encode_pcm(samples: &[i16], sample_rate: u32) -> EncodedPacket {
    EncodedPacket {
        mime_type: pcm_mime_type(sample_rate),
        data: STANDARD.encode(to_le_bytes(samples)),
    }
}

/// Encode a captured frame.
pub fn encode_audio_frame(frame: &AudioFrame) -> EncodedPacket {
    encode_pcm(&frame.samples, frame.sample_rate)
}

/// Decode a base64 PCM16 payload into per-channel float buffers.
///
/// Samples are interleaved in the payload; a trailing partial frame (fewer
/// samples than `channels`) is discarded.
pub fn decode_frame(data: &str, channels: u16) -> Result<Vec<Vec<f32>>, DecodeError> {
    if channels == 0 {
        return Err(DecodeError::ZeroChannels);
    }
    let bytes = STANDARD.decode(data.trim())?;
    if bytes.len() % 2 != 0 {
        return Err(DecodeError::OddByteLength(bytes.len()));
    }

    let channels = channels as usize;
    let frame_count = bytes.len() / 2 / channels;
    let mut output = vec![Vec::with_capacity(frame_count); channels];

    for (i, pair) in bytes.chunks_exact(2).take(frame_count * channels).enumerate() {
        let sample = i16::from_le_bytes([pair[0], pair[1]]);
        output[i % channels].push(sample as f32 / PCM_SCALE);
    }

    Ok(output)
}

/// Decode a payload straight into an `AudioBuffer` at `sample_rate`.
pub fn decode_buffer(
    data: &str,
    sample_rate: u32,
    channels: u16,
) -> Result<AudioBuffer, DecodeError> {
    Ok(AudioBuffer::new(decode_frame(data, channels)?, sample_rate))
}

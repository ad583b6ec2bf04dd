//! Audio format conversion between the telephony leg and vendor backends.
//!
//! The telephony platform streams G.711 μ-law at 8 kHz. Backends declare their
//! native representation via [`AudioSpec`]; conversion is a pure function of
//! the input frame and the spec, with no session state.
//!
//! # Formats
//!
//! - Telephony: G.711 μ-law, 8 kHz, mono
//! - OpenAI Realtime: G.711 μ-law, 8 kHz (identity conversion)
//! - Gemini Live: PCM 16-bit LE, 16 kHz in / 24 kHz out

use bytes::Bytes;
use serde::{Deserialize, Serialize};

mod g711;
mod resample;

pub use g711::{mulaw_decode, mulaw_decode_slice, mulaw_encode, mulaw_encode_slice};
pub use resample::resample_linear;

/// Telephony sample rate (G.711).
pub const TELEPHONY_SAMPLE_RATE: u32 = 8_000;

/// Audio encodings that cross the bridge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AudioEncoding {
    /// G.711 μ-law, one byte per sample
    Pcmu,
    /// PCM signed 16-bit little-endian
    Pcm16,
}

/// Direction of an audio frame relative to this gateway.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Caller to vendor
    Inbound,
    /// Vendor to caller
    Outbound,
}

/// Immutable audio frame.
#[derive(Debug, Clone)]
pub struct AudioFrame {
    pub data: Bytes,
    pub encoding: AudioEncoding,
    pub sample_rate: u32,
    pub seq: u64,
    pub direction: Direction,
}

impl AudioFrame {
    /// Frame of telephony audio (μ-law, 8 kHz) from the caller.
    pub fn inbound(data: Bytes, seq: u64) -> Self {
        Self {
            data,
            encoding: AudioEncoding::Pcmu,
            sample_rate: TELEPHONY_SAMPLE_RATE,
            seq,
            direction: Direction::Inbound,
        }
    }

    /// Frame duration in milliseconds.
    pub fn duration_ms(&self) -> u64 {
        let samples = match self.encoding {
            AudioEncoding::Pcmu => self.data.len() as u64,
            AudioEncoding::Pcm16 => (self.data.len() / 2) as u64,
        };
        samples * 1_000 / self.sample_rate as u64
    }
}

/// A backend's native audio representation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AudioSpec {
    pub encoding: AudioEncoding,
    /// Sample rate the backend expects on its input.
    pub input_rate: u32,
    /// Sample rate the backend produces on its output.
    pub output_rate: u32,
}

impl AudioSpec {
    /// The telephony-native spec; conversion through it is the identity.
    pub const fn telephony() -> Self {
        Self {
            encoding: AudioEncoding::Pcmu,
            input_rate: TELEPHONY_SAMPLE_RATE,
            output_rate: TELEPHONY_SAMPLE_RATE,
        }
    }
}

/// Convert a telephony frame (μ-law, 8 kHz) into the backend's input format.
pub fn to_vendor(frame: &[u8], spec: &AudioSpec) -> Bytes {
    match spec.encoding {
        AudioEncoding::Pcmu if spec.input_rate == TELEPHONY_SAMPLE_RATE => {
            Bytes::copy_from_slice(frame)
        }
        AudioEncoding::Pcmu => {
            // Non-8k μ-law backends do not exist in practice; decode, resample,
            // re-encode so the contract holds regardless.
            let pcm = mulaw_decode_slice(frame);
            let resampled = resample_linear(&pcm, TELEPHONY_SAMPLE_RATE, spec.input_rate);
            Bytes::from(mulaw_encode_slice(&resampled))
        }
        AudioEncoding::Pcm16 => {
            let pcm = mulaw_decode_slice(frame);
            let resampled = resample_linear(&pcm, TELEPHONY_SAMPLE_RATE, spec.input_rate);
            Bytes::from(pcm16_to_le_bytes(&resampled))
        }
    }
}

/// Convert backend output audio into telephony frames (μ-law, 8 kHz).
pub fn from_vendor(data: &[u8], spec: &AudioSpec) -> Bytes {
    match spec.encoding {
        AudioEncoding::Pcmu if spec.output_rate == TELEPHONY_SAMPLE_RATE => {
            Bytes::copy_from_slice(data)
        }
        AudioEncoding::Pcmu => {
            let pcm = mulaw_decode_slice(data);
            let resampled = resample_linear(&pcm, spec.output_rate, TELEPHONY_SAMPLE_RATE);
            Bytes::from(mulaw_encode_slice(&resampled))
        }
        AudioEncoding::Pcm16 => {
            let pcm = le_bytes_to_pcm16(data);
            let resampled = resample_linear(&pcm, spec.output_rate, TELEPHONY_SAMPLE_RATE);
            Bytes::from(mulaw_encode_slice(&resampled))
        }
    }
}

fn pcm16_to_le_bytes(samples: &[i16]) -> Vec<u8> {
    let mut out = Vec::with_capacity(samples.len() * 2);
    for s in samples {
        out.extend_from_slice(&s.to_le_bytes());
    }
    out
}

fn le_bytes_to_pcm16(data: &[u8]) -> Vec<i16> {
    // An odd trailing byte is a malformed chunk; ignore it.
    data.chunks_exact(2)
        .map(|c| i16::from_le_bytes([c[0], c[1]]))
        .collect()
}

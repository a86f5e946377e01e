//! Audio frame and chunk definitions.
//!
//! Telephony audio is G.711 mu-law, 8 kHz, mono in both directions. Frames
//! carry the format explicitly so that the STT client can configure its
//! provider session from what actually arrives on the line.

use serde::{Deserialize, Serialize};

/// Sample encodings handled by the bridge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AudioEncoding {
    /// 8-bit G.711 mu-law (PCMU).
    #[default]
    Mulaw,
    /// 16-bit signed little-endian linear PCM.
    Linear16,
}

impl AudioEncoding {
    /// Returns the provider-facing name of the encoding.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Mulaw => "mulaw",
            Self::Linear16 => "linear16",
        }
    }

    /// Bytes per sample for a single channel.
    pub fn bytes_per_sample(self) -> usize {
        match self {
            Self::Mulaw => 1,
            Self::Linear16 => 2,
        }
    }
}

/// Sample rate, encoding and channel count of an audio stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudioFormat {
    pub sample_rate: u32,
    pub encoding: AudioEncoding,
    pub channels: u16,
}

impl AudioFormat {
    /// The telephony line format: PCMU, 8 kHz, mono.
    pub const TELEPHONY: AudioFormat = AudioFormat {
        sample_rate: 8_000,
        encoding: AudioEncoding::Mulaw,
        channels: 1,
    };

    /// Number of bytes that make up `millis` milliseconds of audio.
    pub fn bytes_for_millis(&self, millis: u32) -> usize {
        let samples = self.sample_rate as usize * millis as usize / 1000;
        samples * self.channels as usize * self.encoding.bytes_per_sample()
    }
}

impl Default for AudioFormat {
    fn default() -> Self {
        Self::TELEPHONY
    }
}

/// A frame of inbound audio read from the telephony connection.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioFrame {
    pub data: Vec<u8>,
    pub format: AudioFormat,
    /// Monotonic per-call sequence number assigned on receipt.
    pub sequence: u64,
    /// Media timestamp reported by the telephony platform, in milliseconds.
    pub timestamp_ms: u64,
}

impl AudioFrame {
    pub fn new(data: Vec<u8>, format: AudioFormat, sequence: u64, timestamp_ms: u64) -> Self {
        Self {
            data,
            format,
            sequence,
            timestamp_ms,
        }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// Synthesized audio, already converted to the telephony line format.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioChunk {
    pub data: Vec<u8>,
    pub sample_rate: u32,
    pub channels: u16,
}

impl AudioChunk {
    /// Builds a chunk in the telephony line format.
    pub fn telephony(data: Vec<u8>) -> Self {
        Self {
            data,
            sample_rate: AudioFormat::TELEPHONY.sample_rate,
            channels: AudioFormat::TELEPHONY.channels,
        }
    }

    /// Playback duration of the chunk in milliseconds (8-bit samples).
    pub fn duration_ms(&self) -> u64 {
        if self.sample_rate == 0 || self.channels == 0 {
            return 0;
        }
        let samples = self.data.len() as u64 / self.channels as u64;
        samples * 1000 / self.sample_rate as u64
    }
}

//! Audio primitives for the voxbridge call pipeline.
//!
//! - [`ring_buffer`]: fixed-capacity, non-blocking byte ring used to stage
//!   inbound telephony audio before it is forwarded to the recognizer.
//! - [`vad`]: energy-based voice-activity detection that marks utterance
//!   boundaries after a run of silent frames.
//! - [`codec`]: G.711 mu-law conversion and sample-rate reduction used to
//!   turn synthesized PCM into the telephony line format.

pub mod codec;
pub mod ring_buffer;
pub mod vad;

pub use codec::{decode_mulaw, encode_mulaw, pcm16le_to_mulaw, resample};
pub use ring_buffer::AudioRingBuffer;
pub use vad::{VadConfig, VadEvent, VoiceActivityDetector};

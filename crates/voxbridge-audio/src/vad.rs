//! Energy-based voice-activity detection.
//!
//! Each frame's RMS energy (normalized to `0.0..=1.0`) is compared against a
//! fixed threshold. A run of `silence_frames` consecutive quiet frames marks
//! the end of an utterance; the boundary fires once per utterance and is not
//! repeated while the line stays silent.

use crate::codec::decode_mulaw;
use serde::Deserialize;

fn default_energy_threshold() -> f32 {
    0.02
}

fn default_silence_frames() -> u32 {
    25
}

/// Configuration for the voice-activity detector.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct VadConfig {
    /// RMS level above which a frame counts as speech.
    #[serde(default = "default_energy_threshold")]
    pub energy_threshold: f32,
    /// Consecutive quiet frames that end an utterance. Values below 1 are treated as 1.
    #[serde(default = "default_silence_frames")]
    pub silence_frames: u32,
}

impl Default for VadConfig {
    fn default() -> Self {
        Self {
            energy_threshold: default_energy_threshold(),
            silence_frames: default_silence_frames(),
        }
    }
}

/// Events emitted by the detector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VadEvent {
    /// First loud frame after a boundary (or since the detector was created).
    SpeechStarted,
    /// `silence_frames` quiet frames in a row.
    Boundary,
}

/// Voice-activity detector state machine.
#[derive(Debug)]
pub struct VoiceActivityDetector {
    config: VadConfig,
    silent_run: u32,
    boundary_fired: bool,
    speaking: bool,
}

impl VoiceActivityDetector {
    pub fn new(config: VadConfig) -> Self {
        Self {
            config,
            silent_run: 0,
            boundary_fired: false,
            speaking: false,
        }
    }

    /// Processes one frame of mu-law audio.
    pub fn process_mulaw(&mut self, payload: &[u8]) -> Option<VadEvent> {
        if payload.is_empty() {
            return None;
        }
        let level = rms(payload.iter().map(|&b| decode_mulaw(b)), payload.len());
        self.process_level(level)
    }

    /// Processes one frame of linear samples.
    pub fn process_samples(&mut self, samples: &[i16]) -> Option<VadEvent> {
        if samples.is_empty() {
            return None;
        }
        let level = rms(samples.iter().copied(), samples.len());
        self.process_level(level)
    }

    /// Advances the state machine with a precomputed frame energy.
    pub fn process_level(&mut self, level: f32) -> Option<VadEvent> {
        if level > self.config.energy_threshold {
            self.silent_run = 0;
            self.boundary_fired = false;
            if !self.speaking {
                self.speaking = true;
                return Some(VadEvent::SpeechStarted);
            }
            return None;
        }

        self.silent_run = self.silent_run.saturating_add(1);
        if self.silent_run >= self.config.silence_frames.max(1) && !self.boundary_fired {
            self.boundary_fired = true;
            self.speaking = false;
            return Some(VadEvent::Boundary);
        }
        None
    }

    /// Current length of the consecutive-silence run.
    pub fn silent_frames(&self) -> u32 {
        self.silent_run
    }

    pub fn is_speaking(&self) -> bool {
        self.speaking
    }

    pub fn reset(&mut self) {
        self.silent_run = 0;
        self.boundary_fired = false;
        self.speaking = false;
    }
}

/// RMS level of a frame normalized to `0.0..=1.0`.
fn rms(samples: impl Iterator<Item = i16>, count: usize) -> f32 {
    if count == 0 {
        return 0.0;
    }
    let sum_sq: f64 = samples
        .map(|s| {
            let v = s as f64 / i16::MAX as f64;
            v * v
        })
        .sum();
    (sum_sq / count as f64).sqrt() as f32
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::encode_mulaw;

    fn loud() -> Vec<u8> {
        (0..160)
            .map(|i| encode_mulaw(if i % 2 == 0 { 12_000 } else { -12_000 }))
            .collect()
    }

    fn quiet() -> Vec<u8> {
        vec![0xFF; 160]
    }

    fn detector(silence_frames: u32) -> VoiceActivityDetector {
        VoiceActivityDetector::new(VadConfig {
            energy_threshold: 0.02,
            silence_frames,
        })
    }

    #[test]
    fn boundary_after_exact_silence_run() {
        let mut vad = detector(10);
        assert_eq!(vad.process_mulaw(&loud()), Some(VadEvent::SpeechStarted));

        for i in 1..10 {
            assert_eq!(vad.process_mulaw(&quiet()), None, "frame {}", i);
        }
        assert_eq!(vad.process_mulaw(&quiet()), Some(VadEvent::Boundary));
    }

    #[test]
    fn boundary_fires_once_per_utterance() {
        let mut vad = detector(3);
        vad.process_mulaw(&loud());
        let events: Vec<_> = (0..20).filter_map(|_| vad.process_mulaw(&quiet())).collect();
        assert_eq!(events, vec![VadEvent::Boundary]);
    }

    #[test]
    fn loud_frame_resets_silence_counter() {
        let mut vad = detector(5);
        vad.process_mulaw(&loud());
        for _ in 0..4 {
            vad.process_mulaw(&quiet());
        }
        assert_eq!(vad.silent_frames(), 4);

        assert_eq!(vad.process_mulaw(&loud()), None, "still the same utterance");
        assert_eq!(vad.silent_frames(), 0);

        for _ in 0..4 {
            assert_eq!(vad.process_mulaw(&quiet()), None);
        }
        assert_eq!(vad.process_mulaw(&quiet()), Some(VadEvent::Boundary));
    }

    #[test]
    fn new_utterance_rearms_boundary() {
        let mut vad = detector(2);
        vad.process_mulaw(&loud());
        vad.process_mulaw(&quiet());
        assert_eq!(vad.process_mulaw(&quiet()), Some(VadEvent::Boundary));

        assert_eq!(vad.process_mulaw(&loud()), Some(VadEvent::SpeechStarted));
        vad.process_mulaw(&quiet());
        assert_eq!(vad.process_mulaw(&quiet()), Some(VadEvent::Boundary));
    }

    #[test]
    fn empty_frames_are_ignored() {
        let mut vad = detector(1);
        assert_eq!(vad.process_mulaw(&[]), None);
        assert_eq!(vad.silent_frames(), 0);
    }

    #[test]
    fn linear_samples_energy() {
        let mut vad = detector(1);
        assert_eq!(vad.process_samples(&[16_000; 80]), Some(VadEvent::SpeechStarted));
        assert_eq!(vad.process_samples(&[10; 80]), Some(VadEvent::Boundary));
    }
}

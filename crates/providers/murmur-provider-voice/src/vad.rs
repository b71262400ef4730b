//! Energy-based voice activity detection
//!
//! A frame counts as speech when the RMS of its 16-bit samples, each divided
//! by 32768, reaches the configured threshold. Frames without a whole sample
//! never count.

use serde::{Deserialize, Serialize};

use crate::audio::pcm_samples;

/// Default normalized RMS threshold
pub const DEFAULT_VAD_THRESHOLD: f64 = 0.01;

/// RMS energy detector over signed 16-bit little-endian PCM
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EnergyVad {
    threshold: f64,
}

impl Default for EnergyVad {
    fn default() -> Self {
        Self::new(DEFAULT_VAD_THRESHOLD)
    }
}

impl EnergyVad {
    /// Create a detector. Non-finite or negative thresholds fall back to the default.
    pub fn new(threshold: f64) -> Self {
        let threshold = if threshold.is_finite() && threshold >= 0.0 {
            threshold
        } else {
            DEFAULT_VAD_THRESHOLD
        };
        Self { threshold }
    }

    /// Configured threshold
    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    /// Whether the frame contains speech
    pub fn has_speech(&self, frame: &[u8]) -> bool {
        match rms_energy(frame) {
            Some(rms) => rms >= self.threshold,
            None => false,
        }
    }
}

/// Normalized RMS energy of a PCM frame, `None` when it holds no whole sample
pub fn rms_energy(frame: &[u8]) -> Option<f64> {
    let mut count = 0usize;
    let mut sum = 0f64;
    for sample in pcm_samples(frame) {
        let normalized = sample as f64 / 32768.0;
        sum += normalized * normalized;
        count += 1;
    }

    if count == 0 {
        return None;
    }
    Some((sum / count as f64).sqrt())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::samples_to_pcm;

    #[test]
    fn test_silence_is_not_speech() {
        let vad = EnergyVad::default();
        assert!(!vad.has_speech(&samples_to_pcm(&[0; 960])));
        assert!(!EnergyVad::new(1e-9).has_speech(&samples_to_pcm(&[0; 960])));
    }

    #[test]
    fn test_loud_frame_is_speech() {
        let vad = EnergyVad::default();
        let loud: Vec<i16> = (0..960).map(|i| if i % 2 == 0 { 12_000 } else { -12_000 }).collect();
        assert!(vad.has_speech(&samples_to_pcm(&loud)));
    }

    #[test]
    fn test_empty_frame_is_not_speech() {
        let vad = EnergyVad::new(0.0);
        assert!(!vad.has_speech(&[]));
        assert!(!vad.has_speech(&[0x7F]));
        assert_eq!(rms_energy(&[]), None);
    }

    #[test]
    fn test_threshold_is_inclusive() {
        let frame = samples_to_pcm(&[328; 100]);
        let rms = rms_energy(&frame).unwrap();
        assert!(rms > 0.01 && rms < 0.0101);
        assert!(EnergyVad::new(0.01).has_speech(&frame));
        assert!(EnergyVad::new(rms).has_speech(&frame));
        assert!(!EnergyVad::new(rms + 1e-6).has_speech(&frame));
    }

    #[test]
    fn test_full_scale_square_wave() {
        let square: Vec<i16> = (0..960).map(|i| if i % 2 == 0 { i16::MAX } else { i16::MIN }).collect();
        let frame = samples_to_pcm(&square);
        for threshold in [0.0, 0.01, 0.5, 0.9, 0.9999] {
            assert!(EnergyVad::new(threshold).has_speech(&frame), "threshold {}", threshold);
        }
    }

    #[test]
    fn test_invalid_threshold_falls_back() {
        assert_eq!(EnergyVad::new(f64::NAN).threshold(), DEFAULT_VAD_THRESHOLD);
        assert_eq!(EnergyVad::new(-1.0).threshold(), DEFAULT_VAD_THRESHOLD);
        assert_eq!(EnergyVad::new(0.2).threshold(), 0.2);
    }
}

//! Voice activity detection via calibrated energy thresholding.
//!
//! One fixed-duration ambient-noise pass at session start sets the silence
//! threshold; afterwards a chunk is speech when its RMS energy exceeds it.

use crate::audio::AudioChunk;
use crate::error::{DictationError, DictationResult};
use std::time::Duration;
use tracing::info;

/// Configuration for the energy VAD.
#[derive(Debug, Clone)]
pub struct VadConfig {
    /// Speech threshold = ambient RMS * this ratio (default 1.5).
    pub dynamic_ratio: f32,

    /// Lower bound for the threshold so a dead-quiet room still needs an
    /// audible signal to trigger (default 0.005 RMS).
    pub threshold_floor: f32,

    /// Duration of the ambient-noise calibration window (default 500ms).
    pub calibration: Duration,
}

impl Default for VadConfig {
    fn default() -> Self {
        Self {
            dynamic_ratio: 1.5,
            threshold_floor: 0.005,
            calibration: Duration::from_millis(500),
        }
    }
}

/// Energy detector holding the calibrated silence threshold for one session.
#[derive(Debug)]
pub struct EnergyVad {
    threshold: f32,
}

impl EnergyVad {
    /// Calibrate against ambient chunks captured before anyone speaks.
    /// Fails with [`DictationError::Calibration`] when no audio arrived.
    pub fn calibrate(config: &VadConfig, ambient: &[AudioChunk]) -> DictationResult<Self> {
        let total_samples: usize = ambient.iter().map(|c| c.samples.len()).sum();
        if total_samples == 0 {
            return Err(DictationError::Calibration(
                "no ambient audio received from the source".to_string(),
            ));
        }

        let energy: f32 = ambient
            .iter()
            .flat_map(|c| c.samples.iter())
            .map(|&s| s * s)
            .sum();
        let ambient_rms = (energy / total_samples as f32).sqrt();
        let threshold = (ambient_rms * config.dynamic_ratio).max(config.threshold_floor);

        info!(
            "calibrated silence threshold {:.4} (ambient RMS {:.4} over {} samples)",
            threshold, ambient_rms, total_samples
        );

        Ok(Self { threshold })
    }

    /// Detector with an explicit threshold (tests, replayed sessions).
    pub fn with_threshold(threshold: f32) -> Self {
        Self { threshold }
    }

    pub fn is_speech(&self, samples: &[f32]) -> bool {
        rms(samples) > self.threshold
    }

    pub fn threshold(&self) -> f32 {
        self.threshold
    }
}

fn rms(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    (samples.iter().map(|&s| s * s).sum::<f32>() / samples.len() as f32).sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    fn chunk(samples: Vec<f32>) -> AudioChunk {
        AudioChunk {
            samples,
            captured_at: Instant::now(),
        }
    }

    #[test]
    fn calibration_requires_audio() {
        let result = EnergyVad::calibrate(&VadConfig::default(), &[]);
        assert!(matches!(result, Err(DictationError::Calibration(_))));
    }

    #[test]
    fn quiet_room_uses_floor() {
        let ambient = vec![chunk(vec![0.0; 480])];
        let vad = EnergyVad::calibrate(&VadConfig::default(), &ambient).unwrap();
        assert_eq!(vad.threshold(), VadConfig::default().threshold_floor);
    }

    #[test]
    fn threshold_tracks_ambient_energy() {
        let ambient = vec![chunk(vec![0.1; 480]), chunk(vec![-0.1; 480])];
        let vad = EnergyVad::calibrate(&VadConfig::default(), &ambient).unwrap();
        assert!((vad.threshold() - 0.15).abs() < 1e-3);
    }

    #[test]
    fn speech_above_silence_below() {
        let vad = EnergyVad::with_threshold(0.05);
        let speech: Vec<f32> = (0..480).map(|i| if i % 2 == 0 { 0.5 } else { -0.5 }).collect();
        let silence = vec![0.001; 480];
        assert!(vad.is_speech(&speech));
        assert!(!vad.is_speech(&silence));
    }

    #[test]
    fn empty_chunk_is_silence() {
        let vad = EnergyVad::with_threshold(0.0);
        assert!(!vad.is_speech(&[]));
    }
}

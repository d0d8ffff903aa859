use tracing::info;

use crate::error::VadError;

/// Energy-based speech classifier with hysteresis: speech starts above
/// `threshold_start` and only ends once the level drops below
/// `threshold_stop`.
pub struct VoiceActivityDetector {
    threshold_start: f32,
    threshold_stop: f32,
    in_speech: bool,
}

impl VoiceActivityDetector {
    pub fn new(threshold_start: f32, threshold_stop: f32) -> Result<Self, VadError> {
        if !threshold_start.is_finite() || !threshold_stop.is_finite() {
            return Err(VadError::Unavailable(
                "VAD thresholds must be finite".to_string(),
            ));
        }
        if threshold_start <= 0.0 || threshold_stop <= 0.0 {
            return Err(VadError::Unavailable(
                "VAD thresholds must be positive".to_string(),
            ));
        }
        if threshold_stop > threshold_start {
            return Err(VadError::Unavailable(format!(
                "threshold_stop ({}) must not exceed threshold_start ({})",
                threshold_stop, threshold_start
            )));
        }

        info!(
            "VAD initialized with thresholds: start={}, stop={}",
            threshold_start, threshold_stop
        );

        Ok(Self {
            threshold_start,
            threshold_stop,
            in_speech: false,
        })
    }

    pub fn detect(&mut self, audio_level: f32) -> VADResult {
        let threshold = if self.in_speech {
            self.threshold_stop
        } else {
            self.threshold_start
        };
        let is_speech = audio_level > threshold;
        self.in_speech = is_speech;

        tracing::trace!(
            "Audio level: {:.4}, threshold: {:.4}, is_speech: {}",
            audio_level,
            threshold,
            is_speech
        );

        VADResult {
            is_speech,
            probability: audio_level,
        }
    }

    /// Root mean square of the chunk.
    pub fn calculate_audio_level(&self, samples: &[f32]) -> f32 {
        if samples.is_empty() {
            return 0.0;
        }

        let sum: f32 = samples.iter().map(|s| s * s).sum();
        (sum / samples.len() as f32).sqrt()
    }

    pub fn reset(&mut self) {
        self.in_speech = false;
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VADResult {
    pub is_speech: bool,
    pub probability: f32,
}

use tracing::{debug, info};

use super::detector::VoiceActivityDetector;
use crate::audio::{pcm::duration_ms, SAMPLE_RATE};
use crate::config::VadConfig;
use crate::error::VadError;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SpeechState {
    Idle,
    Speaking,
    SilenceDetected,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SpeechEvent {
    Started,
    /// Utterance finished; carries every buffered sample including the
    /// trailing silence.
    Ended(Vec<f32>),
    /// Speech started but was too short to count.
    Misfire,
}

/// Segments a sample stream into utterances. Durations are counted in
/// samples, so results do not depend on wall-clock timing.
pub struct SpeechDetector {
    state: SpeechState,
    vad: VoiceActivityDetector,
    speech_buffer: Vec<f32>,
    voiced_samples: usize,
    silence_samples: usize,
    min_speech_samples: usize,
    silence_threshold_samples: usize,
    max_utterance_samples: Option<usize>,
}

fn ms_to_samples(ms: u32) -> usize {
    (ms as usize * SAMPLE_RATE as usize) / 1000
}

impl SpeechDetector {
    pub fn new(
        threshold_start: f32,
        threshold_stop: f32,
        min_speech_duration_ms: u32,
        silence_duration_ms: u32,
    ) -> Result<Self, VadError> {
        let vad = VoiceActivityDetector::new(threshold_start, threshold_stop)?;
        debug!(
            "SpeechDetector initialized: min_speech_ms={}, silence_ms={}",
            min_speech_duration_ms, silence_duration_ms
        );

        Ok(Self {
            state: SpeechState::Idle,
            vad,
            speech_buffer: Vec::new(),
            voiced_samples: 0,
            silence_samples: 0,
            min_speech_samples: ms_to_samples(min_speech_duration_ms),
            silence_threshold_samples: ms_to_samples(silence_duration_ms),
            max_utterance_samples: None,
        })
    }

    pub fn from_config(config: &VadConfig) -> Result<Self, VadError> {
        Self::new(
            config.threshold_start,
            config.threshold_stop,
            config.min_speech_duration_ms,
            config.min_silence_duration_ms,
        )
        .map(|d| d.with_max_utterance_ms(config.max_utterance_ms))
    }

    /// Forces an utterance to end once it reaches `ms` of audio.
    pub fn with_max_utterance_ms(mut self, ms: u32) -> Self {
        self.max_utterance_samples = (ms > 0).then(|| ms_to_samples(ms));
        self
    }

    pub fn process_audio(&mut self, samples: &[f32]) -> Option<SpeechEvent> {
        let vad_result = self.vad.detect(self.vad.calculate_audio_level(samples));

        let event = match self.state {
            SpeechState::Idle => {
                if vad_result.is_speech {
                    self.state = SpeechState::Speaking;
                    self.speech_buffer.extend_from_slice(samples);
                    self.voiced_samples = samples.len();
                    debug!("State transition: Idle → Speaking");
                    Some(SpeechEvent::Started)
                } else {
                    None
                }
            }
            SpeechState::Speaking => {
                self.speech_buffer.extend_from_slice(samples);
                if vad_result.is_speech {
                    self.voiced_samples += samples.len();
                } else {
                    self.state = SpeechState::SilenceDetected;
                    self.silence_samples = samples.len();
                    debug!("State transition: Speaking → SilenceDetected");
                }
                None
            }
            SpeechState::SilenceDetected => {
                self.speech_buffer.extend_from_slice(samples);
                if vad_result.is_speech {
                    self.state = SpeechState::Speaking;
                    self.voiced_samples += samples.len();
                    self.silence_samples = 0;
                    debug!("State transition: SilenceDetected → Speaking (false alarm)");
                    None
                } else {
                    self.silence_samples += samples.len();
                    (self.silence_samples >= self.silence_threshold_samples)
                        .then(|| self.finish())
                }
            }
        };

        if event.is_none() && self.is_speaking() {
            if let Some(max) = self.max_utterance_samples {
                if self.speech_buffer.len() >= max {
                    debug!("Utterance reached maximum length, forcing end");
                    return Some(self.finish());
                }
            }
        }

        event
    }

    fn finish(&mut self) -> SpeechEvent {
        let speech = std::mem::take(&mut self.speech_buffer);
        let voiced = self.voiced_samples;
        self.reset();

        if voiced < self.min_speech_samples {
            debug!("Speech too short ({} ms voiced), misfire", duration_ms(voiced));
            return SpeechEvent::Misfire;
        }

        info!(
            "Speech complete: {} ms, {} samples",
            duration_ms(speech.len()),
            speech.len()
        );
        SpeechEvent::Ended(speech)
    }

    pub fn reset(&mut self) {
        self.state = SpeechState::Idle;
        self.speech_buffer.clear();
        self.voiced_samples = 0;
        self.silence_samples = 0;
        self.vad.reset();
    }

    pub fn is_speaking(&self) -> bool {
        matches!(
            self.state,
            SpeechState::Speaking | SpeechState::SilenceDetected
        )
    }

    pub fn state(&self) -> SpeechState {
        self.state
    }

    /// Audio of the utterance in progress.
    pub fn buffered(&self) -> &[f32] {
        &self.speech_buffer
    }
}

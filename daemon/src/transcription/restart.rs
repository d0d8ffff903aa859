use std::time::Duration;

use crate::config::RestartConfig;
use crate::error::TransientRecognitionError;

/// Bounded restart schedule for recognition sessions.
///
/// Sessions that simply ended (end of session, no speech) are always
/// restarted after their backoff. Errors are counted, and once
/// `max_attempts` consecutive errors have been seen the policy gives up.
/// Any recognized fragment resets the count.
#[derive(Debug, Clone)]
pub struct RestartPolicy {
    max_attempts: u32,
    end_backoff: Duration,
    no_speech_backoff: Duration,
    error_backoff: Duration,
    failures: u32,
}

impl RestartPolicy {
    pub fn new(config: &RestartConfig) -> Self {
        Self {
            max_attempts: config.max_attempts,
            end_backoff: Duration::from_millis(config.end_backoff_ms),
            no_speech_backoff: Duration::from_millis(config.no_speech_backoff_ms),
            error_backoff: Duration::from_millis(config.error_backoff_ms),
            failures: 0,
        }
    }

    /// Delay before the next session, or `None` when restarts are exhausted.
    pub fn next_delay(&mut self, reason: &TransientRecognitionError) -> Option<Duration> {
        match reason {
            TransientRecognitionError::SessionEnded => Some(self.end_backoff),
            TransientRecognitionError::NoSpeech => Some(self.no_speech_backoff),
            TransientRecognitionError::Decoder(_) | TransientRecognitionError::Network(_) => {
                if self.failures >= self.max_attempts {
                    return None;
                }
                self.failures += 1;
                Some(self.error_backoff)
            }
        }
    }

    pub fn reset(&mut self) {
        self.failures = 0;
    }

    pub fn failures(&self) -> u32 {
        self.failures
    }

    pub fn is_exhausted(&self) -> bool {
        self.failures >= self.max_attempts
    }
}

impl Default for RestartPolicy {
    fn default() -> Self {
        Self::new(&RestartConfig::default())
    }
}

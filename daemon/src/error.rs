use thiserror::Error;

use crate::transcription::EngineKind;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AudioError {
    #[error("Microphone permission denied: {0}")]
    PermissionDenied(String),

    #[error("Audio device unavailable: {0}")]
    DeviceUnavailable(String),
}

/// Recoverable recognition failures. These are retried by the restart
/// policy and never reach the application layer.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransientRecognitionError {
    #[error("no speech detected")]
    NoSpeech,

    #[error("recognition session ended")]
    SessionEnded,

    #[error("decoder error: {0}")]
    Decoder(String),

    #[error("network error: {0}")]
    Network(String),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    #[error("{kind} engine unavailable: {reason}")]
    Unavailable { kind: EngineKind, reason: String },

    #[error(transparent)]
    Transient(#[from] TransientRecognitionError),
}

impl EngineError {
    pub fn unavailable(kind: EngineKind, reason: impl Into<String>) -> Self {
        EngineError::Unavailable {
            kind,
            reason: reason.into(),
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum VadError {
    #[error("Voice activity detection unavailable: {0}")]
    Unavailable(String),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PipelineError {
    #[error(transparent)]
    Audio(#[from] AudioError),

    #[error("No speech engine could be initialized (primary: {primary}; fallback: {fallback})")]
    InitFailed {
        primary: EngineError,
        fallback: EngineError,
    },

    #[error("Pipeline is not initialized")]
    NotInitialized,

    #[error("Speech engine failed to start: {0}")]
    StartFailed(EngineError),

    #[error("Pipeline task has shut down")]
    Shutdown,
}

impl PipelineError {
    /// The one message shown to the user when initialization fails.
    pub fn user_message(&self) -> String {
        match self {
            PipelineError::Audio(AudioError::PermissionDenied(_)) => {
                "Failed to initialize voice detection. Please check microphone permissions."
                    .to_string()
            }
            PipelineError::Audio(AudioError::DeviceUnavailable(_)) => {
                "No usable microphone was found. Please connect a microphone and try again."
                    .to_string()
            }
            PipelineError::InitFailed { .. } => {
                "Voice recognition is unavailable. Install a local speech model or configure \
                 a transcription service, then try again."
                    .to_string()
            }
            PipelineError::NotInitialized
            | PipelineError::StartFailed(_)
            | PipelineError::Shutdown => {
                "Voice detection could not be started. Please try again.".to_string()
            }
        }
    }
}

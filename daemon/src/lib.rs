pub mod assistant;
pub mod audio;
pub mod config;
pub mod error;
pub mod pipeline;
pub mod rate_limit;
pub mod server;
pub mod state;
pub mod transcription;
pub mod vad;

pub use audio::capture::AudioCapture;
pub use pipeline::{PipelineHandle, WakeWordOrchestrator};
pub use rate_limit::CommandRateLimiter;
pub use vad::detector::VoiceActivityDetector;
pub use vad::speech_detector::SpeechDetector;

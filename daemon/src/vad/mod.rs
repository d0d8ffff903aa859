pub mod detector;
pub mod service;
pub mod speech_detector;

pub use detector::{VADResult, VoiceActivityDetector};
pub use service::{ActivityDetector, VadEvent, VadService};
pub use speech_detector::{SpeechDetector, SpeechEvent, SpeechState};

pub mod capture;
pub mod manager;
pub mod pcm;

pub use capture::{AudioCapture, Microphone};
pub use manager::{AudioResourceManager, AudioStream, CaptureConfig};

/// One chunk of mono f32 samples in [-1.0, 1.0] at [`SAMPLE_RATE`].
pub type AudioFrame = Vec<f32>;

pub const SAMPLE_RATE: u32 = 16000;
pub const CHANNELS: u16 = 1;

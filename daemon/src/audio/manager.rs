use tokio::sync::broadcast;

use super::capture::Microphone;
use super::{AudioFrame, CHANNELS, SAMPLE_RATE};
use crate::config::AudioConfig;
use crate::error::AudioError;

/// Capture parameters. Format and DSP flags are fixed; only the device,
/// gain and buffering come from configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct CaptureConfig {
    pub device: String,
    pub sample_rate: u32,
    pub channels: u16,
    pub gain: f32,
    pub echo_cancellation: bool,
    pub noise_suppression: bool,
    pub auto_gain: bool,
    pub broadcast_capacity: usize,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self::from(&AudioConfig::default())
    }
}

impl From<&AudioConfig> for CaptureConfig {
    fn from(config: &AudioConfig) -> Self {
        Self {
            device: config.device.clone(),
            sample_rate: SAMPLE_RATE,
            channels: CHANNELS,
            gain: config.gain,
            echo_cancellation: true,
            noise_suppression: true,
            auto_gain: true,
            broadcast_capacity: config.broadcast_capacity.max(1),
        }
    }
}

/// A live capture session. Consumers never hold the stream itself, only
/// receivers obtained from [`AudioStream::subscribe`].
pub struct AudioStream {
    config: CaptureConfig,
    audio_tx: broadcast::Sender<AudioFrame>,
}

impl AudioStream {
    pub fn subscribe(&self) -> broadcast::Receiver<AudioFrame> {
        self.audio_tx.subscribe()
    }

    pub fn config(&self) -> &CaptureConfig {
        &self.config
    }
}

/// Sole owner of the microphone stream.
pub struct AudioResourceManager {
    microphone: Box<dyn Microphone>,
    config: CaptureConfig,
    stream: Option<AudioStream>,
}

impl AudioResourceManager {
    pub fn new(microphone: Box<dyn Microphone>, config: CaptureConfig) -> Self {
        Self {
            microphone,
            config,
            stream: None,
        }
    }

    /// Opens the microphone, or returns the already open stream.
    pub fn acquire(&mut self) -> Result<&AudioStream, AudioError> {
        if self.stream.is_none() {
            let (audio_tx, _) = broadcast::channel(self.config.broadcast_capacity);
            self.microphone.open(&self.config, audio_tx.clone())?;
            tracing::info!(
                "Microphone acquired ({}Hz, {} channel(s))",
                self.config.sample_rate,
                self.config.channels
            );
            self.stream = Some(AudioStream {
                config: self.config.clone(),
                audio_tx,
            });
        }

        self.stream
            .as_ref()
            .ok_or_else(|| AudioError::DeviceUnavailable("Audio stream missing".to_string()))
    }

    /// Stops the microphone. Safe to call repeatedly or before `acquire`.
    pub fn release(&mut self) {
        if let Some(stream) = self.stream.take() {
            self.microphone.close();
            // Dropping the sender closes every subscriber's receiver.
            drop(stream);
            tracing::info!("Microphone released");
        }
    }

    pub fn is_acquired(&self) -> bool {
        self.stream.is_some()
    }

    pub fn subscribe(&self) -> Option<broadcast::Receiver<AudioFrame>> {
        self.stream.as_ref().map(AudioStream::subscribe)
    }
}

impl Drop for AudioResourceManager {
    fn drop(&mut self) {
        self.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[derive(Default)]
    struct Counters {
        opened: AtomicUsize,
        closed: AtomicUsize,
    }

    struct CountingMicrophone {
        counters: Arc<Counters>,
        fail_with: Option<AudioError>,
    }

    impl Microphone for CountingMicrophone {
        fn open(
            &mut self,
            _config: &CaptureConfig,
            _audio_tx: broadcast::Sender<AudioFrame>,
        ) -> Result<(), AudioError> {
            if let Some(err) = self.fail_with.clone() {
                return Err(err);
            }
            self.counters.opened.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn close(&mut self) {
            self.counters.closed.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn manager(fail_with: Option<AudioError>) -> (AudioResourceManager, Arc<Counters>) {
        let counters = Arc::new(Counters::default());
        let mic = CountingMicrophone {
            counters: Arc::clone(&counters),
            fail_with,
        };
        (
            AudioResourceManager::new(Box::new(mic), CaptureConfig::default()),
            counters,
        )
    }

    #[test]
    fn test_capture_config_is_fixed_format() {
        let config = CaptureConfig::default();
        assert_eq!(config.sample_rate, 16000);
        assert_eq!(config.channels, 1);
        assert!(config.echo_cancellation);
        assert!(config.noise_suppression);
        assert!(config.auto_gain);
    }

    #[test]
    fn test_acquire_is_reused() {
        let (mut manager, counters) = manager(None);
        manager.acquire().unwrap();
        manager.acquire().unwrap();
        assert!(manager.is_acquired());
        assert_eq!(counters.opened.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_release_is_idempotent() {
        let (mut manager, counters) = manager(None);
        manager.release();
        assert_eq!(counters.closed.load(Ordering::SeqCst), 0);

        manager.acquire().unwrap();
        manager.release();
        manager.release();
        assert!(!manager.is_acquired());
        assert_eq!(counters.closed.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_acquire_failure_leaves_no_stream() {
        let (mut manager, _) = manager(Some(AudioError::PermissionDenied("denied".into())));
        let err = manager.acquire().err().unwrap();
        assert!(matches!(err, AudioError::PermissionDenied(_)));
        assert!(!manager.is_acquired());
        assert!(manager.subscribe().is_none());
    }

    #[test]
    fn test_release_closes_subscribers() {
        let (mut manager, _) = manager(None);
        let mut rx = manager.acquire().unwrap().subscribe();
        manager.release();
        assert!(matches!(
            rx.try_recv(),
            Err(broadcast::error::TryRecvError::Closed)
        ));
    }
}

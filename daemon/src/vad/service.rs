use async_trait::async_trait;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;

use super::speech_detector::{SpeechDetector, SpeechEvent};
use crate::audio::AudioFrame;
use crate::config::VadConfig;
use crate::error::VadError;

#[derive(Debug, Clone, PartialEq)]
pub enum VadEvent {
    SpeechStart,
    /// End of an utterance with the captured audio.
    SpeechEnd(Vec<f32>),
    Misfire,
}

/// Voice activity detection as seen by the pipeline. Every failure here is
/// survivable; the pipeline keeps running on the speech engine alone.
#[async_trait]
pub trait ActivityDetector: Send {
    async fn initialize(&mut self, events: mpsc::UnboundedSender<VadEvent>)
        -> Result<(), VadError>;

    /// Begins classifying frames from `audio`. Restarting after `pause`
    /// is allowed.
    fn start(&mut self, audio: broadcast::Receiver<AudioFrame>) -> Result<(), VadError>;

    fn pause(&mut self);

    fn destroy(&mut self);
}

pub struct VadService {
    config: VadConfig,
    events: Option<mpsc::UnboundedSender<VadEvent>>,
    vad_task_handle: Option<JoinHandle<()>>,
}

impl VadService {
    pub fn new(config: VadConfig) -> Self {
        Self {
            config,
            events: None,
            vad_task_handle: None,
        }
    }

    pub fn is_running(&self) -> bool {
        self.vad_task_handle
            .as_ref()
            .map(|h| !h.is_finished())
            .unwrap_or(false)
    }
}

#[async_trait]
impl ActivityDetector for VadService {
    async fn initialize(
        &mut self,
        events: mpsc::UnboundedSender<VadEvent>,
    ) -> Result<(), VadError> {
        if !self.config.enabled {
            return Err(VadError::Unavailable(
                "disabled in configuration".to_string(),
            ));
        }

        // Validates the thresholds up front so start() cannot fail on them.
        SpeechDetector::from_config(&self.config)?;
        self.events = Some(events);
        tracing::info!("VAD initialized successfully");
        Ok(())
    }

    fn start(&mut self, mut audio_rx: broadcast::Receiver<AudioFrame>) -> Result<(), VadError> {
        let events = self
            .events
            .clone()
            .ok_or_else(|| VadError::Unavailable("not initialized".to_string()))?;
        let mut speech_detector = SpeechDetector::from_config(&self.config)?;

        self.pause();

        let vad_task = tokio::spawn(async move {
            tracing::debug!("VAD processing task started");

            loop {
                match audio_rx.recv().await {
                    Ok(samples) => {
                        let event = match speech_detector.process_audio(&samples) {
                            Some(SpeechEvent::Started) => VadEvent::SpeechStart,
                            Some(SpeechEvent::Ended(audio)) => VadEvent::SpeechEnd(audio),
                            Some(SpeechEvent::Misfire) => VadEvent::Misfire,
                            None => continue,
                        };
                        if events.send(event).is_err() {
                            tracing::debug!("VAD event receiver dropped, stopping");
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        tracing::warn!("VAD lagged, dropped {} audio chunks", n);
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        tracing::info!("Audio receiver closed, stopping VAD processing");
                        break;
                    }
                }
            }
        });

        self.vad_task_handle = Some(vad_task);
        tracing::info!("VAD started");
        Ok(())
    }

    fn pause(&mut self) {
        if let Some(handle) = self.vad_task_handle.take() {
            handle.abort();
            tracing::info!("VAD paused");
        }
    }

    fn destroy(&mut self) {
        self.pause();
        if self.events.take().is_some() {
            tracing::info!("VAD destroyed");
        }
    }
}

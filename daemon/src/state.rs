use shared::ipc::StatusInfo;
use std::sync::Arc;
use std::time::Duration;

use crate::assistant::Assistant;
use crate::audio::{AudioCapture, AudioResourceManager, CaptureConfig};
use crate::config::Config;
use crate::pipeline::{Collaborators, PipelineHandle, WakePhrases, WakeWordOrchestrator};
use crate::transcription::{OnDeviceEngine, PlatformEngine, RestartPolicy};
use crate::vad::VadService;

/// Wires the production microphone, engines and VAD into an orchestrator.
pub fn build_orchestrator(config: &Config) -> WakeWordOrchestrator {
    let audio = AudioResourceManager::new(
        Box::new(AudioCapture::new()),
        CaptureConfig::from(&config.audio),
    );
    let parts = Collaborators {
        audio,
        primary: Box::new(OnDeviceEngine::new(
            config.whisper.clone(),
            config.vad.clone(),
        )),
        fallback: Box::new(PlatformEngine::new(
            config.platform.clone(),
            config.vad.clone(),
            Duration::from_secs(config.timeouts.transcription_timeout_seconds),
        )),
        vad: Box::new(VadService::new(config.vad.clone())),
    };

    WakeWordOrchestrator::new(
        parts,
        WakePhrases::new(&config.wake.phrases),
        RestartPolicy::new(&config.restart),
    )
}

pub struct DaemonState {
    pub config: Config,
    pub pipeline: PipelineHandle,
    pub assistant: Arc<Assistant>,
}

impl DaemonState {
    pub fn new(config: Config, pipeline: PipelineHandle, assistant: Arc<Assistant>) -> Self {
        Self {
            config,
            pipeline,
            assistant,
        }
    }

    pub async fn get_status(&self) -> StatusInfo {
        let exchange = self.assistant.last_exchange().await;
        let pipeline = self.pipeline.status().await;

        StatusInfo {
            is_running: pipeline.is_some(),
            mode: pipeline.as_ref().map(|s| s.mode).unwrap_or_default(),
            listening: pipeline
                .as_ref()
                .map(|s| s.listening_for_command())
                .unwrap_or(false),
            engine: pipeline
                .as_ref()
                .and_then(|s| s.engine)
                .map(|kind| kind.to_string()),
            vad_available: pipeline.as_ref().map(|s| s.vad_available).unwrap_or(false),
            speech_detected: pipeline.as_ref().map(|s| s.speech_active).unwrap_or(false),
            last_command: exchange.command,
            last_reply: exchange.reply,
        }
    }
}

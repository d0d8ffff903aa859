use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, info, warn};

use super::remote::{HttpRecognizer, RemoteRecognizer};
use super::{EngineKind, FragmentSink, SpeechEngine};
use crate::audio::pcm::encode_wav;
use crate::audio::{AudioFrame, SAMPLE_RATE};
use crate::config::{PlatformConfig, VadConfig};
use crate::error::{EngineError, TransientRecognitionError};
use crate::vad::{SpeechDetector, SpeechEvent, SpeechState};

const KIND: EngineKind = EngineKind::FallbackPlatform;

#[derive(Debug, Clone)]
struct SessionSettings {
    interim_samples: Option<usize>,
    no_speech_timeout: Duration,
}

impl SessionSettings {
    fn from_config(config: &PlatformConfig) -> Self {
        let interim_samples = (config.interim_results && config.interim_interval_ms > 0)
            .then(|| (config.interim_interval_ms as usize * SAMPLE_RATE as usize) / 1000);
        Self {
            interim_samples,
            no_speech_timeout: Duration::from_millis(config.no_speech_timeout_ms),
        }
    }
}

async fn transcribe(
    recognizer: &dyn RemoteRecognizer,
    audio: &[f32],
) -> Result<String, TransientRecognitionError> {
    let wav = encode_wav(audio).map_err(|e| TransientRecognitionError::Decoder(e.to_string()))?;
    recognizer.transcribe(wav).await
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RequestKind {
    Interim,
    Final,
}

/// A transcription request running beside the session. Aborted when dropped.
struct Request {
    kind: RequestKind,
    handle: JoinHandle<Result<String, TransientRecognitionError>>,
}

impl Request {
    fn spawn(recognizer: &Arc<dyn RemoteRecognizer>, kind: RequestKind, audio: Vec<f32>) -> Self {
        let recognizer = Arc::clone(recognizer);
        let handle = tokio::spawn(async move { transcribe(recognizer.as_ref(), &audio).await });
        Self { kind, handle }
    }
}

impl Drop for Request {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

async fn finished(request: &mut Option<Request>) -> Result<String, TransientRecognitionError> {
    match request {
        Some(request) => match (&mut request.handle).await {
            Ok(result) => result,
            Err(e) => Err(TransientRecognitionError::Decoder(e.to_string())),
        },
        None => std::future::pending().await,
    }
}

/// One continuous recognition session. Ends by reporting why through the
/// sink; the caller decides whether to start another.
///
/// Requests run on their own tasks so audio keeps being read while the
/// service answers. At most one request is in flight; finished utterances
/// queue behind it and interim requests are skipped until it returns.
async fn run_session(
    mut audio_rx: broadcast::Receiver<AudioFrame>,
    mut detector: SpeechDetector,
    recognizer: Arc<dyn RemoteRecognizer>,
    sink: FragmentSink,
    settings: SessionSettings,
) {
    let no_speech = sleep_until(Instant::now() + settings.no_speech_timeout);
    tokio::pin!(no_speech);
    let mut next_interim = 0usize;
    let mut in_flight: Option<Request> = None;
    let mut utterances: VecDeque<Vec<f32>> = VecDeque::new();

    loop {
        if in_flight.is_none() {
            if let Some(utterance) = utterances.pop_front() {
                in_flight = Some(Request::spawn(&recognizer, RequestKind::Final, utterance));
            }
        }

        tokio::select! {
            _ = &mut no_speech, if !detector.is_speaking() && in_flight.is_none() => {
                debug!("No speech within {:?}", settings.no_speech_timeout);
                sink.session_ended(TransientRecognitionError::NoSpeech);
                return;
            }
            result = finished(&mut in_flight), if in_flight.is_some() => {
                let kind = in_flight.take().map(|r| r.kind);
                match (kind, result) {
                    (Some(RequestKind::Final), Ok(text)) => {
                        if !sink.final_result(&text) {
                            return;
                        }
                        no_speech
                            .as_mut()
                            .reset(Instant::now() + settings.no_speech_timeout);
                    }
                    (Some(RequestKind::Final), Err(e)) => {
                        sink.session_ended(e);
                        return;
                    }
                    (_, Ok(text)) => {
                        sink.interim(&text);
                    }
                    (_, Err(e)) => debug!("Interim transcription skipped: {}", e),
                }
            }
            frame = audio_rx.recv() => {
                match frame {
                    Ok(frame) => match detector.process_audio(&frame) {
                        Some(SpeechEvent::Started) => {
                            next_interim = settings.interim_samples.unwrap_or(usize::MAX);
                        }
                        Some(SpeechEvent::Ended(utterance)) => {
                            utterances.push_back(utterance);
                        }
                        Some(SpeechEvent::Misfire) => {
                            no_speech
                                .as_mut()
                                .reset(Instant::now() + settings.no_speech_timeout);
                        }
                        None => {
                            let buffered = detector.buffered().len();
                            if detector.state() == SpeechState::Speaking
                                && buffered >= next_interim
                                && in_flight.is_none()
                                && utterances.is_empty()
                            {
                                next_interim =
                                    buffered.saturating_add(settings.interim_samples.unwrap_or(usize::MAX));
                                in_flight = Some(Request::spawn(
                                    &recognizer,
                                    RequestKind::Interim,
                                    detector.buffered().to_vec(),
                                ));
                            }
                        }
                    },
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!("Platform recognizer lagged, dropped {} audio chunks", n);
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        sink.session_ended(TransientRecognitionError::SessionEnded);
                        return;
                    }
                }
            }
        }
    }
}

/// Continuous recognizer backed by a transcription service.
pub struct PlatformEngine {
    config: PlatformConfig,
    vad: VadConfig,
    request_timeout: Duration,
    recognizer: Option<Arc<dyn RemoteRecognizer>>,
    injected: bool,
    sink: Option<FragmentSink>,
    session: Option<JoinHandle<()>>,
}

impl PlatformEngine {
    pub fn new(config: PlatformConfig, vad: VadConfig, request_timeout: Duration) -> Self {
        Self {
            config,
            vad,
            request_timeout,
            recognizer: None,
            injected: false,
            sink: None,
            session: None,
        }
    }

    /// Uses `recognizer` instead of building an HTTP client.
    pub fn with_recognizer(
        config: PlatformConfig,
        vad: VadConfig,
        recognizer: Arc<dyn RemoteRecognizer>,
    ) -> Self {
        let mut engine = Self::new(config, vad, Duration::from_secs(30));
        engine.recognizer = Some(recognizer);
        engine.injected = true;
        engine
    }

    pub fn is_session_running(&self) -> bool {
        self.session
            .as_ref()
            .map(|h| !h.is_finished())
            .unwrap_or(false)
    }

    fn detector(&self) -> Result<SpeechDetector, EngineError> {
        SpeechDetector::from_config(&self.vad).map_err(|e| EngineError::unavailable(KIND, e.to_string()))
    }
}

#[async_trait]
impl SpeechEngine for PlatformEngine {
    fn kind(&self) -> EngineKind {
        KIND
    }

    async fn initialize(&mut self, sink: FragmentSink) -> Result<(), EngineError> {
        if !self.config.enabled {
            return Err(EngineError::unavailable(KIND, "disabled in configuration"));
        }
        self.detector()?;

        if self.recognizer.is_none() {
            let recognizer = HttpRecognizer::from_config(&self.config, self.request_timeout)?;
            info!("Transcription service: {}", recognizer.endpoint());
            self.recognizer = Some(Arc::new(recognizer));
        }

        self.sink = Some(sink);
        Ok(())
    }

    async fn start(&mut self, audio: broadcast::Receiver<AudioFrame>) -> Result<(), EngineError> {
        let (recognizer, sink) = match (&self.recognizer, &self.sink) {
            (Some(recognizer), Some(sink)) => (Arc::clone(recognizer), sink.clone()),
            _ => return Err(EngineError::unavailable(KIND, "not initialized")),
        };

        self.stop();

        let settings = SessionSettings::from_config(&self.config);
        let detector = self.detector()?;
        self.session = Some(tokio::spawn(run_session(
            audio, detector, recognizer, sink, settings,
        )));

        info!("Platform recognition session started");
        Ok(())
    }

    fn stop(&mut self) {
        if let Some(handle) = self.session.take() {
            handle.abort();
            info!("Platform recognition session stopped");
        }
    }

    fn shutdown(&mut self) {
        self.stop();
        self.sink = None;
        if !self.injected {
            self.recognizer = None;
        }
    }
}

impl Drop for PlatformEngine {
    fn drop(&mut self) {
        self.stop();
    }
}

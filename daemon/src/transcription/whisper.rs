use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc as std_mpsc;
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use whisper_rs::{
    FullParams, SamplingStrategy, WhisperContext, WhisperContextParameters, WhisperState,
};

use super::{EngineKind, FragmentSink, SpeechEngine};
use crate::audio::pcm::{duration_ms, pcm16_to_f32, to_pcm16};
use crate::audio::AudioFrame;
use crate::config::{VadConfig, WhisperConfig};
use crate::error::{EngineError, TransientRecognitionError};
use crate::vad::{SpeechDetector, SpeechEvent};

const KIND: EngineKind = EngineKind::PrimaryOnDevice;

/// Conventional model locations, probed in order after the configured path.
pub fn candidate_paths(config: &WhisperConfig) -> Vec<PathBuf> {
    let model_filename = config.model_name.as_str();

    let possible_paths: Vec<Option<PathBuf>> = vec![
        config.model_path.as_ref().map(PathBuf::from),
        dirs::home_dir().map(|p| p.join(".local/share/atlas/").join(model_filename)),
        Some(PathBuf::from("/usr/share/whisper/").join(model_filename)),
        Some(PathBuf::from("./models/").join(model_filename)),
        Some(PathBuf::from(model_filename)),
    ];

    possible_paths.into_iter().flatten().collect()
}

pub fn find_model_path(config: &WhisperConfig) -> Option<PathBuf> {
    let found = candidate_paths(config).into_iter().find(|p| p.is_file());
    match &found {
        Some(path) => info!("Found model at: {:?}", path),
        None => warn!("Model {} not found in any known location", config.model_name),
    }
    found
}

pub fn compute_file_checksum(file_path: &Path) -> std::io::Result<String> {
    use std::fs::File;
    use std::io::Read;

    debug!("Computing SHA256 checksum for: {:?}", file_path);

    let mut file = File::open(file_path)?;
    let mut hasher = Sha256::new();
    let mut buffer = [0u8; 8192];

    loop {
        let n = file.read(&mut buffer)?;
        if n == 0 {
            break;
        }
        hasher.update(&buffer[..n]);
    }

    Ok(hex::encode(hasher.finalize()))
}

fn verify_checksum(path: &Path, expected: &str) -> Result<(), EngineError> {
    let actual = compute_file_checksum(path)
        .map_err(|e| EngineError::unavailable(KIND, format!("cannot read model: {}", e)))?;

    if actual.eq_ignore_ascii_case(expected.trim()) {
        info!("Model checksum verification passed: {}", actual);
        Ok(())
    } else {
        error!(
            "Model checksum mismatch! Expected: {}, Got: {}",
            expected, actual
        );
        Err(EngineError::unavailable(
            KIND,
            format!("checksum mismatch for {}", path.display()),
        ))
    }
}

fn load_model(path: &Path, checksum: Option<&str>) -> Result<WhisperContext, EngineError> {
    if let Some(expected) = checksum {
        verify_checksum(path, expected)?;
    }

    let path_str = path
        .to_str()
        .ok_or_else(|| EngineError::unavailable(KIND, "model path is not valid UTF-8"))?;

    info!("Loading Whisper model from: {:?}", path);
    let mut params = WhisperContextParameters::default();
    params.use_gpu(false);

    WhisperContext::new_with_params(path_str, params)
        .map_err(|e| EngineError::unavailable(KIND, format!("failed to load model: {}", e)))
}

fn parse_sampling_strategy(name: &str) -> SamplingStrategy {
    match name.to_lowercase().as_str() {
        "greedy" => SamplingStrategy::Greedy { best_of: 1 },
        "beam" => SamplingStrategy::BeamSearch {
            beam_size: 5,
            patience: 1.0,
        },
        _ => {
            warn!("Unknown sampling strategy '{}', defaulting to greedy", name);
            SamplingStrategy::Greedy { best_of: 1 }
        }
    }
}

/// Pads short utterances with silence up to `min_samples`.
fn pad_audio(audio: &[f32], min_samples: usize) -> Vec<f32> {
    let mut padded = audio.to_vec();
    if padded.len() < min_samples {
        padded.resize(min_samples, 0.0);
    }
    padded
}

/// Turns one complete utterance into text.
pub trait Transcribe: Send {
    fn transcribe(&mut self, audio: &[f32]) -> Result<String, TransientRecognitionError>;
}

pub struct WhisperTranscriber {
    state: WhisperState,
    language: String,
    n_threads: i32,
    sampling_strategy: String,
    min_audio_samples: usize,
}

impl WhisperTranscriber {
    fn new(context: &WhisperContext, config: &WhisperConfig) -> Result<Self, EngineError> {
        let state = context.create_state().map_err(|e| {
            EngineError::Transient(TransientRecognitionError::Decoder(format!(
                "failed to create Whisper state: {}",
                e
            )))
        })?;

        Ok(Self {
            state,
            language: config.language.clone(),
            n_threads: config.n_threads.max(1) as i32,
            sampling_strategy: config.sampling_strategy.clone(),
            min_audio_samples: config.min_audio_samples,
        })
    }
}

impl Transcribe for WhisperTranscriber {
    fn transcribe(&mut self, audio: &[f32]) -> Result<String, TransientRecognitionError> {
        let audio = pad_audio(audio, self.min_audio_samples);

        let mut params = FullParams::new(parse_sampling_strategy(&self.sampling_strategy));
        params.set_n_threads(self.n_threads);
        params.set_print_special(false);
        params.set_print_progress(false);
        params.set_print_realtime(false);
        params.set_print_timestamps(false);
        params.set_language(Some(&self.language));

        self.state
            .full(params, &audio)
            .map_err(|e| TransientRecognitionError::Decoder(e.to_string()))?;

        let num_segments = self.state.full_n_segments();
        let mut transcription = String::new();
        for i in 0..num_segments {
            if let Some(segment) = self.state.get_segment(i) {
                if let Ok(text) = segment.to_str() {
                    transcription.push_str(text);
                    transcription.push(' ');
                }
            }
        }

        debug!(
            "Transcription: '{}' ({} ms)",
            transcription.trim(),
            duration_ms(audio.len())
        );
        Ok(transcription.trim().to_string())
    }
}

/// Splits a 16-bit PCM stream into utterances with an energy endpointer.
pub struct PcmEndpointer {
    detector: SpeechDetector,
}

impl PcmEndpointer {
    pub fn new(detector: SpeechDetector) -> Self {
        Self { detector }
    }

    /// Returns the finished utterance when `pcm` completes one.
    pub fn accept_waveform(&mut self, pcm: &[i16]) -> Option<Vec<f32>> {
        match self.detector.process_audio(&pcm16_to_f32(pcm)) {
            Some(SpeechEvent::Ended(utterance)) => {
                debug!("Utterance end: {} ms", duration_ms(utterance.len()));
                Some(utterance)
            }
            Some(SpeechEvent::Started) => {
                debug!("Utterance start");
                None
            }
            Some(SpeechEvent::Misfire) | None => None,
        }
    }
}

fn endpointer(whisper: &WhisperConfig, vad: &VadConfig) -> Result<PcmEndpointer, EngineError> {
    SpeechDetector::new(
        vad.threshold_start,
        vad.threshold_stop,
        vad.min_speech_duration_ms,
        whisper.endpoint_silence_ms,
    )
    .map(|d| PcmEndpointer::new(d.with_max_utterance_ms(whisper.max_utterance_ms)))
    .map_err(|e| EngineError::unavailable(KIND, e.to_string()))
}

/// Drains `audio_rx` into the endpointer and hands finished utterances to
/// the transcription thread, so audio keeps flowing while whisper runs.
fn capture_loop(
    mut endpointer: PcmEndpointer,
    mut audio_rx: broadcast::Receiver<AudioFrame>,
    utterances: std_mpsc::Sender<Vec<f32>>,
    sink: FragmentSink,
    running: Arc<AtomicBool>,
) {
    while running.load(Ordering::SeqCst) {
        match audio_rx.blocking_recv() {
            Ok(frame) => {
                if let Some(utterance) = endpointer.accept_waveform(&to_pcm16(&frame)) {
                    if utterances.send(utterance).is_err() {
                        break;
                    }
                }
            }
            Err(broadcast::error::RecvError::Lagged(n)) => {
                warn!("On-device endpointer lagged, dropped {} audio chunks", n);
            }
            Err(broadcast::error::RecvError::Closed) => {
                if running.swap(false, Ordering::SeqCst) {
                    sink.session_ended(TransientRecognitionError::SessionEnded);
                }
                break;
            }
        }
    }
    debug!("On-device capture loop finished");
}

/// Transcribes utterances one at a time; each becomes one final fragment.
fn transcribe_loop<T: Transcribe>(
    mut transcriber: T,
    utterances: std_mpsc::Receiver<Vec<f32>>,
    sink: FragmentSink,
    running: Arc<AtomicBool>,
) {
    for utterance in utterances {
        if !running.load(Ordering::SeqCst) {
            break;
        }
        match transcriber.transcribe(&utterance) {
            Ok(text) => {
                if running.load(Ordering::SeqCst) && !sink.final_result(&text) {
                    break;
                }
            }
            Err(e) => {
                warn!("On-device decoder failed: {}", e);
                if running.swap(false, Ordering::SeqCst) {
                    sink.session_ended(e);
                }
                break;
            }
        }
    }
    debug!("On-device transcription loop finished");
}

struct Session {
    running: Arc<AtomicBool>,
    handles: [JoinHandle<()>; 2],
}

/// whisper.cpp recognizer running entirely on this machine.
pub struct OnDeviceEngine {
    config: WhisperConfig,
    vad: VadConfig,
    context: Option<Arc<WhisperContext>>,
    sink: Option<FragmentSink>,
    session: Option<Session>,
}

impl OnDeviceEngine {
    pub fn new(config: WhisperConfig, vad: VadConfig) -> Self {
        Self {
            config,
            vad,
            context: None,
            sink: None,
            session: None,
        }
    }

    pub fn is_loaded(&self) -> bool {
        self.context.is_some()
    }
}

#[async_trait]
impl SpeechEngine for OnDeviceEngine {
    fn kind(&self) -> EngineKind {
        KIND
    }

    async fn initialize(&mut self, sink: FragmentSink) -> Result<(), EngineError> {
        if self.context.is_some() {
            self.sink = Some(sink);
            return Ok(());
        }

        endpointer(&self.config, &self.vad)?;
        let path = find_model_path(&self.config).ok_or_else(|| {
            EngineError::unavailable(KIND, format!("model {} not found", self.config.model_name))
        })?;

        let checksum = self.config.model_checksum.clone();
        let context = tokio::task::spawn_blocking(move || load_model(&path, checksum.as_deref()))
            .await
            .map_err(|e| EngineError::unavailable(KIND, format!("model loader failed: {}", e)))??;

        info!("Whisper model loaded successfully");
        self.context = Some(Arc::new(context));
        self.sink = Some(sink);
        Ok(())
    }

    async fn start(&mut self, audio: broadcast::Receiver<AudioFrame>) -> Result<(), EngineError> {
        let (context, sink) = match (&self.context, &self.sink) {
            (Some(context), Some(sink)) => (Arc::clone(context), sink.clone()),
            _ => return Err(EngineError::unavailable(KIND, "not initialized")),
        };

        self.stop();

        let transcriber = WhisperTranscriber::new(&context, &self.config)?;
        let endpointer = endpointer(&self.config, &self.vad)?;
        let running = Arc::new(AtomicBool::new(true));
        let (utterance_tx, utterance_rx) = std_mpsc::channel();

        let capture = {
            let (sink, running) = (sink.clone(), Arc::clone(&running));
            tokio::task::spawn_blocking(move || {
                capture_loop(endpointer, audio, utterance_tx, sink, running)
            })
        };
        let transcription = {
            let running = Arc::clone(&running);
            tokio::task::spawn_blocking(move || {
                transcribe_loop(transcriber, utterance_rx, sink, running)
            })
        };
        self.session = Some(Session {
            running,
            handles: [capture, transcription],
        });

        info!("On-device recognition started");
        Ok(())
    }

    fn stop(&mut self) {
        if let Some(session) = self.session.take() {
            session.running.store(false, Ordering::SeqCst);
            // Both threads exit on their next frame or utterance.
            drop(session.handles);
            info!("On-device recognition stopped");
        }
    }

    fn shutdown(&mut self) {
        self.stop();
        self.sink = None;
        if self.context.take().is_some() {
            info!("Whisper model unloaded");
        }
    }
}

impl Drop for OnDeviceEngine {
    fn drop(&mut self) {
        self.stop();
    }
}

// Fakes for driving the pipeline without a microphone, a model or a network.

#![allow(dead_code)]

use async_trait::async_trait;
use atlasd::audio::{AudioFrame, AudioResourceManager, CaptureConfig, Microphone};
use atlasd::config::RestartConfig;
use atlasd::error::{AudioError, EngineError, TransientRecognitionError, VadError};
use atlasd::pipeline::{Collaborators, WakePhrases, WakeWordOrchestrator};
use atlasd::transcription::{EngineKind, FragmentSink, RestartPolicy, SpeechEngine};
use atlasd::vad::{ActivityDetector, VadEvent};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::{broadcast, mpsc};

#[derive(Default)]
pub struct MicCounters {
    pub opened: AtomicUsize,
    pub closed: AtomicUsize,
}

impl MicCounters {
    pub fn opened(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }

    pub fn closed(&self) -> usize {
        self.closed.load(Ordering::SeqCst)
    }
}

pub struct FakeMicrophone {
    counters: Arc<MicCounters>,
    fail_with: Option<AudioError>,
}

impl Microphone for FakeMicrophone {
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

/// Shared view into a [`FakeEngine`]: call counts plus the sink the
/// pipeline handed over, so tests can push fragments.
#[derive(Default)]
pub struct EngineProbe {
    sink: Mutex<Option<FragmentSink>>,
    pub inits: AtomicUsize,
    pub starts: AtomicUsize,
    pub stops: AtomicUsize,
    pub shutdowns: AtomicUsize,
}

impl EngineProbe {
    pub fn sink(&self) -> FragmentSink {
        self.sink
            .lock()
            .unwrap()
            .clone()
            .expect("engine was never initialized")
    }

    pub fn interim(&self, text: &str) {
        assert!(self.sink().interim(text));
    }

    pub fn final_result(&self, text: &str) {
        assert!(self.sink().final_result(text));
    }

    pub fn end_session(&self, reason: TransientRecognitionError) {
        assert!(self.sink().session_ended(reason));
    }

    pub fn count(counter: &AtomicUsize) -> usize {
        counter.load(Ordering::SeqCst)
    }

    pub fn starts(&self) -> usize {
        Self::count(&self.starts)
    }

    pub fn inits(&self) -> usize {
        Self::count(&self.inits)
    }

    pub fn shutdowns(&self) -> usize {
        Self::count(&self.shutdowns)
    }
}

pub struct FakeEngine {
    kind: EngineKind,
    init_error: Option<String>,
    probe: Arc<EngineProbe>,
}

impl FakeEngine {
    pub fn new(kind: EngineKind, init_error: Option<&str>) -> (Self, Arc<EngineProbe>) {
        let probe = Arc::new(EngineProbe::default());
        let engine = Self {
            kind,
            init_error: init_error.map(str::to_string),
            probe: Arc::clone(&probe),
        };
        (engine, probe)
    }
}

#[async_trait]
impl SpeechEngine for FakeEngine {
    fn kind(&self) -> EngineKind {
        self.kind
    }

    async fn initialize(&mut self, sink: FragmentSink) -> Result<(), EngineError> {
        if let Some(reason) = &self.init_error {
            return Err(EngineError::unavailable(self.kind, reason.clone()));
        }
        self.probe.inits.fetch_add(1, Ordering::SeqCst);
        *self.probe.sink.lock().unwrap() = Some(sink);
        Ok(())
    }

    async fn start(&mut self, _audio: broadcast::Receiver<AudioFrame>) -> Result<(), EngineError> {
        self.probe.starts.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn stop(&mut self) {
        self.probe.stops.fetch_add(1, Ordering::SeqCst);
    }

    fn shutdown(&mut self) {
        self.probe.shutdowns.fetch_add(1, Ordering::SeqCst);
    }
}

#[derive(Default)]
pub struct VadProbe {
    events: Mutex<Option<mpsc::UnboundedSender<VadEvent>>>,
    pub destroyed: AtomicUsize,
}

impl VadProbe {
    pub fn emit(&self, event: VadEvent) {
        let events = self.events.lock().unwrap();
        events
            .as_ref()
            .expect("VAD was never initialized")
            .send(event)
            .unwrap();
    }
}

pub struct FakeVad {
    available: bool,
    startable: bool,
    probe: Arc<VadProbe>,
}

#[async_trait]
impl ActivityDetector for FakeVad {
    async fn initialize(&mut self, events: mpsc::UnboundedSender<VadEvent>) -> Result<(), VadError> {
        if !self.available {
            return Err(VadError::Unavailable("model failed to load".to_string()));
        }
        *self.probe.events.lock().unwrap() = Some(events);
        Ok(())
    }

    fn start(&mut self, _audio: broadcast::Receiver<AudioFrame>) -> Result<(), VadError> {
        if !self.startable {
            return Err(VadError::Unavailable("processing task failed to start".to_string()));
        }
        Ok(())
    }

    fn pause(&mut self) {}

    fn destroy(&mut self) {
        self.probe.destroyed.fetch_add(1, Ordering::SeqCst);
        *self.probe.events.lock().unwrap() = None;
    }
}

pub struct Fixture {
    pub orchestrator: WakeWordOrchestrator,
    pub mic: Arc<MicCounters>,
    pub primary: Arc<EngineProbe>,
    pub fallback: Arc<EngineProbe>,
    pub vad: Arc<VadProbe>,
}

/// The test-side handles of a [`Fixture`] once its orchestrator has moved
/// onto a pipeline task.
pub struct Probes {
    pub mic: Arc<MicCounters>,
    pub primary: Arc<EngineProbe>,
    pub fallback: Arc<EngineProbe>,
    pub vad: Arc<VadProbe>,
}

impl Fixture {
    pub fn into_parts(self) -> (WakeWordOrchestrator, Probes) {
        let Fixture {
            orchestrator,
            mic,
            primary,
            fallback,
            vad,
        } = self;
        (
            orchestrator,
            Probes {
                mic,
                primary,
                fallback,
                vad,
            },
        )
    }
}

/// Builds an orchestrator wired to fakes. Everything works unless told
/// otherwise.
#[derive(Default)]
pub struct PipelineBuilder {
    mic_error: Option<AudioError>,
    primary_error: Option<&'static str>,
    fallback_error: Option<&'static str>,
    vad_unavailable: bool,
    vad_start_fails: bool,
    restart: RestartConfig,
}

impl PipelineBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn microphone_error(mut self, err: AudioError) -> Self {
        self.mic_error = Some(err);
        self
    }

    pub fn primary_fails(mut self, reason: &'static str) -> Self {
        self.primary_error = Some(reason);
        self
    }

    pub fn fallback_fails(mut self, reason: &'static str) -> Self {
        self.fallback_error = Some(reason);
        self
    }

    pub fn without_vad(mut self) -> Self {
        self.vad_unavailable = true;
        self
    }

    /// VAD initializes but refuses to start.
    pub fn vad_start_fails(mut self) -> Self {
        self.vad_start_fails = true;
        self
    }

    pub fn max_restart_attempts(mut self, attempts: u32) -> Self {
        self.restart.max_attempts = attempts;
        self
    }

    pub fn build(self) -> Fixture {
        let mic = Arc::new(MicCounters::default());
        let microphone = FakeMicrophone {
            counters: Arc::clone(&mic),
            fail_with: self.mic_error,
        };
        let (primary_engine, primary) = FakeEngine::new(EngineKind::PrimaryOnDevice, self.primary_error);
        let (fallback_engine, fallback) =
            FakeEngine::new(EngineKind::FallbackPlatform, self.fallback_error);
        let vad = Arc::new(VadProbe::default());

        let parts = Collaborators {
            audio: AudioResourceManager::new(Box::new(microphone), CaptureConfig::default()),
            primary: Box::new(primary_engine),
            fallback: Box::new(fallback_engine),
            vad: Box::new(FakeVad {
                available: !self.vad_unavailable,
                startable: !self.vad_start_fails,
                probe: Arc::clone(&vad),
            }),
        };

        Fixture {
            orchestrator: WakeWordOrchestrator::new(
                parts,
                WakePhrases::new(["hey atlas", "atlas"]),
                RestartPolicy::new(&self.restart),
            ),
            mic,
            primary,
            fallback,
            vad,
        }
    }
}

/// An answerer that echoes the question and counts calls.
#[derive(Default)]
pub struct EchoAnswerer {
    pub calls: AtomicUsize,
}

#[async_trait]
impl atlasd::assistant::QuestionAnswerer for EchoAnswerer {
    async fn ask(&self, question: &str) -> String {
        self.calls.fetch_add(1, Ordering::SeqCst);
        format!("You asked: {}", question)
    }
}

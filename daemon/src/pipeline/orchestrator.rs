use shared::ListeningMode;
use tokio::sync::{mpsc, watch};
use tokio::time::{sleep_until, Instant};
use tracing::{debug, error, info, trace, warn};

use super::subscription::{Slot, Subscription};
use super::wake::WakePhrases;
use crate::audio::{pcm::duration_ms, AudioResourceManager};
use crate::error::{EngineError, PipelineError, TransientRecognitionError};
use crate::transcription::{
    select_engine, EngineEvent, EngineKind, FragmentSink, RestartPolicy, SpeechEngine,
    TranscriptFragment,
};
use crate::vad::{ActivityDetector, VadEvent};

/// Everything the orchestrator drives, constructed by the caller.
pub struct Collaborators {
    pub audio: AudioResourceManager,
    pub primary: Box<dyn SpeechEngine>,
    pub fallback: Box<dyn SpeechEngine>,
    pub vad: Box<dyn ActivityDetector>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum PipelineEvent {
    Engine(EngineEvent),
    Vad(VadEvent),
    RestartDue,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineStatus {
    pub mode: ListeningMode,
    pub engine: Option<EngineKind>,
    pub vad_available: bool,
    pub speech_active: bool,
    pub microphone_open: bool,
}

impl PipelineStatus {
    /// The listening indicator shown to users.
    pub fn listening_for_command(&self) -> bool {
        self.mode == ListeningMode::ActiveCommand
    }
}

struct EngineSlot {
    engine: Box<dyn SpeechEngine>,
    initialized: bool,
    last_sequence: Option<u64>,
}

impl EngineSlot {
    fn new(engine: Box<dyn SpeechEngine>) -> Self {
        Self {
            engine,
            initialized: false,
            last_sequence: None,
        }
    }
}

/// Owns the listening mode and routes transcript fragments either to wake
/// phrase detection or to the command subscriber.
///
/// All methods run on one task; nothing here blocks on engine work except
/// `initialize`, `start` and engine restarts.
pub struct WakeWordOrchestrator {
    audio: AudioResourceManager,
    primary: EngineSlot,
    fallback: EngineSlot,
    vad: Box<dyn ActivityDetector>,
    phrases: WakePhrases,
    restart: RestartPolicy,

    mode: ListeningMode,
    mode_tx: watch::Sender<ListeningMode>,
    active: Option<EngineKind>,
    engine_running: bool,
    vad_available: bool,
    speech_active: bool,
    pending_restart: Option<Instant>,

    activation: Slot<()>,
    command: Slot<String>,

    engine_tx: mpsc::UnboundedSender<EngineEvent>,
    engine_rx: mpsc::UnboundedReceiver<EngineEvent>,
    vad_tx: mpsc::UnboundedSender<VadEvent>,
    vad_rx: mpsc::UnboundedReceiver<VadEvent>,
}

impl WakeWordOrchestrator {
    pub fn new(parts: Collaborators, phrases: WakePhrases, restart: RestartPolicy) -> Self {
        let (engine_tx, engine_rx) = mpsc::unbounded_channel();
        let (vad_tx, vad_rx) = mpsc::unbounded_channel();
        let (mode_tx, _) = watch::channel(ListeningMode::Idle);

        if phrases.is_empty() {
            warn!("No wake phrases configured; only explicit command windows will work");
        }

        Self {
            audio: parts.audio,
            primary: EngineSlot::new(parts.primary),
            fallback: EngineSlot::new(parts.fallback),
            vad: parts.vad,
            phrases,
            restart,
            mode: ListeningMode::Idle,
            mode_tx,
            active: None,
            engine_running: false,
            vad_available: false,
            speech_active: false,
            pending_restart: None,
            activation: Slot::new(),
            command: Slot::new(),
            engine_tx,
            engine_rx,
            vad_tx,
            vad_rx,
        }
    }

    pub fn subscribe_activation(&self) -> Subscription<()> {
        self.activation.subscribe()
    }

    pub fn subscribe_commands(&self) -> Subscription<String> {
        self.command.subscribe()
    }

    pub(crate) fn activation_slot(&self) -> Slot<()> {
        self.activation.clone()
    }

    pub(crate) fn command_slot(&self) -> Slot<String> {
        self.command.clone()
    }

    pub fn mode(&self) -> ListeningMode {
        self.mode
    }

    pub fn watch_mode(&self) -> watch::Receiver<ListeningMode> {
        self.mode_tx.subscribe()
    }

    pub fn active_engine(&self) -> Option<EngineKind> {
        self.active
    }

    pub fn is_initialized(&self) -> bool {
        self.active.is_some()
    }

    pub fn status(&self) -> PipelineStatus {
        PipelineStatus {
            mode: self.mode,
            engine: self.active,
            vad_available: self.vad_available,
            speech_active: self.speech_active,
            microphone_open: self.audio.is_acquired(),
        }
    }

    fn slot_mut(&mut self, kind: EngineKind) -> &mut EngineSlot {
        match kind {
            EngineKind::PrimaryOnDevice => &mut self.primary,
            EngineKind::FallbackPlatform => &mut self.fallback,
        }
    }

    fn transition(&mut self, next: ListeningMode) {
        if self.mode == next {
            return;
        }
        if !self.mode.can_transition_to(next) {
            warn!("Ignoring illegal mode transition {} -> {}", self.mode, next);
            return;
        }
        info!("Mode: {} -> {}", self.mode, next);
        self.mode = next;
        self.mode_tx.send_replace(next);
    }

    async fn init_engine(&mut self, kind: EngineKind) -> Result<(), EngineError> {
        let sink = FragmentSink::new(kind, self.engine_tx.clone());
        let slot = self.slot_mut(kind);
        if slot.initialized {
            return Ok(());
        }

        slot.engine.initialize(sink).await?;
        slot.initialized = true;
        slot.last_sequence = None;
        Ok(())
    }

    /// Acquires the microphone and picks a speech engine. VAD is set up on a
    /// best-effort basis.
    pub async fn initialize(&mut self) -> Result<(), PipelineError> {
        if self.is_initialized() {
            debug!("Pipeline already initialized");
            return Ok(());
        }

        self.audio.acquire()?;

        let primary = self.init_engine(EngineKind::PrimaryOnDevice).await;
        let fallback = match &primary {
            Ok(()) => None,
            Err(e) => {
                warn!("{}; trying fallback", e);
                Some(self.init_engine(EngineKind::FallbackPlatform).await)
            }
        };

        match select_engine(primary, fallback) {
            Ok(kind) => {
                info!("Selected speech engine: {}", kind);
                self.active = Some(kind);
            }
            Err(e) => {
                error!("{}", e);
                self.audio.release();
                return Err(e);
            }
        }

        match self.vad.initialize(self.vad_tx.clone()).await {
            Ok(()) => self.vad_available = true,
            Err(e) => {
                warn!("{}; continuing without VAD", e);
                self.vad_available = false;
            }
        }

        Ok(())
    }

    async fn start_engine(&mut self, kind: EngineKind) -> Result<(), EngineError> {
        let audio = self
            .audio
            .subscribe()
            .ok_or(EngineError::Transient(TransientRecognitionError::SessionEnded))?;
        self.slot_mut(kind).engine.start(audio).await
    }

    /// Starts VAD and the selected engine and enters passive wake listening.
    pub async fn start(&mut self) -> Result<(), PipelineError> {
        let kind = self.active.ok_or(PipelineError::NotInitialized)?;
        if self.mode != ListeningMode::Idle {
            return Ok(());
        }

        let vad_audio = self.audio.acquire()?.subscribe();
        if self.vad_available {
            if let Err(e) = self.vad.start(vad_audio) {
                warn!("{}; continuing without VAD", e);
                self.vad_available = false;
            }
        }

        if let Err(e) = self.start_engine(kind).await {
            self.vad.pause();
            return Err(PipelineError::StartFailed(e));
        }

        self.engine_running = true;
        self.speech_active = false;
        self.pending_restart = None;
        self.restart.reset();
        self.transition(ListeningMode::PassiveWake);
        Ok(())
    }

    /// Opens a command window. Returns whether one is open afterwards.
    pub fn start_command_listening(&mut self) -> bool {
        match self.mode {
            ListeningMode::PassiveWake => {
                self.transition(ListeningMode::ActiveCommand);
                true
            }
            ListeningMode::ActiveCommand => true,
            ListeningMode::Idle => {
                debug!("Not listening; command window not opened");
                false
            }
        }
    }

    /// Closes the command window. Returns whether one was open.
    pub fn stop_command_listening(&mut self) -> bool {
        if self.mode == ListeningMode::ActiveCommand {
            self.transition(ListeningMode::PassiveWake);
            true
        } else {
            false
        }
    }

    /// Pauses listening. Engines stay loaded and the microphone stays open.
    pub fn stop(&mut self) {
        self.pending_restart = None;
        if self.mode == ListeningMode::Idle {
            return;
        }

        self.vad.pause();
        self.speech_active = false;
        self.stop_command_listening();
        if let Some(kind) = self.active {
            self.slot_mut(kind).engine.stop();
        }
        self.engine_running = false;
        self.transition(ListeningMode::Idle);
    }

    /// Full teardown. Safe to call any number of times.
    pub fn destroy(&mut self) {
        self.stop();

        self.vad.destroy();
        self.vad_available = false;

        for slot in [&mut self.primary, &mut self.fallback] {
            if slot.initialized {
                slot.engine.shutdown();
                slot.initialized = false;
            }
        }
        self.active = None;
        self.audio.release();

        while self.engine_rx.try_recv().is_ok() {}
        while self.vad_rx.try_recv().is_ok() {}
        debug!("Pipeline torn down");
    }

    /// Waits for the next engine or VAD event, or for a scheduled restart.
    pub async fn next_event(&mut self) -> Option<PipelineEvent> {
        let restart_at = self.pending_restart;
        tokio::select! {
            Some(event) = self.engine_rx.recv() => Some(PipelineEvent::Engine(event)),
            Some(event) = self.vad_rx.recv() => Some(PipelineEvent::Vad(event)),
            _ = sleep_until(restart_at.unwrap_or_else(Instant::now)), if restart_at.is_some() => {
                Some(PipelineEvent::RestartDue)
            }
            else => None,
        }
    }

    pub async fn handle_event(&mut self, event: PipelineEvent) {
        match event {
            PipelineEvent::Engine(EngineEvent::Fragment { kind, fragment }) => {
                self.on_fragment(kind, fragment)
            }
            PipelineEvent::Engine(EngineEvent::SessionEnded { kind, reason }) => {
                self.on_session_ended(kind, reason).await
            }
            PipelineEvent::Vad(event) => self.on_vad(event),
            PipelineEvent::RestartDue => self.restart_engine().await,
        }
    }

    /// Handles every event already queued, without waiting for timers.
    pub async fn process_pending(&mut self) {
        loop {
            let event = if let Ok(event) = self.engine_rx.try_recv() {
                PipelineEvent::Engine(event)
            } else if let Ok(event) = self.vad_rx.try_recv() {
                PipelineEvent::Vad(event)
            } else {
                break;
            };
            self.handle_event(event).await;
        }
    }

    fn on_fragment(&mut self, kind: EngineKind, fragment: TranscriptFragment) {
        if self.active != Some(kind) || !self.engine_running {
            debug!("Dropping fragment from inactive {} engine", kind);
            return;
        }

        let slot = self.slot_mut(kind);
        if slot.last_sequence.is_some_and(|last| fragment.sequence <= last) {
            debug!("Dropping out-of-order fragment #{}", fragment.sequence);
            return;
        }
        slot.last_sequence = Some(fragment.sequence);
        self.restart.reset();

        match self.mode {
            ListeningMode::Idle => {
                trace!("Idle, dropping fragment '{}'", fragment.text);
            }
            ListeningMode::PassiveWake => {
                if let Some(phrase) = self.phrases.find(&fragment.text) {
                    info!("Wake phrase '{}' detected", phrase);
                    self.transition(ListeningMode::ActiveCommand);
                    if !self.activation.notify(()) {
                        debug!("No activation subscriber");
                    }
                } else {
                    trace!("No wake phrase in '{}'", fragment.text);
                }
            }
            ListeningMode::ActiveCommand => {
                if !fragment.is_final {
                    trace!("Interim command text: '{}'", fragment.text);
                    return;
                }
                info!("Command: '{}'", fragment.text);
                self.transition(ListeningMode::PassiveWake);
                if !self.command.notify(fragment.text) {
                    warn!("Command dropped: no command subscriber");
                }
            }
        }
    }

    fn on_vad(&mut self, event: VadEvent) {
        if self.mode == ListeningMode::Idle {
            return;
        }
        match event {
            VadEvent::SpeechStart => {
                debug!("VAD: speech started");
                self.speech_active = true;
            }
            VadEvent::SpeechEnd(audio) => {
                debug!("VAD: speech ended after {} ms", duration_ms(audio.len()));
                self.speech_active = false;
            }
            VadEvent::Misfire => {
                self.speech_active = false;
            }
        }
    }

    /// Schedules a restart for `reason`. Returns false when restarts are
    /// exhausted.
    fn schedule_restart(&mut self, kind: EngineKind, reason: &TransientRecognitionError) -> bool {
        match self.restart.next_delay(reason) {
            Some(delay) => {
                debug!("{} session ended ({}), restarting in {:?}", kind, reason, delay);
                self.pending_restart = Some(Instant::now() + delay);
                true
            }
            None => {
                warn!(
                    "{} engine failed {} times in a row ({})",
                    kind,
                    self.restart.failures(),
                    reason
                );
                false
            }
        }
    }

    async fn on_session_ended(&mut self, kind: EngineKind, reason: TransientRecognitionError) {
        if self.active != Some(kind) || !self.engine_running || self.mode == ListeningMode::Idle {
            debug!("Ignoring session end from {} engine", kind);
            return;
        }

        self.engine_running = false;
        self.slot_mut(kind).engine.stop();
        if !self.schedule_restart(kind, &reason) {
            self.fail_over().await;
        }
    }

    async fn restart_engine(&mut self) {
        self.pending_restart = None;
        let Some(kind) = self.active else { return };
        if self.mode == ListeningMode::Idle || self.engine_running {
            return;
        }

        match self.start_engine(kind).await {
            Ok(()) => {
                debug!("{} engine restarted", kind);
                self.engine_running = true;
            }
            Err(EngineError::Transient(reason)) => {
                if !self.schedule_restart(kind, &reason) {
                    self.fail_over().await;
                }
            }
            Err(e) => {
                warn!("{}", e);
                self.fail_over().await;
            }
        }
    }

    /// Switches from the primary to the fallback engine after a hard
    /// failure. Stops the pipeline when there is nothing left to switch to.
    async fn fail_over(&mut self) {
        if self.active == Some(EngineKind::PrimaryOnDevice) {
            self.primary.engine.stop();
            match self.init_engine(EngineKind::FallbackPlatform).await {
                Ok(()) => {
                    info!("Switching to {} engine", EngineKind::FallbackPlatform);
                    self.active = Some(EngineKind::FallbackPlatform);
                    self.restart.reset();
                    match self.start_engine(EngineKind::FallbackPlatform).await {
                        Ok(()) => {
                            self.engine_running = true;
                            return;
                        }
                        Err(e) => warn!("{}", e),
                    }
                }
                Err(e) => warn!("{}", e),
            }
        }

        error!("Speech recognition cannot recover, stopping");
        self.stop();
    }
}

impl Drop for WakeWordOrchestrator {
    fn drop(&mut self) {
        self.destroy();
    }
}

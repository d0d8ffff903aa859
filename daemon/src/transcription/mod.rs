pub mod platform;
pub mod remote;
pub mod restart;
pub mod selection;
pub mod whisper;

use async_trait::async_trait;
use regex::Regex;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use tokio::sync::{broadcast, mpsc};

use crate::audio::AudioFrame;
use crate::error::{EngineError, TransientRecognitionError};

pub use platform::PlatformEngine;
pub use remote::{HttpRecognizer, RemoteRecognizer};
pub use restart::RestartPolicy;
pub use selection::select_engine;
pub use whisper::OnDeviceEngine;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EngineKind {
    PrimaryOnDevice,
    FallbackPlatform,
}

impl fmt::Display for EngineKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            EngineKind::PrimaryOnDevice => "primary-on-device",
            EngineKind::FallbackPlatform => "fallback-platform",
        })
    }
}

/// One piece of recognized text. `sequence` increases monotonically per
/// engine across sessions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranscriptFragment {
    pub text: String,
    pub is_final: bool,
    pub sequence: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineEvent {
    Fragment {
        kind: EngineKind,
        fragment: TranscriptFragment,
    },
    /// The recognition session is over and needs a restart to continue.
    SessionEnded {
        kind: EngineKind,
        reason: TransientRecognitionError,
    },
}

/// Where an engine delivers its events. Cloneable so engines can hand it to
/// background tasks.
#[derive(Debug, Clone)]
pub struct FragmentSink {
    kind: EngineKind,
    events: mpsc::UnboundedSender<EngineEvent>,
    sequence: Arc<AtomicU64>,
}

impl FragmentSink {
    pub fn new(kind: EngineKind, events: mpsc::UnboundedSender<EngineEvent>) -> Self {
        Self {
            kind,
            events,
            sequence: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn kind(&self) -> EngineKind {
        self.kind
    }

    pub fn interim(&self, text: &str) -> bool {
        self.fragment(text, false)
    }

    pub fn final_result(&self, text: &str) -> bool {
        self.fragment(text, true)
    }

    /// Normalizes `text` and emits it unless nothing is left. Returns false
    /// once the receiving side is gone.
    fn fragment(&self, text: &str, is_final: bool) -> bool {
        let text = post_process_transcription(text);
        if text.is_empty() {
            return !self.events.is_closed();
        }

        let fragment = TranscriptFragment {
            text,
            is_final,
            sequence: self.sequence.fetch_add(1, Ordering::SeqCst),
        };
        self.events
            .send(EngineEvent::Fragment {
                kind: self.kind,
                fragment,
            })
            .is_ok()
    }

    pub fn session_ended(&self, reason: TransientRecognitionError) -> bool {
        self.events
            .send(EngineEvent::SessionEnded {
                kind: self.kind,
                reason,
            })
            .is_ok()
    }
}

/// Shared capability set of both recognizer variants.
///
/// `start` may be called again after `stop`; events keep flowing into the
/// sink handed to `initialize`. `stop` and `shutdown` return immediately and
/// never fail.
#[async_trait]
pub trait SpeechEngine: Send {
    fn kind(&self) -> EngineKind;

    async fn initialize(&mut self, sink: FragmentSink) -> Result<(), EngineError>;

    async fn start(&mut self, audio: broadcast::Receiver<AudioFrame>) -> Result<(), EngineError>;

    fn stop(&mut self);

    /// Releases the model or client. The engine must be initialized again
    /// before the next `start`.
    fn shutdown(&mut self);
}

fn annotation_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"\[.*?\]|\{.*?\}|\(.*?\)|\*.*?\*").expect("annotation pattern is valid")
    })
}

/// Strips recognizer annotations such as `[BLANK_AUDIO]`, then collapses
/// whitespace and repeated words.
pub fn post_process_transcription(text: &str) -> String {
    let stripped = annotation_pattern().replace_all(text.trim(), " ");

    let mut deduped_words: Vec<&str> = Vec::new();
    for word in stripped.split_whitespace() {
        if deduped_words.last() != Some(&word) {
            deduped_words.push(word);
        }
    }
    let cleaned = deduped_words.join(" ");

    tracing::trace!("Post-processed: '{}' -> '{}'", text.trim(), cleaned);
    cleaned
}

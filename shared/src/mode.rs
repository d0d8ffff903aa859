use serde::{Deserialize, Serialize};
use std::fmt;

/// Listening mode of the voice-activation pipeline.
///
/// Legal transitions:
///
/// ```text
/// Idle -> PassiveWake -> ActiveCommand
///           ^    |            |
///           |    v            |
///         Idle   +------------+
/// ```
///
/// `ActiveCommand` can only be left towards `PassiveWake`, so stopping from
/// the command window always passes through `PassiveWake` first.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ListeningMode {
    #[default]
    Idle,
    PassiveWake,
    ActiveCommand,
}

impl ListeningMode {
    pub fn can_transition_to(self, next: ListeningMode) -> bool {
        use ListeningMode::*;
        matches!(
            (self, next),
            (Idle, PassiveWake)
                | (PassiveWake, ActiveCommand)
                | (ActiveCommand, PassiveWake)
                | (PassiveWake, Idle)
        )
    }

    /// Whether the microphone is being listened to at all.
    pub fn is_listening(self) -> bool {
        !matches!(self, ListeningMode::Idle)
    }

    pub fn description(self) -> &'static str {
        match self {
            ListeningMode::Idle => "Not listening",
            ListeningMode::PassiveWake => "Listening for the wake phrase",
            ListeningMode::ActiveCommand => "Listening for a command",
        }
    }
}

impl fmt::Display for ListeningMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ListeningMode::Idle => "idle",
            ListeningMode::PassiveWake => "passive-wake",
            ListeningMode::ActiveCommand => "active-command",
        };
        f.write_str(name)
    }
}

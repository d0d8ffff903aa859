use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::mode::ListeningMode;

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub enum Command {
    /// Initialize the pipeline if needed and start wake-phrase listening.
    Start,
    /// Pause listening; engines stay loaded for a fast restart.
    Stop,
    Toggle,
    /// Tear the pipeline down and release the microphone.
    Release,
    /// Open a command window without saying the wake phrase.
    Listen,
    /// Close the command window.
    Cancel,
    /// Submit a command as text, bypassing recognition.
    Say(String),
    Status,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub enum Response {
    Ok,
    Error(String),
    Status(StatusInfo),
    Reply(String),
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct StatusInfo {
    pub is_running: bool,
    pub mode: ListeningMode,
    pub listening: bool,
    pub engine: Option<String>,
    pub vad_available: bool,
    pub speech_detected: bool,
    pub last_command: Option<String>,
    pub last_reply: Option<String>,
}

#[derive(Error, Debug)]
pub enum IpcError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Connection refused: is atlasd running?")]
    ConnectionRefused,

    #[error("Connection timeout")]
    Timeout,
}

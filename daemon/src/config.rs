use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Default)]
#[serde(default)]
pub struct Config {
    pub audio: AudioConfig,
    pub vad: VadConfig,
    pub wake: WakeConfig,
    pub whisper: WhisperConfig,
    pub platform: PlatformConfig,
    pub restart: RestartConfig,
    pub assistant: AssistantConfig,
    pub rate_limit: RateLimitConfig,
    pub timeouts: TimeoutsConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct AudioConfig {
    #[serde(default = "default_device")]
    pub device: String,
    #[serde(default = "default_gain")]
    pub gain: f32,
    #[serde(default = "default_broadcast_capacity")]
    pub broadcast_capacity: usize,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            device: default_device(),
            gain: default_gain(),
            broadcast_capacity: default_broadcast_capacity(),
        }
    }
}

fn default_device() -> String {
    "default".to_string()
}
fn default_gain() -> f32 {
    1.0
}
fn default_true() -> bool {
    true
}
fn default_broadcast_capacity() -> usize {
    100
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct VadConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_threshold_start")]
    pub threshold_start: f32,
    #[serde(default = "default_threshold_stop")]
    pub threshold_stop: f32,
    #[serde(default = "default_min_speech_duration")]
    pub min_speech_duration_ms: u32,
    #[serde(default = "default_min_silence_duration")]
    pub min_silence_duration_ms: u32,
    /// Utterances are cut here even if the sound never drops. 0 disables.
    #[serde(default = "default_max_utterance")]
    pub max_utterance_ms: u32,
}

impl Default for VadConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            threshold_start: default_threshold_start(),
            threshold_stop: default_threshold_stop(),
            min_speech_duration_ms: default_min_speech_duration(),
            min_silence_duration_ms: default_min_silence_duration(),
            max_utterance_ms: default_max_utterance(),
        }
    }
}

fn default_threshold_start() -> f32 {
    0.02
}
fn default_threshold_stop() -> f32 {
    0.01
}
fn default_min_speech_duration() -> u32 {
    250
}
fn default_min_silence_duration() -> u32 {
    1000
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct WakeConfig {
    #[serde(default = "default_wake_phrases")]
    pub phrases: Vec<String>,
    #[serde(default = "default_command_timeout")]
    pub command_timeout_ms: u64,
    /// Start listening as soon as the daemon is up.
    #[serde(default = "default_true")]
    pub auto_start: bool,
}

impl Default for WakeConfig {
    fn default() -> Self {
        Self {
            phrases: default_wake_phrases(),
            command_timeout_ms: default_command_timeout(),
            auto_start: true,
        }
    }
}

fn default_wake_phrases() -> Vec<String> {
    vec!["hey atlas".to_string(), "atlas".to_string()]
}
fn default_command_timeout() -> u64 {
    5000
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct WhisperConfig {
    #[serde(default)]
    pub model_path: Option<String>,
    #[serde(default = "default_model_name")]
    pub model_name: String,
    #[serde(default)]
    pub model_checksum: Option<String>,
    #[serde(default = "default_language")]
    pub language: String,
    #[serde(default = "default_n_threads")]
    pub n_threads: u32,
    #[serde(default = "default_sampling_strategy")]
    pub sampling_strategy: String,
    #[serde(default = "default_min_audio_samples")]
    pub min_audio_samples: usize,
    #[serde(default = "default_endpoint_silence")]
    pub endpoint_silence_ms: u32,
    #[serde(default = "default_max_utterance")]
    pub max_utterance_ms: u32,
}

impl Default for WhisperConfig {
    fn default() -> Self {
        Self {
            model_path: None,
            model_name: default_model_name(),
            model_checksum: None,
            language: default_language(),
            n_threads: default_n_threads(),
            sampling_strategy: default_sampling_strategy(),
            min_audio_samples: default_min_audio_samples(),
            endpoint_silence_ms: default_endpoint_silence(),
            max_utterance_ms: default_max_utterance(),
        }
    }
}

fn default_model_name() -> String {
    "ggml-base.en.bin".to_string()
}
fn default_language() -> String {
    "en".to_string()
}
fn default_n_threads() -> u32 {
    4
}
fn default_sampling_strategy() -> String {
    "greedy".to_string()
}
fn default_min_audio_samples() -> usize {
    16000
}
fn default_endpoint_silence() -> u32 {
    700
}
fn default_max_utterance() -> u32 {
    15000
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct PlatformConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_platform_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_platform_model")]
    pub model: String,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_platform_api_key_env")]
    pub api_key_env: String,
    #[serde(default = "default_language")]
    pub language: String,
    #[serde(default = "default_true")]
    pub interim_results: bool,
    #[serde(default = "default_interim_interval")]
    pub interim_interval_ms: u64,
    #[serde(default = "default_no_speech_timeout")]
    pub no_speech_timeout_ms: u64,
}

impl Default for PlatformConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            endpoint: default_platform_endpoint(),
            model: default_platform_model(),
            api_key: None,
            api_key_env: default_platform_api_key_env(),
            language: default_language(),
            interim_results: true,
            interim_interval_ms: default_interim_interval(),
            no_speech_timeout_ms: default_no_speech_timeout(),
        }
    }
}

fn default_platform_endpoint() -> String {
    "https://api.openai.com/v1/audio/transcriptions".to_string()
}
fn default_platform_model() -> String {
    "whisper-1".to_string()
}
fn default_platform_api_key_env() -> String {
    "OPENAI_API_KEY".to_string()
}
fn default_interim_interval() -> u64 {
    2000
}
fn default_no_speech_timeout() -> u64 {
    8000
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct RestartConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_end_backoff")]
    pub end_backoff_ms: u64,
    #[serde(default = "default_no_speech_backoff")]
    pub no_speech_backoff_ms: u64,
    #[serde(default = "default_error_backoff")]
    pub error_backoff_ms: u64,
}

impl Default for RestartConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            end_backoff_ms: default_end_backoff(),
            no_speech_backoff_ms: default_no_speech_backoff(),
            error_backoff_ms: default_error_backoff(),
        }
    }
}

fn default_max_attempts() -> u32 {
    5
}
fn default_end_backoff() -> u64 {
    500
}
fn default_no_speech_backoff() -> u64 {
    1000
}
fn default_error_backoff() -> u64 {
    1000
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct AssistantConfig {
    #[serde(default = "default_assistant_endpoint")]
    pub endpoint: String,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_assistant_api_key_env")]
    pub api_key_env: String,
    #[serde(default = "default_max_output_tokens")]
    pub max_output_tokens: u32,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_max_sentences")]
    pub max_sentences: usize,
}

impl Default for AssistantConfig {
    fn default() -> Self {
        Self {
            endpoint: default_assistant_endpoint(),
            api_key: None,
            api_key_env: default_assistant_api_key_env(),
            max_output_tokens: default_max_output_tokens(),
            temperature: default_temperature(),
            max_sentences: default_max_sentences(),
        }
    }
}

fn default_assistant_endpoint() -> String {
    "https://generativelanguage.googleapis.com/v1beta/models/gemini-2.0-flash:generateContent"
        .to_string()
}
fn default_assistant_api_key_env() -> String {
    "GEMINI_API_KEY".to_string()
}
fn default_max_output_tokens() -> u32 {
    100
}
fn default_temperature() -> f32 {
    0.7
}
fn default_max_sentences() -> usize {
    3
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct RateLimitConfig {
    #[serde(default = "default_commands_per_second")]
    pub commands_per_second: u32,
    #[serde(default = "default_burst_capacity")]
    pub burst_capacity: u32,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            commands_per_second: default_commands_per_second(),
            burst_capacity: default_burst_capacity(),
            enabled: true,
        }
    }
}

fn default_commands_per_second() -> u32 {
    10
}
fn default_burst_capacity() -> u32 {
    20
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct TimeoutsConfig {
    #[serde(default = "default_transcription_timeout")]
    pub transcription_timeout_seconds: u64,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_seconds: u64,
    #[serde(default = "default_socket_operation_timeout")]
    pub socket_operation_timeout_seconds: u64,
}

impl Default for TimeoutsConfig {
    fn default() -> Self {
        Self {
            transcription_timeout_seconds: default_transcription_timeout(),
            request_timeout_seconds: default_request_timeout(),
            socket_operation_timeout_seconds: default_socket_operation_timeout(),
        }
    }
}

fn default_transcription_timeout() -> u64 {
    30
}
fn default_request_timeout() -> u64 {
    15
}
fn default_socket_operation_timeout() -> u64 {
    10
}

/// Reads a secret either from the config value or from the named
/// environment variable. Empty values count as missing.
pub fn resolve_secret(value: Option<&str>, env_var: &str) -> Option<String> {
    value
        .map(str::to_string)
        .or_else(|| std::env::var(env_var).ok())
        .filter(|v| !v.trim().is_empty())
}

pub fn load_config() -> Result<Config> {
    let config_path = get_config_path()?;

    if !config_path.exists() {
        tracing::info!("Config file not found at {:?}, using defaults", config_path);
        return Ok(Config::default());
    }

    tracing::info!("Loading config from {:?}", config_path);
    let config_str = std::fs::read_to_string(&config_path)
        .map_err(|e| anyhow::anyhow!("Failed to read config file: {}", e))?;

    let config: Config = toml::from_str(&config_str)
        .map_err(|e| anyhow::anyhow!("Failed to parse config file: {}", e))?;

    tracing::info!("Config loaded successfully");
    Ok(config)
}

fn get_config_path() -> Result<PathBuf> {
    let dir = dirs::config_dir()
        .ok_or_else(|| anyhow::anyhow!("Failed to get config directory"))?;
    Ok(dir.join("atlas").join("config.toml"))
}

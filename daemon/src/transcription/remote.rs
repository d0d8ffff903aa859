use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use reqwest::{Client, Url};
use serde::Deserialize;
use std::net::IpAddr;
use std::time::Duration;

use super::EngineKind;
use crate::config::{resolve_secret, PlatformConfig};
use crate::error::{EngineError, TransientRecognitionError};

/// A transcription service that turns a WAV clip into text.
#[async_trait]
pub trait RemoteRecognizer: Send + Sync {
    async fn transcribe(&self, wav: Vec<u8>) -> Result<String, TransientRecognitionError>;
}

#[derive(Deserialize)]
struct TranscriptionResponse {
    text: String,
}

/// Client for OpenAI-compatible `/v1/audio/transcriptions` endpoints.
pub struct HttpRecognizer {
    client: Client,
    endpoint: Url,
    api_key: Option<String>,
    model: String,
    language: Option<String>,
}

fn is_loopback(url: &Url) -> bool {
    match url.host_str() {
        Some("localhost") => true,
        Some(host) => host
            .trim_start_matches('[')
            .trim_end_matches(']')
            .parse::<IpAddr>()
            .map(|ip| ip.is_loopback())
            .unwrap_or(false),
        None => false,
    }
}

impl HttpRecognizer {
    /// Builds a client from configuration. Fails when the endpoint is
    /// unusable or a remote endpoint has no API key.
    pub fn from_config(config: &PlatformConfig, timeout: Duration) -> Result<Self, EngineError> {
        let kind = EngineKind::FallbackPlatform;

        let endpoint = Url::parse(&config.endpoint).map_err(|e| {
            EngineError::unavailable(kind, format!("invalid endpoint '{}': {}", config.endpoint, e))
        })?;
        if !matches!(endpoint.scheme(), "http" | "https") {
            return Err(EngineError::unavailable(
                kind,
                format!("unsupported endpoint scheme '{}'", endpoint.scheme()),
            ));
        }

        let api_key = resolve_secret(config.api_key.as_deref(), &config.api_key_env);
        if api_key.is_none() && !is_loopback(&endpoint) {
            return Err(EngineError::unavailable(
                kind,
                format!("no API key (set {} or platform.api_key)", config.api_key_env),
            ));
        }

        let client = Client::builder()
            .timeout(timeout)
            .connect_timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| EngineError::unavailable(kind, format!("HTTP client: {}", e)))?;

        Ok(Self {
            client,
            endpoint,
            api_key,
            model: config.model.clone(),
            language: Some(config.language.clone()).filter(|l| !l.is_empty()),
        })
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }
}

#[async_trait]
impl RemoteRecognizer for HttpRecognizer {
    async fn transcribe(&self, wav: Vec<u8>) -> Result<String, TransientRecognitionError> {
        tracing::debug!(audio_bytes = wav.len(), "sending audio for transcription");

        let part = Part::bytes(wav)
            .file_name("audio.wav")
            .mime_str("audio/wav")
            .map_err(|e| TransientRecognitionError::Network(e.to_string()))?;

        let mut form = Form::new()
            .text("model", self.model.clone())
            .part("file", part);
        if let Some(ref lang) = self.language {
            form = form.text("language", lang.clone());
        }

        let mut request = self.client.post(self.endpoint.clone()).multipart(form);
        if let Some(ref key) = self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await.map_err(|e| {
            tracing::warn!(error = %e, "transcription request failed");
            TransientRecognitionError::Network(e.to_string())
        })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::warn!(status = %status, body = %body, "transcription service error");
            return Err(TransientRecognitionError::Network(format!(
                "transcription service error {}: {}",
                status, body
            )));
        }

        let result: TranscriptionResponse = response
            .json()
            .await
            .map_err(|e| TransientRecognitionError::Network(format!("bad response: {}", e)))?;

        Ok(result.text)
    }
}

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;

use crate::config::{resolve_secret, AssistantConfig};

pub const FAILURE_REPLY: &str = "I'm experiencing technical difficulties. Please try again.";
pub const EMPTY_REPLY: &str = "I'm sorry, I couldn't process that request.";

/// Answers free-form questions. Never fails; errors become a generic reply.
#[async_trait]
pub trait QuestionAnswerer: Send + Sync {
    async fn ask(&self, question: &str) -> String;
}

#[derive(Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Deserialize)]
struct Candidate {
    content: Option<Content>,
}

#[derive(Deserialize)]
struct Content {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Deserialize)]
struct Part {
    text: Option<String>,
}

/// Keeps at most `max` sentences of `text`.
pub fn limit_sentences(text: &str, max: usize) -> String {
    let text = text.trim();
    if max == 0 {
        return String::new();
    }

    let mut count = 0;
    let mut chars = text.char_indices().peekable();
    while let Some((i, c)) = chars.next() {
        if matches!(c, '.' | '!' | '?') {
            let at_boundary = chars.peek().map(|(_, next)| next.is_whitespace()).unwrap_or(true);
            if at_boundary {
                count += 1;
                if count == max {
                    return text[..i + c.len_utf8()].to_string();
                }
            }
        }
    }
    text.to_string()
}

pub struct GeminiClient {
    client: Client,
    endpoint: String,
    api_key: Option<String>,
    max_output_tokens: u32,
    temperature: f32,
    max_sentences: usize,
}

impl GeminiClient {
    pub fn new(config: &AssistantConfig, timeout: Duration) -> anyhow::Result<Self> {
        let api_key = resolve_secret(config.api_key.as_deref(), &config.api_key_env);
        if api_key.is_none() {
            tracing::warn!(
                "No assistant API key (set {}); questions will not be answered",
                config.api_key_env
            );
        }

        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| anyhow::anyhow!("Failed to create HTTP client: {}", e))?;

        Ok(Self {
            client,
            endpoint: config.endpoint.clone(),
            api_key,
            max_output_tokens: config.max_output_tokens,
            temperature: config.temperature,
            max_sentences: config.max_sentences,
        })
    }

    fn prompt(question: &str) -> String {
        format!(
            "You are Atlas, a helpful voice assistant for a smart TV. Keep your responses \
             to 2-3 sentences maximum. Be concise and helpful. User question: {}",
            question
        )
    }

    async fn generate(&self, question: &str) -> anyhow::Result<String> {
        let api_key = self
            .api_key
            .as_deref()
            .ok_or_else(|| anyhow::anyhow!("no API key configured"))?;

        let body = json!({
            "contents": [{ "parts": [{ "text": Self::prompt(question) }] }],
            "generationConfig": {
                "maxOutputTokens": self.max_output_tokens,
                "temperature": self.temperature,
            }
        });

        let response = self
            .client
            .post(&self.endpoint)
            .header("x-goog-api-key", api_key)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(anyhow::anyhow!("Gemini API error: {}", status));
        }

        let parsed: GenerateResponse = response.json().await?;
        Ok(extract_text(parsed).unwrap_or_default())
    }
}

fn extract_text(response: GenerateResponse) -> Option<String> {
    response
        .candidates
        .into_iter()
        .next()?
        .content?
        .parts
        .into_iter()
        .find_map(|p| p.text)
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
}

#[async_trait]
impl QuestionAnswerer for GeminiClient {
    async fn ask(&self, question: &str) -> String {
        match self.generate(question).await {
            Ok(text) if text.is_empty() => EMPTY_REPLY.to_string(),
            Ok(text) => limit_sentences(&text, self.max_sentences),
            Err(e) => {
                tracing::error!("Assistant request failed: {}", e);
                FAILURE_REPLY.to_string()
            }
        }
    }
}

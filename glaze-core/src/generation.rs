//! Chat-completion client for the hosted Gemini `generateContent` API.
//!
//! `generate` returns the whole answer and retries transient failures.
//! `generate_stream` uses `streamGenerateContent?alt=sse` and yields text
//! chunks as they arrive; it is not retried.

use async_trait::async_trait;
use futures::stream::{self, BoxStream};
use futures::StreamExt;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use tokio_retry::strategy::{jitter, ExponentialBackoff};
use tokio_retry::Retry;

use crate::config::GenerationSettings;
use crate::embeddings::{parse_api_error, API_KEY_HEADER, GEMINI_BASE_URL};

pub type TextStream = BoxStream<'static, Result<String, GenerationError>>;

#[async_trait]
pub trait GenerationBackend: Send + Sync {
    /// Generate a complete answer for `prompt` under `system_instruction`.
    async fn generate(&self, system_instruction: &str, prompt: &str)
        -> Result<String, GenerationError>;

    /// Generate an answer as a stream of text chunks.
    async fn generate_stream(
        &self,
        system_instruction: &str,
        prompt: &str,
    ) -> Result<TextStream, GenerationError>;

    fn name(&self) -> &str;
}

#[derive(Error, Debug)]
pub enum GenerationError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error ({code}): {message}")]
    Api { code: u16, message: String },

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Model returned no text (finish reason: {finish_reason})")]
    EmptyResponse { finish_reason: String },

    #[error("Missing API key")]
    MissingApiKey,

    #[error("All {attempts} retry attempts failed")]
    RetryExhausted { attempts: usize },
}

#[derive(Debug, Clone)]
pub struct GenerationConfig {
    pub api_key: String,
    pub model: String,
    pub temperature: f32,
    pub max_output_tokens: u32,
    pub max_retries: usize,
    pub retry_delay_ms: u64,
}

impl GenerationConfig {
    pub fn from_settings(settings: &GenerationSettings, api_key: Option<String>) -> Self {
        let api_key = api_key
            .or_else(|| std::env::var("GOOGLE_API_KEY").ok())
            .unwrap_or_default();

        Self {
            api_key,
            model: settings.model.clone(),
            temperature: settings.temperature,
            max_output_tokens: settings.max_output_tokens,
            max_retries: settings.max_retries,
            retry_delay_ms: settings.retry_delay_ms,
        }
    }
}

// ============================================================================
// Gemini API structs (private)
// ============================================================================

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateRequest {
    system_instruction: Content,
    contents: Vec<Content>,
    generation_config: GenerationParams,
}

#[derive(Debug, Serialize, Deserialize, Default)]
struct Content {
    #[serde(skip_serializing_if = "Option::is_none")]
    role: Option<String>,
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Serialize, Deserialize)]
struct Part {
    #[serde(default)]
    text: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationParams {
    temperature: f32,
    max_output_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    #[serde(default)]
    content: Content,
    finish_reason: Option<String>,
}

impl GenerateResponse {
    fn text(&self) -> String {
        self.candidates
            .first()
            .map(|c| c.content.parts.iter().map(|p| p.text.as_str()).collect())
            .unwrap_or_default()
    }

    fn finish_reason(&self) -> String {
        self.candidates
            .first()
            .and_then(|c| c.finish_reason.clone())
            .unwrap_or_else(|| "UNKNOWN".to_string())
    }
}

// ============================================================================
// SSE decoding
// ============================================================================

/// Incremental decoder for `text/event-stream` bodies. Bytes may be split
/// anywhere, including inside a UTF-8 sequence; only complete lines are decoded.
#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: Vec<u8>,
}

impl SseDecoder {
    /// Feed raw bytes; returns the `data:` payloads of every completed line.
    pub fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        self.buffer.extend_from_slice(bytes);
        let mut payloads = Vec::new();

        while let Some(pos) = self.buffer.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&line);
            let line = line.trim_end_matches(['\n', '\r']);
            if let Some(data) = line.strip_prefix("data:") {
                let data = data.trim_start();
                if !data.is_empty() {
                    payloads.push(data.to_string());
                }
            }
        }

        payloads
    }
}

/// Decode one SSE payload into its text, `None` when it carries no text.
fn parse_stream_payload(data: &str) -> Option<Result<String, GenerationError>> {
    if let Ok(err) = serde_json::from_str::<crate::embeddings::GeminiErrorResponse>(data) {
        if let Some(detail) = err.error {
            return Some(Err(GenerationError::Api {
                code: detail.code,
                message: detail.message,
            }));
        }
    }

    match serde_json::from_str::<GenerateResponse>(data) {
        Ok(resp) => {
            let text = resp.text();
            if text.is_empty() {
                None
            } else {
                Some(Ok(text))
            }
        }
        Err(e) => Some(Err(GenerationError::InvalidResponse(e.to_string()))),
    }
}

// ============================================================================
// GeminiGenerationClient
// ============================================================================

#[derive(Debug, Clone)]
pub struct GeminiGenerationClient {
    client: Client,
    config: GenerationConfig,
    base_url: String,
}

impl GeminiGenerationClient {
    pub fn new(config: GenerationConfig) -> Result<Self, GenerationError> {
        Self::with_base_url(config, GEMINI_BASE_URL.to_string())
    }

    pub fn with_base_url(
        config: GenerationConfig,
        base_url: String,
    ) -> Result<Self, GenerationError> {
        if config.api_key.is_empty() {
            return Err(GenerationError::MissingApiKey);
        }

        let client = Client::builder()
            .timeout(Duration::from_secs(120))
            .build()?;

        Ok(Self {
            client,
            config,
            base_url,
        })
    }

    fn request_body(&self, system_instruction: &str, prompt: &str) -> GenerateRequest {
        GenerateRequest {
            system_instruction: Content {
                role: None,
                parts: vec![Part {
                    text: system_instruction.to_string(),
                }],
            },
            contents: vec![Content {
                role: Some("user".to_string()),
                parts: vec![Part {
                    text: prompt.to_string(),
                }],
            }],
            generation_config: GenerationParams {
                temperature: self.config.temperature,
                max_output_tokens: self.config.max_output_tokens,
            },
        }
    }

    async fn send(
        &self,
        url: &str,
        body: &GenerateRequest,
    ) -> Result<reqwest::Response, GenerationError> {
        let response = self
            .client
            .post(url)
            .header(API_KEY_HEADER, &self.config.api_key)
            .json(body)
            .send()
            .await?;
        let status = response.status();

        if !status.is_success() {
            let error_body = response.text().await.unwrap_or_default();
            let (code, message) = parse_api_error(status, error_body);
            tracing::error!(code = code, message = %message, "Gemini generation API error");
            return Err(GenerationError::Api { code, message });
        }

        Ok(response)
    }

    async fn generate_once(&self, body: &GenerateRequest) -> Result<String, GenerationError> {
        let url = format!(
            "{}/models/{}:generateContent",
            self.base_url, self.config.model
        );

        let response: GenerateResponse = self.send(&url, body).await?.json().await?;
        let text = response.text();

        if text.trim().is_empty() {
            return Err(GenerationError::EmptyResponse {
                finish_reason: response.finish_reason(),
            });
        }

        Ok(text)
    }
}

#[async_trait]
impl GenerationBackend for GeminiGenerationClient {
    async fn generate(
        &self,
        system_instruction: &str,
        prompt: &str,
    ) -> Result<String, GenerationError> {
        let body = self.request_body(system_instruction, prompt);

        let retry_strategy = ExponentialBackoff::from_millis(self.config.retry_delay_ms)
            .max_delay(Duration::from_secs(10))
            .map(jitter)
            .take(self.config.max_retries);

        match Retry::spawn(retry_strategy, || self.generate_once(&body)).await {
            Ok(text) => Ok(text),
            Err(e) => {
                tracing::error!(
                    attempts = self.config.max_retries,
                    error = %e,
                    "All generation retry attempts failed"
                );
                Err(GenerationError::RetryExhausted {
                    attempts: self.config.max_retries,
                })
            }
        }
    }

    async fn generate_stream(
        &self,
        system_instruction: &str,
        prompt: &str,
    ) -> Result<TextStream, GenerationError> {
        let url = format!(
            "{}/models/{}:streamGenerateContent?alt=sse",
            self.base_url, self.config.model
        );
        let body = self.request_body(system_instruction, prompt);
        let response = self.send(&url, &body).await?;

        let mut decoder = SseDecoder::default();
        let chunks = response
            .bytes_stream()
            .map(move |chunk| match chunk {
                Ok(bytes) => decoder
                    .push(&bytes)
                    .iter()
                    .filter_map(|data| parse_stream_payload(data))
                    .collect::<Vec<_>>(),
                Err(e) => vec![Err(GenerationError::Http(e))],
            })
            .flat_map(stream::iter);

        Ok(chunks.boxed())
    }

    fn name(&self) -> &str {
        "gemini"
    }
}

// ============================================================================
// TESTS
// ============================================================================

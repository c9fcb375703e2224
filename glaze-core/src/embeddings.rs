//! Embedding client for the hosted Gemini Embeddings API.
//!
//! Product snippets are embedded with `RETRIEVAL_DOCUMENT`, customer questions
//! with `RETRIEVAL_QUERY`. Both go through [`EmbeddingBackend`] so the server
//! can run against a fake in tests.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use tokio_retry::strategy::{jitter, ExponentialBackoff};
use tokio_retry::Retry;

use crate::config::EmbeddingSettings;

/// Default Gemini embedding dimensions, matching `VECTOR(768)` in the schema.
pub const GEMINI_DIMENSIONS: usize = 768;

pub const GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

/// The key travels in a header so it never appears in a logged request URL.
pub(crate) const API_KEY_HEADER: &str = "x-goog-api-key";

// ============================================================================
// EmbeddingBackend trait
// ============================================================================

#[async_trait]
pub trait EmbeddingBackend: Send + Sync {
    /// Embed a knowledge-base snippet.
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError>;

    /// Embed a search query. Defaults to `embed()`.
    async fn embed_query(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        self.embed(text).await
    }

    fn dimensions(&self) -> usize;

    /// Backend name for logging.
    fn name(&self) -> &str;
}

// ============================================================================
// Error types
// ============================================================================

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskType {
    #[default]
    RetrievalDocument,
    RetrievalQuery,
}

#[derive(Error, Debug)]
pub enum EmbeddingError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error ({code}): {message}")]
    Api { code: u16, message: String },

    #[error("Invalid response: expected {expected} dimensions, got {actual}")]
    InvalidDimensions { expected: usize, actual: usize },

    #[error("Missing API key")]
    MissingApiKey,

    #[error("All {attempts} retry attempts failed")]
    RetryExhausted { attempts: usize },
}

// ============================================================================
// Config
// ============================================================================

#[derive(Debug, Clone)]
pub struct EmbeddingConfig {
    pub api_key: String,
    pub model: String,
    pub dimensions: usize,
    pub max_retries: usize,
    pub retry_delay_ms: u64,
}

impl EmbeddingConfig {
    /// Build from the `[embedding]` config section. The API key falls back to
    /// `GOOGLE_API_KEY` when not given explicitly.
    pub fn from_settings(settings: &EmbeddingSettings, api_key: Option<String>) -> Self {
        let api_key = api_key
            .or_else(|| std::env::var("GOOGLE_API_KEY").ok())
            .unwrap_or_default();

        Self {
            api_key,
            model: settings.model.clone(),
            dimensions: settings.dimensions as usize,
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
struct GeminiRequest {
    model: String,
    content: GeminiContent,
    #[serde(skip_serializing_if = "Option::is_none")]
    task_type: Option<TaskType>,
    #[serde(skip_serializing_if = "Option::is_none")]
    output_dimensionality: Option<usize>,
}

#[derive(Debug, Serialize)]
struct GeminiContent {
    parts: Vec<GeminiPart>,
}

#[derive(Debug, Serialize)]
struct GeminiPart {
    text: String,
}

#[derive(Debug, Deserialize)]
struct GeminiResponse {
    embedding: GeminiEmbedding,
}

#[derive(Debug, Deserialize)]
struct GeminiEmbedding {
    values: Vec<f32>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct GeminiErrorResponse {
    pub(crate) error: Option<GeminiErrorDetail>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct GeminiErrorDetail {
    pub(crate) code: u16,
    pub(crate) message: String,
}

/// Pull `(code, message)` out of a Gemini error body, falling back to the
/// HTTP status and raw body.
pub(crate) fn parse_api_error(status: reqwest::StatusCode, body: String) -> (u16, String) {
    serde_json::from_str::<GeminiErrorResponse>(&body)
        .ok()
        .and_then(|e| e.error)
        .map(|e| (e.code, e.message))
        .unwrap_or((status.as_u16(), body))
}

// ============================================================================
// GeminiEmbeddingClient
// ============================================================================

#[derive(Debug, Clone)]
pub struct GeminiEmbeddingClient {
    client: Client,
    config: EmbeddingConfig,
    base_url: String,
}

impl GeminiEmbeddingClient {
    pub fn new(config: EmbeddingConfig) -> Result<Self, EmbeddingError> {
        Self::with_base_url(config, GEMINI_BASE_URL.to_string())
    }

    /// Create a client with a custom base URL (for testing / integration)
    pub fn with_base_url(
        config: EmbeddingConfig,
        base_url: String,
    ) -> Result<Self, EmbeddingError> {
        if config.api_key.is_empty() {
            return Err(EmbeddingError::MissingApiKey);
        }

        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;

        Ok(Self {
            client,
            config,
            base_url,
        })
    }

    pub async fn embed_with_task(
        &self,
        text: &str,
        task_type: TaskType,
    ) -> Result<Vec<f32>, EmbeddingError> {
        let retry_strategy = ExponentialBackoff::from_millis(self.config.retry_delay_ms)
            .max_delay(Duration::from_secs(10))
            .map(jitter)
            .take(self.config.max_retries);

        let result = Retry::spawn(retry_strategy, || self.embed_once(text, task_type)).await;

        match result {
            Ok(vec) => Ok(vec),
            Err(e) => {
                tracing::error!(
                    attempts = self.config.max_retries,
                    error = %e,
                    "All embedding retry attempts failed"
                );
                Err(EmbeddingError::RetryExhausted {
                    attempts: self.config.max_retries,
                })
            }
        }
    }

    async fn embed_once(
        &self,
        text: &str,
        task_type: TaskType,
    ) -> Result<Vec<f32>, EmbeddingError> {
        let url = format!(
            "{}/models/{}:embedContent",
            self.base_url, self.config.model
        );

        let request = GeminiRequest {
            model: format!("models/{}", self.config.model),
            content: GeminiContent {
                parts: vec![GeminiPart {
                    text: text.to_string(),
                }],
            },
            task_type: Some(task_type),
            output_dimensionality: Some(self.config.dimensions),
        };

        let response = self
            .client
            .post(&url)
            .header(API_KEY_HEADER, &self.config.api_key)
            .json(&request)
            .send()
            .await?;

        let status = response.status();

        if !status.is_success() {
            let error_body = response.text().await.unwrap_or_default();
            let (code, message) = parse_api_error(status, error_body);

            tracing::error!(code = code, message = %message, "Gemini embedding API error");

            return Err(EmbeddingError::Api { code, message });
        }

        let gemini_response: GeminiResponse = response.json().await?;

        let values = gemini_response.embedding.values;

        if values.len() != self.config.dimensions {
            return Err(EmbeddingError::InvalidDimensions {
                expected: self.config.dimensions,
                actual: values.len(),
            });
        }

        Ok(values)
    }
}

#[async_trait]
impl EmbeddingBackend for GeminiEmbeddingClient {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        self.embed_with_task(text, TaskType::RetrievalDocument).await
    }

    async fn embed_query(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        self.embed_with_task(text, TaskType::RetrievalQuery).await
    }

    fn dimensions(&self) -> usize {
        self.config.dimensions
    }

    fn name(&self) -> &str {
        "gemini"
    }
}

// ============================================================================
// TESTS
// ============================================================================

//! Embedding client: turns text into a fixed-length vector via a hosted API.
//!
//! Provides an `EmbeddingBackend` trait and `OpenAiEmbeddingClient`, which
//! calls the OpenAI-compatible `/embeddings` endpoint with bounded retries.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio_retry::RetryIf;

use crate::config::DocchatConfig;
use crate::openai::{self, OpenAiSettings};

/// Output size of `text-embedding-ada-002`.
pub const ADA_002_DIMENSIONS: usize = 1536;

// ============================================================================
// EmbeddingBackend trait
// ============================================================================

/// Abstraction over embedding providers.
#[async_trait]
pub trait EmbeddingBackend: Send + Sync {
    /// Embed a single text.
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError>;

    /// Returns the embedding dimension (must match the vector index).
    fn dimensions(&self) -> usize;

    /// Backend name for logging.
    fn name(&self) -> &str;
}

// ============================================================================
// Error types
// ============================================================================

#[derive(Error, Debug)]
pub enum EmbeddingError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error ({code}): {message}")]
    Api { code: u16, message: String },

    #[error("Invalid response: expected {expected} dimensions, got {actual}")]
    InvalidDimensions { expected: usize, actual: usize },

    #[error("Missing embedding in response")]
    MissingEmbedding,

    #[error("Missing API key")]
    MissingApiKey,

    #[error("All {attempts} embedding attempts failed, last error: {last}")]
    RetryExhausted { attempts: usize, last: String },
}

impl EmbeddingError {
    pub fn is_retryable(&self) -> bool {
        match self {
            EmbeddingError::Http(e) => openai::is_transient(e),
            EmbeddingError::Api { code, .. } => openai::is_retryable_status(*code),
            EmbeddingError::RetryExhausted { .. } => true,
            _ => false,
        }
    }
}

// ============================================================================
// OpenAI API structs (private)
// ============================================================================

#[derive(Debug, Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: [&'a str; 1],
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    #[serde(default)]
    data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
}

// ============================================================================
// OpenAiEmbeddingClient
// ============================================================================

#[derive(Debug, Clone)]
pub struct OpenAiEmbeddingClient {
    client: Client,
    settings: OpenAiSettings,
    model: String,
    dimensions: usize,
}

impl OpenAiEmbeddingClient {
    pub fn new(
        settings: OpenAiSettings,
        model: impl Into<String>,
        dimensions: usize,
    ) -> Result<Self, EmbeddingError> {
        if settings.api_key.is_empty() {
            return Err(EmbeddingError::MissingApiKey);
        }

        let client = openai::build_client(settings.timeout)?;

        Ok(Self {
            client,
            settings,
            model: model.into(),
            dimensions,
        })
    }

    pub fn from_config(config: &DocchatConfig) -> Result<Self, EmbeddingError> {
        Self::new(
            OpenAiSettings::from_config(config),
            config.openai.embedding_model.clone(),
            config.openai.embedding_dimensions,
        )
    }

    /// Generate an embedding, retrying transient failures.
    pub async fn embed_raw(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        let retry = self.settings.retry;
        let result = RetryIf::spawn(
            retry.strategy(),
            || self.embed_once(text),
            |e: &EmbeddingError| {
                if e.is_retryable() {
                    tracing::warn!(error = %e, "Embedding request failed, retrying");
                }
                e.is_retryable()
            },
        )
        .await;

        match result {
            Ok(vec) => Ok(vec),
            Err(e) if e.is_retryable() => {
                tracing::error!(
                    attempts = retry.attempts(),
                    error = %e,
                    "All embedding retry attempts failed"
                );
                Err(EmbeddingError::RetryExhausted {
                    attempts: retry.attempts(),
                    last: e.to_string(),
                })
            }
            Err(e) => Err(e),
        }
    }

    async fn embed_once(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        let url = format!("{}/embeddings", self.settings.base_url);
        let request = EmbeddingRequest {
            model: &self.model,
            input: [text],
        };

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.settings.api_key)
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            let (code, message) = openai::read_api_error(response).await;
            tracing::error!(code = code, message = %message, "Embedding API error");
            return Err(EmbeddingError::Api { code, message });
        }

        let body: EmbeddingResponse = response.json().await?;
        let values = body
            .data
            .into_iter()
            .next()
            .map(|d| d.embedding)
            .ok_or(EmbeddingError::MissingEmbedding)?;

        if values.len() != self.dimensions {
            return Err(EmbeddingError::InvalidDimensions {
                expected: self.dimensions,
                actual: values.len(),
            });
        }

        Ok(values)
    }
}

#[async_trait]
impl EmbeddingBackend for OpenAiEmbeddingClient {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        self.embed_raw(text).await
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn name(&self) -> &str {
        "openai"
    }
}

// ============================================================================
// TESTS
// ============================================================================

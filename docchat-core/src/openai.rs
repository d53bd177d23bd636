//! Pieces shared by the hosted-API clients: HTTP client construction,
//! the retry schedule, and error-body parsing.

use std::time::Duration;

use reqwest::{Client, Response};
use serde::Deserialize;
use tokio_retry::strategy::{jitter, ExponentialBackoff};

use crate::config::{DocchatConfig, OpenAiConfig, VectorIndexConfig};

/// Longest single backoff delay between two attempts.
const MAX_RETRY_DELAY: Duration = Duration::from_secs(10);

/// Retry schedule for one outbound call.
///
/// `max_retries` counts retries after the first attempt.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_retries: usize,
    pub retry_delay_ms: u64,
}

impl RetryPolicy {
    /// Delays of roughly `2d, 4d, 8d…` ms (jittered), capped at ten seconds.
    pub fn strategy(&self) -> impl Iterator<Item = Duration> {
        ExponentialBackoff::from_millis(2)
            .factor(self.retry_delay_ms.max(1))
            .max_delay(MAX_RETRY_DELAY)
            .map(jitter)
            .take(self.max_retries)
    }

    pub fn attempts(&self) -> usize {
        self.max_retries + 1
    }
}

impl From<&OpenAiConfig> for RetryPolicy {
    fn from(c: &OpenAiConfig) -> Self {
        Self {
            max_retries: c.max_retries,
            retry_delay_ms: c.retry_delay_ms,
        }
    }
}

impl From<&VectorIndexConfig> for RetryPolicy {
    fn from(c: &VectorIndexConfig) -> Self {
        Self {
            max_retries: c.max_retries,
            retry_delay_ms: c.retry_delay_ms,
        }
    }
}

/// Connection settings for the OpenAI-compatible endpoints.
#[derive(Debug, Clone)]
pub struct OpenAiSettings {
    pub api_key: String,
    pub base_url: String,
    pub timeout: Duration,
    pub retry: RetryPolicy,
}

impl OpenAiSettings {
    pub fn from_config(config: &DocchatConfig) -> Self {
        Self {
            api_key: config.secrets.openai_api_key.clone().unwrap_or_default(),
            base_url: config.openai.base_url.trim_end_matches('/').to_string(),
            timeout: Duration::from_secs(config.openai.request_timeout_secs),
            retry: RetryPolicy::from(&config.openai),
        }
    }
}

pub fn build_client(timeout: Duration) -> Result<Client, reqwest::Error> {
    Client::builder()
        .connect_timeout(timeout.min(Duration::from_secs(10)))
        .timeout(timeout)
        .build()
}

/// Whether a transport-level failure is worth another attempt.
pub fn is_transient(e: &reqwest::Error) -> bool {
    !(e.is_builder() || e.is_decode() || e.is_redirect())
}

/// Whether an HTTP status from an upstream API is worth another attempt.
pub fn is_retryable_status(code: u16) -> bool {
    code == 429 || code >= 500
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: Option<ErrorDetail>,
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ErrorDetail {
    message: Option<String>,
}

/// Drain a non-success response into `(status, message)`.
///
/// Understands `{"error": {"message": …}}` and `{"message": …}` bodies and
/// falls back to the raw body text.
pub async fn read_api_error(response: Response) -> (u16, String) {
    let code = response.status().as_u16();
    let body = response.text().await.unwrap_or_default();
    let message = serde_json::from_str::<ErrorEnvelope>(&body)
        .ok()
        .and_then(|e| e.error.and_then(|d| d.message).or(e.message))
        .unwrap_or(body);
    (code, message)
}

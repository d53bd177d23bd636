//! Chat-completion client: sends a message list to a hosted language model
//! and returns the generated text.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio_retry::RetryIf;

use crate::config::DocchatConfig;
use crate::openai::{self, OpenAiSettings};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::Assistant,
            content: content.into(),
        }
    }
}

/// Abstraction over chat-completion providers.
#[async_trait]
pub trait ChatBackend: Send + Sync {
    async fn complete(&self, messages: &[ChatMessage]) -> Result<String, ChatError>;

    fn name(&self) -> &str;
}

#[derive(Error, Debug)]
pub enum ChatError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error ({code}): {message}")]
    Api { code: u16, message: String },

    #[error("Chat completion returned no content")]
    EmptyResponse,

    #[error("Missing API key")]
    MissingApiKey,

    #[error("All {attempts} chat attempts failed, last error: {last}")]
    RetryExhausted { attempts: usize, last: String },
}

impl ChatError {
    pub fn is_retryable(&self) -> bool {
        match self {
            ChatError::Http(e) => openai::is_transient(e),
            ChatError::Api { code, .. } => openai::is_retryable_status(*code),
            ChatError::RetryExhausted { .. } => true,
            _ => false,
        }
    }
}

#[derive(Debug, Serialize)]
struct CompletionRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
}

#[derive(Debug, Deserialize)]
struct CompletionResponse {
    #[serde(default)]
    choices: Vec<CompletionChoice>,
}

#[derive(Debug, Deserialize)]
struct CompletionChoice {
    message: CompletionMessage,
}

#[derive(Debug, Deserialize)]
struct CompletionMessage {
    content: Option<String>,
}

/// Client for the OpenAI-compatible `/chat/completions` endpoint.
#[derive(Debug, Clone)]
pub struct OpenAiChatClient {
    client: Client,
    settings: OpenAiSettings,
    model: String,
}

impl OpenAiChatClient {
    pub fn new(settings: OpenAiSettings, model: impl Into<String>) -> Result<Self, ChatError> {
        if settings.api_key.is_empty() {
            return Err(ChatError::MissingApiKey);
        }

        let client = openai::build_client(settings.timeout)?;

        Ok(Self {
            client,
            settings,
            model: model.into(),
        })
    }

    pub fn from_config(config: &DocchatConfig) -> Result<Self, ChatError> {
        Self::new(
            OpenAiSettings::from_config(config),
            config.openai.chat_model.clone(),
        )
    }

    async fn complete_once(&self, messages: &[ChatMessage]) -> Result<String, ChatError> {
        let url = format!("{}/chat/completions", self.settings.base_url);
        let request = CompletionRequest {
            model: &self.model,
            messages,
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
            tracing::error!(code = code, message = %message, "Chat completion API error");
            return Err(ChatError::Api { code, message });
        }

        let body: CompletionResponse = response.json().await?;
        body.choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .filter(|c| !c.trim().is_empty())
            .ok_or(ChatError::EmptyResponse)
    }
}

#[async_trait]
impl ChatBackend for OpenAiChatClient {
    async fn complete(&self, messages: &[ChatMessage]) -> Result<String, ChatError> {
        let retry = self.settings.retry;
        let result = RetryIf::spawn(
            retry.strategy(),
            || self.complete_once(messages),
            |e: &ChatError| e.is_retryable(),
        )
        .await;

        match result {
            Ok(text) => Ok(text),
            Err(e) if e.is_retryable() => {
                tracing::error!(
                    attempts = retry.attempts(),
                    error = %e,
                    "All chat completion attempts failed"
                );
                Err(ChatError::RetryExhausted {
                    attempts: retry.attempts(),
                    last: e.to_string(),
                })
            }
            Err(e) => Err(e),
        }
    }

    fn name(&self) -> &str {
        "openai"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::openai::RetryPolicy;
    use std::time::Duration;
    use wiremock::matchers::{body_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn test_client(server: &MockServer) -> OpenAiChatClient {
        let settings = OpenAiSettings {
            api_key: "test-api-key".to_string(),
            base_url: server.uri(),
            timeout: Duration::from_secs(5),
            retry: RetryPolicy {
                max_retries: 1,
                retry_delay_ms: 5,
            },
        };
        OpenAiChatClient::new(settings, "gpt-3.5-turbo").expect("client")
    }

    fn completion(content: &str) -> serde_json::Value {
        serde_json::json!({
            "id": "chatcmpl-1",
            "object": "chat.completion",
            "choices": [{
                "index": 0,
                "message": { "role": "assistant", "content": content },
                "finish_reason": "stop"
            }]
        })
    }

    #[test]
    fn test_roles_serialize_lowercase() {
        let json = serde_json::to_value(ChatMessage::assistant("hi")).unwrap();
        assert_eq!(json, serde_json::json!({ "role": "assistant", "content": "hi" }));
    }

    #[tokio::test]
    async fn test_complete_sends_messages_and_returns_content() {
        let mock_server = MockServer::start().await;
        let client = test_client(&mock_server);

        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .and(body_json(serde_json::json!({
                "model": "gpt-3.5-turbo",
                "messages": [
                    { "role": "system", "content": "You are a helpful assistant." },
                    { "role": "user", "content": "hello" }
                ]
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(completion("Hi there!")))
            .expect(1)
            .mount(&mock_server)
            .await;

        let messages = [
            ChatMessage::system("You are a helpful assistant."),
            ChatMessage::user("hello"),
        ];
        let answer = client.complete(&messages).await.expect("completion");
        assert_eq!(answer, "Hi there!");
    }

    #[tokio::test]
    async fn test_complete_empty_choices_is_an_error() {
        let mock_server = MockServer::start().await;
        let client = test_client(&mock_server);

        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({ "choices": [] })))
            .mount(&mock_server)
            .await;

        let result = client.complete(&[ChatMessage::user("hello")]).await;
        assert!(matches!(result, Err(ChatError::EmptyResponse)));
    }

    #[tokio::test]
    async fn test_complete_retries_then_reports_exhaustion() {
        let mock_server = MockServer::start().await;
        let client = test_client(&mock_server);

        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503).set_body_string("upstream overloaded"))
            .expect(2)
            .mount(&mock_server)
            .await;

        let err = client
            .complete(&[ChatMessage::user("hello")])
            .await
            .expect_err("should fail");
        assert!(err.is_retryable());
        match err {
            ChatError::RetryExhausted { attempts, last } => {
                assert_eq!(attempts, 2);
                assert!(last.contains("upstream overloaded"));
            }
            other => panic!("Expected RetryExhausted, got {:?}", other),
        }
    }
}

//! Chat subsystem: answers a message grounded on the closest document
//!
//! The message is embedded, the nearest indexed document is looked up, and
//! its stored text is handed to the chat model as an assistant turn. With
//! no usable match the chat model is not called at all.

use docchat_core::config::RetrievalConfig;
use docchat_core::{ChatBackend, ChatMessage, ConversationTurn, EmbeddingBackend, VectorIndex};
use serde::Serialize;
use uuid::Uuid;

use crate::error::ApiError;
use crate::state::AppState;
use crate::subsystems::retrieve::nearest_document;

pub const SYSTEM_PROMPT: &str = "You are a helpful assistant.";

/// Context used when the matched record carries no text.
pub const NO_TEXT_CONTEXT: &str = "No matched text found";

/// Prompt for a grounded answer: system role, the question, then the excerpt.
pub fn build_prompt(message: &str, context: &str) -> Vec<ChatMessage> {
    vec![
        ChatMessage::system(SYSTEM_PROMPT),
        ChatMessage::user(format!("The user is asking: {message}")),
        ChatMessage::assistant(format!("Here's a matched document excerpt: {context}")),
    ]
}

pub fn no_match_reply(message: &str) -> String {
    format!("No matches found for '{message}'. Please refine your query.")
}

#[derive(Debug, Clone)]
pub struct Answer {
    pub text: String,
    pub matched_id: Option<String>,
    pub score: Option<f32>,
}

impl Answer {
    pub fn grounded(&self) -> bool {
        self.matched_id.is_some()
    }
}

#[derive(Debug, Serialize)]
pub struct ChatReply {
    pub answer: String,
    pub grounded: bool,
    pub matched_id: Option<String>,
    pub score: Option<f32>,
    pub history: Vec<ConversationTurn>,
}

/// Produce an answer to `message` without touching any session.
pub async fn answer_message(
    message: &str,
    embedder: &dyn EmbeddingBackend,
    index: &dyn VectorIndex,
    chat: &dyn ChatBackend,
    config: &RetrievalConfig,
) -> Result<Answer, ApiError> {
    let vector = embedder.embed(message).await?;

    let Some(best) = nearest_document(&vector, index, config).await? else {
        tracing::info!("No indexed document matched the chat message");
        return Ok(Answer {
            text: no_match_reply(message),
            matched_id: None,
            score: None,
        });
    };

    let context = best.text().unwrap_or(NO_TEXT_CONTEXT);
    let text = chat.complete(&build_prompt(message, context)).await?;
    tracing::info!(matched = %best.id, score = best.score, backend = chat.name(), "Answered chat message");

    Ok(Answer {
        text,
        matched_id: Some(best.id),
        score: Some(best.score),
    })
}

/// Answer `message` and record the exchange in the session's log.
///
/// Nothing is recorded when answering fails.
pub async fn run_chat_turn(
    state: &AppState,
    session: Uuid,
    message: &str,
) -> Result<ChatReply, ApiError> {
    let message = message.trim();
    if message.is_empty() {
        return Err(ApiError::invalid("message field is required"));
    }

    let answer = answer_message(
        message,
        state.embedder.as_ref(),
        state.index.as_ref(),
        state.chat.as_ref(),
        &state.config.retrieval,
    )
    .await?;

    let history = state
        .conversations
        .append_exchange(session, message, &answer.text)
        .await;

    Ok(ChatReply {
        grounded: answer.grounded(),
        answer: answer.text,
        matched_id: answer.matched_id,
        score: answer.score,
        history,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use docchat_core::ChatRole;

    #[test]
    fn test_build_prompt_shape() {
        let prompt = build_prompt("what is rust?", "Rust is a language.");
        assert_eq!(prompt.len(), 3);
        assert_eq!(prompt[0].role, ChatRole::System);
        assert_eq!(prompt[0].content, "You are a helpful assistant.");
        assert_eq!(prompt[1].role, ChatRole::User);
        assert_eq!(prompt[1].content, "The user is asking: what is rust?");
        assert_eq!(prompt[2].role, ChatRole::Assistant);
        assert_eq!(
            prompt[2].content,
            "Here's a matched document excerpt: Rust is a language."
        );
    }

    #[test]
    fn test_no_match_reply_quotes_message() {
        assert_eq!(
            no_match_reply("llamas"),
            "No matches found for 'llamas'. Please refine your query."
        );
    }
}

use thiserror::Error;

use crate::chat::ChatError;
use crate::embeddings::EmbeddingError;
use crate::extract::ExtractError;
use crate::index::IndexError;

#[derive(Error, Debug)]
pub enum DocchatError {
    #[error("Config error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Invalid config: {0}")]
    InvalidConfig(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Embedding(#[from] EmbeddingError),

    #[error(transparent)]
    Chat(#[from] ChatError),

    #[error(transparent)]
    Index(#[from] IndexError),

    #[error(transparent)]
    Extract(#[from] ExtractError),
}

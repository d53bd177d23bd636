pub mod chat;
pub mod config;
pub mod embeddings;
pub mod error;
pub mod extract;
pub mod index;
pub mod models;
pub mod openai;

pub use chat::{ChatBackend, ChatError, ChatMessage, ChatRole, OpenAiChatClient};
pub use config::DocchatConfig;
pub use embeddings::{EmbeddingBackend, EmbeddingError, OpenAiEmbeddingClient, ADA_002_DIMENSIONS};
pub use error::DocchatError;
pub use extract::{extract_text, ExtractError, ExtractedText};
pub use index::{create_index, IndexError, IndexMatch, IndexStats, VectorIndex, VectorRecord};
pub use models::{ConversationTurn, DocumentMetadata, DocumentRecord, MatchResult, TurnRole};

use std::sync::Arc;

use axum::extract::FromRef;
use axum_extra::extract::cookie::Key;
use docchat_core::config::MIN_SECRET_KEY_LEN;
use docchat_core::{
    create_index, ChatBackend, DocchatConfig, DocchatError, EmbeddingBackend, OpenAiChatClient,
    OpenAiEmbeddingClient, VectorIndex,
};

use crate::sessions::ConversationStore;

/// Shared state for all HTTP handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<DocchatConfig>,
    pub embedder: Arc<dyn EmbeddingBackend>,
    pub chat: Arc<dyn ChatBackend>,
    pub index: Arc<dyn VectorIndex>,
    pub conversations: ConversationStore,
    pub cookie_key: Key,
}

impl AppState {
    pub fn new(
        config: DocchatConfig,
        embedder: Arc<dyn EmbeddingBackend>,
        chat: Arc<dyn ChatBackend>,
        index: Arc<dyn VectorIndex>,
    ) -> Result<Self, DocchatError> {
        let secret = config.secrets.secret_key.as_deref().unwrap_or_default();
        if secret.len() < MIN_SECRET_KEY_LEN {
            return Err(DocchatError::InvalidConfig(format!(
                "SECRET_KEY must be at least {MIN_SECRET_KEY_LEN} bytes long"
            )));
        }
        if embedder.dimensions() != index.dimension() {
            return Err(DocchatError::InvalidConfig(format!(
                "embedding backend '{}' produces {} dimensions but index '{}' expects {}",
                embedder.name(),
                embedder.dimensions(),
                index.name(),
                index.dimension()
            )));
        }

        let cookie_key = Key::derive_from(secret.as_bytes());
        let conversations =
            ConversationStore::new(config.sessions.max_sessions, config.sessions.max_turns);

        Ok(Self {
            config: Arc::new(config),
            embedder,
            chat,
            index,
            conversations,
            cookie_key,
        })
    }

    /// Build the OpenAI clients and the configured vector index.
    pub async fn from_config(config: DocchatConfig) -> Result<Self, DocchatError> {
        let embedder: Arc<dyn EmbeddingBackend> =
            Arc::new(OpenAiEmbeddingClient::from_config(&config)?);
        let chat: Arc<dyn ChatBackend> = Arc::new(OpenAiChatClient::from_config(&config)?);
        let index = create_index(&config).await?;
        Self::new(config, embedder, chat, index)
    }
}

impl FromRef<AppState> for Key {
    fn from_ref(state: &AppState) -> Self {
        state.cookie_key.clone()
    }
}

use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

use crate::error::DocchatError;
use crate::models::MetadataTextPolicy;

/// Upper bound for any top-K requested from the vector index.
pub const MAX_TOP_K: usize = 1000;

/// Minimum length of `SECRET_KEY`; the session cookie key is derived from it.
pub const MIN_SECRET_KEY_LEN: usize = 32;

/// Pinecone's per-vector metadata cap.
pub const PINECONE_METADATA_LIMIT_BYTES: usize = 40 * 1024;

#[derive(Debug, Deserialize, Clone, Default)]
pub struct DocchatConfig {
    #[serde(default)]
    pub service: ServiceConfig,
    #[serde(default)]
    pub http: HttpConfig,
    #[serde(default)]
    pub openai: OpenAiConfig,
    #[serde(default)]
    pub vector_index: VectorIndexConfig,
    #[serde(default)]
    pub ingest: IngestConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub sessions: SessionConfig,
    /// Credentials never come from the config file.
    #[serde(skip)]
    pub secrets: Secrets,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ServiceConfig {
    pub log_level: String,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct HttpConfig {
    pub host: String,
    pub port: u16,
    pub max_upload_bytes: usize,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 5000,
            max_upload_bytes: 32 * 1024 * 1024,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct OpenAiConfig {
    pub base_url: String,
    pub embedding_model: String,
    pub embedding_dimensions: usize,
    pub chat_model: String,
    pub request_timeout_secs: u64,
    pub max_retries: usize,
    pub retry_delay_ms: u64,
}

impl Default for OpenAiConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.openai.com/v1".to_string(),
            embedding_model: "text-embedding-ada-002".to_string(),
            embedding_dimensions: crate::embeddings::ADA_002_DIMENSIONS,
            chat_model: "gpt-3.5-turbo".to_string(),
            request_timeout_secs: 30,
            max_retries: 3,
            retry_delay_ms: 500,
        }
    }
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum IndexBackendKind {
    #[default]
    Pinecone,
    Pgvector,
    Memory,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct VectorIndexConfig {
    pub backend: IndexBackendKind,
    pub index_name: String,
    pub namespace: Option<String>,
    /// Full data-plane URL; overrides the host derived from name/project/environment.
    pub host: Option<String>,
    pub request_timeout_secs: u64,
    pub max_retries: usize,
    pub retry_delay_ms: u64,
    pub max_connections: u32,
}

impl Default for VectorIndexConfig {
    fn default() -> Self {
        Self {
            backend: IndexBackendKind::Pinecone,
            index_name: "pdf-embeddings".to_string(),
            namespace: None,
            host: None,
            request_timeout_secs: 30,
            max_retries: 3,
            retry_delay_ms: 500,
            max_connections: 5,
        }
    }
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum IngestPolicy {
    /// Index every document that made it through extraction and embedding.
    #[default]
    BestEffort,
    /// Any per-document failure aborts the batch before the upsert.
    AllOrNothing,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct IngestConfig {
    pub metadata_text: MetadataTextPolicy,
    pub prefix_chars: usize,
    pub policy: IngestPolicy,
    /// Characters sent to the embedding API per document; `None` sends everything.
    pub max_input_chars: Option<usize>,
    pub embed_concurrency: usize,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            metadata_text: MetadataTextPolicy::Prefix,
            prefix_chars: 1000,
            policy: IngestPolicy::BestEffort,
            max_input_chars: None,
            embed_concurrency: 4,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct RetrievalConfig {
    pub search_top_k: usize,
    pub chat_top_k: usize,
    /// Matches scoring below this are not used to ground a chat answer.
    pub min_score: f32,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            search_top_k: 50,
            chat_top_k: 1,
            min_score: 0.0,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct SessionConfig {
    pub cookie_name: String,
    pub max_sessions: usize,
    pub max_turns: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            cookie_name: "docchat_session".to_string(),
            max_sessions: 1024,
            max_turns: 50,
        }
    }
}

#[derive(Clone, Default)]
pub struct Secrets {
    pub secret_key: Option<String>,
    pub openai_api_key: Option<String>,
    pub pinecone_api_key: Option<String>,
    pub pinecone_environment: Option<String>,
    pub pinecone_project_id: Option<String>,
    pub pinecone_index_host: Option<String>,
    pub database_url: Option<String>,
}

impl std::fmt::Debug for Secrets {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let redact = |v: &Option<String>| v.as_ref().map(|_| "<redacted>");
        f.debug_struct("Secrets")
            .field("secret_key", &redact(&self.secret_key))
            .field("openai_api_key", &redact(&self.openai_api_key))
            .field("pinecone_api_key", &redact(&self.pinecone_api_key))
            .field("pinecone_environment", &self.pinecone_environment)
            .field("pinecone_project_id", &self.pinecone_project_id)
            .field("pinecone_index_host", &self.pinecone_index_host)
            .field("database_url", &redact(&self.database_url))
            .finish()
    }
}

impl Secrets {
    pub fn from_env() -> Self {
        let var = |name: &str| std::env::var(name).ok().filter(|v| !v.trim().is_empty());
        Self {
            secret_key: var("SECRET_KEY"),
            openai_api_key: var("OPENAI_API_KEY"),
            pinecone_api_key: var("PINECONE_API_KEY"),
            pinecone_environment: var("PINECONE_ENVIRONMENT"),
            pinecone_project_id: var("PINECONE_PROJECT_ID"),
            pinecone_index_host: var("PINECONE_INDEX_HOST"),
            database_url: var("DATABASE_URL"),
        }
    }
}

impl DocchatConfig {
    /// Load `path` (optional file) with `DOCCHAT__SECTION__KEY` overrides,
    /// then pick credentials up from the process environment.
    pub fn load(path: &str) -> Result<Self, ConfigError> {
        let s = Config::builder()
            .add_source(File::with_name(path).required(false))
            .add_source(
                Environment::with_prefix("DOCCHAT")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;
        let mut config: Self = s.try_deserialize()?;
        config.secrets = Secrets::from_env();
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), DocchatError> {
        let invalid = |msg: String| Err(DocchatError::InvalidConfig(msg));

        match &self.secrets.secret_key {
            Some(k) if k.len() >= MIN_SECRET_KEY_LEN => {}
            _ => {
                return invalid(format!(
                    "SECRET_KEY must be set and at least {MIN_SECRET_KEY_LEN} bytes long"
                ))
            }
        }
        if self.secrets.openai_api_key.is_none() {
            return invalid("OPENAI_API_KEY must be set".to_string());
        }
        match self.vector_index.backend {
            IndexBackendKind::Pinecone if self.secrets.pinecone_api_key.is_none() => {
                return invalid("PINECONE_API_KEY must be set for the pinecone backend".to_string())
            }
            IndexBackendKind::Pgvector if self.secrets.database_url.is_none() => {
                return invalid("DATABASE_URL must be set for the pgvector backend".to_string())
            }
            _ => {}
        }
        if self.openai.embedding_dimensions == 0 {
            return invalid("openai.embedding_dimensions must be positive".to_string());
        }
        for (name, k) in [
            ("retrieval.search_top_k", self.retrieval.search_top_k),
            ("retrieval.chat_top_k", self.retrieval.chat_top_k),
        ] {
            if !(1..=MAX_TOP_K).contains(&k) {
                return invalid(format!("{name} must be within 1..={MAX_TOP_K}, got {k}"));
            }
        }
        if !(-1.0..=1.0).contains(&self.retrieval.min_score) {
            return invalid(format!(
                "retrieval.min_score must be within -1.0..=1.0, got {}",
                self.retrieval.min_score
            ));
        }
        if self.ingest.metadata_text == MetadataTextPolicy::Prefix && self.ingest.prefix_chars == 0 {
            return invalid("ingest.prefix_chars must be positive".to_string());
        }
        if self.ingest.embed_concurrency == 0 {
            return invalid("ingest.embed_concurrency must be positive".to_string());
        }
        if self.sessions.max_sessions == 0 || self.sessions.max_turns < 2 {
            return invalid(
                "sessions.max_sessions must be positive and sessions.max_turns at least 2"
                    .to_string(),
            );
        }
        for warning in self.warnings() {
            tracing::warn!(warning = %warning, "Questionable configuration");
        }
        Ok(())
    }

    /// Settings that load fine but are likely to fail at runtime.
    pub fn warnings(&self) -> Vec<String> {
        let mut warnings = Vec::new();
        if self.vector_index.backend == IndexBackendKind::Pinecone
            && self.ingest.metadata_text == MetadataTextPolicy::Full
        {
            warnings.push(format!(
                "ingest.metadata_text = \"full\" with the pinecone backend: vectors whose \
                 metadata exceeds {PINECONE_METADATA_LIMIT_BYTES} bytes are rejected with \
                 the whole upload batch"
            ));
        }
        warnings
    }
}

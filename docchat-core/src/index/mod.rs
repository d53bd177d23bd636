//! Vector index: stores `(id, vector, metadata)` triples and answers
//! nearest-neighbour queries.
//!
//! Backends:
//! - **pinecone**: hosted Pinecone index over its REST data plane
//! - **pgvector**: PostgreSQL with the pgvector extension
//! - **memory**: process-local cosine index for development and tests

pub mod memory;
pub mod pinecone;
pub mod postgres;

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::config::{DocchatConfig, IndexBackendKind};
use crate::models::{DocumentMetadata, DocumentRecord};
use crate::openai;

pub use self::memory::InMemoryVectorIndex;
pub use self::pinecone::PineconeIndex;
pub use self::postgres::PgVectorIndex;

/// An entry to upsert.
#[derive(Debug, Clone)]
pub struct VectorRecord {
    pub id: Uuid,
    pub values: Vec<f32>,
    pub metadata: DocumentMetadata,
}

impl VectorRecord {
    pub fn from_document(record: DocumentRecord, metadata: DocumentMetadata) -> Self {
        Self {
            id: record.id,
            values: record.embedding,
            metadata,
        }
    }
}

/// A raw hit as returned by the index, highest score first.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexMatch {
    pub id: String,
    pub score: f32,
    pub metadata: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct IndexStats {
    pub dimension: usize,
    pub total_vectors: u64,
}

#[derive(Error, Debug)]
pub enum IndexError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("API error ({code}): {message}")]
    Api { code: u16, message: String },

    #[error("Vector {id} has {actual} dimensions, index expects {expected}")]
    DimensionMismatch {
        id: String,
        expected: usize,
        actual: usize,
    },

    #[error("Missing API key")]
    MissingApiKey,

    #[error("Cannot resolve index host: {0}")]
    MissingHost(String),

    #[error("All {attempts} index attempts failed, last error: {last}")]
    RetryExhausted { attempts: usize, last: String },
}

impl IndexError {
    pub fn is_retryable(&self) -> bool {
        match self {
            IndexError::Http(e) => openai::is_transient(e),
            IndexError::Api { code, .. } => openai::is_retryable_status(*code),
            IndexError::Database(e) => matches!(
                e,
                sqlx::Error::Io(_) | sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed
            ),
            IndexError::RetryExhausted { .. } => true,
            _ => false,
        }
    }
}

/// Abstraction over vector index backends.
#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// Insert or replace `records` in a single call. Returns the upserted count.
    async fn upsert(&self, records: &[VectorRecord]) -> Result<usize, IndexError>;

    /// Up to `top_k` nearest entries to `vector`, metadata included.
    async fn query(&self, vector: &[f32], top_k: usize) -> Result<Vec<IndexMatch>, IndexError>;

    async fn describe(&self) -> Result<IndexStats, IndexError>;

    /// Configured vector dimension.
    fn dimension(&self) -> usize;

    /// Backend name for logging.
    fn name(&self) -> &str;
}

/// Reject any record whose length differs from `expected`.
pub fn check_dimensions(records: &[VectorRecord], expected: usize) -> Result<(), IndexError> {
    match records.iter().find(|r| r.values.len() != expected) {
        Some(r) => Err(IndexError::DimensionMismatch {
            id: r.id.to_string(),
            expected,
            actual: r.values.len(),
        }),
        None => Ok(()),
    }
}

/// Build the backend selected by `[vector_index] backend`.
pub async fn create_index(config: &DocchatConfig) -> Result<Arc<dyn VectorIndex>, IndexError> {
    let dimension = config.openai.embedding_dimensions;
    let index: Arc<dyn VectorIndex> = match config.vector_index.backend {
        IndexBackendKind::Pinecone => Arc::new(PineconeIndex::from_config(config)?),
        IndexBackendKind::Pgvector => {
            let url = config
                .secrets
                .database_url
                .as_deref()
                .ok_or_else(|| IndexError::MissingHost("DATABASE_URL is not set".to_string()))?;
            Arc::new(
                PgVectorIndex::connect(url, config.vector_index.max_connections, dimension).await?,
            )
        }
        IndexBackendKind::Memory => Arc::new(InMemoryVectorIndex::new(dimension)),
    };
    tracing::info!(backend = index.name(), dimension, "Vector index ready");
    Ok(index)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::MetadataTextPolicy;

    fn record(len: usize) -> VectorRecord {
        VectorRecord {
            id: Uuid::new_v4(),
            values: vec![0.5; len],
            metadata: DocumentMetadata::build("t", None, 1, MetadataTextPolicy::Full, 0),
        }
    }

    #[test]
    fn test_check_dimensions_names_offending_record() {
        let bad = record(3);
        let records = vec![record(4), bad.clone()];
        match check_dimensions(&records, 4) {
            Err(IndexError::DimensionMismatch { id, expected, actual }) => {
                assert_eq!(id, bad.id.to_string());
                assert_eq!(expected, 4);
                assert_eq!(actual, 3);
            }
            other => panic!("Expected DimensionMismatch, got {:?}", other),
        }
        assert!(check_dimensions(&records[..1], 4).is_ok());
    }

    #[test]
    fn test_dimension_mismatch_is_not_retryable() {
        let err = IndexError::DimensionMismatch {
            id: "x".into(),
            expected: 2,
            actual: 1,
        };
        assert!(!err.is_retryable());
        assert!(IndexError::Api {
            code: 503,
            message: String::new()
        }
        .is_retryable());
    }

    #[tokio::test]
    async fn test_create_index_memory_backend() {
        let mut config = DocchatConfig::default();
        config.vector_index.backend = IndexBackendKind::Memory;
        config.openai.embedding_dimensions = 4;
        let index = create_index(&config).await.expect("memory index");
        assert_eq!(index.name(), "memory");
        assert_eq!(index.dimension(), 4);
    }
}

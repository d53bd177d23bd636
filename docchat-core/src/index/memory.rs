//! In-memory vector index using cosine similarity.
//!
//! Backed by a `HashMap` behind a `tokio::sync::RwLock`. Contents are lost
//! when the process exits.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{check_dimensions, IndexError, IndexMatch, IndexStats, VectorIndex, VectorRecord};

#[derive(Debug)]
pub struct InMemoryVectorIndex {
    dimension: usize,
    entries: RwLock<HashMap<Uuid, VectorRecord>>,
}

impl InMemoryVectorIndex {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension,
            entries: RwLock::new(HashMap::new()),
        }
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

/// Cosine similarity; 0.0 when either vector has zero magnitude.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

#[async_trait]
impl VectorIndex for InMemoryVectorIndex {
    async fn upsert(&self, records: &[VectorRecord]) -> Result<usize, IndexError> {
        check_dimensions(records, self.dimension)?;
        let mut entries = self.entries.write().await;
        for record in records {
            entries.insert(record.id, record.clone());
        }
        Ok(records.len())
    }

    async fn query(&self, vector: &[f32], top_k: usize) -> Result<Vec<IndexMatch>, IndexError> {
        if vector.len() != self.dimension {
            return Err(IndexError::DimensionMismatch {
                id: "query".to_string(),
                expected: self.dimension,
                actual: vector.len(),
            });
        }

        let entries = self.entries.read().await;
        let mut scored: Vec<(f32, &VectorRecord)> = entries
            .values()
            .map(|r| (cosine_similarity(vector, &r.values), r))
            .collect();
        scored.sort_by(|a, b| b.0.total_cmp(&a.0));

        Ok(scored
            .into_iter()
            .take(top_k)
            .map(|(score, r)| IndexMatch {
                id: r.id.to_string(),
                score,
                metadata: Some(r.metadata.to_value()),
            })
            .collect())
    }

    async fn describe(&self) -> Result<IndexStats, IndexError> {
        Ok(IndexStats {
            dimension: self.dimension,
            total_vectors: self.entries.read().await.len() as u64,
        })
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn name(&self) -> &str {
        "memory"
    }
}

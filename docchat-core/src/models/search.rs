use serde::{Deserialize, Serialize};

use super::document::DocumentMetadata;
use crate::index::IndexMatch;

/// One ranked hit from a similarity query.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatchResult {
    pub id: String,
    /// 1-based position in the index's ordering.
    pub rank: usize,
    pub score: f32,
    pub metadata: Option<DocumentMetadata>,
}

impl MatchResult {
    /// Rank raw index matches in the order the index returned them.
    pub fn ranked(matches: Vec<IndexMatch>) -> Vec<Self> {
        matches
            .into_iter()
            .enumerate()
            .map(|(i, m)| Self {
                id: m.id,
                rank: i + 1,
                score: m.score,
                metadata: m.metadata.as_ref().and_then(DocumentMetadata::from_value),
            })
            .collect()
    }

    pub fn text(&self) -> Option<&str> {
        self.metadata.as_ref().map(|m| m.text.as_str())
    }
}

//! Ingest subsystem: uploaded PDFs into the vector index
//!
//! Per document: extract text (blocking pool), embed the whole text once,
//! build `DocumentMetadata`. Surviving documents go to the index in a single
//! upsert call. What happens to the batch when a document fails is decided
//! by `ingest.policy`.

use bytes::Bytes;
use docchat_core::config::{IngestConfig, IngestPolicy};
use docchat_core::{
    extract_text, DocumentMetadata, DocumentRecord, EmbeddingBackend, VectorIndex, VectorRecord,
};
use futures::stream::{self, StreamExt};
use serde::Serialize;
use uuid::Uuid;

/// One file part from the upload form.
#[derive(Debug, Clone)]
pub struct UploadedFile {
    pub filename: Option<String>,
    pub bytes: Bytes,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureStage {
    Extract,
    Embed,
    Upsert,
    /// Never attempted because another document in the batch failed.
    Aborted,
}

#[derive(Debug, Clone, Serialize)]
pub struct IndexedDocument {
    pub id: Uuid,
    pub filename: Option<String>,
    pub page_count: u32,
    pub char_count: usize,
    pub truncated: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct FailedDocument {
    pub filename: Option<String>,
    pub stage: FailureStage,
    pub error: String,
    pub retryable: bool,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct IngestReport {
    pub indexed: Vec<IndexedDocument>,
    pub failed: Vec<FailedDocument>,
    /// Documents the index accepted without counting them as upserted.
    pub unconfirmed: usize,
}

impl IngestReport {
    /// Nothing indexed, and every failure happened at the embedding API or
    /// the vector index rather than in the uploaded files themselves.
    pub fn upstream_failure(&self) -> bool {
        self.indexed.is_empty()
            && !self.failed.is_empty()
            && self.failed.iter().all(|f| f.stage != FailureStage::Extract)
    }

    /// Every failure may succeed if the same upload is sent again.
    pub fn retryable(&self) -> bool {
        self.failed.iter().all(|f| f.retryable)
    }
}

/// A document that made it through extraction and embedding.
struct Prepared {
    record: VectorRecord,
    summary: IndexedDocument,
}

/// Ingest `files` and report the outcome of each one.
///
/// Never fails as a whole: per-document problems and upsert rejections are
/// recorded in the report.
pub async fn ingest_documents(
    files: Vec<UploadedFile>,
    embedder: &dyn EmbeddingBackend,
    index: &dyn VectorIndex,
    config: &IngestConfig,
) -> IngestReport {
    let total = files.len();
    let outcomes: Vec<Result<Prepared, FailedDocument>> = stream::iter(files)
        .map(|file| prepare_document(file, embedder, config))
        .buffered(config.embed_concurrency.max(1))
        .collect()
        .await;

    let mut report = IngestReport::default();
    let mut prepared = Vec::with_capacity(total);
    for outcome in outcomes {
        match outcome {
            Ok(p) => prepared.push(p),
            Err(f) => report.failed.push(f),
        }
    }

    if config.policy == IngestPolicy::AllOrNothing && !report.failed.is_empty() {
        tracing::warn!(
            failed = report.failed.len(),
            skipped = prepared.len(),
            "Aborting upload batch under all_or_nothing policy"
        );
        report.failed.extend(prepared.into_iter().map(|p| FailedDocument {
            filename: p.summary.filename,
            stage: FailureStage::Aborted,
            error: "Not indexed: another document in the upload failed".to_string(),
            retryable: true,
        }));
        return report;
    }

    if prepared.is_empty() {
        return report;
    }

    let (records, summaries): (Vec<VectorRecord>, Vec<IndexedDocument>) =
        prepared.into_iter().map(|p| (p.record, p.summary)).unzip();

    match index.upsert(&records).await {
        Ok(count) => {
            if count < records.len() {
                tracing::warn!(
                    sent = records.len(),
                    upserted = count,
                    backend = index.name(),
                    "Vector index confirmed fewer records than were sent"
                );
                report.unconfirmed = records.len() - count;
            }
            tracing::info!(
                count,
                failed = report.failed.len(),
                backend = index.name(),
                "Indexed uploaded documents"
            );
            report.indexed = summaries;
        }
        Err(e) => {
            tracing::error!(error = %e, count = records.len(), "Vector index rejected upsert");
            let retryable = e.is_retryable();
            let error = e.to_string();
            report
                .failed
                .extend(summaries.into_iter().map(|s| FailedDocument {
                    filename: s.filename,
                    stage: FailureStage::Upsert,
                    error: error.clone(),
                    retryable,
                }));
        }
    }

    report
}

async fn prepare_document(
    file: UploadedFile,
    embedder: &dyn EmbeddingBackend,
    config: &IngestConfig,
) -> Result<Prepared, FailedDocument> {
    let UploadedFile { filename, bytes } = file;
    let failed = |stage, error: String, retryable| FailedDocument {
        filename: filename.clone(),
        stage,
        error,
        retryable,
    };

    let extracted = match tokio::task::spawn_blocking(move || extract_text(&bytes)).await {
        Ok(Ok(extracted)) => extracted,
        Ok(Err(e)) => {
            tracing::warn!(filename = ?filename, error = %e, "Text extraction failed");
            return Err(failed(FailureStage::Extract, e.to_string(), false));
        }
        Err(e) => {
            tracing::error!(filename = ?filename, error = %e, "Extraction task panicked");
            return Err(failed(
                FailureStage::Extract,
                format!("Extraction aborted: {e}"),
                false,
            ));
        }
    };

    let embed_input = embedding_input(&extracted.text, config.max_input_chars);
    if embed_input.len() < extracted.text.len() {
        tracing::warn!(
            filename = ?filename,
            chars = extracted.text.chars().count(),
            limit = ?config.max_input_chars,
            "Document text truncated before embedding"
        );
    }

    let embedding = match embedder.embed(embed_input).await {
        Ok(v) => v,
        Err(e) => {
            tracing::warn!(filename = ?filename, error = %e, "Embedding failed");
            return Err(failed(FailureStage::Embed, e.to_string(), e.is_retryable()));
        }
    };

    let document = DocumentRecord {
        id: Uuid::new_v4(),
        text: extracted.text,
        embedding,
    };
    let metadata = DocumentMetadata::build(
        &document.text,
        filename.clone(),
        extracted.page_count,
        config.metadata_text,
        config.prefix_chars,
    );
    let summary = IndexedDocument {
        id: document.id,
        filename,
        page_count: metadata.page_count,
        char_count: metadata.char_count,
        truncated: metadata.truncated,
    };

    Ok(Prepared {
        record: VectorRecord::from_document(document, metadata),
        summary,
    })
}

/// The prefix of `text` sent to the embedding API, cut on a char boundary.
pub fn embedding_input(text: &str, max_chars: Option<usize>) -> &str {
    match max_chars {
        Some(max) => match text.char_indices().nth(max) {
            Some((cut, _)) => &text[..cut],
            None => text,
        },
        None => text,
    }
}

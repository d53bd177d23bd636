//! Pinecone index client over the REST data plane.
//!
//! - `POST /vectors/upsert`: one call per batch
//! - `POST /query`: top-K with metadata, without values
//! - `POST /describe_index_stats`: dimension and vector count

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio_retry::RetryIf;

use super::{check_dimensions, IndexError, IndexMatch, IndexStats, VectorIndex, VectorRecord};
use crate::config::DocchatConfig;
use crate::openai::{self, RetryPolicy};

const API_VERSION: &str = "2024-07";

#[derive(Debug, Clone)]
pub struct PineconeConfig {
    pub api_key: String,
    pub host: String,
    pub namespace: Option<String>,
    pub dimension: usize,
    pub timeout: Duration,
    pub retry: RetryPolicy,
}

/// Resolve the data-plane URL: an explicit host wins, otherwise it is derived
/// from index name, project id and environment.
pub fn resolve_host(
    explicit: Option<&str>,
    index_name: &str,
    project_id: Option<&str>,
    environment: Option<&str>,
) -> Result<String, IndexError> {
    if let Some(host) = explicit.map(str::trim).filter(|h| !h.is_empty()) {
        let host = host.trim_end_matches('/');
        return Ok(if host.starts_with("http://") || host.starts_with("https://") {
            host.to_string()
        } else {
            format!("https://{host}")
        });
    }
    match (project_id, environment) {
        (Some(project), Some(env)) => Ok(format!("https://{index_name}-{project}.svc.{env}.pinecone.io")),
        _ => Err(IndexError::MissingHost(
            "set PINECONE_INDEX_HOST, or both PINECONE_PROJECT_ID and PINECONE_ENVIRONMENT".to_string(),
        )),
    }
}

// ============================================================================
// Wire types (private)
// ============================================================================

#[derive(Debug, Serialize)]
struct WireVector<'a> {
    id: String,
    values: &'a [f32],
    metadata: serde_json::Value,
}

#[derive(Debug, Serialize)]
struct UpsertRequest<'a> {
    vectors: Vec<WireVector<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    namespace: Option<&'a str>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UpsertResponse {
    #[serde(default)]
    upserted_count: usize,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct QueryRequest<'a> {
    vector: &'a [f32],
    top_k: usize,
    include_metadata: bool,
    include_values: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    namespace: Option<&'a str>,
}

#[derive(Debug, Deserialize)]
struct QueryResponse {
    #[serde(default)]
    matches: Vec<WireMatch>,
}

#[derive(Debug, Deserialize)]
struct WireMatch {
    id: String,
    #[serde(default)]
    score: f32,
    metadata: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StatsResponse {
    #[serde(default)]
    dimension: usize,
    #[serde(default)]
    total_vector_count: u64,
}

// ============================================================================
// PineconeIndex
// ============================================================================

#[derive(Debug, Clone)]
pub struct PineconeIndex {
    client: Client,
    config: PineconeConfig,
}

impl PineconeIndex {
    pub fn new(config: PineconeConfig) -> Result<Self, IndexError> {
        if config.api_key.is_empty() {
            return Err(IndexError::MissingApiKey);
        }
        let client = openai::build_client(config.timeout)?;
        Ok(Self { client, config })
    }

    pub fn from_config(config: &DocchatConfig) -> Result<Self, IndexError> {
        let secrets = &config.secrets;
        let explicit = config
            .vector_index
            .host
            .as_deref()
            .or(secrets.pinecone_index_host.as_deref());
        let host = resolve_host(
            explicit,
            &config.vector_index.index_name,
            secrets.pinecone_project_id.as_deref(),
            secrets.pinecone_environment.as_deref(),
        )?;

        Self::new(PineconeConfig {
            api_key: secrets.pinecone_api_key.clone().unwrap_or_default(),
            host,
            namespace: config.vector_index.namespace.clone(),
            dimension: config.openai.embedding_dimensions,
            timeout: Duration::from_secs(config.vector_index.request_timeout_secs),
            retry: RetryPolicy::from(&config.vector_index),
        })
    }

    fn post(&self, path: &str) -> RequestBuilder {
        self.client
            .post(format!("{}{}", self.config.host, path))
            .header("Api-Key", &self.config.api_key)
            .header("X-Pinecone-API-Version", API_VERSION)
    }

    async fn send_once<B, R>(&self, path: &str, body: &B) -> Result<R, IndexError>
    where
        B: Serialize + Sync,
        R: DeserializeOwned + Send,
    {
        let response = self.post(path).json(body).send().await?;
        if !response.status().is_success() {
            let (code, message) = openai::read_api_error(response).await;
            tracing::error!(code = code, path, message = %message, "Pinecone API error");
            return Err(IndexError::Api { code, message });
        }
        Ok(response.json().await?)
    }

    async fn send<B, R>(&self, path: &str, body: &B) -> Result<R, IndexError>
    where
        B: Serialize + Sync,
        R: DeserializeOwned + Send,
    {
        let retry = self.config.retry;
        let result = RetryIf::spawn(
            retry.strategy(),
            || self.send_once(path, body),
            |e: &IndexError| e.is_retryable(),
        )
        .await;

        match result {
            Ok(r) => Ok(r),
            Err(e) if e.is_retryable() => {
                tracing::error!(attempts = retry.attempts(), path, error = %e, "All Pinecone attempts failed");
                Err(IndexError::RetryExhausted {
                    attempts: retry.attempts(),
                    last: e.to_string(),
                })
            }
            Err(e) => Err(e),
        }
    }
}

#[async_trait]
impl VectorIndex for PineconeIndex {
    async fn upsert(&self, records: &[VectorRecord]) -> Result<usize, IndexError> {
        if records.is_empty() {
            return Ok(0);
        }
        check_dimensions(records, self.config.dimension)?;

        let request = UpsertRequest {
            vectors: records
                .iter()
                .map(|r| WireVector {
                    id: r.id.to_string(),
                    values: &r.values,
                    metadata: r.metadata.to_value(),
                })
                .collect(),
            namespace: self.config.namespace.as_deref(),
        };

        let response: UpsertResponse = self.send("/vectors/upsert", &request).await?;
        tracing::info!(count = response.upserted_count, "Upserted vectors to Pinecone");
        Ok(response.upserted_count)
    }

    async fn query(&self, vector: &[f32], top_k: usize) -> Result<Vec<IndexMatch>, IndexError> {
        let request = QueryRequest {
            vector,
            top_k,
            include_metadata: true,
            include_values: false,
            namespace: self.config.namespace.as_deref(),
        };

        let response: QueryResponse = self.send("/query", &request).await?;
        Ok(response
            .matches
            .into_iter()
            .map(|m| IndexMatch {
                id: m.id,
                score: m.score,
                metadata: m.metadata,
            })
            .collect())
    }

    async fn describe(&self) -> Result<IndexStats, IndexError> {
        let response: StatsResponse = self
            .send("/describe_index_stats", &serde_json::json!({}))
            .await?;
        Ok(IndexStats {
            dimension: response.dimension,
            total_vectors: response.total_vector_count,
        })
    }

    fn dimension(&self) -> usize {
        self.config.dimension
    }

    fn name(&self) -> &str {
        "pinecone"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{DocumentMetadata, MetadataTextPolicy};
    use uuid::Uuid;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn test_index(server: &MockServer, dimension: usize) -> PineconeIndex {
        PineconeIndex::new(PineconeConfig {
            api_key: "pc-test".to_string(),
            host: server.uri(),
            namespace: Some("docs".to_string()),
            dimension,
            timeout: Duration::from_secs(5),
            retry: RetryPolicy {
                max_retries: 1,
                retry_delay_ms: 5,
            },
        })
        .expect("index")
    }

    fn record(values: Vec<f32>, text: &str) -> VectorRecord {
        VectorRecord {
            id: Uuid::new_v4(),
            values,
            metadata: DocumentMetadata::build(text, Some("a.pdf".into()), 1, MetadataTextPolicy::Full, 0),
        }
    }

    #[test]
    fn test_resolve_host_prefers_explicit() {
        let host = resolve_host(Some("my-index-abc.svc.pinecone.io/"), "pdf-embeddings", None, None).unwrap();
        assert_eq!(host, "https://my-index-abc.svc.pinecone.io");
    }

    #[test]
    fn test_resolve_host_from_environment() {
        let host = resolve_host(None, "pdf-embeddings", Some("abc123"), Some("us-west1-gcp")).unwrap();
        assert_eq!(host, "https://pdf-embeddings-abc123.svc.us-west1-gcp.pinecone.io");
        assert!(matches!(
            resolve_host(None, "pdf-embeddings", None, Some("us-west1-gcp")),
            Err(IndexError::MissingHost(_))
        ));
    }

    #[tokio::test]
    async fn test_upsert_sends_one_batch_with_metadata() {
        let mock_server = MockServer::start().await;
        let index = test_index(&mock_server, 2);
        let records = vec![record(vec![0.1, 0.2], "one"), record(vec![0.3, 0.4], "two")];

        Mock::given(method("POST"))
            .and(path("/vectors/upsert"))
            .and(header("Api-Key", "pc-test"))
            .and(body_partial_json(serde_json::json!({ "namespace": "docs" })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({ "upsertedCount": 2 })))
            .expect(1)
            .mount(&mock_server)
            .await;

        assert_eq!(index.upsert(&records).await.unwrap(), 2);

        let requests = mock_server.received_requests().await.unwrap();
        let body: serde_json::Value = serde_json::from_slice(&requests[0].body).unwrap();
        let vectors = body["vectors"].as_array().unwrap();
        assert_eq!(vectors.len(), 2);
        assert_eq!(vectors[0]["id"], records[0].id.to_string());
        assert_eq!(vectors[0]["metadata"]["text"], "one");
        assert_eq!(vectors[1]["metadata"]["filename"], "a.pdf");
    }

    #[tokio::test]
    async fn test_upsert_rejects_dimension_mismatch_without_calling_api() {
        let mock_server = MockServer::start().await;
        let index = test_index(&mock_server, 3);

        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&mock_server)
            .await;

        let result = index.upsert(&[record(vec![0.1, 0.2], "short")]).await;
        assert!(matches!(result, Err(IndexError::DimensionMismatch { .. })));
    }

    #[tokio::test]
    async fn test_query_parses_matches_in_order() {
        let mock_server = MockServer::start().await;
        let index = test_index(&mock_server, 2);

        Mock::given(method("POST"))
            .and(path("/query"))
            .and(body_partial_json(serde_json::json!({
                "topK": 5,
                "includeMetadata": true,
                "includeValues": false
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "matches": [
                    { "id": "doc-1", "score": 0.93, "metadata": { "text": "first" } },
                    { "id": "doc-2", "score": 0.71 }
                ],
                "namespace": "docs"
            })))
            .mount(&mock_server)
            .await;

        let matches = index.query(&[0.1, 0.2], 5).await.unwrap();
        assert_eq!(matches.len(), 2);
        assert_eq!(matches[0].id, "doc-1");
        assert!((matches[0].score - 0.93).abs() < 1e-6);
        assert!(matches[1].metadata.is_none());
    }

    #[tokio::test]
    async fn test_query_with_no_matches_field_is_empty() {
        let mock_server = MockServer::start().await;
        let index = test_index(&mock_server, 2);

        Mock::given(method("POST"))
            .and(path("/query"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({ "namespace": "" })))
            .mount(&mock_server)
            .await;

        assert!(index.query(&[0.1, 0.2], 5).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_upsert_rejection_is_surfaced() {
        let mock_server = MockServer::start().await;
        let index = test_index(&mock_server, 2);

        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(400).set_body_json(serde_json::json!({
                "code": 3,
                "message": "Vector dimension 2 does not match the dimension of the index 1536"
            })))
            .expect(1)
            .mount(&mock_server)
            .await;

        match index.upsert(&[record(vec![0.1, 0.2], "x")]).await {
            Err(IndexError::Api { code, message }) => {
                assert_eq!(code, 400);
                assert!(message.contains("does not match"));
            }
            other => panic!("Expected Api error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_describe_reads_stats() {
        let mock_server = MockServer::start().await;
        let index = test_index(&mock_server, 1536);

        Mock::given(method("POST"))
            .and(path("/describe_index_stats"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "namespaces": { "docs": { "vectorCount": 7 } },
                "dimension": 1536,
                "indexFullness": 0.0,
                "totalVectorCount": 7
            })))
            .mount(&mock_server)
            .await;

        let stats = index.describe().await.unwrap();
        assert_eq!(stats, IndexStats { dimension: 1536, total_vectors: 7 });
    }
}

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// How much of a document's text is written into the vector index metadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum MetadataTextPolicy {
    Full,
    #[default]
    Prefix,
}

/// A freshly ingested document. Lives only for the duration of an upload.
#[derive(Debug, Clone)]
pub struct DocumentRecord {
    pub id: Uuid,
    pub text: String,
    pub embedding: Vec<f32>,
}

/// Metadata stored alongside every vector.
///
/// Ingest writes it and chat reads `text` back to ground its answer, so both
/// sides go through this type. `full_text` is accepted for records written
/// by older uploaders.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentMetadata {
    #[serde(alias = "full_text")]
    pub text: String,
    #[serde(default)]
    pub truncated: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
    #[serde(default)]
    pub page_count: u32,
    #[serde(default)]
    pub char_count: usize,
}

impl DocumentMetadata {
    pub fn build(
        text: &str,
        filename: Option<String>,
        page_count: u32,
        policy: MetadataTextPolicy,
        prefix_chars: usize,
    ) -> Self {
        let char_count = text.chars().count();
        let (stored, truncated) = match policy {
            MetadataTextPolicy::Full => (text.to_string(), false),
            MetadataTextPolicy::Prefix => (
                text.chars().take(prefix_chars).collect(),
                char_count > prefix_chars,
            ),
        };
        Self {
            text: stored,
            truncated,
            filename,
            page_count,
            char_count,
        }
    }

    /// Parse index metadata; `None` when it carries no usable text.
    ///
    /// An auxiliary field of an unexpected type never hides the text.
    /// Counters are accepted as integers or whole floats (Pinecone stores
    /// every number as float64).
    pub fn from_value(value: &serde_json::Value) -> Option<Self> {
        let fields = value.as_object()?;
        let text = fields
            .get("text")
            .or_else(|| fields.get("full_text"))
            .and_then(Value::as_str)?
            .to_string();
        let count = |key: &str| fields.get(key).and_then(lenient_count);

        Some(Self {
            text,
            truncated: fields
                .get("truncated")
                .and_then(Value::as_bool)
                .unwrap_or(false),
            filename: fields
                .get("filename")
                .and_then(Value::as_str)
                .map(str::to_string),
            page_count: count("page_count")
                .and_then(|n| u32::try_from(n).ok())
                .unwrap_or(0),
            char_count: count("char_count")
                .and_then(|n| usize::try_from(n).ok())
                .unwrap_or(0),
        })
    }

    pub fn to_value(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or_else(|_| serde_json::json!({}))
    }
}

/// A non-negative whole number, whether stored as an integer or a float.
fn lenient_count(value: &Value) -> Option<u64> {
    value.as_u64().or_else(|| {
        value
            .as_f64()
            .filter(|f| f.is_finite() && *f >= 0.0 && f.fract() == 0.0)
            .map(|f| f as u64)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prefix_policy_truncates_on_char_boundary() {
        let text = "é".repeat(1500);
        let meta = DocumentMetadata::build(&text, None, 3, MetadataTextPolicy::Prefix, 1000);
        assert_eq!(meta.text.chars().count(), 1000);
        assert!(meta.truncated);
        assert_eq!(meta.char_count, 1500);
    }

    #[test]
    fn test_prefix_policy_keeps_short_text_whole() {
        let meta = DocumentMetadata::build("short", None, 1, MetadataTextPolicy::Prefix, 1000);
        assert_eq!(meta.text, "short");
        assert!(!meta.truncated);
    }

    #[test]
    fn test_full_policy_stores_everything() {
        let text = "x".repeat(5000);
        let meta = DocumentMetadata::build(&text, Some("a.pdf".into()), 2, MetadataTextPolicy::Full, 10);
        assert_eq!(meta.text.len(), 5000);
        assert!(!meta.truncated);
        assert_eq!(meta.filename.as_deref(), Some("a.pdf"));
    }

    #[test]
    fn test_reads_legacy_full_text_key() {
        let value = serde_json::json!({ "full_text": "legacy body" });
        let meta = DocumentMetadata::from_value(&value).expect("legacy metadata");
        assert_eq!(meta.text, "legacy body");
        assert_eq!(meta.page_count, 0);
    }

    #[test]
    fn test_float_counters_keep_text() {
        let value = serde_json::json!({
            "text": "grounding text",
            "page_count": 3.0,
            "char_count": 14.0,
            "truncated": false,
        });
        let meta = DocumentMetadata::from_value(&value).expect("float counters");
        assert_eq!(meta.text, "grounding text");
        assert_eq!(meta.page_count, 3);
        assert_eq!(meta.char_count, 14);
    }

    #[test]
    fn test_odd_auxiliary_fields_do_not_hide_text() {
        let value = serde_json::json!({
            "text": "still here",
            "filename": 42,
            "page_count": "three",
            "truncated": "no",
        });
        let meta = DocumentMetadata::from_value(&value).expect("text survives");
        assert_eq!(meta.text, "still here");
        assert_eq!(meta.filename, None);
        assert_eq!(meta.page_count, 0);
        assert!(!meta.truncated);
    }

    #[test]
    fn test_metadata_without_text_is_unusable() {
        let value = serde_json::json!({ "filename": "a.pdf" });
        assert!(DocumentMetadata::from_value(&value).is_none());
    }

    #[test]
    fn test_value_shape_is_flat() {
        let meta = DocumentMetadata::build("abc", None, 1, MetadataTextPolicy::Full, 0);
        let value = meta.to_value();
        assert_eq!(value["text"], "abc");
        assert_eq!(value["char_count"], 3);
        assert!(value.get("filename").is_none());
    }
}

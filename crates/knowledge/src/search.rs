//! Metadata filters for vector search
//!
//! Scopes a similarity search to one user's content plus global content,
//! to chunks carrying every requested tag, and to chunks whose metadata
//! matches typed key/value constraints. Keys are sanitized on construction
//! so they can be interpolated into store queries safely.

use crate::types::ChunkRecord;
use relay_core::{AppError, AppResult};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Strip everything except ASCII alphanumerics and underscores.
pub fn sanitize_key(raw: &str) -> String {
    raw.chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '_')
        .collect()
}

/// A metadata key that is safe to interpolate into a query.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct FilterKey(String);

impl FilterKey {
    /// Sanitize `raw`; fails when nothing usable remains.
    pub fn new(raw: &str) -> AppResult<Self> {
        let sanitized = sanitize_key(raw);
        if sanitized.is_empty() {
            return Err(AppError::InvalidInput(format!(
                "Metadata filter key '{}' has no alphanumeric characters",
                raw
            )));
        }
        if sanitized != raw {
            tracing::debug!("Sanitized metadata filter key '{}' to '{}'", raw, sanitized);
        }
        Ok(Self(sanitized))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for FilterKey {
    type Error = AppError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(&value)
    }
}

impl From<FilterKey> for String {
    fn from(key: FilterKey) -> Self {
        key.0
    }
}

impl fmt::Display for FilterKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A typed metadata value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FilterValue {
    Bool(bool),
    Integer(i64),
    Float(f64),
    Text(String),
}

impl FilterValue {
    /// Parse a literal: `true`/`false`, integers, floats, otherwise text.
    /// Surrounding single or double quotes force text.
    pub fn parse(raw: &str) -> Self {
        let quoted = raw.len() >= 2
            && ((raw.starts_with('"') && raw.ends_with('"'))
                || (raw.starts_with('\'') && raw.ends_with('\'')));
        if quoted {
            return FilterValue::Text(raw[1..raw.len() - 1].to_string());
        }

        if let Ok(b) = raw.parse::<bool>() {
            return FilterValue::Bool(b);
        }
        if let Ok(i) = raw.parse::<i64>() {
            return FilterValue::Integer(i);
        }
        if let Ok(f) = raw.parse::<f64>() {
            return FilterValue::Float(f);
        }
        FilterValue::Text(raw.to_string())
    }

    /// Compare against a JSON metadata value.
    pub fn matches(&self, value: &serde_json::Value) -> bool {
        match (self, value) {
            (FilterValue::Bool(expected), serde_json::Value::Bool(actual)) => expected == actual,
            (FilterValue::Integer(expected), serde_json::Value::Number(n)) => {
                n.as_i64() == Some(*expected)
                    || n.as_f64().is_some_and(|f| f == *expected as f64)
            }
            (FilterValue::Float(expected), serde_json::Value::Number(n)) => {
                n.as_f64().is_some_and(|f| (f - expected).abs() < f64::EPSILON)
            }
            (FilterValue::Text(expected), serde_json::Value::String(actual)) => expected == actual,
            _ => false,
        }
    }
}

impl From<&str> for FilterValue {
    fn from(value: &str) -> Self {
        FilterValue::Text(value.to_string())
    }
}

impl From<String> for FilterValue {
    fn from(value: String) -> Self {
        FilterValue::Text(value)
    }
}

impl From<i64> for FilterValue {
    fn from(value: i64) -> Self {
        FilterValue::Integer(value)
    }
}

impl From<f64> for FilterValue {
    fn from(value: f64) -> Self {
        FilterValue::Float(value)
    }
}

impl From<bool> for FilterValue {
    fn from(value: bool) -> Self {
        FilterValue::Bool(value)
    }
}

/// Scoping applied to one similarity search call.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetadataFilter {
    /// When set, only this user's content and global content match
    pub user_id: Option<String>,

    /// Every tag must be present on a chunk (case-insensitive)
    pub tags: Vec<String>,

    /// Exact metadata matches
    pub metadata: BTreeMap<FilterKey, FilterValue>,
}

impl MetadataFilter {
    /// Create a new empty filter
    pub fn new() -> Self {
        Self::default()
    }

    /// Restrict to one user's content plus global content
    pub fn with_user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    /// Require tags
    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags.extend(tags.into_iter().map(Into::into));
        self
    }

    /// Require a metadata value; the key is sanitized first.
    pub fn with_metadata(mut self, key: &str, value: impl Into<FilterValue>) -> AppResult<Self> {
        self.metadata.insert(FilterKey::new(key)?, value.into());
        Ok(self)
    }

    /// Require a metadata value under an already validated key.
    pub fn insert(&mut self, key: FilterKey, value: FilterValue) {
        self.metadata.insert(key, value);
    }

    /// Check if any constraint is set
    pub fn has_filters(&self) -> bool {
        self.user_id.is_some() || !self.tags.is_empty() || !self.metadata.is_empty()
    }

    /// Whether a stored chunk satisfies every constraint.
    pub fn matches(&self, chunk: &ChunkRecord) -> bool {
        if let Some(user_id) = &self.user_id {
            match &chunk.user_id {
                None => {}
                Some(owner) if owner == user_id => {}
                Some(_) => return false,
            }
        }

        let tags_match = self.tags.iter().all(|wanted| {
            chunk
                .tags
                .iter()
                .any(|have| have.eq_ignore_ascii_case(wanted))
        });
        if !tags_match {
            return false;
        }

        self.metadata.iter().all(|(key, expected)| {
            chunk
                .metadata
                .get(key.as_str())
                .is_some_and(|actual| expected.matches(actual))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn chunk(user_id: Option<&str>, tags: &[&str], metadata: serde_json::Value) -> ChunkRecord {
        ChunkRecord {
            chunk_id: "c1".to_string(),
            document_id: "d1".to_string(),
            collection_id: "kb".to_string(),
            document_title: None,
            content: "text".to_string(),
            tags: tags.iter().map(|t| t.to_string()).collect(),
            user_id: user_id.map(str::to_string),
            metadata: metadata.as_object().cloned().unwrap_or_default(),
            embedding: vec![1.0],
        }
    }

    #[test]
    fn test_sanitize_key() {
        assert_eq!(sanitize_key("status"), "status");
        assert_eq!(sanitize_key("doc_type"), "doc_type");
        assert_eq!(sanitize_key("a'); DROP TABLE chunks;--"), "aDROPTABLEchunks");
        assert_eq!(sanitize_key("$.path"), "path");
    }

    #[test]
    fn test_filter_key_rejects_empty_after_sanitizing() {
        assert!(FilterKey::new("'--").is_err());
        assert!(FilterKey::new("").is_err());
        assert_eq!(FilterKey::new("lang-code").unwrap().as_str(), "langcode");
    }

    #[test]
    fn test_filter_key_deserialization_sanitizes() {
        let key: FilterKey = serde_json::from_str("\"my.key\"").unwrap();
        assert_eq!(key.as_str(), "mykey");
        assert!(serde_json::from_str::<FilterKey>("\"...\"").is_err());
    }

    #[test]
    fn test_user_isolation() {
        let filter = MetadataFilter::new().with_user("alice");

        assert!(filter.matches(&chunk(Some("alice"), &[], json!({}))));
        assert!(filter.matches(&chunk(None, &[], json!({}))));
        assert!(!filter.matches(&chunk(Some("bob"), &[], json!({}))));
    }

    #[test]
    fn test_tags_must_all_match() {
        let filter = MetadataFilter::new().with_tags(["api", "v2"]);

        assert!(filter.matches(&chunk(None, &["API", "v2", "beta"], json!({}))));
        assert!(!filter.matches(&chunk(None, &["api"], json!({}))));
    }

    #[test]
    fn test_metadata_typed_match() {
        let filter = MetadataFilter::new()
            .with_metadata("status", "published")
            .unwrap()
            .with_metadata("version", 3i64)
            .unwrap();

        assert!(filter.matches(&chunk(None, &[], json!({"status": "published", "version": 3}))));
        assert!(!filter.matches(&chunk(None, &[], json!({"status": "draft", "version": 3}))));
        assert!(!filter.matches(&chunk(None, &[], json!({"status": "published", "version": "3"}))));
        assert!(!filter.matches(&chunk(None, &[], json!({"status": "published"}))));
    }

    #[test]
    fn test_filter_value_parse() {
        assert_eq!(FilterValue::parse("true"), FilterValue::Bool(true));
        assert_eq!(FilterValue::parse("42"), FilterValue::Integer(42));
        assert_eq!(FilterValue::parse("0.5"), FilterValue::Float(0.5));
        assert_eq!(FilterValue::parse("en"), FilterValue::Text("en".to_string()));
        assert_eq!(FilterValue::parse("'42'"), FilterValue::Text("42".to_string()));
    }

    #[test]
    fn test_empty_filter_matches_everything() {
        let filter = MetadataFilter::new();
        assert!(!filter.has_filters());
        assert!(filter.matches(&chunk(Some("bob"), &["x"], json!({"a": 1}))));
    }
}

//! Knowledge system type definitions.

use crate::search::{FilterKey, FilterValue};
use relay_core::{AppError, AppResult};
use serde::{Deserialize, Serialize};

/// How a chatbot may use a linked collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccessLevel {
    #[default]
    Read,
    ReadWrite,
}

/// A collection's binding to a chatbot.
///
/// Links are owned by collaborators outside this crate; routing and
/// retrieval only read them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KnowledgeLink {
    pub collection_id: String,

    /// Display name shown in formatted context
    #[serde(default)]
    pub collection_name: String,

    #[serde(default)]
    pub access_level: AccessLevel,

    /// Relative trust/priority signal in 0.0..=1.0
    #[serde(default = "default_context_weight")]
    pub context_weight: f32,

    /// Tie-break for equal weights, lower is preferred
    #[serde(default = "default_priority")]
    pub priority: i32,

    #[serde(default)]
    pub intent_keywords: Vec<String>,

    /// Extra metadata constraint, e.g. `status=published, lang=en`
    #[serde(default)]
    pub filter: Option<String>,

    /// Per-collection override of the request chunk budget
    #[serde(default)]
    pub max_chunks: Option<usize>,

    /// Per-collection override of the request similarity threshold
    #[serde(default)]
    pub similarity_threshold: Option<f32>,

    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_context_weight() -> f32 {
    1.0
}

fn default_priority() -> i32 {
    100
}

fn default_enabled() -> bool {
    true
}

impl KnowledgeLink {
    /// Create an enabled link with default weight and priority.
    pub fn new(collection_id: impl Into<String>, collection_name: impl Into<String>) -> Self {
        Self {
            collection_id: collection_id.into(),
            collection_name: collection_name.into(),
            access_level: AccessLevel::default(),
            context_weight: default_context_weight(),
            priority: default_priority(),
            intent_keywords: Vec::new(),
            filter: None,
            max_chunks: None,
            similarity_threshold: None,
            enabled: true,
        }
    }

    pub fn with_weight(mut self, context_weight: f32) -> Self {
        self.context_weight = context_weight;
        self
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_keywords<I, S>(mut self, keywords: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.intent_keywords = keywords.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_filter(mut self, filter: impl Into<String>) -> Self {
        self.filter = Some(filter.into());
        self
    }

    pub fn with_limits(mut self, max_chunks: Option<usize>, threshold: Option<f32>) -> Self {
        self.max_chunks = max_chunks;
        self.similarity_threshold = threshold;
        self
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    /// Reject malformed link data.
    pub fn validate(&self) -> AppResult<()> {
        if self.collection_id.trim().is_empty() {
            return Err(AppError::Config(
                "Knowledge link has an empty collection id".to_string(),
            ));
        }

        if !self.context_weight.is_finite() || !(0.0..=1.0).contains(&self.context_weight) {
            return Err(AppError::Config(format!(
                "Knowledge link '{}' has context weight {} outside 0.0..=1.0",
                self.collection_id, self.context_weight
            )));
        }

        if let Some(threshold) = self.similarity_threshold {
            if !(0.0..=1.0).contains(&threshold) {
                return Err(AppError::Config(format!(
                    "Knowledge link '{}' has similarity threshold {} outside 0.0..=1.0",
                    self.collection_id, threshold
                )));
            }
        }

        if self.max_chunks == Some(0) {
            return Err(AppError::Config(format!(
                "Knowledge link '{}' has a zero max chunks override",
                self.collection_id
            )));
        }

        self.parsed_filter()?;
        Ok(())
    }

    /// Parse the link's filter expression into typed metadata constraints.
    ///
    /// The expression is a list of `key=value` pairs separated by commas.
    pub fn parsed_filter(&self) -> AppResult<Vec<(FilterKey, FilterValue)>> {
        let Some(expression) = self.filter.as_deref() else {
            return Ok(Vec::new());
        };

        expression
            .split(',')
            .map(str::trim)
            .filter(|clause| !clause.is_empty())
            .map(|clause| {
                let (key, value) = clause.split_once('=').ok_or_else(|| {
                    AppError::Config(format!(
                        "Knowledge link '{}' has malformed filter clause '{}'",
                        self.collection_id, clause
                    ))
                })?;
                let key = FilterKey::new(key.trim()).map_err(|e| {
                    AppError::Config(format!(
                        "Knowledge link '{}' filter: {}",
                        self.collection_id, e
                    ))
                })?;
                Ok((key, FilterValue::parse(value.trim())))
            })
            .collect()
    }
}

/// Outcome of one routing decision.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RouteResult {
    /// Selected collections, best first
    pub selected: Vec<KnowledgeLink>,

    /// True when no intent matched and every enabled link was selected
    pub fallback_to_all: bool,

    /// At most one keyword per selected link, in selection order
    pub matched_intents: Vec<String>,

    pub trace_id: String,
}

impl RouteResult {
    pub(crate) fn new(
        selected: Vec<KnowledgeLink>,
        fallback_to_all: bool,
        matched_intents: Vec<String>,
    ) -> Self {
        Self {
            selected,
            fallback_to_all,
            matched_intents,
            trace_id: uuid::Uuid::new_v4().to_string(),
        }
    }

    pub fn collection_ids(&self) -> Vec<&str> {
        self.selected
            .iter()
            .map(|l| l.collection_id.as_str())
            .collect()
    }
}

/// One retrieved content unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VectorSearchResult {
    pub chunk_id: String,

    pub document_id: String,

    pub collection_id: String,

    #[serde(default)]
    pub collection_name: String,

    #[serde(default)]
    pub document_title: Option<String>,

    pub content: String,

    /// Closeness to the query, higher is closer
    pub similarity: f32,

    #[serde(default)]
    pub tags: Vec<String>,

    #[serde(default)]
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

/// Retrieval results are search results annotated with their collection name.
pub type RetrievalResult = VectorSearchResult;

/// A stored, embedded chunk as held by a vector store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChunkRecord {
    pub chunk_id: String,

    pub document_id: String,

    pub collection_id: String,

    #[serde(default)]
    pub document_title: Option<String>,

    pub content: String,

    #[serde(default)]
    pub tags: Vec<String>,

    /// Owner; `None` marks global content visible to every user
    #[serde(default)]
    pub user_id: Option<String>,

    #[serde(default)]
    pub metadata: serde_json::Map<String, serde_json::Value>,

    pub embedding: Vec<f32>,
}

impl ChunkRecord {
    /// Convert into a search result with the given similarity.
    pub fn to_result(&self, similarity: f32) -> VectorSearchResult {
        VectorSearchResult {
            chunk_id: self.chunk_id.clone(),
            document_id: self.document_id.clone(),
            collection_id: self.collection_id.clone(),
            collection_name: String::new(),
            document_title: self.document_title.clone(),
            content: self.content.clone(),
            similarity,
            tags: self.tags.clone(),
            metadata: self.metadata.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_link_defaults_from_yaml() {
        let yaml = r#"
collectionId: kb-faq
collectionName: FAQ
intentKeywords: [faq, question]
"#;
        let link: KnowledgeLink = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(link.context_weight, 1.0);
        assert_eq!(link.priority, 100);
        assert!(link.enabled);
        assert_eq!(link.access_level, AccessLevel::Read);
        assert!(link.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_bad_weight() {
        assert!(KnowledgeLink::new("kb", "KB").with_weight(1.5).validate().is_err());
        assert!(KnowledgeLink::new("kb", "KB")
            .with_weight(f32::NAN)
            .validate()
            .is_err());
        assert!(KnowledgeLink::new("", "KB").validate().is_err());
    }

    #[test]
    fn test_parsed_filter_types_values() {
        let link = KnowledgeLink::new("kb", "KB").with_filter("status=published, version=3, beta=true");
        let parsed = link.parsed_filter().unwrap();

        assert_eq!(parsed.len(), 3);
        assert_eq!(parsed[0].0.as_str(), "status");
        assert_eq!(parsed[0].1, FilterValue::Text("published".to_string()));
        assert_eq!(parsed[1].1, FilterValue::Integer(3));
        assert_eq!(parsed[2].1, FilterValue::Bool(true));
    }

    #[test]
    fn test_parsed_filter_rejects_malformed_clause() {
        let link = KnowledgeLink::new("kb", "KB").with_filter("status published");
        assert!(matches!(link.parsed_filter(), Err(AppError::Config(_))));

        let link = KnowledgeLink::new("kb", "KB").with_filter("'; DROP=1");
        // Key sanitizes to "DROP", which is acceptable
        assert_eq!(link.parsed_filter().unwrap()[0].0.as_str(), "DROP");

        let link = KnowledgeLink::new("kb", "KB").with_filter("--=1");
        assert!(link.validate().is_err());
    }

    #[test]
    fn test_route_result_trace_ids_are_unique() {
        let a = RouteResult::new(Vec::new(), true, Vec::new());
        let b = RouteResult::new(Vec::new(), true, Vec::new());
        assert_ne!(a.trace_id, b.trace_id);
    }
}

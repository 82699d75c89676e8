//! Retrieval request and response types.

use crate::search::{FilterKey, FilterValue};
use crate::types::{KnowledgeLink, RetrievalResult};
use relay_core::config::RetrievalSettings;
use relay_core::{AppError, AppResult, FailureMode};
use serde::Serialize;
use std::collections::BTreeMap;
use std::time::Duration;

/// Default number of chunks kept after the cross-collection merge.
pub const DEFAULT_MAX_CHUNKS: usize = 5;

/// Default minimum similarity for a chunk to be returned.
pub const DEFAULT_SIMILARITY_THRESHOLD: f32 = 0.3;

/// Options for one `retrieve_context` call.
#[derive(Debug, Clone)]
pub struct RetrieveOptions {
    pub chatbot_id: String,

    pub conversation_id: Option<String>,

    /// Scopes results to this user's content plus global content
    pub user_id: Option<String>,

    pub query: String,

    /// Overall chunk budget after merging
    pub max_chunks: usize,

    pub similarity_threshold: f32,

    /// Search these links directly instead of routing
    pub collections: Option<Vec<KnowledgeLink>>,

    /// Tags every chunk must carry
    pub tags: Vec<String>,

    pub metadata: BTreeMap<FilterKey, FilterValue>,

    /// Upper bound on embedding plus search time
    pub deadline: Option<Duration>,

    pub failure_mode: FailureMode,
}

impl RetrieveOptions {
    pub fn new(chatbot_id: impl Into<String>, query: impl Into<String>) -> Self {
        Self {
            chatbot_id: chatbot_id.into(),
            conversation_id: None,
            user_id: None,
            query: query.into(),
            max_chunks: DEFAULT_MAX_CHUNKS,
            similarity_threshold: DEFAULT_SIMILARITY_THRESHOLD,
            collections: None,
            tags: Vec::new(),
            metadata: BTreeMap::new(),
            deadline: None,
            failure_mode: FailureMode::default(),
        }
    }

    /// Apply configured budget, threshold, deadline and failure mode.
    pub fn with_settings(mut self, settings: &RetrievalSettings) -> Self {
        self.max_chunks = settings.max_chunks;
        self.similarity_threshold = settings.similarity_threshold;
        self.deadline = Some(Duration::from_millis(settings.search_deadline_ms));
        self.failure_mode = settings.failure_mode;
        self
    }

    pub fn with_user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    pub fn with_conversation(mut self, conversation_id: impl Into<String>) -> Self {
        self.conversation_id = Some(conversation_id.into());
        self
    }

    pub fn with_max_chunks(mut self, max_chunks: usize) -> Self {
        self.max_chunks = max_chunks;
        self
    }

    pub fn with_threshold(mut self, threshold: f32) -> Self {
        self.similarity_threshold = threshold;
        self
    }

    pub fn with_collections(mut self, collections: Vec<KnowledgeLink>) -> Self {
        self.collections = Some(collections);
        self
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags.extend(tags.into_iter().map(Into::into));
        self
    }

    pub fn with_metadata(mut self, key: &str, value: impl Into<FilterValue>) -> AppResult<Self> {
        self.metadata.insert(FilterKey::new(key)?, value.into());
        Ok(self)
    }

    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn with_failure_mode(mut self, failure_mode: FailureMode) -> Self {
        self.failure_mode = failure_mode;
        self
    }

    pub(crate) fn validate(&self) -> AppResult<()> {
        if self.query.trim().is_empty() {
            return Err(AppError::InvalidInput("Query text is empty".to_string()));
        }
        if self.max_chunks == 0 {
            return Err(AppError::InvalidInput(
                "max_chunks must be at least 1".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.similarity_threshold) {
            return Err(AppError::InvalidInput(format!(
                "Similarity threshold {} is outside 0.0..=1.0",
                self.similarity_threshold
            )));
        }
        Ok(())
    }
}

/// A collection whose search failed in partial mode.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CollectionFailure {
    pub collection_id: String,
    pub error: String,
}

/// Result of one `retrieve_context` call.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RetrieveContextResult {
    /// Merged chunks, best first, at most `max_chunks`
    pub chunks: Vec<RetrievalResult>,

    /// Prompt-ready text block, empty when no chunks were retained
    pub formatted_context: String,

    /// Chunks returned by all collections before truncation
    pub total_retrieved: usize,

    pub duration_ms: u64,

    pub embedding_model: String,

    /// Trace id of the routing decision, when the router was used
    pub trace_id: Option<String>,

    pub fallback_to_all: bool,

    /// Collections that failed in partial mode
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub failures: Vec<CollectionFailure>,
}

impl RetrieveContextResult {
    pub fn is_partial(&self) -> bool {
        !self.failures.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let options = RetrieveOptions::new("bot", "query");
        assert_eq!(options.max_chunks, 5);
        assert_eq!(options.similarity_threshold, 0.3);
        assert_eq!(options.failure_mode, FailureMode::AllOrNothing);
        assert!(options.validate().is_ok());
    }

    #[test]
    fn test_with_settings() {
        let settings = RetrievalSettings {
            max_chunks: 8,
            similarity_threshold: 0.5,
            search_deadline_ms: 250,
            failure_mode: FailureMode::Partial,
        };
        let options = RetrieveOptions::new("bot", "q").with_settings(&settings);
        assert_eq!(options.max_chunks, 8);
        assert_eq!(options.deadline, Some(Duration::from_millis(250)));
        assert_eq!(options.failure_mode, FailureMode::Partial);
    }

    #[test]
    fn test_validate_rejects_unusable_options() {
        assert!(RetrieveOptions::new("bot", "  ").validate().is_err());
        assert!(RetrieveOptions::new("bot", "q")
            .with_max_chunks(0)
            .validate()
            .is_err());
        assert!(RetrieveOptions::new("bot", "q")
            .with_threshold(1.2)
            .validate()
            .is_err());
        assert!(RetrieveOptions::new("bot", "q")
            .with_metadata("!!", "x")
            .is_err());
    }
}

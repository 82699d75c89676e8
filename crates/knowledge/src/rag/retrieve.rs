//! Retrieval orchestration.
//!
//! One query embedding is generated first. Every candidate collection is then
//! searched concurrently, results are merged and ranked by similarity,
//! truncated to the chunk budget and formatted into a context block. The
//! caller's deadline bounds the whole pipeline; when it expires every
//! in-flight search is aborted and the call fails with `Cancelled`.

use crate::rag::context::{format_context, sort_by_similarity};
use crate::rag::log::{RetrievalLogEntry, RetrievalLogSink, TracingLogSink};
use crate::rag::types::{CollectionFailure, RetrieveContextResult, RetrieveOptions};
use crate::router::QueryRouter;
use crate::search::MetadataFilter;
use crate::store::VectorSearchStore;
use crate::types::{KnowledgeLink, VectorSearchResult};
use chrono::Utc;
use relay_core::{AppError, AppResult, FailureMode};
use relay_llm::{EmbeddingProvider, EmbeddingRequest};
use std::future::Future;
use std::sync::Arc;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tracing::Instrument;

/// Drives embedding, parallel search, merge and formatting.
#[derive(Clone)]
pub struct RetrievalOrchestrator {
    router: QueryRouter,
    embedder: Arc<dyn EmbeddingProvider>,
    store: Arc<dyn VectorSearchStore>,
    log_sink: Arc<dyn RetrievalLogSink>,
    embedding_model: Option<String>,
}

impl RetrievalOrchestrator {
    pub fn new(
        router: QueryRouter,
        embedder: Arc<dyn EmbeddingProvider>,
        store: Arc<dyn VectorSearchStore>,
    ) -> Self {
        Self {
            router,
            embedder,
            store,
            log_sink: Arc::new(TracingLogSink),
            embedding_model: None,
        }
    }

    pub fn with_log_sink(mut self, log_sink: Arc<dyn RetrievalLogSink>) -> Self {
        self.log_sink = log_sink;
        self
    }

    /// Request a specific embedding model instead of the provider default.
    pub fn with_embedding_model(mut self, model: impl Into<String>) -> Self {
        self.embedding_model = Some(model.into());
        self
    }

    pub fn router(&self) -> &QueryRouter {
        &self.router
    }

    /// Retrieve and format context for a query.
    pub async fn retrieve_context(
        &self,
        options: RetrieveOptions,
    ) -> AppResult<RetrieveContextResult> {
        let span = tracing::info_span!(
            "retrieve_context",
            chatbot = %options.chatbot_id,
            trace_id = tracing::field::Empty,
        );
        self.run(options).instrument(span).await
    }

    async fn run(&self, options: RetrieveOptions) -> AppResult<RetrieveContextResult> {
        options.validate()?;
        let started = Instant::now();
        let deadline = options.deadline.map(|d| started + d);

        let (candidates, trace_id, fallback_to_all) = match &options.collections {
            Some(links) => (
                links.iter().filter(|l| l.enabled).cloned().collect::<Vec<_>>(),
                None,
                false,
            ),
            None => {
                let route = within_deadline(
                    deadline,
                    "routing",
                    self.router.route(&options.chatbot_id, &options.query),
                )
                .await??;
                tracing::Span::current().record("trace_id", route.trace_id.as_str());
                (route.selected, Some(route.trace_id), route.fallback_to_all)
            }
        };

        if candidates.is_empty() {
            return Err(AppError::Config(format!(
                "Chatbot '{}' has no enabled knowledge collections",
                options.chatbot_id
            )));
        }

        // Filters are validated up front so no search starts with a bad link
        let filters = candidates
            .iter()
            .map(|link| collection_filter(&options, link))
            .collect::<AppResult<Vec<_>>>()?;

        let mut request = EmbeddingRequest::new(vec![options.query.clone()]);
        if let Some(model) = &self.embedding_model {
            request = request.with_model(model.clone());
        }
        let mut embedding = within_deadline(deadline, "query embedding", self.embedder.embed(&request))
            .await??;
        let query_vector: Arc<[f32]> = embedding
            .vectors
            .pop()
            .ok_or_else(|| AppError::Embedding("No embedding returned for query".to_string()))?
            .into();
        let embedding_model = embedding.model;

        tracing::debug!(
            collections = candidates.len(),
            model = %embedding_model,
            "Searching collections"
        );

        let outcome = self
            .search_all(&options, &candidates, filters, query_vector, deadline)
            .await?;

        let mut merged: Vec<VectorSearchResult> = outcome.results.into_iter().flatten().collect();
        let total_retrieved = merged.len();
        sort_by_similarity(&mut merged);
        merged.truncate(options.max_chunks);

        let formatted_context = format_context(&merged);
        let duration_ms = started.elapsed().as_millis() as u64;

        tracing::info!(
            retrieved = total_retrieved,
            kept = merged.len(),
            failed = outcome.failures.len(),
            duration_ms,
            "Retrieved context"
        );

        self.record(RetrievalLogEntry {
            chatbot_id: options.chatbot_id.clone(),
            conversation_id: options.conversation_id.clone(),
            user_id: options.user_id.clone(),
            query: options.query.clone(),
            chunk_ids: merged.iter().map(|r| r.chunk_id.clone()).collect(),
            similarities: merged.iter().map(|r| r.similarity).collect(),
            duration_ms,
            embedding_model: embedding_model.clone(),
            trace_id: trace_id.clone(),
            created_at: Utc::now(),
        });

        Ok(RetrieveContextResult {
            chunks: merged,
            formatted_context,
            total_retrieved,
            duration_ms,
            embedding_model,
            trace_id,
            fallback_to_all,
            failures: outcome.failures,
        })
    }

    /// Search every candidate concurrently. Results come back indexed by
    /// candidate position so the merge order does not depend on timing.
    async fn search_all(
        &self,
        options: &RetrieveOptions,
        candidates: &[KnowledgeLink],
        filters: Vec<MetadataFilter>,
        query_vector: Arc<[f32]>,
        deadline: Option<Instant>,
    ) -> AppResult<SearchOutcome> {
        let mut tasks = JoinSet::new();

        for (index, (link, filter)) in candidates.iter().zip(filters).enumerate() {
            let store = Arc::clone(&self.store);
            let vector = Arc::clone(&query_vector);
            let collection_id = link.collection_id.clone();
            let limit = link.max_chunks.unwrap_or(options.max_chunks);
            let threshold = link
                .similarity_threshold
                .unwrap_or(options.similarity_threshold);

            tasks.spawn(
                async move {
                    let result = store
                        .search(&collection_id, &vector, &filter, limit, threshold)
                        .await;
                    (index, result)
                }
                .in_current_span(),
            );
        }

        let mut results: Vec<Option<Vec<VectorSearchResult>>> = vec![None; candidates.len()];
        let mut errors: Vec<(usize, AppError)> = Vec::new();

        loop {
            let joined = match within_deadline(deadline, "collection search", tasks.join_next()).await {
                Ok(Some(joined)) => joined,
                Ok(None) => break,
                Err(e) => {
                    tasks.abort_all();
                    return Err(e);
                }
            };

            let (index, result) =
                joined.map_err(|e| AppError::Other(format!("Search task failed: {}", e)))?;
            let link = &candidates[index];

            match result {
                Ok(mut found) => {
                    for chunk in &mut found {
                        if chunk.collection_name.is_empty() {
                            chunk.collection_name = link.collection_name.clone();
                        }
                    }
                    results[index] = Some(found);
                }
                Err(e) => {
                    let e = search_error(&link.collection_id, e);
                    match options.failure_mode {
                        FailureMode::AllOrNothing => {
                            tasks.abort_all();
                            return Err(e);
                        }
                        FailureMode::Partial => {
                            tracing::warn!(collection = %link.collection_id, error = %e, "Collection search failed");
                            errors.push((index, e));
                        }
                    }
                }
            }
        }

        errors.sort_by_key(|(index, _)| *index);
        if results.iter().all(Option::is_none) && !errors.is_empty() {
            return Err(errors.swap_remove(0).1);
        }

        let failures = errors
            .into_iter()
            .map(|(index, e)| CollectionFailure {
                collection_id: candidates[index].collection_id.clone(),
                error: e.to_string(),
            })
            .collect();

        Ok(SearchOutcome {
            results: results.into_iter().flatten().collect(),
            failures,
        })
    }

    fn record(&self, entry: RetrievalLogEntry) {
        let sink = Arc::clone(&self.log_sink);
        tokio::spawn(
            async move {
                if let Err(e) = sink.record(entry).await {
                    tracing::warn!(error = %e, "Failed to record retrieval");
                }
            }
            .in_current_span(),
        );
    }
}

struct SearchOutcome {
    results: Vec<Vec<VectorSearchResult>>,
    failures: Vec<CollectionFailure>,
}

/// Combine request constraints with the link's own filter expression.
/// The link's constraints win on key collisions.
fn collection_filter(options: &RetrieveOptions, link: &KnowledgeLink) -> AppResult<MetadataFilter> {
    let mut filter = MetadataFilter::new().with_tags(options.tags.iter().cloned());
    filter.user_id = options.user_id.clone();

    for (key, value) in &options.metadata {
        filter.insert(key.clone(), value.clone());
    }
    for (key, value) in link.parsed_filter()? {
        filter.insert(key, value);
    }

    Ok(filter)
}

fn search_error(collection_id: &str, error: AppError) -> AppError {
    match error {
        AppError::Search { .. } | AppError::Cancelled(_) => error,
        other => AppError::search(collection_id, other.to_string()),
    }
}

async fn within_deadline<F: Future>(
    deadline: Option<Instant>,
    stage: &str,
    future: F,
) -> AppResult<F::Output> {
    match deadline {
        Some(at) => tokio::time::timeout_at(at, future)
            .await
            .map_err(|_| AppError::Cancelled(format!("Deadline expired during {}", stage))),
        None => Ok(future.await),
    }
}

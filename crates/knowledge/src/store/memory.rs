//! In-memory vector store.

use super::{cosine_similarity, rank_scored, VectorSearchStore};
use crate::search::MetadataFilter;
use crate::types::{ChunkRecord, VectorSearchResult};
use parking_lot::RwLock;
use relay_core::AppResult;
use std::collections::HashMap;

/// Brute-force store keyed by collection id.
#[derive(Debug, Default)]
pub struct InMemoryVectorStore {
    collections: RwLock<HashMap<String, Vec<ChunkRecord>>>,
}

impl InMemoryVectorStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a chunk, keyed by chunk id within its collection.
    pub fn upsert(&self, record: ChunkRecord) {
        let mut collections = self.collections.write();
        let chunks = collections.entry(record.collection_id.clone()).or_default();
        match chunks.iter_mut().find(|c| c.chunk_id == record.chunk_id) {
            Some(existing) => *existing = record,
            None => chunks.push(record),
        }
    }

    pub fn extend(&self, records: impl IntoIterator<Item = ChunkRecord>) {
        for record in records {
            self.upsert(record);
        }
    }

    /// Number of chunks held for a collection.
    pub fn len(&self, collection_id: &str) -> usize {
        self.collections
            .read()
            .get(collection_id)
            .map_or(0, Vec::len)
    }

    pub fn is_empty(&self) -> bool {
        self.collections.read().values().all(Vec::is_empty)
    }
}

#[async_trait::async_trait]
impl VectorSearchStore for InMemoryVectorStore {
    async fn search(
        &self,
        collection_id: &str,
        query_vector: &[f32],
        filter: &MetadataFilter,
        limit: usize,
        threshold: f32,
    ) -> AppResult<Vec<VectorSearchResult>> {
        let scored: Vec<VectorSearchResult> = {
            let collections = self.collections.read();
            collections
                .get(collection_id)
                .map(|chunks| {
                    chunks
                        .iter()
                        .filter(|c| filter.matches(c))
                        .map(|c| c.to_result(cosine_similarity(query_vector, &c.embedding)))
                        .collect()
                })
                .unwrap_or_default()
        };

        Ok(rank_scored(scored, limit, threshold))
    }
}

//! Vector search stores.
//!
//! A store holds embedded chunks grouped by collection and answers
//! similarity searches scoped by a [`MetadataFilter`].

pub mod memory;
pub mod sqlite;

pub use memory::InMemoryVectorStore;
pub use sqlite::SqliteVectorStore;

use crate::search::MetadataFilter;
use crate::types::VectorSearchResult;
use relay_core::AppResult;

/// Similarity search over one collection.
#[async_trait::async_trait]
pub trait VectorSearchStore: Send + Sync {
    /// Return at most `limit` chunks of `collection_id` that satisfy `filter`
    /// and score at least `threshold`, best first.
    async fn search(
        &self,
        collection_id: &str,
        query_vector: &[f32],
        filter: &MetadataFilter,
        limit: usize,
        threshold: f32,
    ) -> AppResult<Vec<VectorSearchResult>>;
}

/// Calculate cosine similarity between two vectors.
///
/// Mismatched lengths and zero vectors score 0.0.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let dot_product: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }

    dot_product / (norm_a * norm_b)
}

/// Keep results at or above `threshold`, sort best first and cut to `limit`.
pub(crate) fn rank_scored(
    mut scored: Vec<VectorSearchResult>,
    limit: usize,
    threshold: f32,
) -> Vec<VectorSearchResult> {
    scored.retain(|r| r.similarity >= threshold);
    scored.sort_by(|a, b| b.similarity.total_cmp(&a.similarity));
    scored.truncate(limit);
    scored
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cosine_similarity() {
        assert!((cosine_similarity(&[1.0, 0.0], &[1.0, 0.0]) - 1.0).abs() < 1e-6);
        assert!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]).abs() < 1e-6);
        assert!((cosine_similarity(&[1.0, 0.0], &[-1.0, 0.0]) + 1.0).abs() < 1e-6);
        assert_eq!(cosine_similarity(&[1.0], &[1.0, 0.0]), 0.0);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 0.0]), 0.0);
    }
}

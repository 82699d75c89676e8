//! Mock embedding provider using trigram-based content-aware embeddings.

use crate::client::{resolve_request, EmbeddingProvider, EmbeddingRequest, EmbeddingResponse};
use crate::types::TokenUsage;
use relay_core::AppResult;
use std::collections::{HashMap, HashSet};

/// The only model the mock provider serves.
pub const MOCK_MODEL: &str = "trigram-v1";

const STOP_WORDS: [&str; 32] = [
    "the", "is", "at", "which", "on", "a", "an", "as", "are", "was", "were", "for", "to", "of",
    "in", "and", "or", "but", "with", "by", "from", "this", "that", "be", "have", "has", "had",
    "it", "its", "their", "they", "them",
];

/// Mock provider for tests, demos and offline use.
///
/// Generates deterministic embeddings from character trigrams and word
/// frequencies. Not semantically accurate, but texts sharing vocabulary end
/// up close to each other, which is enough to exercise ranking.
#[derive(Debug)]
pub struct MockProvider {
    dimensions: usize,
}

impl MockProvider {
    /// Create a new mock provider with specified dimensions.
    pub fn new(dimensions: usize) -> Self {
        Self { dimensions }
    }

    fn generate_mock_embedding(&self, text: &str) -> Vec<f32> {
        let mut embedding = vec![0.0; self.dimensions];
        if self.dimensions == 0 {
            return embedding;
        }

        let lower = text.to_lowercase();
        let stop_words: HashSet<&str> = STOP_WORDS.iter().copied().collect();

        let mut word_freq: HashMap<&str, u32> = HashMap::new();
        for word in lower
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| !stop_words.contains(w) && w.chars().count() > 2)
        {
            *word_freq.entry(word).or_insert(0) += 1;
        }

        for (word, freq) in word_freq.iter() {
            let chars: Vec<char> = word.chars().collect();
            for window in chars.windows(3) {
                let trigram_hash = window.iter().fold(0u64, |acc, c| {
                    acc.wrapping_mul(37).wrapping_add(*c as u64)
                });
                let dim_idx = (trigram_hash as usize) % self.dimensions;
                embedding[dim_idx] += (*freq as f32).sqrt();
            }

            let word_hash = word
                .bytes()
                .fold(0u64, |acc, b| acc.wrapping_mul(31).wrapping_add(b as u64));
            embedding[(word_hash as usize) % self.dimensions] += *freq as f32;
        }

        // Normalize to unit vector
        let norm: f32 = embedding.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            for v in &mut embedding {
                *v /= norm;
            }
        }

        embedding
    }
}

#[async_trait::async_trait]
impl EmbeddingProvider for MockProvider {
    fn provider_name(&self) -> &str {
        "mock"
    }

    fn default_model(&self) -> &str {
        MOCK_MODEL
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    async fn embed(&self, request: &EmbeddingRequest) -> AppResult<EmbeddingResponse> {
        let model = resolve_request(self, request, &[MOCK_MODEL])?;

        let prompt_tokens = request
            .texts
            .iter()
            .map(|t| t.split_whitespace().count() as u64)
            .sum();

        Ok(EmbeddingResponse {
            vectors: request
                .texts
                .iter()
                .map(|text| self.generate_mock_embedding(text))
                .collect(),
            model: model.to_string(),
            usage: TokenUsage::new(prompt_tokens, 0),
        })
    }
}

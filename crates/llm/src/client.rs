//! Embedding provider abstraction and request/response types.

use crate::types::TokenUsage;
use relay_core::{AppError, AppResult};
use serde::{Deserialize, Serialize};

/// Embedding request for one or more texts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingRequest {
    /// Texts to embed, in order
    pub texts: Vec<String>,

    /// Model identifier; `None` selects the provider's default model
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
}

impl EmbeddingRequest {
    /// Create a new request using the provider's default model.
    pub fn new(texts: Vec<String>) -> Self {
        Self { texts, model: None }
    }

    /// Request a specific model.
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }
}

/// Embedding response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingResponse {
    /// One vector per input text, same order as the request
    pub vectors: Vec<Vec<f32>>,

    /// Model that produced the vectors
    pub model: String,

    /// Usage statistics (prompt tokens only)
    pub usage: TokenUsage,
}

/// Trait for embedding providers.
///
/// Implementations must fail on empty input, on a model they do not serve,
/// and on upstream errors. Retry, when any, happens inside the provider.
#[async_trait::async_trait]
pub trait EmbeddingProvider: Send + Sync + std::fmt::Debug {
    /// Get provider name (e.g., "mock", "ollama")
    fn provider_name(&self) -> &str;

    /// Model used when a request does not name one
    fn default_model(&self) -> &str;

    /// Get embedding dimensions
    fn dimensions(&self) -> usize;

    /// Generate embeddings for a batch of texts.
    async fn embed(&self, request: &EmbeddingRequest) -> AppResult<EmbeddingResponse>;

    /// Generate the embedding for a single query text.
    async fn embed_query(&self, text: &str, model: Option<&str>) -> AppResult<Vec<f32>> {
        let mut request = EmbeddingRequest::new(vec![text.to_string()]);
        if let Some(model) = model {
            request = request.with_model(model);
        }

        let mut response = self.embed(&request).await?;
        response
            .vectors
            .pop()
            .ok_or_else(|| AppError::Embedding("No embedding returned".to_string()))
    }
}

/// Shared input validation for providers.
///
/// Returns the model that will serve the request.
pub(crate) fn resolve_request<'a>(
    provider: &'a dyn EmbeddingProvider,
    request: &'a EmbeddingRequest,
    supported_models: &[&str],
) -> AppResult<&'a str> {
    if request.texts.is_empty() {
        return Err(AppError::Embedding("Cannot embed an empty batch".to_string()));
    }

    if request.texts.iter().any(|t| t.trim().is_empty()) {
        return Err(AppError::Embedding("Cannot embed empty text".to_string()));
    }

    let model = request
        .model
        .as_deref()
        .unwrap_or_else(|| provider.default_model());

    if !supported_models.is_empty() && !supported_models.contains(&model) {
        return Err(AppError::Embedding(format!(
            "Model '{}' is not supported by provider '{}'. Supported: {}",
            model,
            provider.provider_name(),
            supported_models.join(", ")
        )));
    }

    Ok(model)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_builder() {
        let request = EmbeddingRequest::new(vec!["hello".to_string()]).with_model("trigram-v1");
        assert_eq!(request.texts.len(), 1);
        assert_eq!(request.model.as_deref(), Some("trigram-v1"));
    }

    #[test]
    fn test_request_serialization_skips_default_model() {
        let request = EmbeddingRequest::new(vec!["hello".to_string()]);
        let json = serde_json::to_string(&request).unwrap();
        assert!(!json.contains("model"));
    }
}

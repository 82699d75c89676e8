//! Embedding provider factory.
//!
//! Creates the embedding provider named in the application configuration.

use crate::client::EmbeddingProvider;
use crate::providers::{MockProvider, OllamaProvider};
use relay_core::config::EmbeddingSettings;
use relay_core::{AppError, AppResult};
use std::sync::Arc;

/// Create an embedding provider from settings.
///
/// # Errors
/// Returns `AppError::Config` if the provider is unknown or cannot be built.
pub fn create_provider(settings: &EmbeddingSettings) -> AppResult<Arc<dyn EmbeddingProvider>> {
    match settings.provider.to_lowercase().as_str() {
        "mock" => {
            if settings.model != crate::providers::mock::MOCK_MODEL {
                return Err(AppError::Config(format!(
                    "Mock embedding provider only serves '{}', configured model is '{}'",
                    crate::providers::mock::MOCK_MODEL,
                    settings.model
                )));
            }
            Ok(Arc::new(MockProvider::new(settings.dimensions)))
        }
        "ollama" => {
            let provider = OllamaProvider::new(settings)
                .map_err(|e| AppError::Config(format!("Failed to create Ollama provider: {}", e)))?;
            Ok(Arc::new(provider))
        }
        other => Err(AppError::Config(format!(
            "Unknown embedding provider: '{}'. Supported providers: mock, ollama",
            other
        ))),
    }
}

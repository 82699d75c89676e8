//! Embedding and chat types for Relay.
//!
//! This crate provides a provider-agnostic abstraction for generating query
//! embeddings, plus the chat message and token-usage types shared by the
//! conversation cache and the prompt builder.
//!
//! # Providers
//! - **Mock**: deterministic trigram embeddings (default, no network)
//! - **Ollama**: local embedding models over HTTP
//!
//! # Example
//! ```no_run
//! use relay_llm::{EmbeddingProvider, providers::MockProvider};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let provider = MockProvider::new(384);
//! let vector = provider.embed_query("How do I reset my password?", None).await?;
//! assert_eq!(vector.len(), 384);
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod factory;
pub mod providers;
pub mod types;

// Re-export main types
pub use client::{EmbeddingProvider, EmbeddingRequest, EmbeddingResponse};
pub use factory::create_provider;
pub use providers::{MockProvider, OllamaProvider};
pub use types::{ChatMessage, Role, TokenUsage};

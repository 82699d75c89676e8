//! Knowledge retrieval and routing.
//!
//! - [`classifier`]: structured/semantic query classification
//! - [`router`]: intent-keyword routing across a chatbot's linked collections
//! - [`rag`]: embedding, concurrent per-collection search, ranked merge and
//!   context formatting
//! - [`store`], [`links`]: the vector-search and link-store collaborators
//! - [`catalog`]: YAML description of chatbots and collection contents

pub mod catalog;
pub mod classifier;
pub mod links;
pub mod rag;
pub mod router;
pub mod search;
pub mod store;
pub mod types;

#[cfg(test)]
mod tests;

// Re-export commonly used types
pub use catalog::Catalog;
pub use classifier::{classify, describe, recommend_tools, QueryClassification};
pub use links::{InMemoryLinkStore, LinkStore};
pub use rag::{
    format_context, sort_by_similarity, CollectionFailure, RetrievalLogEntry, RetrievalLogSink,
    RetrievalOrchestrator, RetrieveContextResult, RetrieveOptions, SqliteRetrievalLog,
    TracingLogSink,
};
pub use relay_core::FailureMode;
pub use router::QueryRouter;
pub use search::{FilterKey, FilterValue, MetadataFilter};
pub use store::{InMemoryVectorStore, SqliteVectorStore, VectorSearchStore};
pub use types::{
    AccessLevel, ChunkRecord, KnowledgeLink, RetrievalResult, RouteResult, VectorSearchResult,
};

//! Retrieval-augmented context assembly.
//!
//! Turns a query into a ranked, prompt-ready context block drawn from every
//! collection linked to a chatbot.

pub mod context;
pub mod log;
pub mod retrieve;
pub mod types;

pub use context::{format_context, sort_by_similarity, CONTEXT_HEADER};
pub use log::{RetrievalLogEntry, RetrievalLogSink, SqliteRetrievalLog, TracingLogSink};
pub use retrieve::RetrievalOrchestrator;
pub use types::{CollectionFailure, RetrieveContextResult, RetrieveOptions};

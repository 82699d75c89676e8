//! Cross-module scenarios: routing into retrieval over in-memory stores.

mod retrieval;

//! Chat prompt assembly for Relay.
//!
//! This crate turns a conversation's retained history and a retrieved
//! knowledge context into the messages sent to a chat model:
//! - YAML-based prompt definitions
//! - Handlebars template rendering
//! - Knowledge context injection

pub mod builder;
pub mod loader;
pub mod types;

// Re-export main types
pub use builder::build_prompt;
pub use loader::{list_prompts, load_prompt};
pub use types::{BuiltPrompt, BuiltPromptMetadata, PromptBehavior, PromptDefinition, PromptInputs};

//! Prompt types.

use relay_llm::ChatMessage;
use serde::{Deserialize, Serialize};

/// A prompt definition loaded from YAML.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PromptDefinition {
    /// Unique prompt identifier
    pub id: String,

    /// Human-readable title
    pub title: String,

    /// API version for schema evolution
    #[serde(rename = "apiVersion")]
    pub api_version: String,

    /// Creator identifier
    #[serde(rename = "createdBy", default)]
    pub created_by: String,

    #[serde(default)]
    pub behavior: PromptBehavior,

    /// System message template (Handlebars)
    pub system: String,

    /// Template for the new user turn
    #[serde(default = "default_user_template")]
    pub user: String,

    /// Most recent history messages to include; all retained ones when unset
    #[serde(rename = "maxHistory", default)]
    pub max_history: Option<usize>,
}

fn default_user_template() -> String {
    "{{query}}".to_string()
}

/// Tone and style offered to the templates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PromptBehavior {
    /// Tone (e.g., "professional", "friendly")
    pub tone: String,

    /// Style (e.g., "concise", "detailed")
    pub style: String,
}

impl Default for PromptBehavior {
    fn default() -> Self {
        Self {
            tone: "friendly".to_string(),
            style: "concise".to_string(),
        }
    }
}

impl PromptDefinition {
    /// Built-in chat prompt used when no definition is configured.
    pub fn default_chat() -> Self {
        Self {
            id: "relay.chat.default".to_string(),
            title: "Default chat".to_string(),
            api_version: "1.0".to_string(),
            created_by: "relay".to_string(),
            behavior: PromptBehavior::default(),
            system: concat!(
                "You are {{chatbotName}}. Keep a {{tone}} tone and a {{style}} style.",
                "{{#if knowledgeContext}}\n\n",
                "Answer from the information below when it is relevant. ",
                "If it does not contain the answer, say that you do not know.\n\n",
                "{{knowledgeContext}}",
                "{{/if}}"
            )
            .to_string(),
            user: default_user_template(),
            max_history: None,
        }
    }
}

/// Per-turn values rendered into a prompt.
#[derive(Debug, Clone, Default)]
pub struct PromptInputs {
    pub query: String,

    /// Retained conversation history, oldest first
    pub history: Vec<ChatMessage>,

    /// Formatted retrieval context; empty when nothing was retrieved
    pub knowledge_context: String,

    pub chatbot_name: String,
}

/// A fully built prompt ready for a chat model.
#[derive(Debug, Clone, Serialize)]
pub struct BuiltPrompt {
    pub system: String,

    /// History followed by the new user turn
    pub messages: Vec<ChatMessage>,

    pub metadata: BuiltPromptMetadata,
}

/// Metadata about a built prompt.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BuiltPromptMetadata {
    /// Source prompt ID
    pub source_prompt_id: String,

    pub knowledge_context_included: bool,

    /// History messages carried into the prompt
    pub history_messages: usize,
}

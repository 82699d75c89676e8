//! Prompt builder: renders a definition into chat messages.

use crate::types::{BuiltPrompt, BuiltPromptMetadata, PromptDefinition, PromptInputs};
use handlebars::Handlebars;
use relay_core::{AppError, AppResult};
use relay_llm::ChatMessage;

/// Build a prompt for one chat turn.
///
/// The system template sees `chatbotName`, `tone`, `style`, `knowledgeContext`
/// and `query`. An empty knowledge context renders as falsy, so templates can
/// drop their context section with `{{#if knowledgeContext}}`. Messages are
/// the (possibly capped) history followed by the rendered user turn.
pub fn build_prompt(def: &PromptDefinition, inputs: &PromptInputs) -> AppResult<BuiltPrompt> {
    let variables = serde_json::json!({
        "chatbotName": inputs.chatbot_name,
        "tone": def.behavior.tone,
        "style": def.behavior.style,
        "knowledgeContext": inputs.knowledge_context.trim(),
        "query": inputs.query,
    });

    let system = render_template(&def.system, &variables)?.trim().to_string();
    let user = render_template(&def.user, &variables)?;

    let skip = def
        .max_history
        .map(|max| inputs.history.len().saturating_sub(max))
        .unwrap_or(0);
    let mut messages: Vec<ChatMessage> = inputs.history[skip..].to_vec();
    let history_messages = messages.len();
    messages.push(ChatMessage::user(user));

    tracing::debug!(
        prompt = %def.id,
        history_messages,
        system_len = system.len(),
        "Built prompt"
    );

    Ok(BuiltPrompt {
        system,
        messages,
        metadata: BuiltPromptMetadata {
            source_prompt_id: def.id.clone(),
            knowledge_context_included: !inputs.knowledge_context.trim().is_empty(),
            history_messages,
        },
    })
}

fn render_template(template: &str, variables: &serde_json::Value) -> AppResult<String> {
    let mut handlebars = Handlebars::new();

    // Context text is passed through verbatim
    handlebars.register_escape_fn(handlebars::no_escape);

    handlebars
        .register_template_string("prompt", template)
        .map_err(|e| AppError::Prompt(format!("Failed to parse template: {}", e)))?;

    handlebars
        .render("prompt", variables)
        .map_err(|e| AppError::Prompt(format!("Failed to render template: {}", e)))
}

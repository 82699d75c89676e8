//! Chat command handler.
//!
//! Runs one conversation turn: restores or starts the conversation,
//! retrieves knowledge context, assembles the prompt and records the user
//! message. No model is called; the assembled prompt is printed.

use super::runtime::Runtime;
use clap::Args;
use relay_conversation::{CacheConfig, ConversationCache, ConversationState, SqliteConversationStore};
use relay_core::{config::AppConfig, AppError, AppResult};
use relay_knowledge::RetrieveOptions;
use relay_llm::{ChatMessage, TokenUsage};
use relay_prompt::{build_prompt, load_prompt, BuiltPrompt, PromptDefinition, PromptInputs};
use std::sync::Arc;

/// Run one conversation turn
#[derive(Args, Debug)]
pub struct ChatCommand {
    /// Chatbot identifier
    pub chatbot: String,

    /// User message
    pub query: String,

    /// Conversation identifier (created when unknown)
    #[arg(long)]
    pub conversation: String,

    /// User the conversation belongs to
    #[arg(long)]
    pub user: Option<String>,

    /// Prompt definition id under .relay/prompts (default: built-in)
    #[arg(long)]
    pub prompt: Option<String>,

    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

impl ChatCommand {
    pub async fn execute(&self, config: &AppConfig) -> AppResult<()> {
        tracing::info!(
            "Chat turn for chatbot '{}' in conversation '{}'",
            self.chatbot,
            self.conversation
        );

        let runtime = Runtime::load(config).await?;

        config.ensure_relay_dir()?;
        let store = SqliteConversationStore::open(&config.conversation_db_path())?;
        let cache = ConversationCache::new(CacheConfig::from(&config.conversation), Arc::new(store))?;

        let turn = self.run_turn(config, &runtime, &cache).await;

        // Persist whatever the turn recorded, even when it failed midway
        let flushed = cache.flush().await;
        cache.close().await;

        let built = turn?;
        let saved = flushed?;
        tracing::debug!("Flushed {} conversations", saved);

        self.print(&built)
    }

    async fn run_turn(
        &self,
        config: &AppConfig,
        runtime: &Runtime,
        cache: &ConversationCache,
    ) -> AppResult<BuiltPrompt> {
        let state = match cache.get_or_load(&self.conversation).await? {
            Some(state) if state.chatbot_id != self.chatbot => {
                return Err(AppError::InvalidInput(format!(
                    "Conversation '{}' belongs to chatbot '{}'",
                    self.conversation, state.chatbot_id
                )));
            }
            Some(state) => state,
            None => {
                let mut state = ConversationState::new(
                    &self.conversation,
                    &self.chatbot,
                    runtime.chatbot_name(&self.chatbot),
                )
                .persistent();
                if let Some(user) = &self.user {
                    state = state.with_user(user);
                }
                cache.put(state.clone());
                tracing::info!("Started conversation '{}'", self.conversation);
                state
            }
        };

        let mut options = RetrieveOptions::new(&self.chatbot, &self.query)
            .with_settings(&config.retrieval)
            .with_conversation(&self.conversation);
        if let Some(user) = self.user.as_ref().or(state.user_id.as_ref()) {
            options = options.with_user(user);
        }

        let retrieval = runtime.orchestrator(config)?.retrieve_context(options).await?;

        let definition = match &self.prompt {
            Some(id) => load_prompt(&config.workspace, id)?,
            None => PromptDefinition::default_chat(),
        };

        let built = build_prompt(
            &definition,
            &PromptInputs {
                query: self.query.clone(),
                history: state.messages.clone(),
                knowledge_context: retrieval.formatted_context,
                chatbot_name: state.chatbot_name.clone(),
            },
        )?;

        // No completion is requested, so the turn spends no tokens
        let outcome = cache
            .append(
                &self.conversation,
                ChatMessage::user(&self.query),
                TokenUsage::default(),
            )
            .ok_or_else(|| {
                AppError::Other(format!(
                    "Conversation '{}' left the cache during the turn",
                    self.conversation
                ))
            })?;

        tracing::info!(
            turn = outcome.turn_count,
            retained = outcome.retained,
            trimmed = outcome.trimmed,
            "Recorded user message"
        );

        Ok(built)
    }

    fn print(&self, built: &BuiltPrompt) -> AppResult<()> {
        if self.json {
            println!("{}", serde_json::to_string_pretty(built)?);
            return Ok(());
        }

        println!("[system]\n{}\n", built.system);
        for message in &built.messages {
            println!("[{}]\n{}\n", message.role, message.content);
        }
        Ok(())
    }
}

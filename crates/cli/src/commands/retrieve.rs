//! Retrieve command handler.

use super::runtime::Runtime;
use clap::Args;
use relay_core::{config::AppConfig, AppError, AppResult, FailureMode};
use relay_knowledge::{FilterValue, RetrieveOptions};

/// Retrieve knowledge context for a query
#[derive(Args, Debug)]
pub struct RetrieveCommand {
    /// Chatbot identifier
    pub chatbot: String,

    /// Query text
    pub query: String,

    /// Restrict to this user's content plus global content
    #[arg(long)]
    pub user: Option<String>,

    /// Maximum chunks in the merged result
    #[arg(short = 'k', long)]
    pub max_chunks: Option<usize>,

    /// Minimum similarity (0.0-1.0)
    #[arg(short, long)]
    pub threshold: Option<f32>,

    /// Required chunk tag (repeatable)
    #[arg(long)]
    pub tag: Vec<String>,

    /// Required metadata value as key=value (repeatable)
    #[arg(long)]
    pub filter: Vec<String>,

    /// Return successful collections even when others fail
    #[arg(long)]
    pub partial: bool,

    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

impl RetrieveCommand {
    pub async fn execute(&self, config: &AppConfig) -> AppResult<()> {
        tracing::info!("Retrieving context for chatbot '{}'", self.chatbot);

        let runtime = Runtime::load(config).await?;
        let orchestrator = runtime.orchestrator(config)?;

        let result = orchestrator.retrieve_context(self.options(config)?).await?;

        if self.json {
            println!("{}", serde_json::to_string_pretty(&result)?);
            return Ok(());
        }

        for failure in &result.failures {
            eprintln!(
                "warning: collection '{}' failed: {}",
                failure.collection_id, failure.error
            );
        }

        if result.formatted_context.is_empty() {
            println!("No relevant context found.");
        } else {
            println!("{}", result.formatted_context);
        }

        tracing::info!(
            "Retrieved {} of {} chunks in {}ms",
            result.chunks.len(),
            result.total_retrieved,
            result.duration_ms
        );

        Ok(())
    }

    fn options(&self, config: &AppConfig) -> AppResult<RetrieveOptions> {
        let mut options = RetrieveOptions::new(&self.chatbot, &self.query)
            .with_settings(&config.retrieval)
            .with_tags(self.tag.iter().cloned());

        if let Some(user) = &self.user {
            options = options.with_user(user);
        }
        if let Some(max_chunks) = self.max_chunks {
            options = options.with_max_chunks(max_chunks);
        }
        if let Some(threshold) = self.threshold {
            options = options.with_threshold(threshold);
        }
        if self.partial {
            options = options.with_failure_mode(FailureMode::Partial);
        }

        for clause in &self.filter {
            let (key, value) = clause.split_once('=').ok_or_else(|| {
                AppError::InvalidInput(format!("Filter '{}' is not key=value", clause))
            })?;
            options = options.with_metadata(key.trim(), FilterValue::parse(value.trim()))?;
        }

        Ok(options)
    }
}

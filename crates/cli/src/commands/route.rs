//! Route command handler.

use clap::Args;
use relay_core::{config::AppConfig, AppResult};
use relay_knowledge::{Catalog, InMemoryLinkStore, QueryRouter};
use std::sync::Arc;

/// Show which collections a chatbot would search
#[derive(Args, Debug)]
pub struct RouteCommand {
    /// Chatbot identifier
    pub chatbot: String,

    /// Query text
    pub query: String,

    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

impl RouteCommand {
    pub async fn execute(&self, config: &AppConfig) -> AppResult<()> {
        tracing::info!("Routing query for chatbot '{}'", self.chatbot);

        // Routing needs links only, so nothing is embedded here
        let catalog = Catalog::load(&config.catalog_path())?;
        let links = Arc::new(InMemoryLinkStore::new());
        catalog.seed_links(&links)?;
        let result = QueryRouter::new(links)
            .route(&self.chatbot, &self.query)
            .await?;

        if self.json {
            println!("{}", serde_json::to_string_pretty(&result)?);
            return Ok(());
        }

        if result.selected.is_empty() {
            println!("No enabled collections for chatbot '{}'", self.chatbot);
            return Ok(());
        }

        let mode = if result.fallback_to_all {
            "fallback (no intent matched)"
        } else {
            "intent match"
        };
        println!("Route {} via {}", result.trace_id, mode);

        for (i, link) in result.selected.iter().enumerate() {
            let name = if link.collection_name.is_empty() {
                link.collection_id.as_str()
            } else {
                link.collection_name.as_str()
            };
            let intent = result
                .matched_intents
                .get(i)
                .map(|k| format!("  [{}]", k))
                .unwrap_or_default();
            println!(
                "{}. {} ({})  weight {:.2}  priority {}{}",
                i + 1,
                name,
                link.collection_id,
                link.context_weight,
                link.priority,
                intent
            );
        }

        Ok(())
    }
}

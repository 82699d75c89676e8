//! Index command handler.

use super::runtime::index_path;
use clap::Args;
use relay_core::{config::AppConfig, AppResult};
use relay_knowledge::{Catalog, SqliteVectorStore};
use relay_llm::create_provider;
use std::collections::BTreeMap;
use std::time::Instant;

/// Embed the catalog into the persistent index
#[derive(Args, Debug)]
pub struct IndexCommand {
    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

impl IndexCommand {
    pub async fn execute(&self, config: &AppConfig) -> AppResult<()> {
        let start = Instant::now();
        let catalog = Catalog::load(&config.catalog_path())?;
        let embedder = create_provider(&config.embedding)?;

        let records = catalog.chunk_records(embedder.as_ref()).await?;

        let path = index_path(config);
        let store = SqliteVectorStore::open(&path)?;

        // Rebuild each catalog collection from scratch
        for collection in &catalog.collections {
            let removed = store.clear_collection(&collection.id)?;
            if removed > 0 {
                tracing::debug!("Cleared {} chunks from '{}'", removed, collection.id);
            }
        }

        let mut per_collection: BTreeMap<String, usize> = BTreeMap::new();
        for record in &records {
            store.upsert(record)?;
            *per_collection.entry(record.collection_id.clone()).or_default() += 1;
        }

        let duration_secs = start.elapsed().as_secs_f64();
        tracing::info!("Indexed {} chunks into {:?}", records.len(), path);

        if self.json {
            let output = serde_json::json!({
                "index": path,
                "chunksCount": records.len(),
                "collections": per_collection,
                "model": embedder.default_model(),
                "durationSecs": duration_secs,
            });
            println!("{}", serde_json::to_string_pretty(&output)?);
        } else {
            for (collection, count) in &per_collection {
                println!("{}: {} chunks", collection, count);
            }
            println!(
                "Indexed {} chunks in {:.2}s ({})",
                records.len(),
                duration_secs,
                path.display()
            );
        }

        Ok(())
    }
}

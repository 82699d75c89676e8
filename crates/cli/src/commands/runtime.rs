//! Shared wiring for commands that read the catalog.

use relay_core::{config::AppConfig, AppResult};
use relay_knowledge::{
    Catalog, InMemoryLinkStore, InMemoryVectorStore, QueryRouter, RetrievalOrchestrator,
    SqliteRetrievalLog, SqliteVectorStore, VectorSearchStore,
};
use relay_llm::{create_provider, EmbeddingProvider};
use std::path::PathBuf;
use std::sync::Arc;

/// Persistent vector index built by `relay index`.
pub fn index_path(config: &AppConfig) -> PathBuf {
    config.relay_dir().join("index.sqlite")
}

fn retrieval_log_path(config: &AppConfig) -> PathBuf {
    config.relay_dir().join("retrieval_log.sqlite")
}

pub struct Runtime {
    pub catalog: Catalog,
    pub links: Arc<InMemoryLinkStore>,
    pub embedder: Arc<dyn EmbeddingProvider>,
    pub store: Arc<dyn VectorSearchStore>,
}

impl Runtime {
    /// Load the catalog and pick a vector store.
    ///
    /// Uses the persistent index when one exists, otherwise embeds the
    /// catalog into memory for this run.
    pub async fn load(config: &AppConfig) -> AppResult<Self> {
        let catalog = Catalog::load(&config.catalog_path())?;
        let embedder = create_provider(&config.embedding)?;
        let links = Arc::new(InMemoryLinkStore::new());

        let index = index_path(config);
        let store: Arc<dyn VectorSearchStore> = if index.exists() {
            catalog.seed_links(&links)?;
            tracing::debug!("Using vector index at {:?}", index);
            Arc::new(SqliteVectorStore::open(&index)?)
        } else {
            let vectors = InMemoryVectorStore::new();
            let count = catalog.seed(&links, &vectors, embedder.as_ref()).await?;
            tracing::info!("No index at {:?}, embedded {} chunks in memory", index, count);
            Arc::new(vectors)
        };

        Ok(Self {
            catalog,
            links,
            embedder,
            store,
        })
    }

    pub fn router(&self) -> QueryRouter {
        QueryRouter::new(self.links.clone())
    }

    /// Orchestrator that records retrievals in the workspace log.
    pub fn orchestrator(&self, config: &AppConfig) -> AppResult<RetrievalOrchestrator> {
        config.ensure_relay_dir()?;
        let log = SqliteRetrievalLog::open(&retrieval_log_path(config))?;

        Ok(
            RetrievalOrchestrator::new(self.router(), self.embedder.clone(), self.store.clone())
                .with_log_sink(Arc::new(log))
                .with_embedding_model(config.embedding.model.clone()),
        )
    }

    /// Display name for a chatbot, falling back to its id.
    pub fn chatbot_name(&self, chatbot_id: &str) -> String {
        match self.catalog.chatbot(chatbot_id) {
            Some(entry) => entry.display_name().to_string(),
            None => {
                tracing::warn!("Chatbot '{}' is not in the catalog", chatbot_id);
                chatbot_id.to_string()
            }
        }
    }
}

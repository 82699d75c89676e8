//! Catalog of chatbots, their knowledge links and collection contents.
//!
//! The catalog is a YAML file, by default `.relay/catalog.yaml`:
//!
//! ```yaml
//! chatbots:
//!   - id: support
//!     name: Support Assistant
//!     links:
//!       - collectionId: kb-api
//!         collectionName: API Reference
//!         contextWeight: 0.9
//!         intentKeywords: [api, endpoint]
//! collections:
//!   - id: kb-api
//!     name: API Reference
//!     documents:
//!       - id: auth
//!         title: Authentication
//!         tags: [api]
//!         metadata: { status: published }
//!         text: |
//!           Every request carries a bearer token.
//! ```
//!
//! Document text is split on blank lines; each paragraph becomes one chunk.

use crate::links::InMemoryLinkStore;
use crate::store::InMemoryVectorStore;
use crate::types::{ChunkRecord, KnowledgeLink};
use relay_core::{AppError, AppResult};
use relay_llm::{EmbeddingProvider, EmbeddingRequest};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::Path;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Catalog {
    #[serde(default)]
    pub chatbots: Vec<ChatbotEntry>,

    #[serde(default)]
    pub collections: Vec<CollectionEntry>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ChatbotEntry {
    pub id: String,

    #[serde(default)]
    pub name: Option<String>,

    #[serde(default)]
    pub links: Vec<KnowledgeLink>,
}

impl ChatbotEntry {
    /// Display name, falling back to the id.
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.id)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CollectionEntry {
    pub id: String,

    #[serde(default)]
    pub name: Option<String>,

    #[serde(default)]
    pub documents: Vec<DocumentEntry>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
pub struct DocumentEntry {
    pub id: String,

    #[serde(default)]
    pub title: Option<String>,

    pub text: String,

    #[serde(default)]
    pub tags: Vec<String>,

    /// Owner; absent means the document is global
    #[serde(default)]
    pub user_id: Option<String>,

    #[serde(default)]
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

impl DocumentEntry {
    fn paragraphs(&self) -> Vec<&str> {
        self.text
            .split("\n\n")
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .collect()
    }
}

impl Catalog {
    /// Load and validate a catalog file.
    pub fn load(path: &Path) -> AppResult<Self> {
        let content = fs::read_to_string(path).map_err(|e| {
            AppError::Config(format!("Failed to read catalog at {:?}: {}", path, e))
        })?;
        let catalog = Self::from_yaml(&content)
            .map_err(|e| AppError::Config(format!("Invalid catalog at {:?}: {}", path, e)))?;

        tracing::debug!(
            "Loaded catalog with {} chatbots and {} collections",
            catalog.chatbots.len(),
            catalog.collections.len()
        );
        Ok(catalog)
    }

    pub fn from_yaml(content: &str) -> AppResult<Self> {
        let catalog: Catalog = serde_yaml::from_str(content)?;
        catalog.validate()?;
        Ok(catalog)
    }

    fn validate(&self) -> AppResult<()> {
        let mut chatbot_ids = HashSet::new();
        for chatbot in &self.chatbots {
            if !chatbot_ids.insert(chatbot.id.as_str()) {
                return Err(AppError::Config(format!(
                    "Duplicate chatbot '{}' in catalog",
                    chatbot.id
                )));
            }
            for link in &chatbot.links {
                link.validate()?;
            }
        }

        let mut collection_ids = HashSet::new();
        for collection in &self.collections {
            if !collection_ids.insert(collection.id.as_str()) {
                return Err(AppError::Config(format!(
                    "Duplicate collection '{}' in catalog",
                    collection.id
                )));
            }
        }

        for chatbot in &self.chatbots {
            for link in &chatbot.links {
                if !collection_ids.contains(link.collection_id.as_str()) {
                    tracing::warn!(
                        "Chatbot '{}' links to collection '{}' which has no catalog entry",
                        chatbot.id,
                        link.collection_id
                    );
                }
            }
        }

        Ok(())
    }

    pub fn chatbot(&self, id: &str) -> Option<&ChatbotEntry> {
        self.chatbots.iter().find(|c| c.id == id)
    }

    /// Register every chatbot's links in a link store.
    pub fn seed_links(&self, links: &InMemoryLinkStore) -> AppResult<usize> {
        let mut count = 0;
        for chatbot in &self.chatbots {
            let resolved: Vec<KnowledgeLink> = chatbot
                .links
                .iter()
                .cloned()
                .map(|mut link| {
                    if link.collection_name.is_empty() {
                        link.collection_name = self.collection_name(&link.collection_id);
                    }
                    link
                })
                .collect();
            count += resolved.len();
            links.replace(&chatbot.id, resolved)?;
        }
        Ok(count)
    }

    /// Embed every document paragraph of every collection.
    pub async fn chunk_records(
        &self,
        embedder: &dyn EmbeddingProvider,
    ) -> AppResult<Vec<ChunkRecord>> {
        let mut records = Vec::new();

        for collection in &self.collections {
            let mut pending = Vec::new();
            for document in &collection.documents {
                for (position, paragraph) in document.paragraphs().into_iter().enumerate() {
                    pending.push((document, position, paragraph.to_string()));
                }
            }
            if pending.is_empty() {
                continue;
            }

            let request =
                EmbeddingRequest::new(pending.iter().map(|(_, _, text)| text.clone()).collect());
            let response = embedder.embed(&request).await?;
            if response.vectors.len() != pending.len() {
                return Err(AppError::Embedding(format!(
                    "Expected {} embeddings for collection '{}', got {}",
                    pending.len(),
                    collection.id,
                    response.vectors.len()
                )));
            }

            for ((document, position, content), embedding) in
                pending.into_iter().zip(response.vectors)
            {
                records.push(ChunkRecord {
                    chunk_id: format!("{}-{}", document.id, position),
                    document_id: document.id.clone(),
                    collection_id: collection.id.clone(),
                    document_title: document.title.clone(),
                    content,
                    tags: document.tags.clone(),
                    user_id: document.user_id.clone(),
                    metadata: document.metadata.clone(),
                    embedding,
                });
            }

            tracing::debug!("Embedded collection '{}'", collection.id);
        }

        Ok(records)
    }

    /// Populate in-memory link and vector stores from the catalog.
    pub async fn seed(
        &self,
        links: &InMemoryLinkStore,
        vectors: &InMemoryVectorStore,
        embedder: &dyn EmbeddingProvider,
    ) -> AppResult<usize> {
        self.seed_links(links)?;
        let records = self.chunk_records(embedder).await?;
        let count = records.len();
        vectors.extend(records);
        Ok(count)
    }

    fn collection_name(&self, collection_id: &str) -> String {
        self.collections
            .iter()
            .find(|c| c.id == collection_id)
            .and_then(|c| c.name.clone())
            .unwrap_or_default()
    }
}

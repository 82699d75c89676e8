//! Link store contract and an in-memory implementation.

use crate::types::KnowledgeLink;
use parking_lot::RwLock;
use relay_core::AppResult;
use std::collections::HashMap;

/// Source of the knowledge links configured for each chatbot.
#[async_trait::async_trait]
pub trait LinkStore: Send + Sync {
    /// All links for a chatbot, enabled or not. Unknown chatbots have no links.
    ///
    /// Fails only on storage errors.
    async fn get_links(&self, chatbot_id: &str) -> AppResult<Vec<KnowledgeLink>>;
}

/// Link store backed by a map, for tests and catalog-driven setups.
#[derive(Debug, Default)]
pub struct InMemoryLinkStore {
    links: RwLock<HashMap<String, Vec<KnowledgeLink>>>,
}

impl InMemoryLinkStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a link to a chatbot after validating it.
    pub fn insert(&self, chatbot_id: &str, link: KnowledgeLink) -> AppResult<()> {
        link.validate()?;
        self.links
            .write()
            .entry(chatbot_id.to_string())
            .or_default()
            .push(link);
        Ok(())
    }

    /// Replace every link of a chatbot.
    pub fn replace(&self, chatbot_id: &str, links: Vec<KnowledgeLink>) -> AppResult<()> {
        for link in &links {
            link.validate()?;
        }
        self.links.write().insert(chatbot_id.to_string(), links);
        Ok(())
    }

    pub fn chatbot_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.links.read().keys().cloned().collect();
        ids.sort();
        ids
    }
}

#[async_trait::async_trait]
impl LinkStore for InMemoryLinkStore {
    async fn get_links(&self, chatbot_id: &str) -> AppResult<Vec<KnowledgeLink>> {
        Ok(self
            .links
            .read()
            .get(chatbot_id)
            .cloned()
            .unwrap_or_default())
    }
}

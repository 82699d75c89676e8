//! Query routing across a chatbot's linked collections.
//!
//! Intent keywords act as a precision filter. When no keyword matches, every
//! enabled link is selected. Selections are ordered by context weight
//! (descending), then priority (ascending), then input order.

use crate::links::LinkStore;
use crate::types::{KnowledgeLink, RouteResult};
use relay_core::{AppError, AppResult};
use std::cmp::Ordering;
use std::sync::Arc;

/// Selects and ranks candidate collections for a query.
#[derive(Clone)]
pub struct QueryRouter {
    links: Arc<dyn LinkStore>,
}

impl QueryRouter {
    pub fn new(links: Arc<dyn LinkStore>) -> Self {
        Self { links }
    }

    /// Route a query to the chatbot's collections.
    ///
    /// Fails only when the link store lookup fails.
    pub async fn route(&self, chatbot_id: &str, query: &str) -> AppResult<RouteResult> {
        let enabled = self.enabled_links(chatbot_id).await?;
        let query_lower = query.to_lowercase();

        let mut selected: Vec<(KnowledgeLink, String)> = Vec::new();

        for link in &enabled {
            let hit = link.intent_keywords.iter().find(|keyword| {
                let keyword = keyword.trim().to_lowercase();
                !keyword.is_empty() && query_lower.contains(&keyword)
            });

            if let Some(keyword) = hit {
                selected.push((link.clone(), keyword.clone()));
            }
        }

        let result = if selected.is_empty() {
            let mut all = enabled;
            rank_links(&mut all);
            RouteResult::new(all, true, Vec::new())
        } else {
            selected.sort_by(|(a, _), (b, _)| compare_links(a, b));
            let (links, keywords): (Vec<KnowledgeLink>, Vec<String>) =
                selected.into_iter().unzip();
            RouteResult::new(links, false, keywords)
        };

        tracing::debug!(
            chatbot = chatbot_id,
            trace_id = %result.trace_id,
            selected = ?result.collection_ids(),
            fallback_to_all = result.fallback_to_all,
            matched_intents = ?result.matched_intents,
            "Routed query"
        );

        Ok(result)
    }

    /// Select collections relevant to an extracted entity.
    ///
    /// Entity-aware routing is not implemented yet: every enabled link is
    /// selected, ranked like a fallback route.
    pub async fn select_by_entity_type(
        &self,
        chatbot_id: &str,
        entity_type: &str,
        entity_value: &str,
    ) -> AppResult<RouteResult> {
        let mut links = self.enabled_links(chatbot_id).await?;
        rank_links(&mut links);

        let result = RouteResult::new(links, true, Vec::new());
        tracing::debug!(
            chatbot = chatbot_id,
            entity_type,
            entity_value,
            trace_id = %result.trace_id,
            "Selected collections by entity type"
        );
        Ok(result)
    }

    async fn enabled_links(&self, chatbot_id: &str) -> AppResult<Vec<KnowledgeLink>> {
        let links = self.links.get_links(chatbot_id).await.map_err(|e| match e {
            AppError::LinkStore(_) => e,
            other => AppError::LinkStore(format!(
                "Failed to load links for chatbot '{}': {}",
                chatbot_id, other
            )),
        })?;

        Ok(links.into_iter().filter(|l| l.enabled).collect())
    }
}

/// Sort links best first. Stable, so full ties keep input order.
pub fn rank_links(links: &mut [KnowledgeLink]) {
    links.sort_by(compare_links);
}

fn compare_links(a: &KnowledgeLink, b: &KnowledgeLink) -> Ordering {
    b.context_weight
        .total_cmp(&a.context_weight)
        .then_with(|| a.priority.cmp(&b.priority))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::links::InMemoryLinkStore;

    fn router_with(links: Vec<KnowledgeLink>) -> QueryRouter {
        let store = InMemoryLinkStore::new();
        store.replace("bot", links).unwrap();
        QueryRouter::new(Arc::new(store))
    }

    #[tokio::test]
    async fn test_intent_match_selects_only_matching_links() {
        let router = router_with(vec![
            KnowledgeLink::new("A", "Technical").with_keywords(["api", "technical"]),
            KnowledgeLink::new("B", "FAQ").with_keywords(["faq"]),
        ]);

        let result = router.route("bot", "How do I use the API?").await.unwrap();

        assert_eq!(result.collection_ids(), vec!["A"]);
        assert_eq!(result.matched_intents, vec!["api".to_string()]);
        assert!(!result.fallback_to_all);
        assert!(!result.trace_id.is_empty());
    }

    #[tokio::test]
    async fn test_fallback_orders_by_weight_then_priority() {
        let router = router_with(vec![
            KnowledgeLink::new("A", "A").with_weight(0.8).with_priority(100),
            KnowledgeLink::new("B", "B").with_weight(1.0).with_priority(200),
            KnowledgeLink::new("C", "C").with_weight(1.0).with_priority(50),
        ]);

        let result = router.route("bot", "nothing matches here").await.unwrap();

        assert_eq!(result.collection_ids(), vec!["C", "B", "A"]);
        assert!(result.fallback_to_all);
        assert!(result.matched_intents.is_empty());
    }

    #[tokio::test]
    async fn test_one_keyword_recorded_per_link() {
        let router = router_with(vec![KnowledgeLink::new("A", "A")
            .with_keywords(["billing", "invoice", "refund"])]);

        let result = router
            .route("bot", "billing question about an invoice refund")
            .await
            .unwrap();

        assert_eq!(result.matched_intents, vec!["billing".to_string()]);
    }

    #[tokio::test]
    async fn test_matching_is_case_insensitive_both_ways() {
        let router = router_with(vec![KnowledgeLink::new("A", "A").with_keywords(["SSO Setup"])]);

        let result = router.route("bot", "help with sso setup please").await.unwrap();
        assert_eq!(result.collection_ids(), vec!["A"]);
        assert_eq!(result.matched_intents, vec!["SSO Setup".to_string()]);
    }

    #[tokio::test]
    async fn test_matched_links_sorted_and_disabled_ignored() {
        let router = router_with(vec![
            KnowledgeLink::new("low", "Low")
                .with_weight(0.2)
                .with_keywords(["price"]),
            KnowledgeLink::new("off", "Off")
                .with_weight(1.0)
                .with_keywords(["price"])
                .disabled(),
            KnowledgeLink::new("high", "High")
                .with_weight(0.9)
                .with_keywords(["pricing"]),
            KnowledgeLink::new("other", "Other").with_keywords(["shipping"]),
        ]);

        let result = router
            .route("bot", "is the pricing page the same as the price list?")
            .await
            .unwrap();

        assert_eq!(result.collection_ids(), vec!["high", "low"]);
        assert_eq!(
            result.matched_intents,
            vec!["pricing".to_string(), "price".to_string()]
        );
    }

    #[tokio::test]
    async fn test_fallback_includes_links_without_keywords() {
        let router = router_with(vec![
            KnowledgeLink::new("kw", "Keywords").with_keywords(["faq"]),
            KnowledgeLink::new("plain", "Plain"),
        ]);

        let result = router.route("bot", "something else").await.unwrap();
        assert_eq!(result.selected.len(), 2);
        assert!(result.fallback_to_all);
    }

    #[tokio::test]
    async fn test_empty_keywords_never_match() {
        let router = router_with(vec![KnowledgeLink::new("A", "A").with_keywords(["", "  "])]);
        let result = router.route("bot", "anything").await.unwrap();
        assert!(result.fallback_to_all);
    }

    #[tokio::test]
    async fn test_full_ties_keep_input_order() {
        let router = router_with(vec![
            KnowledgeLink::new("first", "1"),
            KnowledgeLink::new("second", "2"),
            KnowledgeLink::new("third", "3"),
        ]);

        let result = router.route("bot", "q").await.unwrap();
        assert_eq!(result.collection_ids(), vec!["first", "second", "third"]);
    }

    #[tokio::test]
    async fn test_every_selected_link_matches_when_not_fallback() {
        let links = vec![
            KnowledgeLink::new("a", "a").with_keywords(["alpha"]).with_weight(0.3),
            KnowledgeLink::new("b", "b").with_keywords(["beta", "gamma"]).with_weight(0.7),
            KnowledgeLink::new("c", "c").with_keywords(["delta"]).with_weight(0.7).with_priority(1),
            KnowledgeLink::new("d", "d"),
        ];
        let router = router_with(links);

        for query in ["Alpha and GAMMA", "delta beta", "only alpha", "none"] {
            let result = router.route("bot", query).await.unwrap();
            let lower = query.to_lowercase();
            if !result.fallback_to_all {
                for link in &result.selected {
                    assert!(link
                        .intent_keywords
                        .iter()
                        .any(|k| lower.contains(&k.to_lowercase())));
                }
            }
            for pair in result.selected.windows(2) {
                assert!(
                    pair[0].context_weight > pair[1].context_weight
                        || (pair[0].context_weight == pair[1].context_weight
                            && pair[0].priority <= pair[1].priority)
                );
            }
        }
    }

    struct FailingLinkStore;

    #[async_trait::async_trait]
    impl LinkStore for FailingLinkStore {
        async fn get_links(&self, _chatbot_id: &str) -> AppResult<Vec<KnowledgeLink>> {
            Err(AppError::Storage("database is locked".to_string()))
        }
    }

    #[tokio::test]
    async fn test_link_store_failure_propagates() {
        let router = QueryRouter::new(Arc::new(FailingLinkStore));
        let err = router.route("bot", "anything").await.unwrap_err();

        assert!(matches!(err, AppError::LinkStore(_)));
        assert!(err.to_string().contains("database is locked"));
    }

    #[tokio::test]
    async fn test_select_by_entity_type_returns_all_enabled() {
        let router = router_with(vec![
            KnowledgeLink::new("A", "A").with_weight(0.5),
            KnowledgeLink::new("B", "B").with_weight(0.9),
            KnowledgeLink::new("C", "C").disabled(),
        ]);

        let result = router
            .select_by_entity_type("bot", "product", "Widget Pro")
            .await
            .unwrap();

        assert_eq!(result.collection_ids(), vec!["B", "A"]);
        assert!(result.fallback_to_all);
    }
}

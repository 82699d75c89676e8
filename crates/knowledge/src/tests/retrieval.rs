//! End-to-end retrieval scenarios.

#[cfg(test)]
mod tests {
    use crate::rag::RetrieveOptions;
    use crate::tests::fixtures::*;
    use crate::types::KnowledgeLink;
    use relay_core::{AppError, ErrorCategory, FailureMode};
    use std::sync::atomic::Ordering;
    use std::sync::Arc;
    use std::time::Duration;

    fn api_links() -> Vec<KnowledgeLink> {
        vec![
            KnowledgeLink::new("A", "Alpha")
                .with_weight(0.5)
                .with_keywords(["api"]),
            KnowledgeLink::new("B", "Beta")
                .with_weight(0.9)
                .with_keywords(["api", "endpoint"]),
            KnowledgeLink::new("C", "Billing").with_keywords(["billing"]),
        ]
    }

    fn api_chunks() -> Vec<crate::types::ChunkRecord> {
        vec![
            chunk("a1", "A", 0.95),
            chunk("a2", "A", 0.6),
            chunk("b1", "B", 0.8),
            chunk("b2", "B", 0.7),
            chunk("b3", "B", 0.2),
            chunk("c1", "C", 0.99),
        ]
    }

    fn ids(result: &crate::rag::RetrieveContextResult) -> Vec<&str> {
        result.chunks.iter().map(|c| c.chunk_id.as_str()).collect()
    }

    #[tokio::test]
    async fn test_routed_retrieval_merges_ranks_and_truncates() {
        let mut h = harness(api_links(), ScriptedStore::with_chunks(api_chunks()));

        let result = h
            .orchestrator
            .retrieve_context(
                RetrieveOptions::new("bot", "What are the API limits?")
                    .with_conversation("conv-1")
                    .with_max_chunks(3),
            )
            .await
            .unwrap();

        assert_eq!(ids(&result), vec!["a1", "b1", "b2"]);
        assert_eq!(result.total_retrieved, 4);
        assert!(!result.fallback_to_all);
        assert!(result.trace_id.is_some());
        assert_eq!(result.embedding_model, "fixed-v1");
        assert_eq!(result.chunks[0].collection_name, "Alpha");
        assert_eq!(result.chunks[1].collection_name, "Beta");
        assert!(!result.is_partial());

        assert!(result.formatted_context.contains("[Source 1] Title a1 | Alpha | similarity: 0.95"));
        assert!(result.formatted_context.contains("Source 3"));
        assert!(!result.formatted_context.contains("Source 4"));
        assert!(!result.formatted_context.contains("c1"));

        let entry = h.log.recv().await.unwrap();
        assert_eq!(entry.chunk_ids, vec!["a1", "b1", "b2"]);
        assert_eq!(entry.similarities.len(), 3);
        assert_eq!(entry.conversation_id.as_deref(), Some("conv-1"));
        assert_eq!(entry.trace_id, result.trace_id);
    }

    #[tokio::test]
    async fn test_fallback_searches_every_enabled_collection() {
        let mut links = api_links();
        links.push(KnowledgeLink::new("D", "Disabled").disabled());
        let h = harness(links, ScriptedStore::with_chunks(api_chunks()));

        let result = h
            .orchestrator
            .retrieve_context(RetrieveOptions::new("bot", "hello there").with_max_chunks(10))
            .await
            .unwrap();

        assert!(result.fallback_to_all);
        assert_eq!(ids(&result), vec!["c1", "a1", "b1", "b2", "a2"]);
        assert_eq!(h.store.searches.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_explicit_collections_bypass_routing() {
        let h = harness(api_links(), ScriptedStore::with_chunks(api_chunks()));

        let result = h
            .orchestrator
            .retrieve_context(
                RetrieveOptions::new("bot", "api")
                    .with_collections(vec![
                        KnowledgeLink::new("C", "Billing"),
                        KnowledgeLink::new("A", "Alpha").disabled(),
                    ]),
            )
            .await
            .unwrap();

        assert_eq!(ids(&result), vec!["c1"]);
        assert!(result.trace_id.is_none());
        assert_eq!(h.store.searches.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_no_enabled_collections_is_configuration_error() {
        let h = harness(
            vec![KnowledgeLink::new("A", "Alpha").disabled()],
            ScriptedStore::default(),
        );

        let err = h
            .orchestrator
            .retrieve_context(RetrieveOptions::new("bot", "anything"))
            .await
            .unwrap_err();

        assert!(matches!(err, AppError::Config(_)));
        assert_eq!(err.category(), ErrorCategory::Configuration);
        assert_eq!(h.embedder.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_link_overrides_take_precedence() {
        let links = vec![
            KnowledgeLink::new("A", "Alpha").with_limits(Some(1), None),
            KnowledgeLink::new("B", "Beta").with_limits(None, Some(0.75)),
        ];
        let h = harness(links, ScriptedStore::with_chunks(api_chunks()));

        let result = h
            .orchestrator
            .retrieve_context(RetrieveOptions::new("bot", "q").with_max_chunks(10))
            .await
            .unwrap();

        assert_eq!(ids(&result), vec!["a1", "b1"]);
    }

    #[tokio::test]
    async fn test_user_isolation_and_link_filter() {
        let mut mine = chunk("mine", "A", 0.9);
        mine.user_id = Some("alice".to_string());
        let mut theirs = chunk("theirs", "A", 0.95);
        theirs.user_id = Some("bob".to_string());
        let mut draft = chunk("draft", "A", 0.85);
        draft.metadata.insert("status".into(), "draft".into());
        let mut published = chunk("published", "A", 0.8);
        published.metadata.insert("status".into(), "published".into());

        let store = ScriptedStore::with_chunks([mine, theirs, draft, published]);
        let h = harness(vec![KnowledgeLink::new("A", "Alpha")], store);

        let result = h
            .orchestrator
            .retrieve_context(
                RetrieveOptions::new("bot", "q")
                    .with_user("alice")
                    .with_max_chunks(10),
            )
            .await
            .unwrap();
        assert_eq!(ids(&result), vec!["mine", "draft", "published"]);

        let filtered = KnowledgeLink::new("A", "Alpha").with_filter("status=published");
        let result = h
            .orchestrator
            .retrieve_context(
                RetrieveOptions::new("bot", "q")
                    .with_user("alice")
                    .with_collections(vec![filtered]),
            )
            .await
            .unwrap();
        assert_eq!(ids(&result), vec!["published"]);
    }

    #[tokio::test]
    async fn test_all_or_nothing_fails_on_any_collection() {
        let store = ScriptedStore::with_chunks(api_chunks()).failing("B");
        let h = harness(api_links(), store);

        let err = h
            .orchestrator
            .retrieve_context(RetrieveOptions::new("bot", "api"))
            .await
            .unwrap_err();

        match &err {
            AppError::Search { collection, message } => {
                assert_eq!(collection, "B");
                assert!(message.contains("connection reset"));
            }
            other => panic!("unexpected error {:?}", other),
        }
        assert_eq!(err.category(), ErrorCategory::Upstream);
    }

    #[tokio::test]
    async fn test_partial_mode_reports_failures() {
        let store = ScriptedStore::with_chunks(api_chunks()).failing("B");
        let h = harness(api_links(), store);

        let result = h
            .orchestrator
            .retrieve_context(
                RetrieveOptions::new("bot", "api").with_failure_mode(FailureMode::Partial),
            )
            .await
            .unwrap();

        assert_eq!(ids(&result), vec!["a1", "a2"]);
        assert!(result.is_partial());
        assert_eq!(result.failures.len(), 1);
        assert_eq!(result.failures[0].collection_id, "B");
    }

    #[tokio::test]
    async fn test_partial_mode_with_every_collection_failing_is_an_error() {
        let store = ScriptedStore::with_chunks(api_chunks())
            .failing("A")
            .failing("B");
        let h = harness(api_links(), store);

        let err = h
            .orchestrator
            .retrieve_context(
                RetrieveOptions::new("bot", "api").with_failure_mode(FailureMode::Partial),
            )
            .await
            .unwrap_err();

        // First failure in ranked candidate order
        assert!(matches!(err, AppError::Search { ref collection, .. } if collection == "B"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_aborts_in_flight_searches() {
        let store = ScriptedStore::with_chunks(api_chunks()).slow("B", Duration::from_secs(5));
        let completed = Arc::clone(&store.completed_slow_search);
        let h = harness(api_links(), store);

        let err = h
            .orchestrator
            .retrieve_context(
                RetrieveOptions::new("bot", "api")
                    .with_deadline(Duration::from_millis(50))
                    .with_failure_mode(FailureMode::Partial),
            )
            .await
            .unwrap_err();

        assert!(matches!(err, AppError::Cancelled(_)));

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert!(!completed.load(Ordering::SeqCst));
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropping_the_call_aborts_in_flight_searches() {
        let store = ScriptedStore::with_chunks(api_chunks()).slow("B", Duration::from_secs(5));
        let completed = Arc::clone(&store.completed_slow_search);
        let h = harness(api_links(), store);

        // No deadline of its own; the caller gives up and drops the future
        let outcome = tokio::time::timeout(
            Duration::from_millis(50),
            h.orchestrator
                .retrieve_context(RetrieveOptions::new("bot", "api")),
        )
        .await;
        assert!(outcome.is_err());
        assert_eq!(h.store.searches.load(Ordering::SeqCst), 2);

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert!(!completed.load(Ordering::SeqCst));
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_covers_slow_link_store() {
        let inner = crate::links::InMemoryLinkStore::new();
        inner.replace("bot", api_links()).unwrap();
        let links = SlowLinkStore {
            inner,
            delay: Duration::from_secs(30),
        };
        let embedder = Arc::new(FixedEmbedder::default());
        let orchestrator = crate::rag::RetrievalOrchestrator::new(
            crate::router::QueryRouter::new(Arc::new(links)),
            embedder.clone(),
            Arc::new(ScriptedStore::with_chunks(api_chunks())),
        );

        let started = tokio::time::Instant::now();
        let err = orchestrator
            .retrieve_context(
                RetrieveOptions::new("bot", "api").with_deadline(Duration::from_millis(50)),
            )
            .await
            .unwrap_err();

        assert!(started.elapsed() < Duration::from_secs(1));
        match err {
            AppError::Cancelled(message) => assert!(message.contains("routing")),
            other => panic!("unexpected error {:?}", other),
        }
        assert_eq!(embedder.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_not_reached_returns_everything() {
        let store = ScriptedStore::with_chunks(api_chunks()).slow("B", Duration::from_millis(20));
        let h = harness(api_links(), store);

        let result = h
            .orchestrator
            .retrieve_context(
                RetrieveOptions::new("bot", "api").with_deadline(Duration::from_secs(1)),
            )
            .await
            .unwrap();

        assert_eq!(result.chunks.len(), 4);
    }

    #[tokio::test]
    async fn test_embedding_failure_is_fatal_and_precedes_search() {
        let h = harness_with_embedder(
            api_links(),
            ScriptedStore::with_chunks(api_chunks()),
            FixedEmbedder {
                fail: true,
                ..Default::default()
            },
        );

        let err = h
            .orchestrator
            .retrieve_context(RetrieveOptions::new("bot", "api"))
            .await
            .unwrap_err();

        assert!(matches!(err, AppError::Embedding(_)));
        assert_eq!(h.store.searches.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_log_sink_failure_does_not_fail_retrieval() {
        let h = harness(api_links(), ScriptedStore::with_chunks(api_chunks()));
        let orchestrator = h.orchestrator.with_log_sink(Arc::new(BrokenSink));

        let result = orchestrator
            .retrieve_context(RetrieveOptions::new("bot", "api"))
            .await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_nothing_above_threshold_formats_empty_context() {
        let h = harness(api_links(), ScriptedStore::with_chunks(api_chunks()));

        let result = h
            .orchestrator
            .retrieve_context(RetrieveOptions::new("bot", "api").with_threshold(0.99))
            .await
            .unwrap();

        assert!(result.chunks.is_empty());
        assert_eq!(result.total_retrieved, 0);
        assert_eq!(result.formatted_context, "");
    }

    #[tokio::test]
    async fn test_requested_embedding_model_is_reported() {
        let h = harness(api_links(), ScriptedStore::with_chunks(api_chunks()));
        let orchestrator = h.orchestrator.with_embedding_model("fixed-v2");

        let result = orchestrator
            .retrieve_context(RetrieveOptions::new("bot", "api"))
            .await
            .unwrap();
        assert_eq!(result.embedding_model, "fixed-v2");
    }
}

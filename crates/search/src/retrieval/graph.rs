//! Knowledge-graph search
//!
//! Entity-name matches with their direct relationships. The graph is an
//! enrichment: a store failure surfaces as `BackendDegraded`, which the
//! hybrid retriever logs and treats as no graph results.

use super::{BackendRequest, RetrievalMethod, Retriever, SearchResult};
use crate::graph::GraphStore;
use lodestar_common::errors::{AppError, Result};
use std::sync::Arc;

/// Graph retriever over any [`GraphStore`]
pub struct GraphRetriever {
    store: Arc<dyn GraphStore>,
}

impl GraphRetriever {
    pub fn new(store: Arc<dyn GraphStore>) -> Self {
        Self { store }
    }
}

#[async_trait::async_trait]
impl Retriever for GraphRetriever {
    async fn retrieve(&self, request: &BackendRequest) -> Result<Vec<SearchResult>> {
        if request.limit == 0 {
            return Ok(Vec::new());
        }

        let outcome = tokio::select! {
            _ = request.cancel.cancelled() => return Err(AppError::Cancelled),
            outcome = self.store.search_entities(&request.text, request.limit) => outcome,
        };

        match outcome {
            Ok(mut hits) => {
                hits.truncate(request.limit);
                Ok(hits.into_iter().map(SearchResult::Graph).collect())
            }
            Err(e @ AppError::BackendDegraded { .. }) => Err(e),
            Err(e) => Err(AppError::BackendDegraded {
                backend: RetrievalMethod::Graph.to_string(),
                message: format!("{} store: {}", self.store.name(), e),
            }),
        }
    }

    fn method(&self) -> RetrievalMethod {
        RetrievalMethod::Graph
    }

    async fn close(&self) {
        self.store.close().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{Entity, EntityHit, GraphSnapshot, InMemoryGraphStore};
    use async_trait::async_trait;

    struct BrokenStore;

    #[async_trait]
    impl GraphStore for BrokenStore {
        async fn search_entities(&self, _text: &str, _limit: usize) -> Result<Vec<EntityHit>> {
            Err(AppError::BackendDegraded {
                backend: "graph".into(),
                message: "connection refused".into(),
            })
        }

        fn name(&self) -> &str {
            "broken"
        }
    }

    struct OfflineStore;

    #[async_trait]
    impl GraphStore for OfflineStore {
        async fn search_entities(&self, _text: &str, _limit: usize) -> Result<Vec<EntityHit>> {
            Err(AppError::Internal { message: "pool closed".into() })
        }

        fn name(&self) -> &str {
            "offline"
        }
    }

    #[tokio::test]
    async fn test_store_errors_surface_as_degraded() {
        let retriever = GraphRetriever::new(Arc::new(BrokenStore));
        match retriever.retrieve(&BackendRequest::new("acme", 3)).await {
            Err(AppError::BackendDegraded { backend, message }) => {
                assert_eq!(backend, "graph");
                assert_eq!(message, "connection refused");
            }
            other => panic!("expected BackendDegraded, got {other:?}"),
        }

        let retriever = GraphRetriever::new(Arc::new(OfflineStore));
        match retriever.retrieve(&BackendRequest::new("acme", 3)).await {
            Err(AppError::BackendDegraded { backend, message }) => {
                assert_eq!(backend, "graph");
                assert!(message.contains("offline"), "{message}");
            }
            other => panic!("expected BackendDegraded, got {other:?}"),
        }

        // A zero budget never touches the store
        assert!(retriever.retrieve(&BackendRequest::new("acme", 0)).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_entities_are_tagged_graph() {
        let store = InMemoryGraphStore::from_snapshot(GraphSnapshot {
            entities: vec![Entity {
                id: "e1".into(),
                name: "Acme Bank".into(),
                entity_type: "organization".into(),
                attributes: Default::default(),
            }],
            relationships: vec![],
        });
        let retriever = GraphRetriever::new(Arc::new(store));

        let results = retriever.retrieve(&BackendRequest::new("acme", 3)).await.unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].method(), RetrievalMethod::Graph);

        assert!(retriever.retrieve(&BackendRequest::new("acme", 0)).await.unwrap().is_empty());
    }
}

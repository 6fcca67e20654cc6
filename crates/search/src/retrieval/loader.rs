//! Backend loading
//!
//! The vector and lexical indices are required; the graph is optional and
//! a failure to reach it only costs graph results.

use super::{Bm25Retriever, GraphRetriever, Retriever, VectorRetriever};
use crate::graph::{GraphStore, InMemoryGraphStore, PgGraphStore};
use crate::index::{Bm25Index, FlatVectorIndex};
use async_trait::async_trait;
use lodestar_common::config::AppConfig;
use lodestar_common::embeddings::Embedder;
use lodestar_common::errors::{AppError, Result};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

/// The loaded retrievers a search runs against
#[derive(Clone)]
pub struct Backends {
    pub vector: Arc<dyn Retriever>,
    pub lexical: Arc<dyn Retriever>,
    pub graph: Option<Arc<dyn Retriever>>,
}

impl Backends {
    pub fn new(vector: Arc<dyn Retriever>, lexical: Arc<dyn Retriever>) -> Self {
        Self { vector, lexical, graph: None }
    }

    pub fn with_graph(mut self, graph: Arc<dyn Retriever>) -> Self {
        self.graph = Some(graph);
        self
    }

    /// Close every retriever
    pub async fn close(&self) {
        let graph = async {
            if let Some(graph) = &self.graph {
                graph.close().await;
            }
        };
        futures::join!(self.vector.close(), self.lexical.close(), graph);
    }
}

/// Produces the backends for a `HybridRetriever`
#[async_trait]
pub trait BackendLoader: Send + Sync {
    /// Load all backends. A required backend that cannot be loaded is
    /// reported as `BackendUnavailable` naming it.
    async fn load(&self) -> Result<Backends>;
}

/// Loads JSON index snapshots and connects the configured graph store
pub struct SnapshotLoader {
    config: AppConfig,
    embedder: Arc<dyn Embedder>,
}

impl SnapshotLoader {
    pub fn new(config: AppConfig, embedder: Arc<dyn Embedder>) -> Self {
        Self { config, embedder }
    }

    async fn load_vector(&self) -> Result<FlatVectorIndex> {
        let path = PathBuf::from(&self.config.index.vector_path);
        let index = tokio::task::spawn_blocking(move || FlatVectorIndex::load(&path))
            .await
            .map_err(|e| unavailable("vector", e))?
            .map_err(|e| unavailable("vector", e))?;

        if index.dimension() != self.embedder.dimension() {
            return Err(unavailable(
                "vector",
                format!(
                    "index dimension {} does not match embedder {} ({})",
                    index.dimension(),
                    self.embedder.model_name(),
                    self.embedder.dimension()
                ),
            ));
        }
        Ok(index)
    }

    async fn load_lexical(&self) -> Result<Bm25Index> {
        let path = PathBuf::from(&self.config.index.lexical_path);
        tokio::task::spawn_blocking(move || Bm25Index::load(&path))
            .await
            .map_err(|e| unavailable("lexical", e))?
            .map_err(|e| unavailable("lexical", e))
    }

    /// Postgres when a URL is configured, else a snapshot, else no graph
    async fn load_graph(&self) -> Result<Option<Arc<dyn GraphStore>>> {
        let graph = &self.config.graph;
        if !graph.is_enabled() {
            return Ok(None);
        }
        if graph.url.is_some() {
            let store = PgGraphStore::connect(graph).await?;
            return Ok(Some(Arc::new(store)));
        }
        if let Some(path) = &graph.snapshot_path {
            let path = PathBuf::from(path);
            let store = tokio::task::spawn_blocking(move || InMemoryGraphStore::load(&path))
                .await
                .map_err(|e| unavailable("graph", e))??;
            return Ok(Some(Arc::new(store)));
        }
        Ok(None)
    }
}

fn unavailable(backend: &str, error: impl ToString) -> AppError {
    AppError::BackendUnavailable {
        backend: backend.to_string(),
        message: error.to_string(),
    }
}

#[async_trait]
impl BackendLoader for SnapshotLoader {
    async fn load(&self) -> Result<Backends> {
        let vector = self.load_vector().await?;
        let lexical = self.load_lexical().await?;
        info!(
            vector_documents = vector.len(),
            lexical_documents = lexical.len(),
            dimension = vector.dimension(),
            "Loaded chunk indices"
        );
        if vector.len() != lexical.len() {
            warn!(
                vector_documents = vector.len(),
                lexical_documents = lexical.len(),
                "Vector and lexical corpora differ in size"
            );
        }

        let retrieval = &self.config.retrieval;
        let vector = VectorRetriever::new(Arc::new(vector), Arc::clone(&self.embedder))
            .with_instruction(self.config.embedding.query_instruction.clone())
            .with_fetch_policy(retrieval.overfetch_factor, retrieval.max_fetch_attempts);
        let mut backends = Backends::new(
            Arc::new(vector),
            Arc::new(Bm25Retriever::new(Arc::new(lexical))),
        );

        match self.load_graph().await {
            Ok(Some(store)) => {
                info!(store = store.name(), "Graph search enabled");
                backends = backends.with_graph(Arc::new(GraphRetriever::new(store)));
            }
            Ok(None) => info!("No graph store configured, graph search disabled"),
            Err(e) => warn!(error = %e, "Graph store unavailable, continuing without graph search"),
        }

        Ok(backends)
    }
}

//! Hybrid retrieval combining vector, BM25 and graph search
//!
//! Each query's budget is split across the backends, which run
//! concurrently. Graph results are fused in their own pass; vector and
//! lexical results are fused together, and the two partitions are
//! concatenated.

use super::fusion::{merge, select_chunks};
use super::{
    allocate, BackendLoader, BackendRequest, Backends, Query, Retriever, SearchResult,
    SnapshotLoader,
};
use crate::cancel::CancelToken;
use lodestar_common::config::{AppConfig, RetrievalConfig};
use lodestar_common::embeddings::Embedder;
use lodestar_common::errors::{AppError, Result};
use lodestar_common::metrics;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

/// Lifecycle of a [`HybridRetriever`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Uninitialized,
    Loading,
    Ready,
    Failed,
    Closed,
}

impl LifecycleState {
    pub fn as_str(&self) -> &'static str {
        match self {
            LifecycleState::Uninitialized => "uninitialized",
            LifecycleState::Loading => "loading",
            LifecycleState::Ready => "ready",
            LifecycleState::Failed => "failed",
            LifecycleState::Closed => "closed",
        }
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

enum Slot {
    Uninitialized,
    Loading,
    Ready(Arc<Backends>),
    Failed { backend: String, message: String },
    Closed,
}

impl Slot {
    fn state(&self) -> LifecycleState {
        match self {
            Slot::Uninitialized => LifecycleState::Uninitialized,
            Slot::Loading => LifecycleState::Loading,
            Slot::Ready(_) => LifecycleState::Ready,
            Slot::Failed { .. } => LifecycleState::Failed,
            Slot::Closed => LifecycleState::Closed,
        }
    }
}

/// Hybrid retriever over vector, lexical and (optionally) graph backends
pub struct HybridRetriever {
    slot: RwLock<Slot>,
    backend_timeout: Duration,
}

impl HybridRetriever {
    /// Create an unloaded retriever
    pub fn new(config: &RetrievalConfig) -> Self {
        Self {
            slot: RwLock::new(Slot::Uninitialized),
            backend_timeout: config.backend_timeout(),
        }
    }

    /// Create a ready retriever over already-built backends
    pub fn with_backends(backends: Backends, config: &RetrievalConfig) -> Self {
        Self {
            slot: RwLock::new(Slot::Ready(Arc::new(backends))),
            backend_timeout: config.backend_timeout(),
        }
    }

    /// Load the configured snapshots and graph store
    pub async fn open(config: &AppConfig, embedder: Arc<dyn Embedder>) -> Result<Self> {
        let retriever = Self::new(&config.retrieval);
        retriever
            .load(&SnapshotLoader::new(config.clone(), embedder))
            .await?;
        Ok(retriever)
    }

    /// Current lifecycle state
    pub async fn state(&self) -> LifecycleState {
        self.slot.read().await.state()
    }

    /// Load backends. Only valid once, from `Uninitialized`.
    ///
    /// On failure the retriever moves to `Failed` and every later search
    /// returns `BackendUnavailable` for the backend that failed.
    pub async fn load(&self, loader: &dyn BackendLoader) -> Result<()> {
        {
            let mut slot = self.slot.write().await;
            if !matches!(*slot, Slot::Uninitialized) {
                return Err(AppError::Internal {
                    message: format!("cannot load retriever in state {}", slot.state()),
                });
            }
            *slot = Slot::Loading;
        }

        info!("Loading retrieval backends...");
        let started = Instant::now();
        let loaded = loader.load().await;

        let mut slot = self.slot.write().await;
        match loaded {
            Ok(backends) if matches!(*slot, Slot::Loading) => {
                info!(
                    graph = backends.graph.is_some(),
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "Retrieval backends ready"
                );
                *slot = Slot::Ready(Arc::new(backends));
                Ok(())
            }
            Ok(backends) => {
                // Closed while loading
                drop(slot);
                backends.close().await;
                Err(AppError::NotReady {
                    state: LifecycleState::Closed.to_string(),
                })
            }
            Err(e) => {
                let (backend, message) = match &e {
                    AppError::BackendUnavailable { backend, message } => (backend.clone(), message.clone()),
                    other => ("index".to_string(), other.to_string()),
                };
                warn!(backend = %backend, error = %message, "Failed to load retrieval backends");
                if matches!(*slot, Slot::Loading) {
                    *slot = Slot::Failed { backend, message };
                }
                Err(e)
            }
        }
    }

    /// Run a hybrid search
    pub async fn search(&self, query: &Query) -> Result<Vec<SearchResult>> {
        self.search_with_cancel(query, &CancelToken::new()).await
    }

    /// Run a hybrid search that stops when `cancel` fires or the query
    /// deadline passes
    #[instrument(
        skip(self, query, cancel),
        fields(query_id = %Uuid::new_v4(), k = query.k, alpha = query.alpha)
    )]
    pub async fn search_with_cancel(&self, query: &Query, cancel: &CancelToken) -> Result<Vec<SearchResult>> {
        query.validate_args()?;
        let backends = self.backends().await?;
        let started = Instant::now();

        // One token per backend: a timeout stops only its own backend,
        // caller cancellation or the deadline stops all of them
        let tokens = [CancelToken::new(), CancelToken::new(), CancelToken::new()];
        let cancel_all = || tokens.iter().for_each(CancelToken::cancel);

        let deadline = async {
            match query.deadline {
                Some(deadline) => tokio::time::sleep_until(deadline.into()).await,
                None => std::future::pending::<()>().await,
            }
        };

        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                cancel_all();
                Err(AppError::Cancelled)
            }
            _ = deadline => {
                cancel_all();
                Err(AppError::Timeout {
                    backend: "query".to_string(),
                    timeout_ms: started.elapsed().as_millis() as u64,
                })
            }
            results = self.run(&backends, query, &tokens) => Ok(results),
        };

        let elapsed = started.elapsed().as_secs_f64();
        match &outcome {
            Ok(results) => {
                metrics::record_search(elapsed, "ok", results.len());
                if results.is_empty() {
                    info!("No matches");
                } else {
                    debug!(results = results.len(), "Search complete");
                }
            }
            Err(e) => {
                let label = if matches!(e, AppError::Cancelled) { "cancelled" } else { "timeout" };
                metrics::record_search(elapsed, label, 0);
                info!(error = %e, "Search abandoned");
            }
        }
        outcome
    }

    /// Release backend connections. Idempotent; in-flight searches keep
    /// their own handle on the backends and finish normally.
    pub async fn close(&self) {
        let previous = {
            let mut slot = self.slot.write().await;
            // A failed retriever stays failed
            if matches!(*slot, Slot::Failed { .. } | Slot::Closed) {
                return;
            }
            std::mem::replace(&mut *slot, Slot::Closed)
        };

        if let Slot::Ready(backends) = previous {
            backends.close().await;
            info!("Retrieval backends closed");
        }
    }

    async fn backends(&self) -> Result<Arc<Backends>> {
        match &*self.slot.read().await {
            Slot::Ready(backends) => Ok(Arc::clone(backends)),
            Slot::Failed { backend, message } => Err(AppError::BackendUnavailable {
                backend: backend.clone(),
                message: message.clone(),
            }),
            other => Err(AppError::NotReady {
                state: other.state().to_string(),
            }),
        }
    }

    async fn run(&self, backends: &Backends, query: &Query, tokens: &[CancelToken; 3]) -> Vec<SearchResult> {
        let graph = backends.graph.as_ref().filter(|_| query.include_graph);
        let budget = allocate(query.k, query.alpha, query.graph_ratio, graph.is_some());
        debug!(graph = budget.graph, vector = budget.vector, lexical = budget.lexical, "Budget allocated");

        // Chunk backends with any weight are asked for the whole capacity,
        // even when their rounded share is zero, so slots a short graph or
        // a short backend leaves open can be backfilled
        let filter = query.effective_filter();
        let chunk_request = |limit: usize, token: &CancelToken| BackendRequest {
            text: query.text.clone(),
            filter: filter.clone(),
            limit,
            cancel: token.clone(),
        };
        let vector_limit = if query.alpha > 0.0 { query.k } else { 0 };
        let lexical_limit = if query.alpha < 1.0 { query.k } else { 0 };

        let (graph_results, vector_results, lexical_results) = tokio::join!(
            self.run_backend(graph, chunk_request(budget.graph, &tokens[0]).with_filter(None)),
            self.run_backend(Some(&backends.vector), chunk_request(vector_limit, &tokens[1])),
            self.run_backend(Some(&backends.lexical), chunk_request(lexical_limit, &tokens[2])),
        );

        let mut results = merge(vec![graph_results], budget.graph);
        let capacity = query.k - results.len();
        results.extend(select_chunks(vector_results, lexical_results, &budget, capacity));
        results
    }

    /// Run one backend with the per-backend timeout. Failures and
    /// timeouts degrade to an empty list.
    async fn run_backend(&self, retriever: Option<&Arc<dyn Retriever>>, request: BackendRequest) -> Vec<SearchResult> {
        let Some(retriever) = retriever else {
            return Vec::new();
        };
        if request.limit == 0 {
            return Vec::new();
        }

        let backend = retriever.method();
        let started = Instant::now();
        match tokio::time::timeout(self.backend_timeout, retriever.retrieve(&request)).await {
            Ok(Ok(results)) => {
                metrics::record_backend(backend.as_str(), started.elapsed().as_secs_f64(), results.len());
                debug!(backend = %backend, results = results.len(), "Backend finished");
                results
            }
            Ok(Err(e)) => {
                let degraded = match e {
                    AppError::BackendDegraded { .. } => e,
                    other => AppError::BackendDegraded {
                        backend: backend.to_string(),
                        message: other.to_string(),
                    },
                };
                warn!(error = %degraded, "Continuing without backend results");
                metrics::record_degraded(backend.as_str(), "error");
                Vec::new()
            }
            Err(_) => {
                request.cancel.cancel();
                let timeout = AppError::Timeout {
                    backend: backend.to_string(),
                    timeout_ms: self.backend_timeout.as_millis() as u64,
                };
                warn!(error = %timeout, "Continuing without backend results");
                metrics::record_degraded(backend.as_str(), "timeout");
                Vec::new()
            }
        }
    }
}

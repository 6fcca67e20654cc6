//! Hybrid retrieval
//!
//! Three retrieval backends feed one ranked list:
//! - Vector search (embedding similarity over a flat L2 index)
//! - Lexical search (BM25 over the same chunks)
//! - Graph search (entity names plus one-hop relationships)
//!
//! `HybridRetriever` splits the result budget between them, runs them
//! concurrently and fuses the answers.

pub mod budget;
pub mod filter;
pub mod fusion;
mod bm25;
mod graph;
mod hybrid;
mod loader;
mod vector;

pub use bm25::Bm25Retriever;
pub use budget::{allocate, Budget};
pub use filter::{FilterValue, MetadataFilter};
pub use graph::GraphRetriever;
pub use hybrid::{HybridRetriever, LifecycleState};
pub use loader::{BackendLoader, Backends, SnapshotLoader};
pub use vector::VectorRetriever;

use crate::cancel::CancelToken;
use crate::graph::EntityHit;
use lodestar_common::config::RetrievalConfig;
use lodestar_common::errors::{AppError, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::time::{Duration, Instant};
use validator::Validate;

/// Open metadata record attached to every chunk
pub type Metadata = serde_json::Map<String, Value>;

/// Which backend produced a result
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum RetrievalMethod {
    /// Embedding similarity
    Vector,
    /// BM25 term matching
    Lexical,
    /// Knowledge-graph entity search
    Graph,
}

impl RetrievalMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            RetrievalMethod::Vector => "vector",
            RetrievalMethod::Lexical => "lexical",
            RetrievalMethod::Graph => "graph",
        }
    }
}

impl fmt::Display for RetrievalMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Retrieved chunk with relevance score
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChunkHit {
    /// Chunk content
    pub chunk: String,

    /// Metadata as stored at index-build time, including `id`
    pub metadata: Metadata,

    /// Backend-specific relevance, higher is better
    pub score: f64,
}

/// One entry of a search response
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "retrieval_method", rename_all = "snake_case")]
pub enum SearchResult {
    Vector(ChunkHit),
    Lexical(ChunkHit),
    Graph(EntityHit),
}

impl SearchResult {
    pub fn method(&self) -> RetrievalMethod {
        match self {
            SearchResult::Vector(_) => RetrievalMethod::Vector,
            SearchResult::Lexical(_) => RetrievalMethod::Lexical,
            SearchResult::Graph(_) => RetrievalMethod::Graph,
        }
    }

    pub fn score(&self) -> f64 {
        match self {
            SearchResult::Vector(hit) | SearchResult::Lexical(hit) => hit.score,
            SearchResult::Graph(hit) => hit.score,
        }
    }

    /// Deduplication key: chunk `id` or entity `id`
    pub fn identity(&self) -> Option<ResultKey> {
        match self {
            SearchResult::Vector(hit) | SearchResult::Lexical(hit) => {
                metadata_id(&hit.metadata).map(ResultKey::Chunk)
            }
            SearchResult::Graph(hit) => Some(ResultKey::Entity(hit.entity.id.clone())),
        }
    }

    /// Chunk payload, if this is a chunk result
    pub fn as_chunk(&self) -> Option<&ChunkHit> {
        match self {
            SearchResult::Vector(hit) | SearchResult::Lexical(hit) => Some(hit),
            SearchResult::Graph(_) => None,
        }
    }
}

/// Identity of a result within one response
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ResultKey {
    Chunk(String),
    Entity(String),
}

/// Textual form of a metadata `id`; strings and numbers compare alike
pub fn metadata_id(metadata: &Metadata) -> Option<String> {
    match metadata.get("id")? {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Hybrid search request
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct Query {
    /// Natural-language query text
    #[validate(length(min = 1, message = "query text must not be empty"))]
    pub text: String,

    /// Metadata constraints applied to chunk results
    #[serde(default)]
    pub filters: Option<MetadataFilter>,

    /// Maximum results to return
    #[serde(default = "default_k")]
    #[validate(range(min = 1, message = "k must be positive"))]
    pub k: usize,

    /// Vector share of the chunk budget (1.0 = vector only)
    #[serde(default = "default_alpha")]
    #[validate(range(min = 0.0, max = 1.0, message = "alpha must be between 0 and 1"))]
    pub alpha: f64,

    /// Whether the graph backend takes part
    #[serde(default = "default_include_graph")]
    pub include_graph: bool,

    /// Share of `k` reserved for graph results
    #[serde(default = "default_graph_ratio")]
    #[validate(range(min = 0.0, max = 1.0, message = "graph_ratio must be between 0 and 1"))]
    pub graph_ratio: f64,

    /// Point after which the whole search is abandoned
    #[serde(skip)]
    pub deadline: Option<Instant>,
}

fn default_k() -> usize { 5 }
fn default_alpha() -> f64 { 0.5 }
fn default_include_graph() -> bool { true }
fn default_graph_ratio() -> f64 { 0.3 }

impl Query {
    /// Query with the built-in defaults
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            filters: None,
            k: default_k(),
            alpha: default_alpha(),
            include_graph: default_include_graph(),
            graph_ratio: default_graph_ratio(),
            deadline: None,
        }
    }

    /// Query with defaults taken from configuration
    pub fn from_config(text: impl Into<String>, config: &RetrievalConfig) -> Self {
        Self {
            k: config.default_k,
            alpha: config.default_alpha,
            include_graph: config.default_include_graph,
            graph_ratio: config.default_graph_ratio,
            ..Self::new(text)
        }
    }

    pub fn with_k(mut self, k: usize) -> Self {
        self.k = k;
        self
    }

    pub fn with_alpha(mut self, alpha: f64) -> Self {
        self.alpha = alpha;
        self
    }

    pub fn with_graph_ratio(mut self, graph_ratio: f64) -> Self {
        self.graph_ratio = graph_ratio;
        self
    }

    pub fn with_graph(mut self, include_graph: bool) -> Self {
        self.include_graph = include_graph;
        self
    }

    pub fn with_filters(mut self, filters: MetadataFilter) -> Self {
        self.filters = Some(filters);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.deadline = Some(Instant::now() + timeout);
        self
    }

    /// Check argument ranges; every failure is `InvalidArgument`.
    pub fn validate_args(&self) -> Result<()> {
        // NaN slips through range checks
        if self.alpha.is_nan() {
            return Err(AppError::invalid_argument("alpha", "alpha must be a number"));
        }
        if self.graph_ratio.is_nan() {
            return Err(AppError::invalid_argument("graph_ratio", "graph_ratio must be a number"));
        }
        self.validate()?;
        if self.text.trim().is_empty() {
            return Err(AppError::invalid_argument("text", "query text must not be empty"));
        }
        Ok(())
    }

    /// Filter with empty constraint sets normalized away
    pub(crate) fn effective_filter(&self) -> Option<MetadataFilter> {
        self.filters.clone().filter(|f| !f.is_empty())
    }
}

/// What a single backend is asked for
#[derive(Debug, Clone)]
pub struct BackendRequest {
    /// Raw query text; each backend derives its own representation
    pub text: String,

    /// Chunk metadata constraints (ignored by the graph backend)
    pub filter: Option<MetadataFilter>,

    /// Maximum results wanted
    pub limit: usize,

    /// Fires when the backend's share of the search is abandoned
    pub cancel: CancelToken,
}

impl BackendRequest {
    pub fn new(text: impl Into<String>, limit: usize) -> Self {
        Self {
            text: text.into(),
            filter: None,
            limit,
            cancel: CancelToken::new(),
        }
    }

    pub fn with_filter(mut self, filter: Option<MetadataFilter>) -> Self {
        self.filter = filter;
        self
    }
}

/// Common trait for all retrieval backends
#[async_trait::async_trait]
pub trait Retriever: Send + Sync {
    /// Retrieve at most `request.limit` results, best first
    async fn retrieve(&self, request: &BackendRequest) -> Result<Vec<SearchResult>>;

    /// Get the retrieval method
    fn method(&self) -> RetrievalMethod;

    /// Release held resources; called once per retriever on shutdown
    async fn close(&self) {}
}

/// Run blocking index work on the blocking pool
pub(crate) async fn run_blocking<T, F>(work: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|e| AppError::Internal {
            message: format!("index task failed: {}", e),
        })?
}

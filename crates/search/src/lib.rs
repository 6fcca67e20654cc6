//! Lodestar Search
//!
//! Hybrid retrieval over three independently built backends:
//! - Vector search (flat L2 index over chunk embeddings)
//! - BM25 lexical search (same chunks, metadata-filtered before scoring)
//! - Knowledge-graph search (Postgres or in-memory entity graph)
//!
//! `HybridRetriever::search` is the entry point; it splits the result
//! budget, runs the backends concurrently and fuses their answers.

pub mod cancel;
pub mod graph;
pub mod index;
pub mod retrieval;

pub use cancel::CancelToken;
pub use retrieval::{
    Backends, HybridRetriever, LifecycleState, MetadataFilter, Query, RetrievalMethod,
    SearchResult,
};

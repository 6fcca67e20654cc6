//! Vector similarity search
//!
//! Embeds the query, scans the flat index and filters the nearest
//! candidates by metadata. When the filter leaves fewer than `k`
//! candidates, the window is doubled and the index scanned again, a
//! bounded number of times.

use super::{
    metadata_id, run_blocking, BackendRequest, ChunkHit, MetadataFilter, RetrievalMethod,
    Retriever, SearchResult,
};
use crate::cancel::CancelToken;
use crate::index::FlatVectorIndex;
use lodestar_common::embeddings::{instructed_query, Embedder};
use lodestar_common::errors::{AppError, Result};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::debug;

/// Vector retriever over a flat L2 index
pub struct VectorRetriever {
    index: Arc<FlatVectorIndex>,
    embedder: Arc<dyn Embedder>,
    instruction: String,
    overfetch_factor: usize,
    max_attempts: u32,
}

impl VectorRetriever {
    /// Create a new vector retriever (no query instruction, 5x over-fetch, 3 scans)
    pub fn new(index: Arc<FlatVectorIndex>, embedder: Arc<dyn Embedder>) -> Self {
        Self {
            index,
            embedder,
            instruction: String::new(),
            overfetch_factor: 5,
            max_attempts: 3,
        }
    }

    /// Prefix queries with the instruction the corpus was embedded with
    pub fn with_instruction(mut self, instruction: impl Into<String>) -> Self {
        self.instruction = instruction.into();
        self
    }

    /// Candidates fetched per wanted result, and the scan limit per query
    pub fn with_fetch_policy(mut self, overfetch_factor: usize, max_attempts: u32) -> Self {
        self.overfetch_factor = overfetch_factor.max(1);
        self.max_attempts = max_attempts.max(1);
        self
    }

    /// Search with a precomputed query embedding
    pub async fn search_embedding(
        &self,
        embedding: Vec<f32>,
        filter: Option<MetadataFilter>,
        k: usize,
        cancel: CancelToken,
    ) -> Result<Vec<SearchResult>> {
        if k == 0 || self.index.is_empty() {
            return Ok(Vec::new());
        }

        let index = Arc::clone(&self.index);
        let window = k.saturating_mul(self.overfetch_factor);
        let max_attempts = self.max_attempts;

        run_blocking(move || {
            nearest_matching(&index, &embedding, filter.as_ref(), k, window, max_attempts, &cancel)
        })
        .await
    }
}

/// Bounded refetch loop: scan with `window`, doubling until `k` candidates
/// pass the filter, the window covers the index, or attempts run out.
fn nearest_matching(
    index: &FlatVectorIndex,
    embedding: &[f32],
    filter: Option<&MetadataFilter>,
    k: usize,
    window: usize,
    max_attempts: u32,
    cancel: &CancelToken,
) -> Result<Vec<SearchResult>> {
    let total = index.len();
    let mut window = window.max(k);
    let mut results = Vec::new();

    for attempt in 1..=max_attempts {
        let fetch_k = window.min(total);
        let hits = index.search(embedding, fetch_k, cancel)?;

        results.clear();
        let mut seen = HashSet::new();
        for (position, distance) in hits {
            let Some(doc) = index.document(position) else {
                continue;
            };
            if filter.is_some_and(|f| !f.matches(&doc.metadata)) {
                continue;
            }
            let Some(id) = metadata_id(&doc.metadata) else {
                continue;
            };
            if !seen.insert(id) {
                continue;
            }

            results.push(SearchResult::Vector(ChunkHit {
                chunk: doc.chunk.clone(),
                metadata: doc.metadata.clone(),
                score: 1.0 / (1.0 + f64::from(distance)),
            }));
            if results.len() == k {
                break;
            }
        }

        debug!(attempt, fetch_k, matched = results.len(), "Vector scan");
        if results.len() >= k || fetch_k >= total {
            break;
        }
        window = window.saturating_mul(2);
    }

    Ok(results)
}

#[async_trait::async_trait]
impl Retriever for VectorRetriever {
    async fn retrieve(&self, request: &BackendRequest) -> Result<Vec<SearchResult>> {
        if request.limit == 0 {
            return Ok(Vec::new());
        }

        let text = instructed_query(&self.instruction, &request.text);
        let embedding = tokio::select! {
            _ = request.cancel.cancelled() => return Err(AppError::Cancelled),
            embedding = self.embedder.embed(&text) => embedding?,
        };

        self.search_embedding(embedding, request.filter.clone(), request.limit, request.cancel.clone())
            .await
    }

    fn method(&self) -> RetrievalMethod {
        RetrievalMethod::Vector
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::VectorDocument;
    use crate::retrieval::Metadata;
    use async_trait::async_trait;
    use serde_json::json;

    /// Embeds every text to the same point
    struct FixedEmbedder(Vec<f32>);

    #[async_trait]
    impl Embedder for FixedEmbedder {
        async fn embed(&self, _text: &str) -> Result<Vec<f32>> {
            Ok(self.0.clone())
        }

        fn model_name(&self) -> &str {
            "fixed"
        }

        fn dimension(&self) -> usize {
            self.0.len()
        }
    }

    /// Documents on a line at distance 0, 1, 2, ... from the origin;
    /// only the last one is in category "rare".
    fn line_index(n: usize) -> Arc<FlatVectorIndex> {
        let documents = (0..n)
            .map(|i| {
                let mut metadata = Metadata::new();
                metadata.insert("id".into(), json!(format!("d{i}")));
                let category = if i == n - 1 { "rare" } else { "common" };
                metadata.insert("category".into(), json!(category));
                VectorDocument { chunk: format!("document {i}"), metadata, embedding: vec![i as f32, 0.0] }
            })
            .collect();
        Arc::new(FlatVectorIndex::new(2, documents).unwrap())
    }

    fn retriever(n: usize) -> VectorRetriever {
        VectorRetriever::new(line_index(n), Arc::new(FixedEmbedder(vec![0.0, 0.0])))
    }

    fn id(result: &SearchResult) -> String {
        result.as_chunk().unwrap().metadata["id"].as_str().unwrap().to_string()
    }

    #[tokio::test]
    async fn test_scores_are_inverse_distance() {
        let results = retriever(5).retrieve(&BackendRequest::new("anything", 3)).await.unwrap();
        assert_eq!(results.iter().map(id).collect::<Vec<_>>(), vec!["d0", "d1", "d2"]);
        assert_eq!(results[0].score(), 1.0);
        assert_eq!(results[1].score(), 0.5);
        assert_eq!(results[2].score(), 0.2);
    }

    #[tokio::test]
    async fn test_refetch_reaches_far_matches() {
        // k=1, windows 5 -> 10 -> 20: the 12th document is found on the third scan
        let filter = MetadataFilter::new().equals("category", "rare");
        let request = BackendRequest::new("anything", 1).with_filter(Some(filter));
        let results = retriever(12).retrieve(&request).await.unwrap();
        assert_eq!(results.iter().map(id).collect::<Vec<_>>(), vec!["d11"]);
    }

    #[tokio::test]
    async fn test_refetch_is_bounded() {
        // After three scans the window is 20; the 30th document stays out of reach
        let filter = MetadataFilter::new().equals("category", "rare");
        let request = BackendRequest::new("anything", 1).with_filter(Some(filter));
        let results = retriever(30).retrieve(&request).await.unwrap();
        assert!(results.is_empty());
    }

    #[tokio::test]
    async fn test_filter_excludes_everything() {
        let filter = MetadataFilter::new().equals("category", "missing");
        let request = BackendRequest::new("anything", 3).with_filter(Some(filter));
        assert!(retriever(5).retrieve(&request).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_dimension_mismatch_is_an_error() {
        let retriever = VectorRetriever::new(line_index(3), Arc::new(FixedEmbedder(vec![0.0; 4])));
        assert!(retriever.retrieve(&BackendRequest::new("anything", 1)).await.is_err());
    }
}

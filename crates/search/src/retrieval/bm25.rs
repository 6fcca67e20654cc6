//! BM25 lexical search
//!
//! The metadata filter runs before scoring, so only matching documents
//! are scored. Scores are divided by the best score among them, which
//! puts every returned score in (0, 1].

use super::{run_blocking, BackendRequest, ChunkHit, MetadataFilter, RetrievalMethod, Retriever, SearchResult};
use crate::cancel::CancelToken;
use crate::index::{tokenize, Bm25Index};
use lodestar_common::errors::{AppError, Result};
use std::sync::Arc;
use tracing::warn;

/// BM25 retriever over an in-memory term index
pub struct Bm25Retriever {
    index: Arc<Bm25Index>,
}

impl Bm25Retriever {
    /// Create a new BM25 retriever
    pub fn new(index: Arc<Bm25Index>) -> Self {
        Self { index }
    }

    /// Search with pre-tokenized query terms
    pub async fn search_tokens(
        &self,
        tokens: Vec<String>,
        filter: Option<MetadataFilter>,
        k: usize,
        cancel: CancelToken,
    ) -> Result<Vec<SearchResult>> {
        if tokens.is_empty() || k == 0 {
            return Ok(Vec::new());
        }

        let index = Arc::clone(&self.index);
        run_blocking(move || rank(&index, &tokens, filter.as_ref(), k, &cancel)).await
    }
}

fn rank(
    index: &Bm25Index,
    tokens: &[String],
    filter: Option<&MetadataFilter>,
    k: usize,
    cancel: &CancelToken,
) -> Result<Vec<SearchResult>> {
    let candidates = match filter {
        Some(filter) => index.positions_where(|metadata| filter.matches(metadata)),
        None => (0..index.len()).collect(),
    };

    let scores = match index.score(tokens, &candidates, cancel) {
        Ok(scores) => scores,
        Err(AppError::Cancelled) => return Err(AppError::Cancelled),
        Err(e) => {
            warn!(error = %e, "BM25 scoring failed, returning no lexical results");
            return Ok(Vec::new());
        }
    };

    let mut scored: Vec<(usize, f64)> = scores
        .into_iter()
        .filter(|(_, score)| score.is_finite() && *score > 0.0)
        .collect();
    let Some(max) = scored.iter().map(|(_, score)| *score).reduce(f64::max) else {
        return Ok(Vec::new());
    };

    // Stable: ties keep corpus order
    scored.sort_by(|a, b| b.1.total_cmp(&a.1));
    scored.truncate(k);

    Ok(scored
        .into_iter()
        .filter_map(|(position, score)| {
            let doc = index.document(position)?;
            Some(SearchResult::Lexical(ChunkHit {
                chunk: doc.chunk.clone(),
                metadata: doc.metadata.clone(),
                score: score / max,
            }))
        })
        .collect())
}

#[async_trait::async_trait]
impl Retriever for Bm25Retriever {
    async fn retrieve(&self, request: &BackendRequest) -> Result<Vec<SearchResult>> {
        self.search_tokens(
            tokenize(&request.text),
            request.filter.clone(),
            request.limit,
            request.cancel.clone(),
        )
        .await
    }

    fn method(&self) -> RetrievalMethod {
        RetrievalMethod::Lexical
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::{Bm25Params, LexicalDocument};
    use crate::retrieval::Metadata;
    use serde_json::json;

    fn retriever() -> Bm25Retriever {
        let docs = [
            ("letter of credit issued by the bank", "A"),
            ("the bank confirms the letter of credit", "B"),
            ("credit terms and credit limits", "C"),
            ("bill of lading for the cargo", "A"),
            ("insurance certificate for the cargo", "B"),
        ];
        let documents = docs
            .iter()
            .map(|(text, category)| {
                let mut metadata = Metadata::new();
                metadata.insert("category".into(), json!(category));
                LexicalDocument { chunk: text.to_string(), metadata, tokens: None }
            })
            .collect();
        Bm25Retriever::new(Arc::new(Bm25Index::new(documents, Bm25Params::default())))
    }

    #[tokio::test]
    async fn test_scores_are_max_normalized() {
        let results = retriever().retrieve(&BackendRequest::new("credit", 10)).await.unwrap();
        assert_eq!(results.len(), 3);
        assert_eq!(results[0].score(), 1.0);
        assert!(results.iter().all(|r| r.score() > 0.0 && r.score() <= 1.0));
        assert!(results.windows(2).all(|w| w[0].score() >= w[1].score()));
        // IDs were assigned from corpus positions
        assert_eq!(results[0].as_chunk().unwrap().metadata["id"], json!(2));
    }

    #[tokio::test]
    async fn test_filter_applies_before_scoring() {
        let filter = MetadataFilter::new().one_of("category", ["A", "B"]);
        let request = BackendRequest::new("credit", 10).with_filter(Some(filter));
        let results = retriever().retrieve(&request).await.unwrap();

        assert_eq!(results.len(), 2);
        // Normalized over the filtered set, so the best remaining match is 1.0
        assert_eq!(results[0].score(), 1.0);
        for result in &results {
            assert_ne!(result.as_chunk().unwrap().metadata["category"], json!("C"));
        }
    }

    #[tokio::test]
    async fn test_no_match_and_empty_query() {
        let retriever = retriever();
        assert!(retriever.retrieve(&BackendRequest::new("arbitration", 5)).await.unwrap().is_empty());
        assert!(retriever.retrieve(&BackendRequest::new("   ", 5)).await.unwrap().is_empty());
        assert!(retriever.retrieve(&BackendRequest::new("credit", 0)).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_scoring_failure_yields_no_results() {
        // Every document is token-free, so the average length is zero
        let documents = (0..3)
            .map(|_| LexicalDocument {
                chunk: String::new(),
                metadata: Metadata::new(),
                tokens: Some(Vec::new()),
            })
            .collect();
        let retriever = Bm25Retriever::new(Arc::new(Bm25Index::new(documents, Bm25Params::default())));

        let results = retriever.retrieve(&BackendRequest::new("credit", 5)).await.unwrap();
        assert!(results.is_empty());
    }

    #[tokio::test]
    async fn test_cancelled_scan_is_not_swallowed() {
        let request = BackendRequest::new("credit", 5);
        request.cancel.cancel();
        assert!(matches!(retriever().retrieve(&request).await, Err(AppError::Cancelled)));
    }

    #[tokio::test]
    async fn test_limit_keeps_best() {
        let results = retriever().retrieve(&BackendRequest::new("credit", 1)).await.unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].score(), 1.0);
    }
}

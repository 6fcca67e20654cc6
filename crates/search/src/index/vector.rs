//! Exact nearest-neighbour index over chunk embeddings

use super::{read_snapshot, StoredDocument, CANCEL_CHECK_INTERVAL};
use crate::cancel::CancelToken;
use crate::retrieval::Metadata;
use lodestar_common::errors::{AppError, Result};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::path::Path;

/// On-disk vector snapshot
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VectorSnapshot {
    pub dimension: usize,
    pub documents: Vec<VectorDocument>,
}

/// One embedded chunk in a snapshot
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VectorDocument {
    pub chunk: String,
    #[serde(default)]
    pub metadata: Metadata,
    pub embedding: Vec<f32>,
}

/// Flat (brute-force) L2 index. Distances are squared Euclidean.
#[derive(Debug)]
pub struct FlatVectorIndex {
    dimension: usize,
    /// Row-major embeddings, `dimension` floats per document
    vectors: Vec<f32>,
    documents: Vec<StoredDocument>,
}

impl FlatVectorIndex {
    /// Build an index, rejecting embeddings of the wrong dimension
    pub fn new(dimension: usize, documents: Vec<VectorDocument>) -> Result<Self> {
        if dimension == 0 {
            return Err(AppError::Internal {
                message: "vector index dimension must be positive".to_string(),
            });
        }

        let mut vectors = Vec::with_capacity(dimension * documents.len());
        let mut stored = Vec::with_capacity(documents.len());
        for (position, doc) in documents.into_iter().enumerate() {
            if doc.embedding.len() != dimension {
                return Err(AppError::Internal {
                    message: format!(
                        "document {} has {} dimensions, index expects {}",
                        position,
                        doc.embedding.len(),
                        dimension
                    ),
                });
            }
            vectors.extend_from_slice(&doc.embedding);
            stored.push(StoredDocument::new(doc.chunk, doc.metadata, position));
        }

        Ok(Self { dimension, vectors, documents: stored })
    }

    /// Load a JSON snapshot from disk
    pub fn load(path: &Path) -> Result<Self> {
        let snapshot: VectorSnapshot = read_snapshot(path)?;
        Self::new(snapshot.dimension, snapshot.documents).map_err(|e| AppError::IndexLoad {
            path: path.display().to_string(),
            message: e.to_string(),
        })
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    pub fn len(&self) -> usize {
        self.documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }

    /// Document at a corpus position
    pub fn document(&self, position: usize) -> Option<&StoredDocument> {
        self.documents.get(position)
    }

    /// The `fetch_k` nearest documents as `(position, distance)`, closest first.
    /// Equal distances are ordered by corpus position.
    pub fn search(&self, query: &[f32], fetch_k: usize, cancel: &CancelToken) -> Result<Vec<(usize, f32)>> {
        if query.len() != self.dimension {
            return Err(AppError::EmbeddingError {
                message: format!(
                    "query embedding has {} dimensions, index expects {}",
                    query.len(),
                    self.dimension
                ),
            });
        }

        let fetch_k = fetch_k.min(self.len());
        if fetch_k == 0 {
            return Ok(Vec::new());
        }

        let mut distances = Vec::with_capacity(self.len());
        for (position, row) in self.vectors.chunks_exact(self.dimension).enumerate() {
            if position % CANCEL_CHECK_INTERVAL == 0 && cancel.is_cancelled() {
                return Err(AppError::Cancelled);
            }
            let distance: f32 = row
                .iter()
                .zip(query)
                .map(|(a, b)| (a - b) * (a - b))
                .sum();
            distances.push((position, distance));
        }

        let closest_first = |a: &(usize, f32), b: &(usize, f32)| -> Ordering {
            a.1.total_cmp(&b.1).then(a.0.cmp(&b.0))
        };
        if fetch_k < distances.len() {
            distances.select_nth_unstable_by(fetch_k - 1, closest_first);
            distances.truncate(fetch_k);
        }
        distances.sort_by(closest_first);

        Ok(distances)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc(id: &str, embedding: Vec<f32>) -> VectorDocument {
        let mut metadata = Metadata::new();
        metadata.insert("id".into(), json!(id));
        VectorDocument { chunk: format!("chunk {id}"), metadata, embedding }
    }

    fn sample() -> FlatVectorIndex {
        FlatVectorIndex::new(
            2,
            vec![
                doc("far", vec![10.0, 10.0]),
                doc("near", vec![1.0, 0.0]),
                doc("exact", vec![0.0, 0.0]),
                doc("near-twin", vec![0.0, 1.0]),
            ],
        )
        .unwrap()
    }

    #[test]
    fn test_nearest_first_with_position_ties() {
        let index = sample();
        let hits = index.search(&[0.0, 0.0], 3, &CancelToken::new()).unwrap();
        assert_eq!(hits, vec![(2, 0.0), (1, 1.0), (3, 1.0)]);
    }

    #[test]
    fn test_fetch_k_clamped_to_index_size() {
        let index = sample();
        let hits = index.search(&[0.0, 0.0], 100, &CancelToken::new()).unwrap();
        assert_eq!(hits.len(), 4);
        assert_eq!(hits.last().unwrap().0, 0);
    }

    #[test]
    fn test_dimension_mismatch() {
        let index = sample();
        tokio_test::assert_err!(index.search(&[0.0], 1, &CancelToken::new()));
        tokio_test::assert_err!(FlatVectorIndex::new(3, vec![doc("x", vec![1.0])]));
    }

    #[test]
    fn test_cancelled_scan() {
        let index = sample();
        let token = CancelToken::new();
        token.cancel();
        assert!(matches!(index.search(&[0.0, 0.0], 1, &token), Err(AppError::Cancelled)));
    }
}

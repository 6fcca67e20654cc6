//! Read-only index snapshots
//!
//! Both chunk indices are produced offline and loaded once at startup:
//! - `FlatVectorIndex`: exact squared-L2 nearest neighbours
//! - `Bm25Index`: Okapi BM25 term statistics with a parallel metadata array

mod lexical;
mod vector;

pub use lexical::{tokenize, Bm25Index, Bm25Params, LexicalDocument, LexicalSnapshot};
pub use vector::{FlatVectorIndex, VectorDocument, VectorSnapshot};

use crate::retrieval::Metadata;
use lodestar_common::errors::{AppError, Result};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

/// Rows scanned between cancellation checks
pub(crate) const CANCEL_CHECK_INTERVAL: usize = 1024;

/// A chunk as held by an index
#[derive(Debug, Clone, PartialEq)]
pub struct StoredDocument {
    pub chunk: String,
    pub metadata: Metadata,
}

impl StoredDocument {
    /// Build a stored document, assigning `position` as its ID when the
    /// metadata carries none.
    pub(crate) fn new(chunk: String, mut metadata: Metadata, position: usize) -> Self {
        if !metadata.contains_key("id") {
            metadata.insert("id".to_string(), Value::from(position as u64));
        }
        Self { chunk, metadata }
    }
}

/// Read a JSON snapshot, mapping every failure to `IndexLoad`
pub(crate) fn read_snapshot<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let load_error = |message: String| AppError::IndexLoad {
        path: path.display().to_string(),
        message,
    };

    let file = File::open(path).map_err(|e| load_error(e.to_string()))?;
    serde_json::from_reader(BufReader::new(file)).map_err(|e| load_error(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_missing_id_is_assigned_from_position() {
        let doc = StoredDocument::new("text".into(), Metadata::new(), 7);
        assert_eq!(doc.metadata["id"], json!(7));

        let mut metadata = Metadata::new();
        metadata.insert("id".into(), json!("chunk-1"));
        let doc = StoredDocument::new("text".into(), metadata, 7);
        assert_eq!(doc.metadata["id"], json!("chunk-1"));
    }

    #[test]
    fn test_read_snapshot_reports_path() {
        let err = read_snapshot::<serde_json::Value>(Path::new("/nonexistent/index.json")).unwrap_err();
        match err {
            AppError::IndexLoad { path, .. } => assert!(path.contains("index.json")),
            other => panic!("unexpected error: {other:?}"),
        }
    }
}

//! Okapi BM25 index with metadata kept alongside each document

use super::{read_snapshot, StoredDocument, CANCEL_CHECK_INTERVAL};
use crate::cancel::CancelToken;
use crate::retrieval::Metadata;
use lodestar_common::errors::{AppError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

/// Split text into terms the way the corpus was tokenized (whitespace)
pub fn tokenize(text: &str) -> Vec<String> {
    text.split_whitespace().map(str::to_string).collect()
}

/// BM25 tuning parameters
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bm25Params {
    /// Term-frequency saturation
    pub k1: f64,
    /// Length normalization
    pub b: f64,
    /// Floor for negative IDF, as a fraction of the mean IDF
    pub epsilon: f64,
}

impl Default for Bm25Params {
    fn default() -> Self {
        Self {
            k1: 1.5,
            b: 0.75,
            epsilon: 0.25,
        }
    }
}

/// On-disk lexical snapshot
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LexicalSnapshot {
    pub documents: Vec<LexicalDocument>,
}

/// One chunk in a lexical snapshot; `tokens` defaults to whitespace splitting
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LexicalDocument {
    pub chunk: String,
    #[serde(default)]
    pub metadata: Metadata,
    #[serde(default)]
    pub tokens: Option<Vec<String>>,
}

/// Term statistics over the whole corpus
#[derive(Debug)]
pub struct Bm25Index {
    documents: Vec<StoredDocument>,
    term_freqs: Vec<HashMap<String, u32>>,
    doc_len: Vec<usize>,
    avgdl: f64,
    idf: HashMap<String, f64>,
    params: Bm25Params,
}

impl Bm25Index {
    /// Build term statistics for a corpus
    pub fn new(documents: Vec<LexicalDocument>, params: Bm25Params) -> Self {
        let mut stored = Vec::with_capacity(documents.len());
        let mut term_freqs = Vec::with_capacity(documents.len());
        let mut doc_len = Vec::with_capacity(documents.len());
        let mut doc_freq: HashMap<String, usize> = HashMap::new();

        for (position, doc) in documents.into_iter().enumerate() {
            let tokens = doc.tokens.unwrap_or_else(|| tokenize(&doc.chunk));

            let mut freqs: HashMap<String, u32> = HashMap::new();
            for token in &tokens {
                *freqs.entry(token.clone()).or_default() += 1;
            }
            for term in freqs.keys() {
                *doc_freq.entry(term.clone()).or_default() += 1;
            }

            doc_len.push(tokens.len());
            term_freqs.push(freqs);
            stored.push(StoredDocument::new(doc.chunk, doc.metadata, position));
        }

        let corpus_size = stored.len();
        let avgdl = if corpus_size == 0 {
            0.0
        } else {
            doc_len.iter().sum::<usize>() as f64 / corpus_size as f64
        };

        // Okapi IDF; negative values (terms in more than half the corpus)
        // are floored at epsilon * mean IDF
        let mut idf = HashMap::with_capacity(doc_freq.len());
        let mut idf_sum = 0.0;
        let mut negative = Vec::new();
        for (term, freq) in doc_freq {
            let value = (corpus_size as f64 - freq as f64 + 0.5).ln() - (freq as f64 + 0.5).ln();
            idf_sum += value;
            if value < 0.0 {
                negative.push(term.clone());
            }
            idf.insert(term, value);
        }
        if !idf.is_empty() {
            let floor = params.epsilon * idf_sum / idf.len() as f64;
            for term in negative {
                idf.insert(term, floor);
            }
        }

        Self {
            documents: stored,
            term_freqs,
            doc_len,
            avgdl,
            idf,
            params,
        }
    }

    /// Load a JSON snapshot from disk
    pub fn load(path: &Path) -> Result<Self> {
        let snapshot: LexicalSnapshot = read_snapshot(path)?;
        Ok(Self::new(snapshot.documents, Bm25Params::default()))
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

    /// Positions whose metadata satisfies `predicate`, in corpus order
    pub fn positions_where(&self, predicate: impl Fn(&Metadata) -> bool) -> Vec<usize> {
        self.documents
            .iter()
            .enumerate()
            .filter(|(_, doc)| predicate(&doc.metadata))
            .map(|(position, _)| position)
            .collect()
    }

    /// Raw BM25 scores for `candidates`, in the order given.
    ///
    /// Fails when the statistics cannot produce finite scores (empty corpus
    /// length, out-of-range position) or when `cancel` fires.
    pub fn score(&self, query: &[String], candidates: &[usize], cancel: &CancelToken) -> Result<Vec<(usize, f64)>> {
        if candidates.is_empty() {
            return Ok(Vec::new());
        }
        if !(self.avgdl.is_finite() && self.avgdl > 0.0) {
            return Err(AppError::Internal {
                message: format!("malformed BM25 index: average document length {}", self.avgdl),
            });
        }

        let Bm25Params { k1, b, .. } = self.params;
        let mut scores = Vec::with_capacity(candidates.len());
        for (n, &position) in candidates.iter().enumerate() {
            if n % CANCEL_CHECK_INTERVAL == 0 && cancel.is_cancelled() {
                return Err(AppError::Cancelled);
            }
            let (freqs, len) = match (self.term_freqs.get(position), self.doc_len.get(position)) {
                (Some(freqs), Some(len)) => (freqs, *len as f64),
                _ => {
                    return Err(AppError::Internal {
                        message: format!("malformed BM25 index: no statistics for document {}", position),
                    })
                }
            };

            let norm = k1 * (1.0 - b + b * len / self.avgdl);
            let score: f64 = query
                .iter()
                .map(|term| {
                    let tf = freqs.get(term).copied().unwrap_or(0) as f64;
                    let idf = self.idf.get(term).copied().unwrap_or(0.0);
                    idf * (tf * (k1 + 1.0)) / (tf + norm)
                })
                .sum();
            scores.push((position, score));
        }

        Ok(scores)
    }
}

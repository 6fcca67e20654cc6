//! Result fusion
//!
//! Results are deduplicated by identity (first occurrence wins), ranked
//! by descending score with a stable sort, and truncated. Graph and chunk
//! results are fused in separate passes and concatenated, never ranked
//! against each other.

use super::{Budget, ResultKey, SearchResult};
use std::collections::HashSet;

/// Merge result lists by [`SearchResult::identity`]
pub fn merge(lists: Vec<Vec<SearchResult>>, limit: usize) -> Vec<SearchResult> {
    merge_by(lists, SearchResult::identity, limit)
}

/// Merge result lists with a custom identity function.
///
/// Results without an identity or with a non-finite score are dropped.
pub fn merge_by<F>(lists: Vec<Vec<SearchResult>>, identity: F, limit: usize) -> Vec<SearchResult>
where
    F: Fn(&SearchResult) -> Option<ResultKey>,
{
    let mut seen = HashSet::new();
    let mut merged: Vec<SearchResult> = lists
        .into_iter()
        .flatten()
        .filter(|result| result.score().is_finite())
        .filter(|result| identity(result).is_some_and(|key| seen.insert(key)))
        .collect();

    // Stable: equal scores keep list order
    merged.sort_by(|a, b| b.score().total_cmp(&a.score()));
    merged.truncate(limit);
    merged
}

/// Fuse vector and lexical results into at most `capacity` chunks.
///
/// Each backend's primary share (its slice of `budget`) is taken first;
/// slots left open because a backend came up short, or because two
/// backends returned the same chunk, are filled from the remaining
/// candidates of both backends.
pub fn select_chunks(
    vector: Vec<SearchResult>,
    lexical: Vec<SearchResult>,
    budget: &Budget,
    capacity: usize,
) -> Vec<SearchResult> {
    let (vector_primary, vector_rest) = split_at(vector, budget.vector);
    let (lexical_primary, lexical_rest) = split_at(lexical, budget.lexical);

    let mut selected = merge(vec![vector_primary, lexical_primary], capacity);
    if selected.len() < capacity {
        let taken: HashSet<ResultKey> = selected.iter().filter_map(SearchResult::identity).collect();
        let overflow = merge(vec![vector_rest, lexical_rest], usize::MAX)
            .into_iter()
            .filter(|result| result.identity().is_some_and(|key| !taken.contains(&key)));
        let open = capacity - selected.len();
        selected.extend(overflow.take(open));
        selected.sort_by(|a, b| b.score().total_cmp(&a.score()));
    }

    selected
}

fn split_at(mut results: Vec<SearchResult>, at: usize) -> (Vec<SearchResult>, Vec<SearchResult>) {
    let rest = results.split_off(at.min(results.len()));
    (results, rest)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::retrieval::{ChunkHit, Metadata};
    use serde_json::json;

    fn vector(id: &str, score: f64) -> SearchResult {
        SearchResult::Vector(hit(id, score))
    }

    fn lexical(id: &str, score: f64) -> SearchResult {
        SearchResult::Lexical(hit(id, score))
    }

    fn hit(id: &str, score: f64) -> ChunkHit {
        let mut metadata = Metadata::new();
        metadata.insert("id".into(), json!(id));
        ChunkHit { chunk: format!("chunk {id}"), metadata, score }
    }

    fn ids(results: &[SearchResult]) -> Vec<String> {
        results
            .iter()
            .map(|r| r.as_chunk().unwrap().metadata["id"].as_str().unwrap().to_string())
            .collect()
    }

    #[test]
    fn test_merge_dedupes_first_seen() {
        let merged = merge(
            vec![
                vec![vector("a", 0.4), vector("b", 0.3)],
                vec![lexical("a", 1.0), lexical("c", 0.5)],
            ],
            10,
        );

        assert_eq!(ids(&merged), vec!["c", "a", "b"]);
        // "a" kept its vector score, the lexical duplicate was dropped
        assert_eq!(merged[1].method(), crate::retrieval::RetrievalMethod::Vector);
    }

    #[test]
    fn test_merge_is_stable_and_truncates() {
        let merged = merge(
            vec![vec![vector("a", 0.5), vector("b", 0.5)], vec![lexical("c", 0.5)]],
            2,
        );
        assert_eq!(ids(&merged), vec!["a", "b"]);
    }

    #[test]
    fn test_merge_drops_unidentified_and_non_finite() {
        let mut anonymous = hit("x", 0.9);
        anonymous.metadata.remove("id");
        let merged = merge(
            vec![vec![
                SearchResult::Vector(anonymous),
                vector("nan", f64::NAN),
                vector("inf", f64::INFINITY),
                vector("ok", 0.1),
            ]],
            10,
        );
        assert_eq!(ids(&merged), vec!["ok"]);
    }

    #[test]
    fn test_select_backfills_short_backend() {
        // 3 lexical matches, plenty of vector candidates
        let vector_results: Vec<_> = (0..10).map(|i| vector(&format!("v{i}"), 0.9 - i as f64 * 0.01)).collect();
        let lexical_results = vec![lexical("l0", 1.0), lexical("l1", 0.6), lexical("l2", 0.3)];
        let budget = Budget { graph: 0, vector: 5, lexical: 5 };

        let selected = select_chunks(vector_results, lexical_results, &budget, 10);
        assert_eq!(selected.len(), 10);

        let ids = ids(&selected);
        assert!(ids.contains(&"l2".to_string()));
        assert!(ids.contains(&"v6".to_string()));
        assert!(!ids.contains(&"v7".to_string()));

        let unique: HashSet<_> = ids.iter().collect();
        assert_eq!(unique.len(), 10);
        assert!(selected.windows(2).all(|w| w[0].score() >= w[1].score()));
    }

    #[test]
    fn test_select_respects_primary_shares() {
        // Vector scores dominate, but lexical still gets its share
        let vector_results: Vec<_> = (0..5).map(|i| vector(&format!("v{i}"), 10.0 - i as f64)).collect();
        let lexical_results: Vec<_> = (0..5).map(|i| lexical(&format!("l{i}"), 0.5 - i as f64 * 0.1)).collect();
        let budget = Budget { graph: 0, vector: 2, lexical: 2 };

        let selected = select_chunks(vector_results, lexical_results, &budget, 4);
        assert_eq!(ids(&selected), vec!["v0", "v1", "l0", "l1"]);
    }

    #[test]
    fn test_select_refills_after_cross_backend_duplicate() {
        let budget = Budget { graph: 0, vector: 2, lexical: 2 };
        let selected = select_chunks(
            vec![vector("a", 0.9), vector("b", 0.8), vector("c", 0.7)],
            vec![lexical("a", 1.0), lexical("d", 0.5)],
            &budget,
            4,
        );
        assert_eq!(ids(&selected), vec!["a", "b", "c", "d"]);
    }
}

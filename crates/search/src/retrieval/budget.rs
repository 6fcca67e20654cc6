//! Result budget allocation across backends

use serde::Serialize;

/// Per-backend share of `k`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Budget {
    pub graph: usize,
    pub vector: usize,
    pub lexical: usize,
}

impl Budget {
    pub fn total(&self) -> usize {
        self.graph + self.vector + self.lexical
    }
}

/// Split `k` between graph, vector and lexical search.
///
/// The graph takes `floor(k * graph_ratio)` when enabled; the rest is
/// divided by `alpha` (rounded half away from zero). A backend with a
/// non-zero weight is guaranteed one slot when there is room: vector
/// whenever anything remains, lexical once two or more slots remain.
///
/// Arguments are assumed validated: `alpha` and `graph_ratio` in [0, 1].
pub fn allocate(k: usize, alpha: f64, graph_ratio: f64, include_graph: bool) -> Budget {
    let graph = if include_graph {
        ((k as f64 * graph_ratio).floor() as usize).min(k)
    } else {
        0
    };
    let remaining = k - graph;

    let mut vector = ((alpha * remaining as f64).round() as usize).min(remaining);
    let mut lexical = remaining - vector;

    if alpha > 0.0 && vector == 0 && remaining > 0 {
        vector = 1;
        lexical -= 1;
    }
    if alpha < 1.0 && lexical == 0 && remaining >= 2 {
        lexical = 1;
        vector -= 1;
    }

    Budget { graph, vector, lexical }
}

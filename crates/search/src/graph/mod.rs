//! Knowledge-graph stores
//!
//! Entities and their relationships, searchable by entity name:
//! - `InMemoryGraphStore`: adjacency lists built from a JSON snapshot
//! - `PgGraphStore`: entity/relationship tables in Postgres, full-text ranked

mod memory;
mod postgres;

pub use memory::{GraphSnapshot, InMemoryGraphStore};
pub use postgres::PgGraphStore;

use crate::retrieval::Metadata;
use async_trait::async_trait;
use lodestar_common::errors::Result;
use serde::{Deserialize, Serialize};

/// Graph node
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Entity {
    /// Stable entity ID
    pub id: String,

    /// Display name, the field full-text search runs over
    pub name: String,

    /// Entity type label (organization, document, clause, ...)
    #[serde(rename = "type", default)]
    pub entity_type: String,

    /// Open attribute map
    #[serde(default)]
    pub attributes: Metadata,
}

/// Directed edge between two entities
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Relationship {
    /// Source entity ID
    pub source: String,

    /// Target entity ID
    pub target: String,

    /// Relationship label
    #[serde(rename = "type")]
    pub relationship_type: String,

    /// Edge strength, absent when the extractor did not assign one
    #[serde(default)]
    pub strength: Option<f64>,
}

/// A relationship seen from one of its endpoints
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Connection {
    pub relationship_type: String,
    pub related_entity: Entity,
    pub strength: Option<f64>,
}

/// Entity matched by a full-text search, with its immediate neighbourhood
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EntityHit {
    pub entity: Entity,
    pub connections: Vec<Connection>,
    pub score: f64,
}

/// A property-graph backend supporting name search and one-hop traversal
#[async_trait]
pub trait GraphStore: Send + Sync {
    /// Full-text match over entity names, best first, at most `limit` hits
    async fn search_entities(&self, text: &str, limit: usize) -> Result<Vec<EntityHit>>;

    /// Release held connections. Safe to call more than once.
    async fn close(&self) {}

    /// Short backend name for logs
    fn name(&self) -> &str;
}

/// Split free text into lowercase alphanumeric search terms.
pub(crate) fn search_terms(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(|w| w.to_lowercase())
        .collect()
}

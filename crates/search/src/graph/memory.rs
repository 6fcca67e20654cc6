//! In-memory knowledge graph
//!
//! Adjacency-list graph loaded from a snapshot; answers name searches
//! without a database round trip.

use super::{search_terms, Connection, Entity, EntityHit, GraphStore, Relationship};
use async_trait::async_trait;
use lodestar_common::errors::{AppError, Result};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

/// On-disk graph snapshot
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GraphSnapshot {
    #[serde(default)]
    pub entities: Vec<Entity>,
    #[serde(default)]
    pub relationships: Vec<Relationship>,
}

/// In-memory entity graph
pub struct InMemoryGraphStore {
    /// Entities in insertion order
    entities: Vec<Entity>,

    /// Entity ID -> position in `entities`
    positions: HashMap<String, usize>,

    /// Lowercased name terms per entity
    name_terms: Vec<HashSet<String>>,

    /// All edges
    relationships: Vec<Relationship>,

    /// Entity ID -> edges touching it, either direction
    adjacency: HashMap<String, Vec<usize>>,
}

impl InMemoryGraphStore {
    /// Create an empty graph
    pub fn new() -> Self {
        Self {
            entities: Vec::new(),
            positions: HashMap::new(),
            name_terms: Vec::new(),
            relationships: Vec::new(),
            adjacency: HashMap::new(),
        }
    }

    /// Build from a snapshot. Relationships pointing at unknown entities are skipped.
    pub fn from_snapshot(snapshot: GraphSnapshot) -> Self {
        let mut graph = Self::new();
        for entity in snapshot.entities {
            graph.add_entity(entity);
        }

        let mut dangling = 0usize;
        for relationship in snapshot.relationships {
            if !graph.add_relationship(relationship) {
                dangling += 1;
            }
        }
        if dangling > 0 {
            tracing::warn!(dangling, "Skipped relationships with unknown endpoints");
        }

        graph
    }

    /// Load a JSON snapshot from disk
    pub fn load(path: &Path) -> Result<Self> {
        let file = File::open(path).map_err(|e| AppError::IndexLoad {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
        let snapshot: GraphSnapshot =
            serde_json::from_reader(BufReader::new(file)).map_err(|e| AppError::IndexLoad {
                path: path.display().to_string(),
                message: e.to_string(),
            })?;

        let graph = Self::from_snapshot(snapshot);
        tracing::info!(
            path = %path.display(),
            entities = graph.entity_count(),
            relationships = graph.relationships.len(),
            "Loaded graph snapshot"
        );
        Ok(graph)
    }

    /// Add or replace an entity
    pub fn add_entity(&mut self, entity: Entity) {
        let terms = search_terms(&entity.name).into_iter().collect();
        match self.positions.get(&entity.id) {
            Some(&pos) => {
                self.entities[pos] = entity;
                self.name_terms[pos] = terms;
            }
            None => {
                self.positions.insert(entity.id.clone(), self.entities.len());
                self.entities.push(entity);
                self.name_terms.push(terms);
            }
        }
    }

    /// Add an edge; returns false when either endpoint is unknown
    pub fn add_relationship(&mut self, relationship: Relationship) -> bool {
        if !self.positions.contains_key(&relationship.source)
            || !self.positions.contains_key(&relationship.target)
        {
            return false;
        }

        let edge = self.relationships.len();
        self.adjacency.entry(relationship.source.clone()).or_default().push(edge);
        if relationship.target != relationship.source {
            self.adjacency.entry(relationship.target.clone()).or_default().push(edge);
        }
        self.relationships.push(relationship);
        true
    }

    /// Get an entity by ID
    pub fn get_entity(&self, id: &str) -> Option<&Entity> {
        self.positions.get(id).map(|&pos| &self.entities[pos])
    }

    /// Get entity count
    pub fn entity_count(&self) -> usize {
        self.entities.len()
    }

    /// Relationships touching `id` with the entity on the other end
    pub fn connections(&self, id: &str) -> Vec<Connection> {
        let Some(edges) = self.adjacency.get(id) else {
            return Vec::new();
        };

        let mut seen = HashSet::new();
        let mut connections = Vec::with_capacity(edges.len());
        for &edge in edges {
            let rel = &self.relationships[edge];
            let other = if rel.source == id { &rel.target } else { &rel.source };
            let Some(related) = self.get_entity(other) else {
                continue;
            };

            let key = (rel.relationship_type.clone(), other.clone(), rel.strength.map(f64::to_bits));
            if seen.insert(key) {
                connections.push(Connection {
                    relationship_type: rel.relationship_type.clone(),
                    related_entity: related.clone(),
                    strength: rel.strength,
                });
            }
        }
        connections
    }

    /// Fraction of query terms present in the entity name
    fn name_score(&self, pos: usize, terms: &[String]) -> f64 {
        let name_terms = &self.name_terms[pos];
        let matched = terms.iter().filter(|t| name_terms.contains(*t)).count();
        matched as f64 / terms.len() as f64
    }
}

impl Default for InMemoryGraphStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl GraphStore for InMemoryGraphStore {
    async fn search_entities(&self, text: &str, limit: usize) -> Result<Vec<EntityHit>> {
        let mut terms = search_terms(text);
        terms.sort();
        terms.dedup();
        if terms.is_empty() || limit == 0 {
            return Ok(Vec::new());
        }

        let mut scored: Vec<(usize, f64)> = (0..self.entities.len())
            .map(|pos| (pos, self.name_score(pos, &terms)))
            .filter(|(_, score)| *score > 0.0)
            .collect();

        // Equal scores by entity ID
        scored.sort_by(|a, b| {
            b.1.total_cmp(&a.1)
                .then_with(|| self.entities[a.0].id.cmp(&self.entities[b.0].id))
        });
        scored.truncate(limit);

        Ok(scored
            .into_iter()
            .map(|(pos, score)| {
                let entity = self.entities[pos].clone();
                let connections = self.connections(&entity.id);
                EntityHit { entity, connections, score }
            })
            .collect())
    }

    fn name(&self) -> &str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entity(id: &str, name: &str) -> Entity {
        Entity {
            id: id.to_string(),
            name: name.to_string(),
            entity_type: "organization".to_string(),
            attributes: Default::default(),
        }
    }

    fn edge(source: &str, target: &str, kind: &str) -> Relationship {
        Relationship {
            source: source.to_string(),
            target: target.to_string(),
            relationship_type: kind.to_string(),
            strength: Some(0.8),
        }
    }

    fn sample() -> InMemoryGraphStore {
        InMemoryGraphStore::from_snapshot(GraphSnapshot {
            entities: vec![
                entity("a", "Acme Bank"),
                entity("b", "Letter of Credit"),
                entity("c", "Beta Shipping"),
            ],
            relationships: vec![
                edge("a", "b", "ISSUES"),
                edge("c", "b", "BENEFICIARY_OF"),
                edge("a", "zz", "DANGLING"),
            ],
        })
    }

    #[test]
    fn test_graph_construction() {
        let graph = sample();
        assert_eq!(graph.entity_count(), 3);

        let conns = graph.connections("b");
        assert_eq!(conns.len(), 2);
        assert_eq!(conns[0].related_entity.id, "a");
        assert_eq!(conns[1].related_entity.id, "c");
        assert!(graph.connections("zz").is_empty());
    }

    #[test]
    fn test_duplicate_edges_collapse() {
        let mut graph = sample();
        assert!(graph.add_relationship(edge("a", "b", "ISSUES")));
        assert_eq!(graph.connections("a").len(), 1);
    }

    #[tokio::test]
    async fn test_name_search_ranking() {
        let graph = sample();
        let hits = graph.search_entities("acme letter of credit", 5).await.unwrap();

        // "Letter of Credit" matches three of four terms, "Acme Bank" one
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].entity.id, "b");
        assert_eq!(hits[1].entity.id, "a");
        assert!(hits[0].score > hits[1].score);
        assert_eq!(hits[1].connections[0].relationship_type, "ISSUES");
    }

    #[tokio::test]
    async fn test_search_limit_and_empty_query() {
        let graph = sample();
        assert_eq!(graph.search_entities("acme credit", 1).await.unwrap().len(), 1);
        assert!(graph.search_entities("???", 5).await.unwrap().is_empty());
        assert!(graph.search_entities("acme", 0).await.unwrap().is_empty());
    }
}

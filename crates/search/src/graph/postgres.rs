//! Postgres-backed knowledge graph
//!
//! Entities and relationships live in two tables; entity names are ranked
//! with Postgres full-text search (`ts_rank_cd` over a `simple` tsvector).

use super::{search_terms, Connection, Entity, EntityHit, GraphStore};
use crate::retrieval::Metadata;
use async_trait::async_trait;
use lodestar_common::config::GraphConfig;
use lodestar_common::errors::{AppError, Result};
use sea_orm::{
    ConnectOptions, ConnectionTrait, Database, DatabaseConnection, DbBackend, QueryResult,
    Statement,
};
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{info, warn};

/// Graph store over `entities(id, name, entity_type, attributes jsonb)` and
/// `relationships(source_id, target_id, relationship_type, strength)`
pub struct PgGraphStore {
    conn: RwLock<Option<DatabaseConnection>>,
    search_sql: String,
    connections_sql: String,
}

impl PgGraphStore {
    /// Connect using the graph section of the configuration
    pub async fn connect(config: &GraphConfig) -> Result<Self> {
        let url = config.url.as_deref().ok_or_else(|| AppError::Configuration {
            message: "graph.url is not set".to_string(),
        })?;
        validate_identifier(&config.entities_table)?;
        validate_identifier(&config.relationships_table)?;

        info!("Connecting to graph database...");

        let mut opts = ConnectOptions::new(url);
        opts
            .max_connections(config.max_connections)
            .min_connections(1)
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
            .acquire_timeout(Duration::from_secs(config.connect_timeout_secs))
            .sqlx_logging(false);

        let conn = Database::connect(opts).await.map_err(|e| AppError::BackendUnavailable {
            backend: "graph".to_string(),
            message: format!("Failed to connect: {}", e),
        })?;

        info!("Graph database connection established");
        Ok(Self::with_connection(conn, &config.entities_table, &config.relationships_table))
    }

    /// Wrap an existing connection
    pub fn with_connection(conn: DatabaseConnection, entities: &str, relationships: &str) -> Self {
        Self {
            conn: RwLock::new(Some(conn)),
            search_sql: build_search_sql(entities),
            connections_sql: build_connections_sql(entities, relationships),
        }
    }

    async fn connection(&self) -> Result<DatabaseConnection> {
        self.conn
            .read()
            .await
            .clone()
            .ok_or_else(|| AppError::BackendDegraded {
                backend: "graph".to_string(),
                message: "connection closed".to_string(),
            })
    }

    async fn load_connections(&self, conn: &DatabaseConnection, id: &str) -> Result<Vec<Connection>> {
        let rows = conn
            .query_all(Statement::from_sql_and_values(
                DbBackend::Postgres,
                &self.connections_sql,
                vec![id.into()],
            ))
            .await?;

        rows.iter()
            .map(|row| {
                Ok(Connection {
                    relationship_type: row.try_get("", "relationship_type")?,
                    strength: row.try_get("", "strength")?,
                    related_entity: entity_from_row(row)?,
                })
            })
            .collect()
    }
}

/// Convert free text to an OR'ed tsquery (`term1 | term2 | ...`)
fn prepare_tsquery(text: &str) -> String {
    search_terms(text).join(" | ")
}

fn validate_identifier(name: &str) -> Result<()> {
    let valid = !name.is_empty()
        && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
        && !name.starts_with(|c: char| c.is_ascii_digit());
    if valid {
        Ok(())
    } else {
        Err(AppError::Configuration {
            message: format!("Invalid table name: {:?}", name),
        })
    }
}

fn build_search_sql(entities: &str) -> String {
    format!(
        r#"
        SELECT
            e.id,
            e.name,
            e.entity_type,
            e.attributes,
            ts_rank_cd(
                to_tsvector('simple', e.name),
                to_tsquery('simple', $1)
            )::float8 AS score
        FROM {entities} e
        WHERE to_tsvector('simple', e.name) @@ to_tsquery('simple', $1)
        ORDER BY score DESC, e.id
        LIMIT $2
        "#
    )
}

fn build_connections_sql(entities: &str, relationships: &str) -> String {
    format!(
        r#"
        SELECT DISTINCT
            r.relationship_type,
            r.strength::float8 AS strength,
            o.id,
            o.name,
            o.entity_type,
            o.attributes
        FROM {relationships} r
        INNER JOIN {entities} o
            ON o.id = CASE WHEN r.source_id = $1 THEN r.target_id ELSE r.source_id END
        WHERE r.source_id = $1 OR r.target_id = $1
        ORDER BY r.relationship_type, o.id
        "#
    )
}

fn entity_from_row(row: &QueryResult) -> std::result::Result<Entity, sea_orm::DbErr> {
    let attributes: Option<serde_json::Value> = row.try_get("", "attributes")?;
    let attributes: Metadata = match attributes {
        Some(serde_json::Value::Object(map)) => map,
        _ => Metadata::new(),
    };

    Ok(Entity {
        id: row.try_get("", "id")?,
        name: row.try_get("", "name")?,
        entity_type: row
            .try_get::<Option<String>>("", "entity_type")?
            .unwrap_or_default(),
        attributes,
    })
}

#[async_trait]
impl GraphStore for PgGraphStore {
    async fn search_entities(&self, text: &str, limit: usize) -> Result<Vec<EntityHit>> {
        let ts_query = prepare_tsquery(text);
        if ts_query.is_empty() || limit == 0 {
            return Ok(vec![]);
        }

        let conn = self.connection().await?;
        let rows = conn
            .query_all(Statement::from_sql_and_values(
                DbBackend::Postgres,
                &self.search_sql,
                vec![ts_query.into(), (limit as i64).into()],
            ))
            .await?;

        let mut hits = Vec::with_capacity(rows.len());
        for row in &rows {
            let entity = entity_from_row(row)?;
            let score: f64 = row.try_get("", "score")?;
            let connections = self.load_connections(&conn, &entity.id).await?;
            hits.push(EntityHit { entity, connections, score });
        }

        Ok(hits)
    }

    async fn close(&self) {
        let conn = self.conn.write().await.take();
        if let Some(conn) = conn {
            match conn.close().await {
                Ok(()) => info!("Graph database connection closed"),
                Err(e) => warn!(error = %e, "Failed to close graph database connection"),
            }
        }
    }

    fn name(&self) -> &str {
        "postgres"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tsquery_preparation() {
        assert_eq!(prepare_tsquery("Who issued the L/C?"), "who | issued | the | l | c");
        assert_eq!(prepare_tsquery("!!"), "");
    }

    #[test]
    fn test_identifier_validation() {
        assert!(validate_identifier("entities").is_ok());
        assert!(validate_identifier("kg_entities_v2").is_ok());
        assert!(validate_identifier("entities; DROP TABLE x").is_err());
        assert!(validate_identifier("1table").is_err());
        assert!(validate_identifier("").is_err());
    }

    #[test]
    fn test_sql_uses_configured_tables() {
        let sql = build_connections_sql("kg_nodes", "kg_edges");
        assert!(sql.contains("FROM kg_edges r"));
        assert!(sql.contains("INNER JOIN kg_nodes o"));
        assert!(build_search_sql("kg_nodes").contains("FROM kg_nodes e"));
    }
}

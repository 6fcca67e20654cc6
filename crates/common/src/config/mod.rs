//! Configuration management for Lodestar
//!
//! Supports loading configuration from:
//! - Environment variables (prefixed with APP__)
//! - Configuration files (config.toml, config.yaml)
//! - Default values

use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Main application configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AppConfig {
    /// Pre-built index snapshot locations
    #[serde(default)]
    pub index: IndexConfig,

    /// Knowledge-graph backend configuration
    #[serde(default)]
    pub graph: GraphConfig,

    /// Retrieval tuning and per-query defaults
    #[serde(default)]
    pub retrieval: RetrievalConfig,

    /// Embedding service configuration
    #[serde(default)]
    pub embedding: EmbeddingConfig,

    /// Observability configuration
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct IndexConfig {
    /// Vector index snapshot (JSON)
    #[serde(default = "default_vector_path")]
    pub vector_path: String,

    /// Lexical (BM25) index snapshot (JSON)
    #[serde(default = "default_lexical_path")]
    pub lexical_path: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct GraphConfig {
    /// Postgres URL for the entity/relationship tables (optional)
    pub url: Option<String>,

    /// Graph snapshot (JSON) used when no database URL is set
    pub snapshot_path: Option<String>,

    /// Entity table name
    #[serde(default = "default_entities_table")]
    pub entities_table: String,

    /// Relationship table name
    #[serde(default = "default_relationships_table")]
    pub relationships_table: String,

    /// Maximum number of connections
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    /// Connection timeout in seconds
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RetrievalConfig {
    /// Default result count
    #[serde(default = "default_k")]
    pub default_k: usize,

    /// Default vector/lexical split (1.0 = vector only)
    #[serde(default = "default_alpha")]
    pub default_alpha: f64,

    /// Default share of `k` given to the graph backend
    #[serde(default = "default_graph_ratio")]
    pub default_graph_ratio: f64,

    /// Whether graph search is on unless a query says otherwise
    #[serde(default = "default_include_graph")]
    pub default_include_graph: bool,

    /// Vector candidates fetched per requested result
    #[serde(default = "default_overfetch_factor")]
    pub overfetch_factor: usize,

    /// Upper bound on vector index scans per query
    #[serde(default = "default_max_fetch_attempts")]
    pub max_fetch_attempts: u32,

    /// Per-backend timeout in milliseconds
    #[serde(default = "default_backend_timeout")]
    pub backend_timeout_ms: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EmbeddingConfig {
    /// Embedding provider: openai, hashing
    #[serde(default = "default_embedding_provider")]
    pub provider: String,

    /// API key for embedding service
    pub api_key: Option<String>,

    /// API base URL (for custom endpoints)
    pub api_base: Option<String>,

    /// Model to use
    #[serde(default = "default_embedding_model")]
    pub model: String,

    /// Embedding dimension
    #[serde(default = "default_embedding_dimension")]
    pub dimension: usize,

    /// Request timeout in seconds
    #[serde(default = "default_embedding_timeout")]
    pub timeout_secs: u64,

    /// Maximum retries
    #[serde(default = "default_embedding_retries")]
    pub max_retries: u32,

    /// Instruction prepended to queries before embedding
    #[serde(default = "default_query_instruction")]
    pub query_instruction: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ObservabilityConfig {
    /// Log level (debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Enable JSON logging
    #[serde(default = "default_json_logging")]
    pub json_logging: bool,

    /// Service name for tracing
    #[serde(default = "default_service_name")]
    pub service_name: String,
}

// Default value functions
fn default_vector_path() -> String { "indexes/vector.json".to_string() }
fn default_lexical_path() -> String { "indexes/bm25.json".to_string() }
fn default_entities_table() -> String { "entities".to_string() }
fn default_relationships_table() -> String { "relationships".to_string() }
fn default_max_connections() -> u32 { 10 }
fn default_connect_timeout() -> u64 { 5 }
fn default_k() -> usize { 5 }
fn default_alpha() -> f64 { 0.5 }
fn default_graph_ratio() -> f64 { 0.3 }
fn default_include_graph() -> bool { true }
fn default_overfetch_factor() -> usize { 5 }
fn default_max_fetch_attempts() -> u32 { 3 }
fn default_backend_timeout() -> u64 { 2000 }
fn default_embedding_provider() -> String { "openai".to_string() }
fn default_embedding_model() -> String { "text-embedding-3-small".to_string() }
fn default_embedding_dimension() -> usize { 1536 }
fn default_embedding_timeout() -> u64 { 30 }
fn default_embedding_retries() -> u32 { 3 }
fn default_query_instruction() -> String {
    "Given a search query, retrieve relevant passages that answer the query".to_string()
}
fn default_log_level() -> String { "info".to_string() }
fn default_json_logging() -> bool { false }
fn default_service_name() -> String { "lodestar-search".to_string() }

impl AppConfig {
    /// Load configuration from environment and files
    pub fn load() -> Result<Self, ConfigError> {
        let env = std::env::var("APP_ENV").unwrap_or_else(|_| "development".to_string());

        let config = Config::builder()
            // Load base config file
            .add_source(File::with_name("config/default").required(false))

            // Load environment-specific config
            .add_source(File::with_name(&format!("config/{}", env)).required(false))

            // Load local overrides
            .add_source(File::with_name("config/local").required(false))

            // Load from environment variables with APP__ prefix
            // e.g., APP__RETRIEVAL__DEFAULT_ALPHA=0.7
            .add_source(
                Environment::with_prefix("APP")
                    .separator("__")
                    .try_parsing(true)
            )

            .build()?;

        config.try_deserialize()
    }

    /// Load from a specific TOML file
    pub fn from_file(path: &str) -> Result<Self, ConfigError> {
        let config = Config::builder()
            .add_source(File::with_name(path))
            .add_source(
                Environment::with_prefix("APP")
                    .separator("__")
                    .try_parsing(true)
            )
            .build()?;

        config.try_deserialize()
    }
}

impl RetrievalConfig {
    /// Get the per-backend timeout as Duration
    pub fn backend_timeout(&self) -> Duration {
        Duration::from_millis(self.backend_timeout_ms)
    }
}

impl GraphConfig {
    /// Whether any graph backend is configured
    pub fn is_enabled(&self) -> bool {
        self.url.is_some() || self.snapshot_path.is_some()
    }
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            vector_path: default_vector_path(),
            lexical_path: default_lexical_path(),
        }
    }
}

impl Default for GraphConfig {
    fn default() -> Self {
        Self {
            url: None,
            snapshot_path: None,
            entities_table: default_entities_table(),
            relationships_table: default_relationships_table(),
            max_connections: default_max_connections(),
            connect_timeout_secs: default_connect_timeout(),
        }
    }
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            default_k: default_k(),
            default_alpha: default_alpha(),
            default_graph_ratio: default_graph_ratio(),
            default_include_graph: default_include_graph(),
            overfetch_factor: default_overfetch_factor(),
            max_fetch_attempts: default_max_fetch_attempts(),
            backend_timeout_ms: default_backend_timeout(),
        }
    }
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_embedding_provider(),
            api_key: None,
            api_base: None,
            model: default_embedding_model(),
            dimension: default_embedding_dimension(),
            timeout_secs: default_embedding_timeout(),
            max_retries: default_embedding_retries(),
            query_instruction: default_query_instruction(),
        }
    }
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            json_logging: default_json_logging(),
            service_name: default_service_name(),
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            index: IndexConfig::default(),
            graph: GraphConfig::default(),
            retrieval: RetrievalConfig::default(),
            embedding: EmbeddingConfig::default(),
            observability: ObservabilityConfig::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.retrieval.default_alpha, 0.5);
        assert_eq!(config.retrieval.default_graph_ratio, 0.3);
        assert_eq!(config.retrieval.overfetch_factor, 5);
        assert_eq!(config.retrieval.max_fetch_attempts, 3);
        assert!(!config.graph.is_enabled());
    }

    #[test]
    fn test_backend_timeout() {
        let config = RetrievalConfig::default();
        assert_eq!(config.backend_timeout(), Duration::from_millis(2000));
    }

    #[test]
    fn test_partial_sections_fill_defaults() {
        let config: AppConfig = serde_json::from_str(
            r#"{ "graph": { "snapshot_path": "graph.json" }, "retrieval": { "default_k": 12 } }"#,
        )
        .unwrap();
        assert!(config.graph.is_enabled());
        assert_eq!(config.graph.entities_table, "entities");
        assert_eq!(config.retrieval.default_k, 12);
        assert_eq!(config.retrieval.backend_timeout_ms, 2000);
        assert_eq!(config.index.vector_path, "indexes/vector.json");
    }
}

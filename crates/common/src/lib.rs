//! Lodestar Common Library
//!
//! Shared code for the Lodestar retrieval crates including:
//! - Error types and handling
//! - Configuration management
//! - Embedding client abstraction
//! - Metrics and observability

pub mod config;
pub mod embeddings;
pub mod errors;
pub mod metrics;

// Re-export commonly used types
pub use config::AppConfig;
pub use embeddings::Embedder;
pub use errors::{AppError, Result};

/// Application version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

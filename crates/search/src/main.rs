//! Lodestar Search CLI
//!
//! Loads the configured indices, runs one hybrid query and prints the
//! ranked results as JSON on stdout. Logs go to stderr.

use anyhow::Context;
use clap::Parser;
use lodestar_common::config::{AppConfig, ObservabilityConfig};
use lodestar_common::embeddings::create_embedder;
use lodestar_common::{metrics, VERSION};
use lodestar_search::{CancelToken, HybridRetriever, MetadataFilter, Query};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Hybrid vector, BM25 and knowledge-graph search
#[derive(Parser, Debug)]
#[command(name = "lodestar-search")]
#[command(about = "Run one hybrid retrieval query and print the ranked results as JSON")]
#[command(version = env!("CARGO_PKG_VERSION"))]
struct Args {
    /// Query text
    query: String,

    /// Maximum results (defaults to retrieval.default_k)
    #[arg(short, long)]
    k: Option<usize>,

    /// Vector share of the chunk budget, 0 to 1
    #[arg(short, long)]
    alpha: Option<f64>,

    /// Share of k reserved for graph results, 0 to 1
    #[arg(short = 'g', long)]
    graph_ratio: Option<f64>,

    /// Skip graph search
    #[arg(long)]
    no_graph: bool,

    /// Metadata filter: key=value or key=v1,v2 (repeatable)
    #[arg(short, long = "filter", value_name = "KEY=VALUES", value_parser = parse_filter)]
    filters: Vec<(String, Vec<String>)>,

    /// Abandon the search after this many milliseconds
    #[arg(long)]
    timeout_ms: Option<u64>,

    /// Configuration file (defaults to config/default + APP__ environment)
    #[arg(short, long, env = "LODESTAR_CONFIG")]
    config: Option<PathBuf>,
}

impl Args {
    fn to_query(&self, config: &AppConfig) -> Query {
        let mut query = Query::from_config(self.query.clone(), &config.retrieval);
        if let Some(k) = self.k {
            query = query.with_k(k);
        }
        if let Some(alpha) = self.alpha {
            query = query.with_alpha(alpha);
        }
        if let Some(graph_ratio) = self.graph_ratio {
            query = query.with_graph_ratio(graph_ratio);
        }
        if self.no_graph {
            query = query.with_graph(false);
        }
        if !self.filters.is_empty() {
            query = query.with_filters(build_filter(&self.filters));
        }
        if let Some(timeout_ms) = self.timeout_ms {
            query = query.with_timeout(Duration::from_millis(timeout_ms));
        }
        query
    }
}

fn parse_filter(raw: &str) -> Result<(String, Vec<String>), String> {
    let (key, values) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected KEY=VALUES, got {:?}", raw))?;
    let key = key.trim();
    if key.is_empty() {
        return Err("filter key must not be empty".to_string());
    }
    let values = values.split(',').map(|v| v.trim().to_string()).collect();
    Ok((key.to_string(), values))
}

fn build_filter(filters: &[(String, Vec<String>)]) -> MetadataFilter {
    filters
        .iter()
        .fold(MetadataFilter::new(), |filter, (key, values)| match values.as_slice() {
            [single] => filter.equals(key.clone(), single.clone()),
            many => filter.one_of(key.clone(), many.iter().cloned()),
        })
}

fn init_tracing(config: &ObservabilityConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr);

    if config.json_logging {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();
    let args = Args::parse();

    // Load configuration
    let config = match &args.config {
        Some(path) => AppConfig::from_file(&path.to_string_lossy()),
        None => AppConfig::load(),
    }
    .context("Failed to load configuration")?;

    init_tracing(&config.observability);
    info!("Starting {} v{}", config.observability.service_name, VERSION);
    metrics::register_metrics();

    let embedder = create_embedder(&config.embedding)?;
    let retriever = HybridRetriever::open(&config, embedder).await?;

    // Ctrl+C / SIGTERM cancels the running search
    let cancel = CancelToken::new();
    let signal_task = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            shutdown_signal().await;
            cancel.cancel();
        })
    };

    let query = args.to_query(&config);
    let outcome = retriever.search_with_cancel(&query, &cancel).await;
    signal_task.abort();
    retriever.close().await;

    let results = outcome?;
    println!("{}", serde_json::to_string_pretty(&results)?);
    Ok(())
}

/// Resolves on Ctrl+C or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, cancelling search..."),
        _ = terminate => info!("Received SIGTERM, cancelling search..."),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_filter() {
        assert_eq!(parse_filter("category=A").unwrap(), ("category".into(), vec!["A".into()]));
        assert_eq!(
            parse_filter("category=A, B").unwrap(),
            ("category".into(), vec!["A".into(), "B".into()])
        );
        assert!(parse_filter("category").is_err());
        assert!(parse_filter("=A").is_err());
    }

    #[test]
    fn test_args_to_query() {
        let args = Args::parse_from([
            "lodestar-search",
            "who issued the credit",
            "-k",
            "8",
            "--alpha",
            "0.7",
            "--no-graph",
            "--filter",
            "category=A,B",
            "--filter",
            "filename=lc.pdf",
        ]);
        let query = args.to_query(&AppConfig::default());

        assert_eq!(query.k, 8);
        assert_eq!(query.alpha, 0.7);
        assert!(!query.include_graph);
        assert_eq!(query.graph_ratio, 0.3);

        let filter = query.filters.unwrap();
        let mut doc = serde_json::Map::new();
        doc.insert("category".into(), json!("B"));
        doc.insert("filename".into(), json!("lc.pdf"));
        assert!(filter.matches(&doc));
        doc.insert("category".into(), json!("C"));
        assert!(!filter.matches(&doc));
    }
}

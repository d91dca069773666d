//! medrag server binary
//!
//! Run with: cargo run -p medrag --bin medrag-server
//! Set MEDRAG_CONFIG to a TOML file to override the defaults.

use medrag::{config::RagConfig, server::RagServer};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "medrag=info,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config = match std::env::var_os("MEDRAG_CONFIG") {
        Some(path) => {
            tracing::info!("Loading configuration from {}", path.to_string_lossy());
            RagConfig::from_file(&path)?
        }
        None => RagConfig::default(),
    };

    tracing::info!("Configuration loaded");
    tracing::info!("  - Passages: {}", config.corpus.passages_path.display());
    tracing::info!("  - Embedding model: {} ({} dims)", config.llm.embed_model, config.embeddings.dimensions);
    tracing::info!("  - LLM model: {}", config.llm.generate_model);
    tracing::info!(
        "  - HNSW: M={} ef_construction={} ef_search={} recall_estimate={}",
        config.index.hnsw_m,
        config.index.hnsw_ef_construction,
        config.index.hnsw_ef_search,
        config.index.recall_estimate
    );

    // Check Ollama
    let server = RagServer::new(config).await?;
    match server.state().llm_provider().health_check().await {
        Ok(true) => tracing::info!("Ollama is running"),
        _ => {
            tracing::warn!("Ollama not available at {}", server.state().config().llm.base_url);
            tracing::warn!("Queries will return evidence only until it is reachable");
        }
    }

    tracing::info!("  Health: http://{}/health", server.address());
    tracing::info!("  API Info: http://{}/api/info", server.address());

    server.start().await?;

    Ok(())
}

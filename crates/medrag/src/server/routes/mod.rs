//! API routes for the inference server

pub mod index;
pub mod query;

use axum::{
    extract::State,
    routing::{get, post},
    Json, Router,
};

use crate::server::state::AppState;

/// Build all API routes
pub fn api_routes() -> Router<AppState> {
    Router::new()
        // Query
        .route("/query", post(query::query_rag))
        // Index lifecycle
        .route("/index", get(index::index_stats))
        .route("/index/rebuild", post(index::rebuild_index))
        // Info
        .route("/info", get(info))
}

/// API info endpoint
async fn info(State(state): State<AppState>) -> Json<serde_json::Value> {
    let config = state.config();
    let llm = state.llm_provider();

    Json(serde_json::json!({
        "name": "medrag",
        "version": env!("CARGO_PKG_VERSION"),
        "description": "Retrieval-augmented medical question answering with cited evidence",
        "endpoints": {
            "POST /api/query": "Answer a question from the indexed corpus with citations",
            "GET /api/index": "Live index snapshot statistics",
            "POST /api/index/rebuild": "Reload the passage file and publish a new snapshot",
            "GET /health": "Liveness",
            "GET /ready": "Readiness (index loaded and non-empty)"
        },
        "models": {
            "embedding": state.embedding_provider().name(),
            "llm": llm.name(),
            "generate_model": llm.model(),
            "dimensions": config.embeddings.dimensions
        },
        "defaults": {
            "k": config.retrieval.default_k,
            "max_k": config.retrieval.max_k,
            "budget": config.context.default_budget,
            "allow_truncation": config.context.allow_truncation
        }
    }))
}

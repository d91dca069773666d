//! Index snapshot endpoints

use axum::{extract::State, Json};
use serde::Serialize;

use crate::cache::CacheStats;
use crate::error::Result;
use crate::index::IndexStats;
use crate::server::state::AppState;

/// Live index and cache statistics
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexStatusResponse {
    pub index: IndexStats,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache: Option<CacheStats>,
}

/// GET /api/index - Statistics for the live snapshot
pub async fn index_stats(State(state): State<AppState>) -> Json<IndexStatusResponse> {
    Json(IndexStatusResponse {
        index: state.index().snapshot().stats(),
        cache: state.answer_cache().map(|c| c.stats()),
    })
}

/// POST /api/index/rebuild - Reload the passage file and publish a new snapshot
pub async fn rebuild_index(State(state): State<AppState>) -> Result<Json<IndexStatusResponse>> {
    tracing::info!("Index rebuild requested");

    let snapshot = state.rebuild_index().await.map_err(|e| {
        tracing::error!("Index rebuild failed: {}", e);
        e
    })?;

    Ok(Json(IndexStatusResponse {
        index: snapshot.stats(),
        cache: state.answer_cache().map(|c| c.stats()),
    }))
}

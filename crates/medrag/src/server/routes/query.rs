//! Query endpoint with retrieval, generation and citations

use axum::{
    extract::{rejection::JsonRejection, State},
    Json,
};
use tokio_util::sync::CancellationToken;

use crate::error::Result;
use crate::server::state::AppState;
use crate::types::{QueryRequest, QueryResponse};

/// POST /api/query - Answer a question from the indexed corpus
///
/// Dropping the request (client disconnect) cancels generation.
pub async fn query_rag(
    State(state): State<AppState>,
    payload: std::result::Result<Json<QueryRequest>, JsonRejection>,
) -> Result<Json<QueryResponse>> {
    let Json(request) = payload?;
    tracing::info!("Query: \"{}\"", request.text);

    let cancel = CancellationToken::new();
    let _guard = cancel.clone().drop_guard();

    let outcome = state.engine().answer(request, cancel).await?;
    Ok(Json(QueryResponse::from(outcome)))
}

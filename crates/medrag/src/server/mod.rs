//! HTTP server for the inference engine

pub mod routes;
pub mod state;

use axum::{extract::State, http::StatusCode, routing::get, Router};
use std::net::SocketAddr;
use tower_http::{
    compression::CompressionLayer,
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

use crate::config::RagConfig;
use crate::error::{Error, Result};
use state::AppState;

/// Inference HTTP server
pub struct RagServer {
    config: RagConfig,
    state: AppState,
}

impl RagServer {
    /// Create a server backed by Ollama, loading the corpus and index
    pub async fn new(config: RagConfig) -> Result<Self> {
        let state = AppState::new(config.clone()).await?;
        Ok(Self { config, state })
    }

    /// Create a server around existing state
    pub fn with_state(state: AppState) -> Self {
        Self {
            config: state.config().clone(),
            state,
        }
    }

    pub fn state(&self) -> &AppState {
        &self.state
    }

    /// Build the router with all routes
    pub fn router(&self) -> Router {
        let router = Router::new()
            // Health check
            .route("/health", get(health_check))
            .route("/ready", get(readiness))
            .nest("/api", routes::api_routes())
            .with_state(self.state.clone())
            // Middleware layers (order matters - applied bottom to top)
            .layer(TraceLayer::new_for_http())
            .layer(CompressionLayer::new());

        if self.config.server.enable_cors {
            let cors = CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any);
            router.layer(cors)
        } else {
            router
        }
    }

    /// Start the server
    pub async fn start(self) -> Result<()> {
        let addr: SocketAddr = self
            .address()
            .parse()
            .map_err(|e| Error::Config(format!("Invalid address: {}", e)))?;

        let router = self.router();

        tracing::info!("Starting medrag server on http://{}", addr);

        let listener = tokio::net::TcpListener::bind(addr)
            .await
            .map_err(|e| Error::Config(format!("Failed to bind: {}", e)))?;

        axum::serve(listener, router)
            .await
            .map_err(|e| Error::internal(format!("Server error: {}", e)))?;

        Ok(())
    }

    /// Get the server address
    pub fn address(&self) -> String {
        format!("{}:{}", self.config.server.host, self.config.server.port)
    }
}

/// Health check endpoint
async fn health_check() -> &'static str {
    "OK"
}

/// Readiness check endpoint
async fn readiness(State(state): State<AppState>) -> StatusCode {
    if state.is_ready() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::testing::ScriptedLlm;
    use crate::server::state::tests::{test_state, write_corpus};
    use axum::body::{to_bytes, Body};
    use axum::http::{header, Method, Request};
    use serde_json::Value;
    use std::sync::Arc;
    use tower::ServiceExt;

    async fn send(router: Router, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let mut request = Request::builder().method(method).uri(uri);
        let body = match body {
            Some(json) => {
                request = request.header(header::CONTENT_TYPE, "application/json");
                Body::from(json.to_string())
            }
            None => Body::empty(),
        };

        let response = router.oneshot(request.body(body).unwrap()).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, value)
    }

    async fn server(llm: ScriptedLlm) -> (tempfile::TempDir, RagServer) {
        let dir = tempfile::tempdir().unwrap();
        write_corpus(&dir.path().join("passages.jsonl"), "");
        let state = test_state(dir.path(), Arc::new(llm)).await;
        (dir, RagServer::with_state(state))
    }

    #[tokio::test]
    async fn test_query_returns_cited_answer() {
        let (_dir, server) = server(ScriptedLlm::replying("Metformin first [P:ada-1] [P:nope].")).await;

        let (status, body) = send(
            server.router(),
            Method::POST,
            "/api/query",
            Some(serde_json::json!({"text": "Is metformin first-line?", "k": 1})),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["state"], "succeeded");
        assert_eq!(body["answer"], "Metformin first [P:ada-1].");
        assert_eq!(body["citations"][0]["passageId"], "ada-1");
        assert_eq!(body["droppedCitations"][0], "nope");
        assert_eq!(body["cached"], false);
        assert_eq!(body["context"].as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_errors_use_structured_body() {
        let (_dir, server) = server(ScriptedLlm::replying("unused")).await;

        let (status, body) = send(
            server.router(),
            Method::POST,
            "/api/query",
            Some(serde_json::json!({"text": "dose?", "embedding": [1.0, 0.0]})),
        )
        .await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"]["type"], "dimension_mismatch");
    }

    #[tokio::test]
    async fn test_malformed_query_body_uses_structured_error() {
        let (_dir, server) = server(ScriptedLlm::replying("unused")).await;

        let (status, body) = send(
            server.router(),
            Method::POST,
            "/api/query",
            Some(serde_json::json!({"k": 2})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"]["type"], "invalid_request");
        assert!(body["error"]["message"].as_str().unwrap().contains("text"));

        let request = Request::builder()
            .method(Method::POST)
            .uri("/api/query")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from("{not json"))
            .unwrap();
        let response = server.router().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body: Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["error"]["type"], "invalid_request");
    }

    #[tokio::test]
    async fn test_health_ready_and_index_routes() {
        let (_dir, server) = server(ScriptedLlm::replying("ok")).await;

        let (status, _) = send(server.router(), Method::GET, "/health", None).await;
        assert_eq!(status, StatusCode::OK);
        let (status, _) = send(server.router(), Method::GET, "/ready", None).await;
        assert_eq!(status, StatusCode::OK);

        let (status, body) = send(server.router(), Method::GET, "/api/index", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["index"]["passages"], 2);
        assert_eq!(body["index"]["generation"], 1);

        let (status, body) = send(server.router(), Method::POST, "/api/index/rebuild", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["index"]["generation"], 2);

        let (status, body) = send(server.router(), Method::GET, "/api/info", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["models"]["llm"], "scripted");
    }
}

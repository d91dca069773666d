//! Ollama-based providers for embeddings and LLM
//!
//! Wraps the shared [`OllamaClient`] to implement the provider traits.

use async_trait::async_trait;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::config::LlmConfig;
use crate::error::Result;
use crate::generation::retry::{run_with_retry, RetryPolicy};
use crate::generation::OllamaClient;

use super::embedding::EmbeddingProvider;
use super::llm::LanguageModel;

/// Ollama embedding provider using nomic-embed-text or similar models
///
/// Calls are retried under the configured backoff policy.
pub struct OllamaEmbedder {
    client: Arc<OllamaClient>,
    dimensions: usize,
    policy: RetryPolicy,
}

impl OllamaEmbedder {
    /// Create a new Ollama embedder
    pub fn new(config: &LlmConfig, dimensions: usize) -> Result<Self> {
        Ok(Self::from_client(Arc::new(OllamaClient::new(config)?), dimensions))
    }

    /// Create from existing OllamaClient
    pub fn from_client(client: Arc<OllamaClient>, dimensions: usize) -> Self {
        let policy = RetryPolicy::from_config(client.config());
        Self {
            client,
            dimensions,
            policy,
        }
    }
}

#[async_trait]
impl EmbeddingProvider for OllamaEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let cancel = CancellationToken::new();
        run_with_retry(&self.policy, &cancel, "embedding", |_| self.client.embed(text))
            .await
            .map_err(|e| e.into_error())
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    async fn health_check(&self) -> Result<bool> {
        self.client.health_check().await
    }

    fn name(&self) -> &str {
        "ollama"
    }
}

/// Ollama LLM provider for answer generation
pub struct OllamaLlm {
    client: Arc<OllamaClient>,
    model: String,
}

impl OllamaLlm {
    /// Create a new Ollama LLM provider
    pub fn new(config: &LlmConfig) -> Result<Self> {
        Ok(Self::from_client(Arc::new(OllamaClient::new(config)?)))
    }

    /// Create from existing OllamaClient
    pub fn from_client(client: Arc<OllamaClient>) -> Self {
        let model = client.config().generate_model.clone();
        Self { client, model }
    }
}

#[async_trait]
impl LanguageModel for OllamaLlm {
    async fn generate_text(&self, prompt: &str, max_tokens: usize) -> Result<String> {
        self.client.generate(prompt, max_tokens).await
    }

    async fn health_check(&self) -> Result<bool> {
        self.client.health_check().await
    }

    fn name(&self) -> &str {
        "ollama"
    }

    fn model(&self) -> &str {
        &self.model
    }
}

/// Build both providers over one shared client
pub fn ollama_providers(
    config: &LlmConfig,
    dimensions: usize,
) -> Result<(Arc<OllamaEmbedder>, Arc<OllamaLlm>)> {
    let client = Arc::new(OllamaClient::new(config)?);
    Ok((
        Arc::new(OllamaEmbedder::from_client(Arc::clone(&client), dimensions)),
        Arc::new(OllamaLlm::from_client(client)),
    ))
}

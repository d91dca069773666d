//! Language model backend trait

use async_trait::async_trait;
use crate::error::Result;

/// Prompt-in, text-out language model backend
///
/// Implementations make a single attempt per call. Timeouts, retries and
/// cancellation belong to the generation orchestrator, so a backend should
/// report failures as errors and let [`crate::Error::is_transient`] decide
/// whether another attempt is worthwhile.
///
/// Implementations:
/// - `OllamaLlm`: Local Ollama server (llama3, phi3, meditron, ...)
#[async_trait]
pub trait LanguageModel: Send + Sync {
    /// Generate a completion for `prompt`, producing at most `max_tokens`
    async fn generate_text(&self, prompt: &str, max_tokens: usize) -> Result<String>;

    /// Check if the provider is healthy and available
    async fn health_check(&self) -> Result<bool>;

    /// Get provider name for logging
    fn name(&self) -> &str;

    /// Get the model being used
    fn model(&self) -> &str;
}

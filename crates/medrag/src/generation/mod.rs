//! Answer generation with the language model and citation handling

pub mod citation;
pub mod ollama;
pub mod orchestrator;
pub mod prompt;
pub mod retry;

pub use citation::{truncate_snippet, validate_citations, ValidatedCitations};
pub use ollama::OllamaClient;
pub use orchestrator::GenerationOrchestrator;
pub use prompt::PromptBuilder;
pub use retry::{run_with_retry, RetryError, RetryPolicy, RetryState};

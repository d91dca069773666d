//! Generation orchestrator
//!
//! Turns an assembled context into a cited answer: builds the grounded
//! prompt, calls the language model under the retry policy, and validates
//! the citation markers in the reply.

use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;

use super::citation::validate_citations;
use super::prompt::PromptBuilder;
use super::retry::{run_with_retry, RetryError, RetryPolicy};
use crate::config::LlmConfig;
use crate::context::AssembledContext;
use crate::error::{Error, Result};
use crate::providers::LanguageModel;
use crate::types::Answer;

/// Drives one language model call per question
pub struct GenerationOrchestrator {
    llm: Arc<dyn LanguageModel>,
    policy: RetryPolicy,
    max_tokens: usize,
}

impl GenerationOrchestrator {
    pub fn new(llm: Arc<dyn LanguageModel>, config: &LlmConfig) -> Self {
        Self {
            llm,
            policy: RetryPolicy::from_config(config),
            max_tokens: config.max_tokens,
        }
    }

    /// Replace the retry policy
    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Answer `question` from `context`
    ///
    /// Fails with [`Error::GenerationUnavailable`] once retries are spent,
    /// and with [`Error::Cancelled`] when `cancel` fires first.
    pub async fn generate(
        &self,
        question: &str,
        context: &AssembledContext,
        cancel: &CancellationToken,
    ) -> Result<Answer> {
        let started = Instant::now();
        let prompt = PromptBuilder::build_prompt(question, context);
        let llm = &self.llm;
        let max_tokens = self.max_tokens;

        tracing::debug!(
            "Generating with {}/{} over {} excerpts ({} prompt chars)",
            llm.name(),
            llm.model(),
            context.len(),
            prompt.len()
        );

        let prompt_text: &str = &prompt;
        let mut attempts = 0;

        let outcome = run_with_retry(&self.policy, cancel, "generation", |attempt| {
            attempts = attempt;
            async move {
                tracing::debug!("Generation attempt {}", attempt);
                llm.generate_text(prompt_text, max_tokens).await
            }
        })
        .await;

        let raw = match outcome {
            Ok(raw) => raw,
            Err(RetryError::Cancelled { attempts }) => {
                tracing::info!("Generation cancelled after {} attempt(s)", attempts);
                return Err(Error::Cancelled);
            }
            Err(e) => {
                let attempts = e.attempts();
                let last_error = e.into_error().to_string();
                tracing::error!(
                    "Generation unavailable after {} attempt(s): {}",
                    attempts,
                    last_error
                );
                return Err(Error::GenerationUnavailable {
                    attempts,
                    last_error,
                });
            }
        };

        let validated = validate_citations(&raw, context);
        let uncertain = validated.citations.is_empty();
        if uncertain {
            tracing::warn!("Answer cites no context passage; flagging as uncertain");
        }

        Ok(Answer {
            text: validated.text,
            citations: validated.citations,
            latency: started.elapsed(),
            uncertain,
            dropped_citations: validated.dropped,
            attempts,
        })
    }
}

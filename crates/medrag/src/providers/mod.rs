//! Provider abstractions for embeddings and language models
//!
//! Trait-based so the engine can run against a local Ollama server or the
//! in-process fakes used by tests.

pub mod embedding;
pub mod llm;
pub mod ollama;

pub use embedding::EmbeddingProvider;
pub use llm::LanguageModel;
pub use ollama::{ollama_providers, OllamaEmbedder, OllamaLlm};

#[cfg(test)]
pub(crate) mod testing {
    //! Deterministic in-process providers

    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::{EmbeddingProvider, LanguageModel};
    use crate::error::{Error, Result};

    /// One axis per keyword, 1.0 when the text mentions it
    pub struct KeywordEmbedder {
        keywords: Vec<String>,
    }

    impl KeywordEmbedder {
        pub fn new(keywords: &[&str]) -> Self {
            Self {
                keywords: keywords.iter().map(|k| k.to_lowercase()).collect(),
            }
        }
    }

    #[async_trait]
    impl EmbeddingProvider for KeywordEmbedder {
        async fn embed(&self, text: &str) -> Result<Vec<f32>> {
            let text = text.to_lowercase();
            Ok(self
                .keywords
                .iter()
                .map(|k| if text.contains(k.as_str()) { 1.0 } else { 0.0 })
                .collect())
        }

        fn dimensions(&self) -> usize {
            self.keywords.len()
        }

        async fn health_check(&self) -> Result<bool> {
            Ok(true)
        }

        fn name(&self) -> &str {
            "keyword"
        }
    }

    /// What a [`ScriptedLlm`] does on one call
    #[derive(Debug, Clone)]
    pub enum Step {
        Reply(String),
        Transient(String),
        Permanent(String),
        /// Never completes; exercises the caller's timeout
        Hang,
    }

    /// Language model that plays back a fixed script
    ///
    /// Once the script runs out the last step repeats.
    pub struct ScriptedLlm {
        steps: Mutex<VecDeque<Step>>,
        last: Mutex<Step>,
        calls: AtomicU32,
        prompts: Mutex<Vec<String>>,
    }

    impl ScriptedLlm {
        pub fn new(steps: Vec<Step>) -> Self {
            let last = steps
                .last()
                .cloned()
                .unwrap_or_else(|| Step::Reply(String::new()));
            Self {
                steps: Mutex::new(steps.into()),
                last: Mutex::new(last),
                calls: AtomicU32::new(0),
                prompts: Mutex::new(Vec::new()),
            }
        }

        pub fn replying(text: &str) -> Self {
            Self::new(vec![Step::Reply(text.to_string())])
        }

        pub fn hanging() -> Self {
            Self::new(vec![Step::Hang])
        }

        pub fn calls(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }

        pub fn last_prompt(&self) -> Option<String> {
            self.prompts.lock().last().cloned()
        }
    }

    #[async_trait]
    impl LanguageModel for ScriptedLlm {
        async fn generate_text(&self, prompt: &str, _max_tokens: usize) -> Result<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.prompts.lock().push(prompt.to_string());

            let step = {
                let next = self.steps.lock().pop_front();
                match next {
                    Some(step) => {
                        *self.last.lock() = step.clone();
                        step
                    }
                    None => self.last.lock().clone(),
                }
            };

            match step {
                Step::Reply(text) => Ok(text),
                Step::Transient(message) => Err(Error::llm(message)),
                Step::Permanent(message) => Err(Error::internal(message)),
                Step::Hang => std::future::pending().await,
            }
        }

        async fn health_check(&self) -> Result<bool> {
            Ok(true)
        }

        fn name(&self) -> &str {
            "scripted"
        }

        fn model(&self) -> &str {
            "scripted"
        }
    }
}

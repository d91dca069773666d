//! Query pipeline
//!
//! One [`RagEngine::answer`] call embeds the question, retrieves against the
//! live snapshot, packs the context and asks the language model for a cited
//! answer. Index and retrieval errors fail the request; generation errors
//! degrade it to an evidence-only response unless the caller insists on a
//! generated answer.

mod state;

pub use state::{RequestState, RequestTracker};

use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::cache::AnswerCache;
use crate::config::RagConfig;
use crate::context::{AssembledContext, ContextAssembler};
use crate::error::{Error, Result};
use crate::generation::GenerationOrchestrator;
use crate::index::IndexHandle;
use crate::providers::{EmbeddingProvider, LanguageModel};
use crate::retrieval::Retriever;
use crate::types::{Answer, Query, QueryRequest};

/// Result of one query
#[derive(Debug, Clone)]
pub struct QueryOutcome {
    pub request_id: Uuid,
    /// Terminal state: `Succeeded` or `DegradedNoGeneration`
    pub state: RequestState,
    pub context: AssembledContext,
    /// Absent when generation was unavailable
    pub answer: Option<Answer>,
    pub generation_error: Option<String>,
    pub cached: bool,
    pub latency: Duration,
    pub index_generation: u64,
}

/// Retrieval-augmented answering over the live index
pub struct RagEngine {
    index: Arc<IndexHandle>,
    embedder: Arc<dyn EmbeddingProvider>,
    retriever: Retriever,
    assembler: ContextAssembler,
    orchestrator: GenerationOrchestrator,
    cache: Option<Arc<AnswerCache>>,
    default_k: usize,
    default_budget: usize,
}

impl RagEngine {
    pub fn new(
        config: &RagConfig,
        index: Arc<IndexHandle>,
        embedder: Arc<dyn EmbeddingProvider>,
        llm: Arc<dyn LanguageModel>,
    ) -> Self {
        let cache = config
            .cache
            .enabled
            .then(|| Arc::new(AnswerCache::from_config(&config.cache)));

        Self {
            index,
            embedder,
            retriever: Retriever::new(config.retrieval.clone()),
            assembler: ContextAssembler::new(&config.context),
            orchestrator: GenerationOrchestrator::new(llm, &config.llm),
            cache,
            default_k: config.retrieval.default_k,
            default_budget: config.context.default_budget,
        }
    }

    /// Replace the generation orchestrator
    pub fn with_orchestrator(mut self, orchestrator: GenerationOrchestrator) -> Self {
        self.orchestrator = orchestrator;
        self
    }

    pub fn index(&self) -> &Arc<IndexHandle> {
        &self.index
    }

    /// Answer cache, when enabled
    pub fn cache(&self) -> Option<&Arc<AnswerCache>> {
        self.cache.as_ref()
    }

    /// Run `request` through the pipeline
    ///
    /// `cancel` aborts the embedding call and any in-flight or pending
    /// generation attempt.
    pub async fn answer(&self, request: QueryRequest, cancel: CancellationToken) -> Result<QueryOutcome> {
        let mut tracker = RequestTracker::new(Uuid::new_v4());

        match self.run(&request, &mut tracker, &cancel).await {
            Ok(outcome) => {
                tracing::info!(
                    "[{}] {} in {}ms (cached: {})",
                    outcome.request_id,
                    outcome.state,
                    outcome.latency.as_millis(),
                    outcome.cached
                );
                Ok(outcome)
            }
            Err(e) => {
                tracker.fail(&e);
                Err(e)
            }
        }
    }

    async fn run(
        &self,
        request: &QueryRequest,
        tracker: &mut RequestTracker,
        cancel: &CancellationToken,
    ) -> Result<QueryOutcome> {
        request.validate(self.retriever.config().max_k)?;

        let k = request.k.unwrap_or(self.default_k);
        let budget = request.budget.unwrap_or(self.default_budget);
        let filters = request.filters.clone().unwrap_or_default();

        // Pin the snapshot for the whole request
        let snapshot = self.index.snapshot();
        let index_generation = snapshot.generation();

        // A supplied embedding must match the index before it can hit the cache
        if let (Some(embedding), Some(expected)) = (&request.embedding, snapshot.corpus().dimension()) {
            if embedding.len() != expected {
                return Err(Error::DimensionMismatch {
                    expected,
                    actual: embedding.len(),
                });
            }
        }

        let cache_key = self.cache.as_ref().map(|_| {
            AnswerCache::key(&request.text, request.embedding.as_deref(), k, budget, &filters)
        });

        if let (Some(cache), Some(key)) = (&self.cache, &cache_key) {
            if let Some(hit) = cache.get(key, index_generation) {
                tracker.advance(RequestState::Succeeded)?;
                return Ok(QueryOutcome {
                    request_id: tracker.id(),
                    state: RequestState::Succeeded,
                    context: hit.context,
                    answer: Some(hit.answer),
                    generation_error: None,
                    cached: true,
                    latency: tracker.elapsed(),
                    index_generation,
                });
            }
        }

        tracker.advance(RequestState::Retrieving)?;
        let embedding = match &request.embedding {
            Some(embedding) => embedding.clone(),
            None => {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return Err(Error::Cancelled),
                    embedding = self.embedder.embed(&request.text) => embedding?,
                }
            }
        };

        let query = Query::new(request.text.clone(), embedding).with_filters(filters);
        let retrieval = self.retriever.retrieve(&snapshot, &query, k)?;

        tracker.advance(RequestState::Assembling)?;
        let context = self.assembler.assemble(&retrieval.hits, budget)?;

        tracker.advance(RequestState::Generating)?;
        match self.orchestrator.generate(&request.text, &context, cancel).await {
            Ok(answer) => {
                tracker.advance(RequestState::Succeeded)?;

                if let (Some(cache), Some(key)) = (&self.cache, cache_key) {
                    cache.put(key, &request.text, answer.clone(), context.clone(), index_generation);
                }

                Ok(QueryOutcome {
                    request_id: tracker.id(),
                    state: RequestState::Succeeded,
                    context,
                    answer: Some(answer),
                    generation_error: None,
                    cached: false,
                    latency: tracker.elapsed(),
                    index_generation,
                })
            }
            Err(Error::Cancelled) => Err(Error::Cancelled),
            Err(e) if request.require_generation => Err(e),
            Err(e) => {
                tracing::warn!(
                    "[{}] Returning evidence only: {}",
                    tracker.id(),
                    e
                );
                tracker.advance(RequestState::DegradedNoGeneration)?;

                Ok(QueryOutcome {
                    request_id: tracker.id(),
                    state: RequestState::DegradedNoGeneration,
                    context,
                    answer: None,
                    generation_error: Some(e.to_string()),
                    cached: false,
                    latency: tracker.elapsed(),
                    index_generation,
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::IndexConfig;
    use crate::generation::RetryPolicy;
    use crate::index::IndexSnapshot;
    use crate::providers::testing::{KeywordEmbedder, ScriptedLlm};
    use crate::retrieval::PassageFilter;
    use crate::types::{Passage, SourceMetadata};
    use chrono::Utc;

    const KEYWORDS: [&str; 3] = ["metformin", "thiazide", "insulin"];

    fn passages() -> Vec<Passage> {
        let now = Utc::now();
        vec![
            Passage::new(
                "ada-1",
                "Metformin is the preferred initial agent for type 2 diabetes.",
                SourceMetadata::new("ada", "ADA Standards of Care", now).with_document_type("guideline"),
            )
            .with_embedding(vec![1.0, 0.0, 0.0]),
            Passage::new(
                "jnc-1",
                "Thiazide diuretics are a first-line option for hypertension.",
                SourceMetadata::new("jnc", "JNC 8", now).with_document_type("guideline"),
            )
            .with_embedding(vec![0.0, 1.0, 0.0]),
            Passage::new(
                "ins-1",
                "Start insulin when metformin no longer controls glucose.",
                SourceMetadata::new("ins", "Insulin Primer", now).with_document_type("textbook"),
            )
            .with_embedding(vec![1.0, 0.0, 1.0]),
        ]
    }

    fn index_config() -> IndexConfig {
        IndexConfig {
            recall_estimate: 1.0,
            ..IndexConfig::default()
        }
    }

    fn engine(llm: Arc<ScriptedLlm>) -> RagEngine {
        let mut config = RagConfig::default();
        config.embeddings.dimensions = KEYWORDS.len();
        config.llm.max_retries = 2;

        let snapshot = IndexSnapshot::build(passages(), &index_config()).unwrap();
        let index = Arc::new(IndexHandle::new(snapshot));
        let policy = RetryPolicy {
            max_retries: 2,
            attempt_timeout: Duration::from_secs(10),
            base_backoff: Duration::from_millis(200),
            max_backoff: Duration::from_secs(2),
            deadline: Duration::from_secs(120),
        };

        RagEngine::new(&config, index, Arc::new(KeywordEmbedder::new(&KEYWORDS)), llm.clone())
            .with_orchestrator(GenerationOrchestrator::new(llm, &config.llm).with_policy(policy))
    }

    #[tokio::test(start_paused = true)]
    async fn test_backend_timeouts_degrade_to_evidence() {
        let llm = Arc::new(ScriptedLlm::hanging());
        let engine = engine(Arc::clone(&llm));

        let outcome = engine
            .answer(QueryRequest::new("When is metformin used?").with_k(2), CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(outcome.state, RequestState::DegradedNoGeneration);
        assert_eq!(llm.calls(), 3);
        assert!(outcome.answer.is_none());
        assert!(!outcome.context.is_empty());
        assert_eq!(outcome.context.excerpts[0].passage_id.as_str(), "ada-1");
        assert!(outcome
            .generation_error
            .as_deref()
            .unwrap()
            .contains("3 attempt"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_require_generation_fails_instead_of_degrading() {
        let llm = Arc::new(ScriptedLlm::hanging());
        let err = engine(llm)
            .answer(
                QueryRequest::new("When is metformin used?").requiring_generation(),
                CancellationToken::new(),
            )
            .await
            .unwrap_err();

        assert!(matches!(err, Error::GenerationUnavailable { attempts: 3, .. }));
    }

    #[tokio::test]
    async fn test_cached_until_new_snapshot() {
        let llm = Arc::new(ScriptedLlm::replying("Metformin comes first [P:ada-1]."));
        let engine = engine(Arc::clone(&llm));
        let request = || QueryRequest::new("When is metformin used?").with_k(2);

        let first = engine.answer(request(), CancellationToken::new()).await.unwrap();
        assert_eq!(first.state, RequestState::Succeeded);
        assert!(!first.cached);
        assert_eq!(first.answer.as_ref().unwrap().citations[0].as_str(), "ada-1");

        let second = engine.answer(request(), CancellationToken::new()).await.unwrap();
        assert!(second.cached);
        assert_eq!(second.state, RequestState::Succeeded);
        assert_eq!(llm.calls(), 1);

        engine
            .index()
            .publish(IndexSnapshot::build(passages(), &index_config()).unwrap());

        let third = engine.answer(request(), CancellationToken::new()).await.unwrap();
        assert!(!third.cached);
        assert_eq!(third.index_generation, 2);
        assert_eq!(llm.calls(), 2);
    }

    #[tokio::test]
    async fn test_supplied_embedding_is_checked_before_cache() {
        let llm = Arc::new(ScriptedLlm::replying("Metformin [P:ada-1]."));
        let engine = engine(Arc::clone(&llm));
        let ask = |embedding: Vec<f32>| QueryRequest::new("q").with_k(2).with_embedding(embedding);

        let first = engine.answer(ask(vec![1.0, 0.0, 0.0]), CancellationToken::new()).await.unwrap();
        assert!(!first.cached);
        assert_eq!(first.context.excerpts[0].passage_id.as_str(), "ada-1");

        let second = engine.answer(ask(vec![0.0, 1.0, 0.0]), CancellationToken::new()).await.unwrap();
        assert!(!second.cached);
        assert_eq!(second.context.excerpts[0].passage_id.as_str(), "jnc-1");

        let repeat = engine.answer(ask(vec![1.0, 0.0, 0.0]), CancellationToken::new()).await.unwrap();
        assert!(repeat.cached);

        let err = engine
            .answer(ask(vec![1.0; 128]), CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::DimensionMismatch { expected: 3, actual: 128 }));
        assert_eq!(llm.calls(), 2);
    }

    #[tokio::test]
    async fn test_filters_reach_retrieval() {
        let llm = Arc::new(ScriptedLlm::replying("Insulin [P:ins-1]."));
        let outcome = engine(llm)
            .answer(
                QueryRequest::new("When is metformin used?")
                    .with_filters(PassageFilter::new().document_types(["textbook"])),
                CancellationToken::new(),
            )
            .await
            .unwrap();

        let ids: Vec<&str> = outcome.context.passage_ids().map(|id| id.as_str()).collect();
        assert_eq!(ids, vec!["ins-1"]);
    }

    #[tokio::test]
    async fn test_retrieval_errors_fail_the_request() {
        let llm = Arc::new(ScriptedLlm::replying("unused"));
        let engine = engine(Arc::clone(&llm));

        let err = engine
            .answer(
                QueryRequest::new("q").with_embedding(vec![1.0; 5]),
                CancellationToken::new(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, Error::DimensionMismatch { expected: 3, actual: 5 }));

        let err = engine
            .answer(QueryRequest::new("q").with_budget(1), CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::BudgetTooSmall { budget: 1, .. }));
        assert_eq!(llm.calls(), 0);
    }
}

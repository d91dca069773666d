//! Application state for the inference server

use std::sync::Arc;
use tokio::sync::Mutex;

use crate::cache::AnswerCache;
use crate::config::RagConfig;
use crate::engine::RagEngine;
use crate::error::{Error, Result};
use crate::index::{IndexHandle, IndexSnapshot};
use crate::providers::{ollama_providers, EmbeddingProvider, LanguageModel};
use crate::store::{Corpus, CorpusLoader, DocumentStore};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    /// Configuration
    config: RagConfig,
    /// Live index snapshot
    index: Arc<IndexHandle>,
    /// Passages behind the live snapshot
    store: DocumentStore,
    /// Embedding provider, shared by corpus loading and queries
    embedder: Arc<dyn EmbeddingProvider>,
    /// Language model provider
    llm: Arc<dyn LanguageModel>,
    /// Query pipeline
    engine: RagEngine,
    /// Held from corpus load through persist so rebuilds cannot interleave
    rebuild_lock: Mutex<()>,
}

impl AppState {
    /// Create state backed by the Ollama server from `config.llm`
    pub async fn new(config: RagConfig) -> Result<Self> {
        let (embedder, llm) = ollama_providers(&config.llm, config.embeddings.dimensions)?;
        tracing::info!(
            "Ollama providers initialized (embed: {}, generate: {})",
            config.llm.embed_model,
            config.llm.generate_model
        );
        Self::with_providers(config, embedder, llm).await
    }

    /// Create state with explicit providers, loading the corpus and index
    pub async fn with_providers(
        config: RagConfig,
        embedder: Arc<dyn EmbeddingProvider>,
        llm: Arc<dyn LanguageModel>,
    ) -> Result<Self> {
        tracing::info!("Initializing application state...");

        let store = DocumentStore::new();
        let snapshot = if config.corpus.passages_path.exists() {
            let corpus = load_corpus(&config, &embedder).await?;
            load_or_build(&config, corpus).await?
        } else {
            tracing::warn!(
                "Passage file {} not found; starting with an empty index",
                config.corpus.passages_path.display()
            );
            IndexSnapshot::empty(&config.index)
        };

        // Share passages with the snapshot (a loaded snapshot carries its own copy)
        store.replace(Arc::clone(snapshot.corpus()));

        let index = Arc::new(IndexHandle::new(snapshot));
        let engine = RagEngine::new(&config, Arc::clone(&index), Arc::clone(&embedder), Arc::clone(&llm));

        Ok(Self {
            inner: Arc::new(AppStateInner {
                config,
                index,
                store,
                embedder,
                llm,
                engine,
                rebuild_lock: Mutex::new(()),
            }),
        })
    }

    /// Get configuration
    pub fn config(&self) -> &RagConfig {
        &self.inner.config
    }

    /// Get the live index handle
    pub fn index(&self) -> &Arc<IndexHandle> {
        &self.inner.index
    }

    /// Get the document store
    pub fn store(&self) -> &DocumentStore {
        &self.inner.store
    }

    /// Get the query pipeline
    pub fn engine(&self) -> &RagEngine {
        &self.inner.engine
    }

    /// Get the embedding provider
    pub fn embedding_provider(&self) -> &Arc<dyn EmbeddingProvider> {
        &self.inner.embedder
    }

    /// Get the language model provider
    pub fn llm_provider(&self) -> &Arc<dyn LanguageModel> {
        &self.inner.llm
    }

    /// Get answer cache, when enabled
    pub fn answer_cache(&self) -> Option<&Arc<AnswerCache>> {
        self.inner.engine.cache()
    }

    /// Ready once the live snapshot holds passages
    pub fn is_ready(&self) -> bool {
        !self.inner.index.snapshot().is_empty()
    }

    /// Reload the passage file, publish a snapshot over it and persist it
    ///
    /// Queries keep running against the previous snapshot until the new one
    /// is published. Cached answers from older generations are dropped.
    /// Concurrent calls run one at a time.
    pub async fn rebuild_index(&self) -> Result<Arc<IndexSnapshot>> {
        let _guard = self.inner.rebuild_lock.lock().await;
        let config = self.config();
        let corpus = load_corpus(config, &self.inner.embedder).await?;

        let snapshot = self
            .inner
            .index
            .rebuild(Arc::clone(&corpus), config.index.clone())
            .await?;
        self.inner.store.replace(corpus);

        if let Some(cache) = self.answer_cache() {
            cache.invalidate_before(snapshot.generation());
        }
        persist(config, Arc::clone(&snapshot)).await;

        Ok(snapshot)
    }
}

async fn load_corpus(config: &RagConfig, embedder: &Arc<dyn EmbeddingProvider>) -> Result<Arc<Corpus>> {
    let loader = CorpusLoader::new(config.embeddings.dimensions)
        .with_embedder(Arc::clone(embedder), config.corpus.embed_concurrency);
    let (passages, _report) = loader.load_file(&config.corpus.passages_path).await?;
    Ok(Arc::new(DocumentStore::build(passages)?))
}

/// Reuse the persisted snapshot when it was built from this corpus with the
/// same index settings, otherwise build and persist a fresh one
async fn load_or_build(config: &RagConfig, corpus: Arc<Corpus>) -> Result<IndexSnapshot> {
    if let Some(path) = config.corpus.snapshot_path.as_ref().filter(|p| p.exists()) {
        match IndexSnapshot::load(path) {
            Ok(snapshot)
                if snapshot.fingerprint() == corpus.fingerprint()
                    && snapshot.config() == &config.index =>
            {
                tracing::info!("Reusing index snapshot {}", path.display());
                return Ok(snapshot);
            }
            Ok(_) => {
                tracing::info!("Index snapshot {} is stale; rebuilding", path.display());
            }
            Err(e) => {
                tracing::warn!("Ignoring unreadable index snapshot {}: {}", path.display(), e);
            }
        }
    }

    let index_config = config.index.clone();
    let snapshot_path = config.corpus.snapshot_path.clone();

    tokio::task::spawn_blocking(move || {
        let snapshot = IndexSnapshot::from_corpus(corpus, &index_config);
        if let Some(path) = snapshot_path {
            if let Err(e) = snapshot.save(&path) {
                tracing::error!("Failed to save index snapshot: {}", e);
            }
        }
        snapshot
    })
    .await
    .map_err(|e| Error::internal(format!("Index build task failed: {}", e)))
}

/// Save the snapshot if a path is configured; failures are logged only
async fn persist(config: &RagConfig, snapshot: Arc<IndexSnapshot>) {
    let Some(path) = config.corpus.snapshot_path.clone() else {
        return;
    };

    let result = tokio::task::spawn_blocking(move || snapshot.save(&path)).await;
    match result {
        Ok(Ok(())) => {}
        Ok(Err(e)) => tracing::error!("Failed to save index snapshot: {}", e),
        Err(e) => tracing::error!("Index snapshot save task failed: {}", e),
    }
}

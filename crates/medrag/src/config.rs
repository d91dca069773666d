//! Configuration for the inference engine

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{Error, Result};

/// Main engine configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RagConfig {
    /// Server configuration
    pub server: ServerConfig,
    /// Corpus and snapshot locations
    pub corpus: CorpusConfig,
    /// Embedding configuration
    pub embeddings: EmbeddingConfig,
    /// HNSW index configuration
    pub index: IndexConfig,
    /// Retriever configuration
    pub retrieval: RetrievalConfig,
    /// Context assembly configuration
    pub context: ContextConfig,
    /// Ollama/LLM configuration
    pub llm: LlmConfig,
    /// Answer cache configuration
    pub cache: CacheConfig,
}

impl RagConfig {
    /// Load configuration from a TOML file; missing sections fall back to defaults
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&raw)
            .map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings the engine cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.embeddings.dimensions == 0 {
            return Err(Error::Config("embeddings.dimensions must be non-zero".into()));
        }
        if self.index.hnsw_m < 2 {
            return Err(Error::Config("index.hnsw_m must be at least 2".into()));
        }
        if !(self.index.recall_estimate > 0.0) {
            return Err(Error::Config("index.recall_estimate must be positive".into()));
        }
        if self.retrieval.default_k == 0 || self.retrieval.max_k < self.retrieval.default_k {
            return Err(Error::Config(
                "retrieval.default_k must be in 1..=retrieval.max_k".into(),
            ));
        }
        if self.retrieval.over_fetch_factor == 0 {
            return Err(Error::Config("retrieval.over_fetch_factor must be at least 1".into()));
        }
        if self.context.default_budget == 0 {
            return Err(Error::Config("context.default_budget must be non-zero".into()));
        }
        if self.context.chars_per_token == 0 {
            return Err(Error::Config("context.chars_per_token must be non-zero".into()));
        }
        if self.llm.timeout_secs == 0 {
            return Err(Error::Config("llm.timeout_secs must be non-zero".into()));
        }
        Ok(())
    }
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Host address
    pub host: String,
    /// Port number
    pub port: u16,
    /// Enable CORS
    pub enable_cors: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            enable_cors: true,
        }
    }
}

/// Where passages come from and where built snapshots are kept
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CorpusConfig {
    /// JSON Lines file with one passage per line
    pub passages_path: PathBuf,
    /// Persisted index snapshot (reused on startup when the corpus is unchanged)
    pub snapshot_path: Option<PathBuf>,
    /// Concurrent embedding requests while loading passages without vectors
    pub embed_concurrency: usize,
}

impl Default for CorpusConfig {
    fn default() -> Self {
        let data_dir = dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("medrag");

        Self {
            passages_path: data_dir.join("passages.jsonl"),
            snapshot_path: Some(data_dir.join("index.json")),
            embed_concurrency: 4,
        }
    }
}

/// Embedding configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    /// Embedding dimensions (768 for nomic-embed-text)
    pub dimensions: usize,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self { dimensions: 768 }
    }
}

/// HNSW index configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexConfig {
    /// HNSW M parameter (connections per layer)
    pub hnsw_m: usize,
    /// HNSW ef_construction parameter
    pub hnsw_ef_construction: usize,
    /// HNSW ef_search parameter at the reference recall of 0.9
    pub hnsw_ef_search: usize,
    /// Target recall; scales the search beam, 1.0 or above scans exhaustively
    pub recall_estimate: f32,
    /// Seed for level assignment, fixed so rebuilds are reproducible
    pub seed: u64,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            hnsw_m: 16,
            hnsw_ef_construction: 200,
            hnsw_ef_search: 64,
            recall_estimate: 0.9,
            seed: 42,
        }
    }
}

impl IndexConfig {
    /// Whether searches should bypass the graph and scan every vector
    pub fn exact(&self) -> bool {
        self.recall_estimate >= 1.0
    }

    /// Search beam width for a query asking for `k` neighbors
    pub fn ef_for(&self, k: usize) -> usize {
        let ratio = f64::from(self.recall_estimate) / 0.9;
        let scaled = (self.hnsw_ef_search as f64 * ratio - 1e-6).ceil() as usize;
        scaled.max(k).max(1)
    }
}

/// Retriever configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrievalConfig {
    /// Passages returned when the request does not set `k`
    pub default_k: usize,
    /// Largest `k` a request may ask for
    pub max_k: usize,
    /// Candidates fetched per requested result, covering dedup and post-filter losses
    pub over_fetch_factor: usize,
    /// Filters matching fewer than this fraction of the corpus are pushed into the index
    pub filter_pushdown_threshold: f64,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            default_k: 8,
            max_k: 50,
            over_fetch_factor: 3,
            filter_pushdown_threshold: 0.2,
        }
    }
}

/// Context assembly configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ContextConfig {
    /// Token budget when the request does not set one
    pub default_budget: usize,
    /// Truncate the first passage that does not fit to fill the budget
    pub allow_truncation: bool,
    /// Characters per token for the cost estimate
    pub chars_per_token: usize,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            default_budget: 2048,
            allow_truncation: false,
            chars_per_token: 4,
        }
    }
}

/// LLM (Ollama) configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    /// Ollama base URL
    pub base_url: String,
    /// Embedding model name
    pub embed_model: String,
    /// Generation model name
    pub generate_model: String,
    /// Temperature for generation
    pub temperature: f32,
    /// Per-attempt timeout in seconds
    pub timeout_secs: u64,
    /// Retries after the first failed attempt
    pub max_retries: u32,
    /// First backoff delay in milliseconds, doubled per retry
    pub base_backoff_ms: u64,
    /// Upper bound on a single backoff delay in milliseconds
    pub max_backoff_ms: u64,
    /// Overall deadline for one generation including retries, in seconds
    pub deadline_secs: u64,
    /// Maximum tokens to generate
    pub max_tokens: usize,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:11434".to_string(),
            embed_model: "nomic-embed-text".to_string(),
            generate_model: "llama3.1:8b".to_string(),
            temperature: 0.1, // Low for evidence-bound answers
            timeout_secs: 60,
            max_retries: 2,
            base_backoff_ms: 500,
            max_backoff_ms: 8_000,
            deadline_secs: 240,
            max_tokens: 768,
        }
    }
}

impl LlmConfig {
    /// Per-attempt timeout
    pub fn attempt_timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Answer cache configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Enable answer caching
    pub enabled: bool,
    /// Maximum cached answers
    pub max_entries: usize,
    /// TTL for cache entries (seconds)
    pub ttl_seconds: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_entries: 1000,
            ttl_seconds: 3600,
        }
    }
}

//! Corpus loading from JSON Lines passage files
//!
//! Ingestion runs outside this crate and writes one [`Passage`] per line.
//! Passages that arrive without a vector are embedded here; passages with
//! blank text are skipped.

use futures::{StreamExt, TryStreamExt};
use std::path::Path;
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::providers::EmbeddingProvider;
use crate::types::Passage;

/// What happened while loading a passage file
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoadReport {
    /// Non-empty lines read
    pub records: usize,
    /// Records dropped because their text was blank
    pub skipped_blank: usize,
    /// Records embedded during loading
    pub embedded: usize,
}

/// Reads passage files and fills in missing embeddings
pub struct CorpusLoader {
    embedder: Option<Arc<dyn EmbeddingProvider>>,
    dimensions: usize,
    concurrency: usize,
}

impl CorpusLoader {
    /// Create a loader expecting vectors of `dimensions`
    pub fn new(dimensions: usize) -> Self {
        Self {
            embedder: None,
            dimensions,
            concurrency: 4,
        }
    }

    /// Embed passages that have no vector with this provider
    pub fn with_embedder(mut self, embedder: Arc<dyn EmbeddingProvider>, concurrency: usize) -> Self {
        self.embedder = Some(embedder);
        self.concurrency = concurrency.max(1);
        self
    }

    /// Load and embed every passage in a JSON Lines file
    pub async fn load_file(&self, path: impl AsRef<Path>) -> Result<(Vec<Passage>, LoadReport)> {
        let path = path.as_ref();
        let raw = tokio::fs::read_to_string(path).await?;
        tracing::info!("Loading passages from {}", path.display());
        self.load_str(&raw).await
    }

    /// Load and embed passages from JSON Lines text
    pub async fn load_str(&self, raw: &str) -> Result<(Vec<Passage>, LoadReport)> {
        let (mut passages, mut report) = parse_jsonl(raw)?;

        let missing: Vec<usize> = passages
            .iter()
            .enumerate()
            .filter(|(_, p)| !p.is_embedded())
            .map(|(i, _)| i)
            .collect();

        if !missing.is_empty() {
            let embedder = self.embedder.as_ref().ok_or_else(|| {
                Error::invalid_passage(
                    passages[missing[0]].id.as_str(),
                    "passage has no embedding and no embedding provider is configured",
                )
            })?;

            tracing::info!(
                "Embedding {} passages with {} (concurrency {})",
                missing.len(),
                embedder.name(),
                self.concurrency
            );

            let texts: Vec<String> = missing.iter().map(|&i| passages[i].text.clone()).collect();
            let vectors: Vec<Vec<f32>> = futures::stream::iter(texts)
                .map(|text| {
                    let embedder = Arc::clone(embedder);
                    async move { embedder.embed(&text).await }
                })
                .buffered(self.concurrency)
                .try_collect()
                .await?;

            for (&i, vector) in missing.iter().zip(vectors) {
                passages[i].embedding = vector;
            }
            report.embedded = missing.len();
        }

        for passage in &passages {
            if passage.embedding.len() != self.dimensions {
                return Err(Error::invalid_passage(
                    passage.id.as_str(),
                    format!(
                        "embedding has dimension {}, expected {}",
                        passage.embedding.len(),
                        self.dimensions
                    ),
                ));
            }
        }

        tracing::info!(
            "Loaded {} passages ({} skipped blank, {} embedded)",
            passages.len(),
            report.skipped_blank,
            report.embedded
        );

        Ok((passages, report))
    }
}

/// Parse JSON Lines passage records, skipping blank lines and blank-text passages
pub fn parse_jsonl(raw: &str) -> Result<(Vec<Passage>, LoadReport)> {
    let mut passages = Vec::new();
    let mut report = LoadReport::default();

    for (line_no, line) in raw.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        report.records += 1;

        let passage: Passage = serde_json::from_str(line).map_err(|e| {
            Error::invalid_passage(format!("line {}", line_no + 1), e.to_string())
        })?;

        if passage.text.trim().is_empty() {
            tracing::warn!("Skipping passage {} with blank text", passage.id);
            report.skipped_blank += 1;
            continue;
        }

        passages.push(passage);
    }

    Ok((passages, report))
}

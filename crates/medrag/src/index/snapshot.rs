//! Immutable index snapshots
//!
//! A snapshot pairs one [`Corpus`] with the HNSW graph built over its
//! embeddings. Snapshots are never mutated; a rebuild produces a new one and
//! the [`super::IndexHandle`] swaps it in.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use super::distance::magnitude;
use super::hnsw::{exact_search, HnswGraph, VectorSet};
use crate::config::IndexConfig;
use crate::error::{Error, Result};
use crate::store::{Corpus, DocumentStore};
use crate::types::{Passage, ScoredPassage};

/// On-disk snapshot format version
const SNAPSHOT_VERSION: u32 = 1;

/// Passage embeddings with cached norms
#[derive(Debug)]
struct PassageVectors {
    corpus: Arc<Corpus>,
    magnitudes: Vec<f32>,
}

impl PassageVectors {
    fn new(corpus: Arc<Corpus>) -> Self {
        let magnitudes = corpus
            .passages()
            .iter()
            .map(|p| magnitude(&p.embedding))
            .collect();
        Self { corpus, magnitudes }
    }
}

impl VectorSet for PassageVectors {
    fn len(&self) -> usize {
        self.corpus.len()
    }

    fn vector(&self, idx: usize) -> &[f32] {
        &self.corpus.passages()[idx].embedding
    }

    fn magnitude(&self, idx: usize) -> f32 {
        self.magnitudes[idx]
    }
}

/// Summary of a snapshot for `/api/index`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexStats {
    pub generation: u64,
    pub built_at: DateTime<Utc>,
    pub passages: usize,
    pub documents: usize,
    pub dimension: Option<usize>,
    pub fingerprint: String,
    pub exact: bool,
    pub hnsw_m: usize,
    pub ef_search: usize,
    pub recall_estimate: f32,
    pub graph_levels: u8,
    pub graph_edges: usize,
}

/// Immutable corpus plus nearest-neighbor graph
#[derive(Debug)]
pub struct IndexSnapshot {
    generation: u64,
    built_at: DateTime<Utc>,
    config: IndexConfig,
    vectors: PassageVectors,
    graph: HnswGraph,
}

#[derive(Serialize)]
struct SnapshotFileRef<'a> {
    version: u32,
    fingerprint: &'a str,
    built_at: DateTime<Utc>,
    config: &'a IndexConfig,
    passages: Vec<&'a Passage>,
    graph: &'a HnswGraph,
}

#[derive(Deserialize)]
struct SnapshotFile {
    version: u32,
    fingerprint: String,
    built_at: DateTime<Utc>,
    config: IndexConfig,
    passages: Vec<Passage>,
    graph: HnswGraph,
}

impl IndexSnapshot {
    /// Validate `passages` and build a snapshot over them
    pub fn build(passages: Vec<Passage>, config: &IndexConfig) -> Result<Self> {
        let corpus = DocumentStore::build(passages)?;
        Ok(Self::from_corpus(Arc::new(corpus), config))
    }

    /// Build a snapshot over an already validated corpus
    pub fn from_corpus(corpus: Arc<Corpus>, config: &IndexConfig) -> Self {
        let started = Instant::now();
        let vectors = PassageVectors::new(corpus);
        let graph = HnswGraph::build(
            &vectors,
            config.hnsw_m,
            config.hnsw_ef_construction,
            config.seed,
        );

        tracing::info!(
            "Built HNSW index: {} passages, top level {}, {} links in {:?}",
            graph.len(),
            graph.max_level(),
            graph.edge_count(),
            started.elapsed()
        );

        Self {
            generation: 0,
            built_at: Utc::now(),
            config: config.clone(),
            vectors,
            graph,
        }
    }

    /// Snapshot over an empty corpus
    pub fn empty(config: &IndexConfig) -> Self {
        Self::from_corpus(Arc::new(Corpus::empty()), config)
    }

    pub(crate) fn with_generation(mut self, generation: u64) -> Self {
        self.generation = generation;
        self
    }

    /// Publication counter assigned by the index handle
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn corpus(&self) -> &Arc<Corpus> {
        &self.vectors.corpus
    }

    pub fn config(&self) -> &IndexConfig {
        &self.config
    }

    pub fn fingerprint(&self) -> &str {
        self.vectors.corpus.fingerprint()
    }

    pub fn len(&self) -> usize {
        self.vectors.corpus.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vectors.corpus.is_empty()
    }

    /// Top-`k` passages by cosine similarity, best first
    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<ScoredPassage>> {
        self.search_filtered(query, k, |_| true)
    }

    /// Top-`k` passages among those accepted by `predicate`
    ///
    /// The predicate is evaluated during the graph walk, so the result holds
    /// up to `k` accepted passages rather than `k` candidates minus rejects.
    pub fn search_filtered<F>(&self, query: &[f32], k: usize, predicate: F) -> Result<Vec<ScoredPassage>>
    where
        F: Fn(&Passage) -> bool,
    {
        let corpus = &self.vectors.corpus;
        let Some(expected) = corpus.dimension() else {
            return Err(Error::EmptyIndex);
        };
        if query.len() != expected {
            return Err(Error::DimensionMismatch {
                expected,
                actual: query.len(),
            });
        }
        if k == 0 {
            return Ok(Vec::new());
        }

        let passages = corpus.passages();
        let accept = |idx: usize| predicate(passages[idx].as_ref());

        let hits = if self.config.exact() {
            exact_search(&self.vectors, query, k, accept)
        } else {
            let ef = self.config.ef_for(k);
            self.graph.search(&self.vectors, query, k, ef, accept)
        };

        tracing::debug!(
            "Index search returned {} of k={} (exact: {})",
            hits.len(),
            k,
            self.config.exact()
        );

        Ok(hits
            .into_iter()
            .map(|(idx, score)| ScoredPassage {
                passage: Arc::clone(&passages[idx]),
                score,
            })
            .collect())
    }

    /// Fraction of passages accepted by `predicate`; 0 for an empty snapshot
    pub fn selectivity<F>(&self, predicate: F) -> f64
    where
        F: Fn(&Passage) -> bool,
    {
        let passages = self.vectors.corpus.passages();
        if passages.is_empty() {
            return 0.0;
        }
        let matching = passages.iter().map(Arc::as_ref).filter(|p| predicate(p)).count();
        matching as f64 / passages.len() as f64
    }

    pub fn stats(&self) -> IndexStats {
        let corpus = &self.vectors.corpus;
        IndexStats {
            generation: self.generation,
            built_at: self.built_at,
            passages: corpus.len(),
            documents: corpus.document_count(),
            dimension: corpus.dimension(),
            fingerprint: corpus.fingerprint().to_string(),
            exact: self.config.exact(),
            hnsw_m: self.config.hnsw_m,
            ef_search: self.config.hnsw_ef_search,
            recall_estimate: self.config.recall_estimate,
            graph_levels: self.graph.max_level(),
            graph_edges: self.graph.edge_count(),
        }
    }

    /// Write the snapshot as JSON, replacing `path` atomically
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let corpus = &self.vectors.corpus;
        let file = SnapshotFileRef {
            version: SNAPSHOT_VERSION,
            fingerprint: corpus.fingerprint(),
            built_at: self.built_at,
            config: &self.config,
            passages: corpus.passages().iter().map(|p| p.as_ref()).collect(),
            graph: &self.graph,
        };

        let tmp = path.with_extension("json.tmp");
        {
            let mut writer = BufWriter::new(std::fs::File::create(&tmp)?);
            serde_json::to_writer(&mut writer, &file)?;
            writer.flush()?;
        }
        std::fs::rename(&tmp, path)?;

        tracing::info!(
            "Saved index snapshot ({} passages) to {}",
            corpus.len(),
            path.display()
        );
        Ok(())
    }

    /// Read a snapshot written by [`IndexSnapshot::save`]
    ///
    /// The passages are revalidated and their fingerprint must match the one
    /// recorded at save time.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let reader = BufReader::new(std::fs::File::open(path)?);
        let file: SnapshotFile = serde_json::from_reader(reader)?;

        if file.version != SNAPSHOT_VERSION {
            return Err(Error::Config(format!(
                "{}: unsupported snapshot version {}",
                path.display(),
                file.version
            )));
        }

        let corpus = DocumentStore::build(file.passages)?;
        if corpus.fingerprint() != file.fingerprint {
            return Err(Error::internal(format!(
                "{}: snapshot fingerprint does not match its passages",
                path.display()
            )));
        }
        file.graph
            .validate(corpus.len())
            .map_err(|e| Error::internal(format!("{}: {}", path.display(), e)))?;

        tracing::info!(
            "Loaded index snapshot ({} passages) from {}",
            corpus.len(),
            path.display()
        );

        Ok(Self {
            generation: 0,
            built_at: file.built_at,
            config: file.config,
            vectors: PassageVectors::new(Arc::new(corpus)),
            graph: file.graph,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::SourceMetadata;
    use chrono::TimeZone;
    use proptest::prelude::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn passages(count: usize, dim: usize, seed: u64) -> Vec<Passage> {
        let mut rng = StdRng::seed_from_u64(seed);
        let updated = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        (0..count)
            .map(|i| {
                let embedding: Vec<f32> = (0..dim).map(|_| rng.gen_range(-1.0..1.0)).collect();
                Passage::new(
                    format!("p{}", i),
                    format!("passage {}", i),
                    SourceMetadata::new(format!("doc{}", i % 7), "Doc", updated)
                        .with_document_type(if i % 2 == 0 { "guideline" } else { "textbook" }),
                )
                .with_embedding(embedding)
            })
            .collect()
    }

    #[test]
    fn test_dimension_mismatch() {
        let snapshot = IndexSnapshot::build(passages(20, 256, 1), &IndexConfig::default()).unwrap();
        let err = snapshot.search(&vec![0.1; 128], 5).unwrap_err();
        assert!(matches!(
            err,
            Error::DimensionMismatch {
                expected: 256,
                actual: 128
            }
        ));
    }

    #[test]
    fn test_empty_index() {
        let snapshot = IndexSnapshot::empty(&IndexConfig::default());
        assert!(matches!(snapshot.search(&[1.0, 0.0], 3), Err(Error::EmptyIndex)));
        assert_eq!(snapshot.selectivity(|_| true), 0.0);
    }

    #[test]
    fn test_exact_mode_matches_brute_force() {
        let config = IndexConfig {
            recall_estimate: 1.0,
            ..IndexConfig::default()
        };
        let snapshot = IndexSnapshot::build(passages(50, 8, 2), &config).unwrap();
        let query = snapshot.corpus().passages()[9].embedding.clone();

        let hits = snapshot.search(&query, 3).unwrap();
        assert_eq!(hits[0].passage.id.as_str(), "p9");
        assert!((hits[0].score - 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_search_filtered_and_selectivity() {
        let snapshot = IndexSnapshot::build(passages(60, 8, 3), &IndexConfig::default()).unwrap();
        let is_guideline =
            |p: &Passage| p.source.document_type.as_deref() == Some("guideline");

        assert!((snapshot.selectivity(is_guideline) - 0.5).abs() < 1e-9);

        let query = vec![0.5; 8];
        let hits = snapshot.search_filtered(&query, 5, is_guideline).unwrap();
        assert_eq!(hits.len(), 5);
        assert!(hits.iter().all(|h| is_guideline(h.passage.as_ref())));
    }

    #[test]
    fn test_rebuild_is_idempotent() {
        let config = IndexConfig::default();
        let a = IndexSnapshot::build(passages(300, 16, 4), &config).unwrap();
        let b = IndexSnapshot::build(passages(300, 16, 4), &config).unwrap();
        assert_eq!(a.fingerprint(), b.fingerprint());

        let query = vec![0.25; 16];
        let top_a = a.search(&query, 10).unwrap();
        let top_b = b.search(&query, 10).unwrap();

        assert_eq!(top_a.len(), top_b.len());
        for (x, y) in top_a.iter().zip(&top_b) {
            assert_eq!(x.passage.id, y.passage.id);
            assert!((x.score - y.score).abs() < 1e-6);
        }
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("index.json");
        let snapshot = IndexSnapshot::build(passages(40, 8, 5), &IndexConfig::default()).unwrap();

        snapshot.save(&path).unwrap();
        let loaded = IndexSnapshot::load(&path).unwrap();

        assert_eq!(loaded.fingerprint(), snapshot.fingerprint());
        assert_eq!(loaded.config(), snapshot.config());
        let query = vec![0.3; 8];
        let ids = |s: &IndexSnapshot| -> Vec<String> {
            s.search(&query, 5)
                .unwrap()
                .into_iter()
                .map(|h| h.passage.id.to_string())
                .collect()
        };
        assert_eq!(ids(&loaded), ids(&snapshot));
    }

    #[test]
    fn test_load_rejects_tampered_passages() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("index.json");
        IndexSnapshot::build(passages(5, 4, 6), &IndexConfig::default())
            .unwrap()
            .save(&path)
            .unwrap();

        let raw = std::fs::read_to_string(&path).unwrap();
        std::fs::write(&path, raw.replace("passage 3", "passage three")).unwrap();

        assert!(matches!(IndexSnapshot::load(&path), Err(Error::Internal(_))));
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(32))]

        #[test]
        fn prop_search_scores_non_increasing(
            seed in 0u64..1000,
            k in 1usize..20,
            query in prop::collection::vec(-1.0f32..1.0, 8),
        ) {
            let snapshot = IndexSnapshot::build(passages(80, 8, seed), &IndexConfig::default()).unwrap();
            let hits = snapshot.search(&query, k).unwrap();

            prop_assert!(hits.len() <= k);
            for pair in hits.windows(2) {
                prop_assert!(pair[0].score >= pair[1].score);
            }
        }
    }
}

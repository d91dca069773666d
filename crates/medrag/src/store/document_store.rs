//! Document store: validated, immutable passage sets
//!
//! A [`Corpus`] is built once from passage records and never mutated. Corpus
//! updates build a new `Corpus` and replace the current one wholesale, so
//! index snapshots derived from the old corpus stay consistent.

use parking_lot::RwLock;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::types::{Passage, PassageId};

/// Immutable, validated set of passages sharing one embedding dimension
#[derive(Debug)]
pub struct Corpus {
    passages: Vec<Arc<Passage>>,
    by_id: HashMap<PassageId, usize>,
    dimension: Option<usize>,
    fingerprint: String,
}

impl Corpus {
    /// Corpus with no passages
    pub fn empty() -> Self {
        Self {
            passages: Vec::new(),
            by_id: HashMap::new(),
            dimension: None,
            fingerprint: fingerprint(&[]),
        }
    }

    /// Passages in insertion order
    pub fn passages(&self) -> &[Arc<Passage>] {
        &self.passages
    }

    /// Look up a passage by ID
    pub fn get(&self, id: &str) -> Option<&Arc<Passage>> {
        self.by_id.get(id).map(|&i| &self.passages[i])
    }

    pub fn len(&self) -> usize {
        self.passages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.passages.is_empty()
    }

    /// Embedding dimension; `None` for an empty corpus
    pub fn dimension(&self) -> Option<usize> {
        self.dimension
    }

    /// Content hash over every passage, stable across process restarts
    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }

    /// Number of distinct parent documents
    pub fn document_count(&self) -> usize {
        let mut docs: Vec<&str> = self.passages.iter().map(|p| p.document_id()).collect();
        docs.sort_unstable();
        docs.dedup();
        docs.len()
    }
}

/// Owner of the current corpus
///
/// Single writer (corpus replacement during index build), many readers.
pub struct DocumentStore {
    current: RwLock<Arc<Corpus>>,
}

impl DocumentStore {
    /// Create a store holding an empty corpus
    pub fn new() -> Self {
        Self {
            current: RwLock::new(Arc::new(Corpus::empty())),
        }
    }

    /// Validate passage records and build an immutable corpus
    ///
    /// Every passage must have a non-empty id and text, a finite embedding,
    /// and the same embedding dimension as the others. Ids must be unique.
    pub fn build(passages: Vec<Passage>) -> Result<Corpus> {
        let mut by_id = HashMap::with_capacity(passages.len());
        let mut dimension: Option<usize> = None;

        for (i, passage) in passages.iter().enumerate() {
            let id = passage.id.as_str();
            if id.trim().is_empty() {
                return Err(Error::invalid_passage(
                    format!("#{}", i),
                    "passage id is empty",
                ));
            }
            if passage.text.trim().is_empty() {
                return Err(Error::invalid_passage(id, "passage text is empty"));
            }
            if passage.source.document_id.trim().is_empty() {
                return Err(Error::invalid_passage(id, "document_id is empty"));
            }
            if passage.embedding.is_empty() {
                return Err(Error::invalid_passage(id, "passage has no embedding"));
            }
            if passage.embedding.iter().any(|v| !v.is_finite()) {
                return Err(Error::invalid_passage(id, "embedding contains NaN or infinity"));
            }
            match dimension {
                None => dimension = Some(passage.embedding.len()),
                Some(d) if d != passage.embedding.len() => {
                    return Err(Error::invalid_passage(
                        id,
                        format!(
                            "embedding has dimension {}, corpus uses {}",
                            passage.embedding.len(),
                            d
                        ),
                    ));
                }
                Some(_) => {}
            }
            if by_id.insert(passage.id.clone(), i).is_some() {
                return Err(Error::DuplicatePassage(id.to_string()));
            }
        }

        let passages: Vec<Arc<Passage>> = passages.into_iter().map(Arc::new).collect();
        let fingerprint = fingerprint(&passages);

        Ok(Corpus {
            passages,
            by_id,
            dimension,
            fingerprint,
        })
    }

    /// Current corpus
    pub fn corpus(&self) -> Arc<Corpus> {
        self.current.read().clone()
    }

    /// Replace the corpus wholesale, returning the previous one
    pub fn replace(&self, corpus: Arc<Corpus>) -> Arc<Corpus> {
        let mut current = self.current.write();
        tracing::info!(
            "Document store updated: {} -> {} passages",
            current.len(),
            corpus.len()
        );
        std::mem::replace(&mut *current, corpus)
    }

    /// Look up a passage in the current corpus
    pub fn get(&self, id: &str) -> Option<Arc<Passage>> {
        self.current.read().get(id).cloned()
    }
}

impl Default for DocumentStore {
    fn default() -> Self {
        Self::new()
    }
}

fn fingerprint(passages: &[Arc<Passage>]) -> String {
    let mut hasher = Sha256::new();
    hasher.update((passages.len() as u64).to_le_bytes());

    for passage in passages {
        let source = &passage.source;
        for field in [
            passage.id.as_str(),
            passage.text.as_str(),
            source.document_id.as_str(),
            source.title.as_str(),
            source.section.as_deref().unwrap_or(""),
            source.document_type.as_deref().unwrap_or(""),
        ] {
            hasher.update((field.len() as u64).to_le_bytes());
            hasher.update(field.as_bytes());
        }
        hasher.update(source.page_number.unwrap_or(0).to_le_bytes());
        hasher.update(source.updated_at.timestamp_micros().to_le_bytes());

        // HashMap order is random; hash extras in key order
        let mut extra: Vec<_> = source.extra.iter().collect();
        extra.sort_by(|a, b| a.0.cmp(b.0));
        for (key, value) in extra {
            hasher.update(key.as_bytes());
            hasher.update(value.to_string().as_bytes());
        }

        for v in &passage.embedding {
            hasher.update(v.to_le_bytes());
        }
    }

    hex::encode(hasher.finalize())
}

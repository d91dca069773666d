//! Shared pointer to the live index snapshot
//!
//! Readers clone the current `Arc` and search without holding any lock.
//! Publishing replaces the pointer; queries already running keep the
//! snapshot they started with until they drop it.

use parking_lot::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;

use super::snapshot::IndexSnapshot;
use crate::config::IndexConfig;
use crate::error::{Error, Result};
use crate::store::Corpus;

/// Owner of the live [`IndexSnapshot`]
pub struct IndexHandle {
    current: RwLock<Arc<IndexSnapshot>>,
    /// Serializes rebuilds; searches never take it
    rebuild_lock: Mutex<()>,
    generation: AtomicU64,
}

impl IndexHandle {
    /// Start with `snapshot` as generation 1
    pub fn new(snapshot: IndexSnapshot) -> Self {
        Self {
            current: RwLock::new(Arc::new(snapshot.with_generation(1))),
            rebuild_lock: Mutex::new(()),
            generation: AtomicU64::new(1),
        }
    }

    /// Snapshot to run a query against
    pub fn snapshot(&self) -> Arc<IndexSnapshot> {
        self.current.read().clone()
    }

    /// Generation of the live snapshot
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    /// Make `snapshot` live and return it
    ///
    /// The generation is assigned under the write lock, so the live snapshot
    /// always carries the highest generation handed out.
    pub(crate) fn publish(&self, snapshot: IndexSnapshot) -> Arc<IndexSnapshot> {
        let mut current = self.current.write();
        let generation = self.generation.fetch_add(1, Ordering::AcqRel) + 1;
        let snapshot = Arc::new(snapshot.with_generation(generation));

        let previous = std::mem::replace(&mut *current, Arc::clone(&snapshot));
        drop(current);

        tracing::info!(
            "Published index generation {} ({} passages, replaced generation {})",
            generation,
            snapshot.len(),
            previous.generation()
        );
        snapshot
    }

    /// Build a snapshot over `corpus` off the async runtime, then publish it
    ///
    /// Concurrent calls run one at a time.
    pub async fn rebuild(&self, corpus: Arc<Corpus>, config: IndexConfig) -> Result<Arc<IndexSnapshot>> {
        let _guard = self.rebuild_lock.lock().await;
        tracing::info!("Rebuilding index over {} passages", corpus.len());

        let snapshot = tokio::task::spawn_blocking(move || IndexSnapshot::from_corpus(corpus, &config))
            .await
            .map_err(|e| Error::internal(format!("Index build task failed: {}", e)))?;

        Ok(self.publish(snapshot))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::DocumentStore;
    use crate::types::{Passage, SourceMetadata};
    use chrono::Utc;

    fn corpus(ids: &[&str]) -> Arc<Corpus> {
        let passages = ids
            .iter()
            .enumerate()
            .map(|(i, id)| {
                Passage::new(*id, "text", SourceMetadata::new("doc", "Doc", Utc::now()))
                    .with_embedding(vec![1.0, i as f32])
            })
            .collect();
        Arc::new(DocumentStore::build(passages).unwrap())
    }

    #[tokio::test]
    async fn test_old_snapshot_survives_publish() {
        let config = IndexConfig::default();
        let handle = IndexHandle::new(IndexSnapshot::from_corpus(corpus(&["a"]), &config));

        let in_flight = handle.snapshot();
        assert_eq!(in_flight.generation(), 1);

        let published = handle.rebuild(corpus(&["a", "b", "c"]), config).await.unwrap();
        assert_eq!(published.generation(), 2);
        assert_eq!(handle.generation(), 2);
        assert_eq!(handle.snapshot().len(), 3);

        // The reader that started before the swap still sees its corpus
        assert_eq!(in_flight.len(), 1);
        assert!(in_flight.search(&[1.0, 0.0], 1).is_ok());
    }

    #[test]
    fn test_concurrent_publishes_keep_newest_generation_live() {
        let config = IndexConfig::default();
        let handle = Arc::new(IndexHandle::new(IndexSnapshot::empty(&config)));

        let threads: Vec<_> = (0..8)
            .map(|_| {
                let handle = Arc::clone(&handle);
                let config = config.clone();
                std::thread::spawn(move || {
                    for _ in 0..50 {
                        handle.publish(IndexSnapshot::empty(&config));
                    }
                })
            })
            .collect();
        for thread in threads {
            thread.join().unwrap();
        }

        assert_eq!(handle.generation(), 401);
        assert_eq!(handle.snapshot().generation(), handle.generation());
    }

    #[tokio::test]
    async fn test_concurrent_rebuilds_get_distinct_generations() {
        let config = IndexConfig::default();
        let handle = Arc::new(IndexHandle::new(IndexSnapshot::empty(&config)));

        let tasks: Vec<_> = (0..4)
            .map(|_| {
                let handle = Arc::clone(&handle);
                let config = config.clone();
                tokio::spawn(async move { handle.rebuild(corpus(&["a", "b"]), config).await })
            })
            .collect();

        let mut generations = Vec::new();
        for task in tasks {
            generations.push(task.await.unwrap().unwrap().generation());
        }
        generations.sort_unstable();

        assert_eq!(generations, vec![2, 3, 4, 5]);
        assert_eq!(handle.generation(), 5);
    }
}

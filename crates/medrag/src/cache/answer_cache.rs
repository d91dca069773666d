//! Answer caching with snapshot-based invalidation
//!
//! Caches generated answers per request shape (question, caller-supplied
//! embedding, k, budget and filters) and drops
//! them once the index snapshot they were answered against is replaced.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::collections::HashMap;

use crate::config::CacheConfig;
use crate::context::AssembledContext;
use crate::retrieval::PassageFilter;
use crate::types::Answer;

/// Cached answer with metadata
#[derive(Debug, Clone)]
pub struct CachedAnswer {
    /// Original question
    pub question: String,
    /// Generated answer
    pub answer: Answer,
    /// Context the answer was generated from
    pub context: AssembledContext,
    /// Index generation the answer was produced against
    pub generation: u64,
    /// When this was cached
    pub cached_at: DateTime<Utc>,
    /// Number of cache hits
    pub hit_count: u32,
}

/// Answer cache keyed by request shape
pub struct AnswerCache {
    /// Cache entries keyed by request hash
    cache: RwLock<HashMap<String, CachedAnswer>>,
    /// Maximum cache size
    max_entries: usize,
    /// TTL for cache entries (seconds)
    ttl_seconds: u64,
}

impl AnswerCache {
    /// Create a new answer cache
    pub fn new(max_entries: usize, ttl_seconds: u64) -> Self {
        Self {
            cache: RwLock::new(HashMap::new()),
            max_entries,
            ttl_seconds,
        }
    }

    pub fn from_config(config: &CacheConfig) -> Self {
        Self::new(config.max_entries, config.ttl_seconds)
    }

    /// Cache key for a request
    ///
    /// Questions are compared case-insensitively with whitespace collapsed.
    /// A caller-supplied embedding is part of the key.
    pub fn key(
        question: &str,
        embedding: Option<&[f32]>,
        k: usize,
        budget: usize,
        filters: &PassageFilter,
    ) -> String {
        let normalized = question
            .split_whitespace()
            .collect::<Vec<_>>()
            .join(" ")
            .to_lowercase();

        #[derive(Serialize)]
        struct KeyParts<'a> {
            question: &'a str,
            embedding: Option<&'a [f32]>,
            k: usize,
            budget: usize,
            filters: &'a PassageFilter,
        }

        let parts = KeyParts {
            question: &normalized,
            embedding,
            k,
            budget,
            filters,
        };
        // Serializing plain data into a String cannot fail
        let encoded = serde_json::to_string(&parts).unwrap_or_default();

        let mut hasher = Sha256::new();
        hasher.update(encoded.as_bytes());
        hex::encode(hasher.finalize())
    }

    /// Get a cached answer if valid
    ///
    /// Returns None if:
    /// - Not in cache
    /// - TTL expired
    /// - The answer was produced against another index generation
    pub fn get(&self, key: &str, generation: u64) -> Option<CachedAnswer> {
        let mut cache = self.cache.write();
        let entry = cache.get_mut(key)?;

        let age = Utc::now().signed_duration_since(entry.cached_at);
        if age.num_seconds().max(0) as u64 > self.ttl_seconds {
            tracing::debug!("Cache miss (TTL expired): {}", short(key));
            cache.remove(key);
            return None;
        }

        if entry.generation != generation {
            tracing::debug!(
                "Cache miss (index generation {} replaced by {}): {}",
                entry.generation,
                generation,
                short(key)
            );
            cache.remove(key);
            return None;
        }

        entry.hit_count += 1;
        tracing::debug!("Cache hit: {} (hits: {})", short(key), entry.hit_count);
        Some(entry.clone())
    }

    /// Store an answer in the cache
    pub fn put(
        &self,
        key: String,
        question: &str,
        answer: Answer,
        context: AssembledContext,
        generation: u64,
    ) {
        if self.max_entries == 0 {
            return;
        }

        let entry = CachedAnswer {
            question: question.to_string(),
            answer,
            context,
            generation,
            cached_at: Utc::now(),
            hit_count: 0,
        };

        let mut cache = self.cache.write();
        if cache.len() >= self.max_entries && !cache.contains_key(&key) {
            // Evict the oldest entry
            if let Some(oldest_key) = cache
                .iter()
                .min_by_key(|(_, v)| v.cached_at)
                .map(|(k, _)| k.clone())
            {
                cache.remove(&oldest_key);
            }
        }

        tracing::debug!("Cached answer: {}", short(&key));
        cache.insert(key, entry);
    }

    /// Drop every entry produced against a generation older than `generation`
    pub fn invalidate_before(&self, generation: u64) -> usize {
        let mut cache = self.cache.write();
        let before = cache.len();
        cache.retain(|_, entry| entry.generation >= generation);
        let invalidated = before - cache.len();

        if invalidated > 0 {
            tracing::info!(
                "Invalidated {} cached answers older than index generation {}",
                invalidated,
                generation
            );
        }
        invalidated
    }

    /// Clear the entire cache
    pub fn clear(&self) {
        self.cache.write().clear();
        tracing::info!("Answer cache cleared");
    }

    /// Get cache statistics
    pub fn stats(&self) -> CacheStats {
        let cache = self.cache.read();
        let total_hits: u32 = cache.values().map(|e| e.hit_count).sum();

        CacheStats {
            entries: cache.len(),
            total_hits,
            max_entries: self.max_entries,
            ttl_seconds: self.ttl_seconds,
        }
    }
}

/// Cache statistics
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheStats {
    pub entries: usize,
    pub total_hits: u32,
    pub max_entries: usize,
    pub ttl_seconds: u64,
}

impl Default for AnswerCache {
    fn default() -> Self {
        Self::from_config(&CacheConfig::default())
    }
}

fn short(key: &str) -> &str {
    &key[..key.len().min(12)]
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn answer(text: &str) -> Answer {
        Answer {
            text: text.to_string(),
            citations: vec!["p1".into()],
            latency: Duration::from_millis(120),
            uncertain: false,
            dropped_citations: Vec::new(),
            attempts: 1,
        }
    }

    fn context() -> AssembledContext {
        AssembledContext {
            excerpts: Vec::new(),
            total_tokens: 0,
            budget: 100,
        }
    }

    #[test]
    fn test_key_normalizes_question() {
        let filters = PassageFilter::default();
        assert_eq!(
            AnswerCache::key("What is  the dose?", None, 5, 100, &filters),
            AnswerCache::key("  what is the DOSE? ", None, 5, 100, &filters)
        );
        assert_ne!(
            AnswerCache::key("What is the dose?", None, 5, 100, &filters),
            AnswerCache::key("What is the dose?", None, 6, 100, &filters)
        );
        assert_ne!(
            AnswerCache::key("What is the dose?", None, 5, 100, &filters),
            AnswerCache::key(
                "What is the dose?",
                None,
                5,
                100,
                &PassageFilter::new().document_types(["drug_label"])
            )
        );
    }

    #[test]
    fn test_key_includes_supplied_embedding() {
        let filters = PassageFilter::default();
        let text_only = AnswerCache::key("q", None, 5, 100, &filters);
        let first = AnswerCache::key("q", Some(&[1.0, 0.0, 0.0]), 5, 100, &filters);
        let second = AnswerCache::key("q", Some(&[0.0, 1.0, 0.0]), 5, 100, &filters);

        assert_ne!(text_only, first);
        assert_ne!(first, second);
        assert_eq!(first, AnswerCache::key("Q ", Some(&[1.0, 0.0, 0.0]), 5, 100, &filters));
    }

    #[test]
    fn test_cache_hit() {
        let cache = AnswerCache::new(10, 3600);
        let key = AnswerCache::key("What is the dose?", None, 5, 100, &PassageFilter::default());

        cache.put(key.clone(), "What is the dose?", answer("500 mg [P:p1]"), context(), 1);

        let result = cache.get(&key, 1).unwrap();
        assert_eq!(result.answer.text, "500 mg [P:p1]");
        assert_eq!(result.hit_count, 1);
        assert_eq!(cache.stats().total_hits, 1);
    }

    #[test]
    fn test_new_generation_invalidates() {
        let cache = AnswerCache::new(10, 3600);
        cache.put("a".into(), "q", answer("x"), context(), 1);
        cache.put("b".into(), "q", answer("y"), context(), 2);

        assert!(cache.get("a", 2).is_none());
        assert_eq!(cache.stats().entries, 1);

        assert_eq!(cache.invalidate_before(3), 1);
        assert_eq!(cache.stats().entries, 0);
    }

    #[test]
    fn test_evicts_oldest_at_capacity() {
        let cache = AnswerCache::new(2, 3600);
        cache.put("a".into(), "q", answer("x"), context(), 1);
        std::thread::sleep(Duration::from_millis(5));
        cache.put("b".into(), "q", answer("y"), context(), 1);
        std::thread::sleep(Duration::from_millis(5));
        cache.put("c".into(), "q", answer("z"), context(), 1);

        assert!(cache.get("a", 1).is_none());
        assert!(cache.get("b", 1).is_some());
        assert!(cache.get("c", 1).is_some());
    }

    #[test]
    fn test_zero_ttl_still_serves_fresh_entries() {
        let cache = AnswerCache::new(2, 0);
        cache.put("a".into(), "q", answer("x"), context(), 1);
        assert!(cache.get("a", 1).is_some());
    }
}

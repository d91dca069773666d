//! Top-k retrieval over an index snapshot
//!
//! Filters are either pushed into the graph walk or applied to an
//! over-fetched candidate list, depending on how much of the corpus they
//! match. Results are deduplicated so each parent document contributes at
//! most one passage.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::HashSet;

use super::filter::PassageFilter;
use crate::config::RetrievalConfig;
use crate::error::{Error, Result};
use crate::index::IndexSnapshot;
use crate::types::{Query, ScoredPassage};

/// How filters were applied for a query
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetrievalStrategy {
    /// No metadata filter
    Unfiltered,
    /// Filter evaluated during the graph walk
    Pushdown,
    /// Filter applied to over-fetched candidates
    PostFilter,
}

/// Ranked passages for one query
#[derive(Debug, Clone)]
pub struct RetrievalResult {
    /// At most `k` hits, best first, one per document
    pub hits: Vec<ScoredPassage>,
    /// How the filter was applied
    pub strategy: RetrievalStrategy,
    /// Candidates returned by the index before dedup and score filtering
    pub candidates_considered: usize,
}

/// Ranking order: score descending, then newer document, then passage id
pub fn rank_order(a: &ScoredPassage, b: &ScoredPassage) -> Ordering {
    b.score
        .total_cmp(&a.score)
        .then_with(|| b.passage.source.updated_at.cmp(&a.passage.source.updated_at))
        .then_with(|| a.passage.id.cmp(&b.passage.id))
}

/// Sort by [`rank_order`] and keep the best passage of each document
pub fn dedup_by_document(mut hits: Vec<ScoredPassage>) -> Vec<ScoredPassage> {
    hits.sort_by(rank_order);
    let mut seen = HashSet::new();
    hits.retain(|hit| seen.insert(hit.passage.document_id().to_string()));
    hits
}

/// Retriever over the live index snapshot
#[derive(Debug, Clone)]
pub struct Retriever {
    config: RetrievalConfig,
}

impl Retriever {
    pub fn new(config: RetrievalConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &RetrievalConfig {
        &self.config
    }

    /// Top-`k` passages for `query`, one per document
    pub fn retrieve(&self, snapshot: &IndexSnapshot, query: &Query, k: usize) -> Result<RetrievalResult> {
        if k == 0 || k > self.config.max_k {
            return Err(Error::Config(format!(
                "k must be in 1..={}, got {}",
                self.config.max_k, k
            )));
        }
        if snapshot.is_empty() {
            return Err(Error::EmptyIndex);
        }

        let filter = &query.filters;
        let fetch = k.saturating_mul(self.config.over_fetch_factor).max(k);

        let (candidates, strategy) = if filter.is_unconstrained() {
            (
                widen_until_k_documents(snapshot, k, fetch, |n| snapshot.search(&query.embedding, n))?,
                RetrievalStrategy::Unfiltered,
            )
        } else {
            let selectivity = snapshot.selectivity(|p| filter.matches(p));
            tracing::debug!(
                "Filter selectivity {:.3} (pushdown below {:.3})",
                selectivity,
                self.config.filter_pushdown_threshold
            );

            if selectivity < self.config.filter_pushdown_threshold {
                (
                    self.pushdown(snapshot, query, k, fetch)?,
                    RetrievalStrategy::Pushdown,
                )
            } else {
                let mut candidates = snapshot.search(&query.embedding, fetch)?;
                candidates.retain(|hit| filter.matches(&hit.passage));

                if distinct_documents(&candidates) < k && fetch < snapshot.len() {
                    // Over-fetch was not enough; walk the graph with the filter instead
                    tracing::debug!(
                        "Post-filter kept {} candidates for k={}, retrying with pushdown",
                        candidates.len(),
                        k
                    );
                    (
                        self.pushdown(snapshot, query, k, fetch)?,
                        RetrievalStrategy::Pushdown,
                    )
                } else {
                    (candidates, RetrievalStrategy::PostFilter)
                }
            }
        };

        let candidates_considered = candidates.len();
        let scored: Vec<ScoredPassage> = candidates
            .into_iter()
            .filter(|hit| filter.accepts_score(hit.score))
            .collect();

        let mut hits = dedup_by_document(scored);
        hits.truncate(k);

        if hits.is_empty() {
            tracing::warn!(
                "No passages survived retrieval ({} candidates, strategy {:?})",
                candidates_considered,
                strategy
            );
            return Err(Error::NoResults);
        }

        tracing::debug!(
            "Retrieved {} passages from {} candidates ({:?})",
            hits.len(),
            candidates_considered,
            strategy
        );

        Ok(RetrievalResult {
            hits,
            strategy,
            candidates_considered,
        })
    }

    fn pushdown(&self, snapshot: &IndexSnapshot, query: &Query, k: usize, fetch: usize) -> Result<Vec<ScoredPassage>> {
        let filter: &PassageFilter = &query.filters;
        widen_until_k_documents(snapshot, k, fetch, |n| {
            snapshot.search_filtered(&query.embedding, n, |p| filter.matches(p))
        })
    }
}

/// Run `search` with a doubling candidate count until the candidates span
/// `k` documents or the whole snapshot has been fetched
fn widen_until_k_documents<F>(
    snapshot: &IndexSnapshot,
    k: usize,
    mut fetch: usize,
    search: F,
) -> Result<Vec<ScoredPassage>>
where
    F: Fn(usize) -> Result<Vec<ScoredPassage>>,
{
    loop {
        let candidates = search(fetch)?;
        if fetch >= snapshot.len() || distinct_documents(&candidates) >= k {
            return Ok(candidates);
        }

        let wider = fetch.saturating_mul(2).min(snapshot.len());
        tracing::debug!(
            "{} candidates cover fewer than {} documents, widening fetch to {}",
            candidates.len(),
            k,
            wider
        );
        fetch = wider;
    }
}

fn distinct_documents(hits: &[ScoredPassage]) -> usize {
    hits.iter()
        .map(|hit| hit.passage.document_id())
        .collect::<HashSet<_>>()
        .len()
}

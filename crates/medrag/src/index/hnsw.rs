//! HNSW (Hierarchical Navigable Small World) graph
//!
//! Approximate nearest neighbor search over cosine similarity. The graph
//! stores only node ids and links; vectors are borrowed from a [`VectorSet`]
//! so the passage embeddings are never duplicated.
//!
//! # Algorithm Overview
//! - Higher layers have fewer nodes (exponential decay)
//! - Search starts from the top layer, greedily descending
//! - Layer 0 is searched with a beam of width `ef`
//!
//! Level assignment draws from a seeded [`StdRng`], so building twice from
//! the same vectors in the same order yields the same graph.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::cmp::{Ordering, Reverse};
use std::collections::{BinaryHeap, HashSet};

use super::distance::{cosine_similarity, magnitude};

/// Cap on graph height
const MAX_LEVEL: u8 = 16;

/// Indexed vectors the graph walks over
pub trait VectorSet {
    /// Number of vectors
    fn len(&self) -> usize;

    /// Vector at position `idx`
    fn vector(&self, idx: usize) -> &[f32];

    /// Cached norm of the vector at `idx`
    fn magnitude(&self, idx: usize) -> f32;

    /// Cosine similarity between the vector at `idx` and `query`
    fn similarity(&self, idx: usize, query: &[f32], query_mag: f32) -> f32 {
        cosine_similarity(self.vector(idx), query, Some(self.magnitude(idx)), Some(query_mag))
    }
}

/// Heap entry ordered by score, ties broken toward the lower id
#[derive(Debug, Clone, Copy)]
struct ScoredItem {
    score: f32,
    item: u32,
}

impl PartialEq for ScoredItem {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for ScoredItem {}

impl PartialOrd for ScoredItem {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ScoredItem {
    fn cmp(&self, other: &Self) -> Ordering {
        self.score
            .total_cmp(&other.score)
            .then_with(|| other.item.cmp(&self.item))
    }
}

/// HNSW link structure
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HnswGraph {
    m: usize,
    m_max0: usize,
    ef_construction: usize,
    entry_point: Option<u32>,
    max_level: u8,
    /// `links[node][level]` lists the neighbors of `node` on `level`
    links: Vec<Vec<Vec<u32>>>,
}

impl HnswGraph {
    /// Build a graph over every vector in `vectors`, inserted in order
    ///
    /// # Arguments
    /// * `m` - Max neighbors per node per layer (twice that on layer 0)
    /// * `ef_construction` - Search beam width during construction
    /// * `seed` - Seed for level assignment
    pub fn build<V: VectorSet + ?Sized>(
        vectors: &V,
        m: usize,
        ef_construction: usize,
        seed: u64,
    ) -> Self {
        let mut graph = Self {
            m,
            m_max0: m * 2,
            ef_construction: ef_construction.max(1),
            entry_point: None,
            max_level: 0,
            links: Vec::with_capacity(vectors.len()),
        };

        let level_mult = 1.0 / (m.max(2) as f64).ln();
        let mut rng = StdRng::seed_from_u64(seed);

        for idx in 0..vectors.len() {
            let level = select_level(&mut rng, level_mult);
            graph.insert(vectors, idx as u32, level);
        }

        graph
    }

    /// Number of nodes
    pub fn len(&self) -> usize {
        self.links.len()
    }

    pub fn is_empty(&self) -> bool {
        self.links.is_empty()
    }

    /// Highest populated layer
    pub fn max_level(&self) -> u8 {
        self.max_level
    }

    /// Total directed links across all layers
    pub fn edge_count(&self) -> usize {
        self.links
            .iter()
            .flat_map(|levels| levels.iter())
            .map(Vec::len)
            .sum()
    }

    /// Check that the graph fits a vector set of `count` vectors
    pub fn validate(&self, count: usize) -> Result<(), String> {
        if self.links.len() != count {
            return Err(format!(
                "graph has {} nodes, corpus has {} passages",
                self.links.len(),
                count
            ));
        }
        if let Some(ep) = self.entry_point {
            if ep as usize >= count {
                return Err(format!("entry point {} out of range", ep));
            }
        } else if count > 0 {
            return Err("graph has no entry point".to_string());
        }
        for (node, levels) in self.links.iter().enumerate() {
            for neighbor in levels.iter().flatten() {
                if *neighbor as usize >= count {
                    return Err(format!("node {} links to missing node {}", node, neighbor));
                }
            }
        }
        Ok(())
    }

    /// Approximate top-`k` search with beam width `ef`
    ///
    /// Nodes rejected by `accept` are still walked through, so a filter never
    /// disconnects the graph, but only accepted nodes enter the result set.
    /// Returns `(position, similarity)` pairs, best first.
    pub fn search<V, F>(
        &self,
        vectors: &V,
        query: &[f32],
        k: usize,
        ef: usize,
        accept: F,
    ) -> Vec<(usize, f32)>
    where
        V: VectorSet + ?Sized,
        F: Fn(usize) -> bool,
    {
        let Some(mut ep) = self.entry_point else {
            return Vec::new();
        };
        if k == 0 {
            return Vec::new();
        }

        let query_mag = magnitude(query);

        // Phase 1: greedy descent to layer 1
        for level in (1..=self.max_level).rev() {
            ep = self.greedy_closest(vectors, ep, query, query_mag, level);
        }

        // Phase 2: beam search on layer 0
        self.search_layer(vectors, ep, query, query_mag, ef.max(k), 0, &accept)
            .into_iter()
            .take(k)
            .map(|s| (s.item as usize, s.score))
            .collect()
    }

    fn insert<V: VectorSet + ?Sized>(&mut self, vectors: &V, id: u32, level: u8) {
        self.links.push(vec![Vec::new(); level as usize + 1]);

        let Some(mut ep) = self.entry_point else {
            self.entry_point = Some(id);
            self.max_level = level;
            return;
        };

        let query = vectors.vector(id as usize);
        let query_mag = vectors.magnitude(id as usize);

        for lc in ((level + 1)..=self.max_level).rev() {
            ep = self.greedy_closest(vectors, ep, query, query_mag, lc);
        }

        for lc in (0..=level.min(self.max_level)).rev() {
            let found = self.search_layer(
                vectors,
                ep,
                query,
                query_mag,
                self.ef_construction,
                lc,
                &|_| true,
            );

            let limit = if lc == 0 { self.m_max0 } else { self.m };
            let selected: Vec<u32> = found
                .iter()
                .filter(|s| s.item != id)
                .take(limit)
                .map(|s| s.item)
                .collect();

            for &neighbor in &selected {
                self.connect(neighbor, id, lc);
                self.connect(id, neighbor, lc);
            }
            for &neighbor in &selected {
                self.prune(vectors, neighbor, lc, limit);
            }

            if let Some(best) = found.first() {
                ep = best.item;
            }
        }

        if level > self.max_level {
            self.entry_point = Some(id);
            self.max_level = level;
        }
    }

    fn neighbors(&self, node: u32, level: u8) -> &[u32] {
        self.links[node as usize]
            .get(level as usize)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Follow the best neighbor on `level` until no neighbor improves
    fn greedy_closest<V: VectorSet + ?Sized>(
        &self,
        vectors: &V,
        entry: u32,
        query: &[f32],
        query_mag: f32,
        level: u8,
    ) -> u32 {
        let mut current = entry;
        let mut current_sim = vectors.similarity(entry as usize, query, query_mag);

        loop {
            let mut changed = false;
            for &neighbor in self.neighbors(current, level) {
                let sim = vectors.similarity(neighbor as usize, query, query_mag);
                if sim > current_sim {
                    current = neighbor;
                    current_sim = sim;
                    changed = true;
                }
            }
            if !changed {
                return current;
            }
        }
    }

    /// Beam search on one layer; returns accepted nodes sorted best first
    #[allow(clippy::too_many_arguments)]
    fn search_layer<V, F>(
        &self,
        vectors: &V,
        entry: u32,
        query: &[f32],
        query_mag: f32,
        ef: usize,
        level: u8,
        accept: &F,
    ) -> Vec<ScoredItem>
    where
        V: VectorSet + ?Sized,
        F: Fn(usize) -> bool,
    {
        let mut visited: HashSet<u32> = HashSet::new();
        // Max-heap: explore the most similar candidate first
        let mut candidates: BinaryHeap<ScoredItem> = BinaryHeap::new();
        // Min-heap: the worst kept result sits on top
        let mut results: BinaryHeap<Reverse<ScoredItem>> = BinaryHeap::new();

        let first = ScoredItem {
            score: vectors.similarity(entry as usize, query, query_mag),
            item: entry,
        };
        visited.insert(entry);
        candidates.push(first);
        if accept(entry as usize) {
            results.push(Reverse(first));
        }

        while let Some(current) = candidates.pop() {
            if results.len() >= ef {
                if let Some(Reverse(worst)) = results.peek() {
                    if current.score < worst.score {
                        break;
                    }
                }
            }

            for &neighbor in self.neighbors(current.item, level) {
                if !visited.insert(neighbor) {
                    continue;
                }

                let scored = ScoredItem {
                    score: vectors.similarity(neighbor as usize, query, query_mag),
                    item: neighbor,
                };
                let worst = results
                    .peek()
                    .map(|r| r.0.score)
                    .unwrap_or(f32::NEG_INFINITY);

                if results.len() < ef || scored.score > worst {
                    candidates.push(scored);
                    if accept(neighbor as usize) {
                        results.push(Reverse(scored));
                        if results.len() > ef {
                            results.pop();
                        }
                    }
                }
            }
        }

        let mut found: Vec<ScoredItem> = results.into_iter().map(|r| r.0).collect();
        found.sort_by(|a, b| b.cmp(a));
        found
    }

    fn connect(&mut self, from: u32, to: u32, level: u8) {
        let levels = &mut self.links[from as usize];
        while levels.len() <= level as usize {
            levels.push(Vec::new());
        }
        let neighbors = &mut levels[level as usize];
        if !neighbors.contains(&to) {
            neighbors.push(to);
        }
    }

    /// Keep only the `limit` most similar neighbors of `node` on `level`
    fn prune<V: VectorSet + ?Sized>(&mut self, vectors: &V, node: u32, level: u8, limit: usize) {
        let current = self.neighbors(node, level);
        if current.len() <= limit {
            return;
        }

        let base = vectors.vector(node as usize);
        let base_mag = vectors.magnitude(node as usize);
        let mut scored: Vec<ScoredItem> = current
            .iter()
            .map(|&n| ScoredItem {
                score: vectors.similarity(n as usize, base, base_mag),
                item: n,
            })
            .collect();
        scored.sort_by(|a, b| b.cmp(a));

        self.links[node as usize][level as usize] =
            scored.into_iter().take(limit).map(|s| s.item).collect();
    }
}

/// Brute-force top-`k` over every accepted vector, best first
pub fn exact_search<V, F>(vectors: &V, query: &[f32], k: usize, accept: F) -> Vec<(usize, f32)>
where
    V: VectorSet + ?Sized,
    F: Fn(usize) -> bool,
{
    let query_mag = magnitude(query);
    let mut scored: Vec<ScoredItem> = (0..vectors.len())
        .filter(|&idx| accept(idx))
        .map(|idx| ScoredItem {
            score: vectors.similarity(idx, query, query_mag),
            item: idx as u32,
        })
        .collect();
    scored.sort_by(|a, b| b.cmp(a));
    scored
        .into_iter()
        .take(k)
        .map(|s| (s.item as usize, s.score))
        .collect()
}

/// Draw a level from the exponential distribution used by HNSW
fn select_level(rng: &mut StdRng, level_mult: f64) -> u8 {
    let r: f64 = rng.gen_range(f64::MIN_POSITIVE..1.0);
    let level = (-r.ln() * level_mult).floor();
    level.min(MAX_LEVEL as f64) as u8
}

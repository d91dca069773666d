//! Context assembly under a token budget
//!
//! Walks retrieved passages in relevance order and packs whole passages
//! while they fit. A passage that does not fit is skipped and the walk moves
//! on to cheaper, less relevant ones; with truncation enabled the first
//! misfit is cut down to the remaining budget instead and packing stops.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use unicode_segmentation::UnicodeSegmentation;

use crate::config::ContextConfig;
use crate::error::{Error, Result};
use crate::types::{PassageId, ScoredPassage};

/// Token cost model for passage text
pub trait TokenEstimator: Send + Sync {
    /// Estimated tokens for `text`; at least 1
    fn estimate(&self, text: &str) -> usize;

    /// Longest prefix of `text` costing at most `max_tokens`
    fn truncate_to<'a>(&self, text: &'a str, max_tokens: usize) -> &'a str;
}

/// Fixed characters-per-token estimate
#[derive(Debug, Clone, Copy)]
pub struct CharRatioEstimator {
    chars_per_token: usize,
}

impl CharRatioEstimator {
    pub fn new(chars_per_token: usize) -> Self {
        Self {
            chars_per_token: chars_per_token.max(1),
        }
    }
}

impl Default for CharRatioEstimator {
    fn default() -> Self {
        Self::new(4)
    }
}

impl TokenEstimator for CharRatioEstimator {
    fn estimate(&self, text: &str) -> usize {
        text.chars().count().div_ceil(self.chars_per_token).max(1)
    }

    /// Cuts at the last word boundary inside the allowance, or mid-word when
    /// the first word alone is too long
    fn truncate_to<'a>(&self, text: &'a str, max_tokens: usize) -> &'a str {
        let max_chars = max_tokens.saturating_mul(self.chars_per_token);
        let Some((cut, _)) = text.char_indices().nth(max_chars) else {
            return text;
        };
        if max_chars == 0 {
            return "";
        }

        let word_cut = text
            .split_word_bound_indices()
            .map(|(idx, _)| idx)
            .take_while(|&idx| idx <= cut)
            .filter(|&idx| idx > 0)
            .last();

        let end = word_cut.unwrap_or(cut);
        let prefix = text[..end].trim_end();
        if prefix.is_empty() {
            &text[..cut]
        } else {
            prefix
        }
    }
}

/// One passage placed in the prompt context
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Excerpt {
    pub passage_id: PassageId,
    pub document_id: String,
    /// Human-readable source label
    pub label: String,
    pub text: String,
    pub score: f32,
    pub token_cost: usize,
    /// Whether `text` is a prefix of the passage
    pub truncated: bool,
}

/// Excerpts packed under a token budget, most relevant first
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssembledContext {
    pub excerpts: Vec<Excerpt>,
    pub total_tokens: usize,
    pub budget: usize,
}

impl AssembledContext {
    pub fn len(&self) -> usize {
        self.excerpts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.excerpts.is_empty()
    }

    /// Whether a passage made it into the context
    pub fn contains(&self, id: &str) -> bool {
        self.excerpts.iter().any(|e| e.passage_id.as_str() == id)
    }

    pub fn passage_ids(&self) -> impl Iterator<Item = &PassageId> {
        self.excerpts.iter().map(|e| &e.passage_id)
    }
}

/// Packs retrieved passages into a bounded context
#[derive(Clone)]
pub struct ContextAssembler {
    estimator: Arc<dyn TokenEstimator>,
    allow_truncation: bool,
}

impl ContextAssembler {
    /// Assembler with the character-ratio estimator from config
    pub fn new(config: &ContextConfig) -> Self {
        Self {
            estimator: Arc::new(CharRatioEstimator::new(config.chars_per_token)),
            allow_truncation: config.allow_truncation,
        }
    }

    pub fn with_estimator(estimator: Arc<dyn TokenEstimator>, allow_truncation: bool) -> Self {
        Self {
            estimator,
            allow_truncation,
        }
    }

    pub fn estimator(&self) -> &dyn TokenEstimator {
        self.estimator.as_ref()
    }

    /// Pack `hits` (best first) into at most `budget` tokens
    pub fn assemble(&self, hits: &[ScoredPassage], budget: usize) -> Result<AssembledContext> {
        if hits.is_empty() {
            return Err(Error::NoResults);
        }

        let costs: Vec<usize> = hits
            .iter()
            .map(|hit| self.estimator.estimate(&hit.passage.text))
            .collect();

        // cheapest[i] = cheapest passage from i onward
        let mut cheapest = vec![usize::MAX; costs.len() + 1];
        for i in (0..costs.len()).rev() {
            cheapest[i] = cheapest[i + 1].min(costs[i]);
        }
        let minimum = cheapest[0];

        let mut excerpts = Vec::new();
        let mut seen_documents = HashSet::new();
        let mut remaining = budget;

        for (i, hit) in hits.iter().enumerate() {
            let passage = &hit.passage;
            if seen_documents.contains(passage.document_id()) {
                continue;
            }

            let cost = costs[i];
            if cost <= remaining {
                excerpts.push(excerpt(hit, passage.text.clone(), cost, false));
                seen_documents.insert(passage.document_id().to_string());
                remaining -= cost;
                continue;
            }

            if self.allow_truncation && remaining > 0 {
                let text = self.estimator.truncate_to(&passage.text, remaining);
                if !text.is_empty() {
                    let cost = self.estimator.estimate(text).min(remaining);
                    excerpts.push(excerpt(hit, text.to_string(), cost, true));
                    remaining -= cost;
                }
                break;
            }

            if remaining < cheapest[i + 1] {
                break;
            }
        }

        if excerpts.is_empty() {
            tracing::warn!(
                "Context budget {} cannot hold any passage (cheapest costs {})",
                budget,
                minimum
            );
            return Err(Error::BudgetTooSmall { budget, minimum });
        }

        let total_tokens = budget - remaining;
        tracing::debug!(
            "Assembled {} of {} passages into {}/{} tokens",
            excerpts.len(),
            hits.len(),
            total_tokens,
            budget
        );

        Ok(AssembledContext {
            excerpts,
            total_tokens,
            budget,
        })
    }
}

fn excerpt(hit: &ScoredPassage, text: String, token_cost: usize, truncated: bool) -> Excerpt {
    let passage = &hit.passage;
    Excerpt {
        passage_id: passage.id.clone(),
        document_id: passage.document_id().to_string(),
        label: passage.source.format_citation(),
        text,
        score: hit.score,
        token_cost,
        truncated,
    }
}

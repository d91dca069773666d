//! Citation marker validation
//!
//! The model is asked to cite passages as `[P:<passage_id>]`. Markers naming
//! a passage that was in the context are kept; anything else is a
//! hallucinated citation and is removed from the answer text.

use once_cell::sync::Lazy;
use regex::{Captures, Regex};

use crate::context::AssembledContext;
use crate::types::PassageId;

static MARKER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\s?\[P:\s*([^\]\s]+)\s*\]").expect("Invalid regex"));

/// Answer text after marker validation
#[derive(Debug, Clone, PartialEq)]
pub struct ValidatedCitations {
    /// Answer with hallucinated markers removed
    pub text: String,
    /// Context passages cited, in order of first appearance
    pub citations: Vec<PassageId>,
    /// Ids named by markers that were not in the context
    pub dropped: Vec<String>,
}

/// Keep markers that cite context passages and strip the rest
pub fn validate_citations(answer: &str, context: &AssembledContext) -> ValidatedCitations {
    let mut citations: Vec<PassageId> = Vec::new();
    let mut dropped: Vec<String> = Vec::new();

    let text = MARKER.replace_all(answer, |caps: &Captures| {
        let id = &caps[1];
        if context.contains(id) {
            if !citations.iter().any(|c| c.as_str() == id) {
                citations.push(PassageId::from(id));
            }
            caps[0].to_string()
        } else {
            if !dropped.iter().any(|d| d == id) {
                dropped.push(id.to_string());
            }
            String::new()
        }
    });

    if !dropped.is_empty() {
        tracing::warn!(
            "Stripped {} hallucinated citation(s) from answer: {:?}",
            dropped.len(),
            dropped
        );
    }

    ValidatedCitations {
        text: text.trim().to_string(),
        citations,
        dropped,
    }
}

/// Truncate snippet to a maximum length while preserving word boundaries
pub fn truncate_snippet(snippet: &str, max_len: usize) -> String {
    if snippet.len() <= max_len {
        return snippet.to_string();
    }

    let mut end = max_len;
    while end > 0 && !snippet.is_char_boundary(end) {
        end -= 1;
    }

    // Try to end at a word boundary
    if let Some(pos) = snippet[..end].rfind(' ') {
        return format!("{}...", &snippet[..pos]);
    }

    format!("{}...", &snippet[..end])
}

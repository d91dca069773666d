//! Metadata filters for retrieval
//!
//! Every populated field must hold for a passage to match; list fields match
//! when the passage's value is any of the listed ones.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::types::Passage;

/// Hard constraints on which passages a query may retrieve
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct PassageFilter {
    /// Allowed parent documents
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub document_ids: Vec<String>,
    /// Allowed document types (guideline, drug_label, ...)
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub document_types: Vec<String>,
    /// Allowed section titles
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub sections: Vec<String>,
    /// Only documents updated strictly after this instant
    #[serde(skip_serializing_if = "Option::is_none")]
    pub updated_after: Option<DateTime<Utc>>,
    /// Drop hits scoring below this similarity
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min_score: Option<f32>,
    /// Exact matches on source-specific metadata
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub extra: BTreeMap<String, serde_json::Value>,
}

impl PassageFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn document_ids(mut self, ids: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.document_ids = ids.into_iter().map(Into::into).collect();
        self
    }

    pub fn document_types(mut self, types: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.document_types = types.into_iter().map(Into::into).collect();
        self
    }

    pub fn sections(mut self, sections: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.sections = sections.into_iter().map(Into::into).collect();
        self
    }

    pub fn updated_after(mut self, instant: DateTime<Utc>) -> Self {
        self.updated_after = Some(instant);
        self
    }

    pub fn min_score(mut self, score: f32) -> Self {
        self.min_score = Some(score);
        self
    }

    pub fn extra(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.extra.insert(key.into(), value);
        self
    }

    /// True when the filter places no metadata constraint
    ///
    /// `min_score` is not metadata; it is applied to scores after search.
    pub fn is_unconstrained(&self) -> bool {
        self.document_ids.is_empty()
            && self.document_types.is_empty()
            && self.sections.is_empty()
            && self.updated_after.is_none()
            && self.extra.is_empty()
    }

    /// True when the filter constrains nothing at all
    pub fn is_empty(&self) -> bool {
        self.is_unconstrained() && self.min_score.is_none()
    }

    /// Whether a passage's metadata satisfies the filter
    pub fn matches(&self, passage: &Passage) -> bool {
        let source = &passage.source;

        if !self.document_ids.is_empty() && !self.document_ids.contains(&source.document_id) {
            return false;
        }

        if !self.document_types.is_empty() {
            match &source.document_type {
                Some(t) if self.document_types.contains(t) => {}
                _ => return false,
            }
        }

        if !self.sections.is_empty() {
            match &source.section {
                Some(s) if self.sections.contains(s) => {}
                _ => return false,
            }
        }

        if let Some(after) = self.updated_after {
            if source.updated_at <= after {
                return false;
            }
        }

        self.extra
            .iter()
            .all(|(key, value)| source.extra.get(key) == Some(value))
    }

    /// Whether a similarity score clears `min_score`
    pub fn accepts_score(&self, score: f32) -> bool {
        self.min_score.map_or(true, |min| score >= min)
    }
}

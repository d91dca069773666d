//! Passage types with source tracking for citations

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::borrow::Borrow;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Stable passage identifier, unique within a corpus
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PassageId(String);

impl PassageId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PassageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PassageId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for PassageId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl Borrow<str> for PassageId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

/// Where a passage came from
///
/// Fixed fields cover what retrieval and citation need; anything
/// source-specific (journal, guideline body, ICD codes, ...) goes in `extra`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceMetadata {
    /// Parent document ID
    pub document_id: String,
    /// Document title
    pub title: String,
    /// Section or heading title
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub section: Option<String>,
    /// Page number (1-indexed)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page_number: Option<u32>,
    /// Document type (guideline, textbook, drug_label, ...)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub document_type: Option<String>,
    /// Last update of the parent document
    pub updated_at: DateTime<Utc>,
    /// Source-specific fields
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub extra: HashMap<String, serde_json::Value>,
}

impl SourceMetadata {
    /// Metadata with only the required fields set
    pub fn new(
        document_id: impl Into<String>,
        title: impl Into<String>,
        updated_at: DateTime<Utc>,
    ) -> Self {
        Self {
            document_id: document_id.into(),
            title: title.into(),
            section: None,
            page_number: None,
            document_type: None,
            updated_at,
            extra: HashMap::new(),
        }
    }

    pub fn with_section(mut self, section: impl Into<String>) -> Self {
        self.section = Some(section.into());
        self
    }

    pub fn with_page(mut self, page: u32) -> Self {
        self.page_number = Some(page);
        self
    }

    pub fn with_document_type(mut self, document_type: impl Into<String>) -> Self {
        self.document_type = Some(document_type.into());
        self
    }

    pub fn with_extra(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.extra.insert(key.into(), value);
        self
    }

    /// Format source for display
    pub fn format_citation(&self) -> String {
        let mut parts = vec![self.title.clone()];

        if let Some(page) = self.page_number {
            parts.push(format!("Page {}", page));
        }

        if let Some(section) = &self.section {
            parts.push(format!("Section: {}", section));
        }

        parts.join(", ")
    }
}

/// Atomic unit of indexed text
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Passage {
    /// Stable passage ID
    pub id: PassageId,
    /// Normalized passage text
    pub text: String,
    /// Source information for citations
    pub source: SourceMetadata,
    /// Embedding vector; empty until embedded
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub embedding: Vec<f32>,
}

impl Passage {
    /// Create a passage without an embedding
    pub fn new(id: impl Into<PassageId>, text: impl Into<String>, source: SourceMetadata) -> Self {
        Self {
            id: id.into(),
            text: text.into(),
            source,
            embedding: Vec::new(),
        }
    }

    pub fn with_embedding(mut self, embedding: Vec<f32>) -> Self {
        self.embedding = embedding;
        self
    }

    pub fn document_id(&self) -> &str {
        &self.source.document_id
    }

    pub fn is_embedded(&self) -> bool {
        !self.embedding.is_empty()
    }
}

/// A passage paired with its similarity to a query
#[derive(Debug, Clone)]
pub struct ScoredPassage {
    /// The retrieved passage
    pub passage: Arc<Passage>,
    /// Cosine similarity, higher is better
    pub score: f32,
}

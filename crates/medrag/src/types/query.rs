//! Query request types

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::retrieval::PassageFilter;

/// Query request accepted by `POST /api/query`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryRequest {
    /// The medical question
    pub text: String,

    /// Number of passages to retrieve (default from config)
    #[serde(default)]
    pub k: Option<usize>,

    /// Metadata filters
    #[serde(default)]
    pub filters: Option<PassageFilter>,

    /// Context token budget (default from config)
    #[serde(default)]
    pub budget: Option<usize>,

    /// Fail instead of returning evidence only when generation is unavailable
    #[serde(default)]
    pub require_generation: bool,

    /// Precomputed query embedding; skips the embedding provider
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,
}

impl QueryRequest {
    /// Create a new query
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Default::default()
        }
    }

    /// Set the number of passages to retrieve
    pub fn with_k(mut self, k: usize) -> Self {
        self.k = Some(k);
        self
    }

    /// Set the context budget
    pub fn with_budget(mut self, budget: usize) -> Self {
        self.budget = Some(budget);
        self
    }

    /// Restrict retrieval with metadata filters
    pub fn with_filters(mut self, filters: PassageFilter) -> Self {
        self.filters = Some(filters);
        self
    }

    /// Supply the query embedding directly
    pub fn with_embedding(mut self, embedding: Vec<f32>) -> Self {
        self.embedding = Some(embedding);
        self
    }

    /// Require synthesized text
    pub fn requiring_generation(mut self) -> Self {
        self.require_generation = true;
        self
    }

    /// Check request fields against the configured limits
    pub fn validate(&self, max_k: usize) -> Result<()> {
        if self.text.trim().is_empty() {
            return Err(Error::Config("query text must not be empty".into()));
        }
        if let Some(k) = self.k {
            if k == 0 || k > max_k {
                return Err(Error::Config(format!("k must be in 1..={}", max_k)));
            }
        }
        if self.budget == Some(0) {
            return Err(Error::Config("budget must be non-zero".into()));
        }
        Ok(())
    }
}

/// Per-request query handed to the retriever
#[derive(Debug, Clone)]
pub struct Query {
    /// Raw question text
    pub text: String,
    /// Query embedding
    pub embedding: Vec<f32>,
    /// Metadata filters
    pub filters: PassageFilter,
}

impl Query {
    pub fn new(text: impl Into<String>, embedding: Vec<f32>) -> Self {
        Self {
            text: text.into(),
            embedding,
            filters: PassageFilter::default(),
        }
    }

    pub fn with_filters(mut self, filters: PassageFilter) -> Self {
        self.filters = filters;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_defaults_from_json() {
        let request: QueryRequest =
            serde_json::from_str(r#"{"text":"What is the first-line therapy for hypertension?"}"#)
                .unwrap();
        assert_eq!(request.k, None);
        assert!(!request.require_generation);
        request.validate(50).unwrap();
    }

    #[test]
    fn test_validate_rejects_bad_k() {
        assert!(QueryRequest::new("dose?").with_k(0).validate(50).is_err());
        assert!(QueryRequest::new("dose?").with_k(51).validate(50).is_err());
        assert!(QueryRequest::new("   ").validate(50).is_err());
        assert!(QueryRequest::new("dose?").with_budget(0).validate(50).is_err());
    }
}

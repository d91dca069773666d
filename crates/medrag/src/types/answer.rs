//! Generated answer with validated citations

use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::passage::PassageId;

/// Answer synthesized by the language model from the assembled context
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Answer {
    /// Generated text with hallucinated citation markers removed
    pub text: String,
    /// Cited passages in order of first appearance; every id is in the context
    pub citations: Vec<PassageId>,
    /// Time spent in generation, retries included
    #[serde(with = "duration_ms")]
    pub latency: Duration,
    /// Set when the answer cites no passage from the context
    pub uncertain: bool,
    /// Citation markers that named passages outside the context
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dropped_citations: Vec<String>,
    /// Model calls made, retries included
    pub attempts: u32,
}

mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

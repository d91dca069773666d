//! Response types for medical queries

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::passage::PassageId;
use crate::context::Excerpt;
use crate::engine::{QueryOutcome, RequestState};
use crate::generation::truncate_snippet;

/// Longest citation snippet returned to clients, in bytes
const SNIPPET_LEN: usize = 300;

/// Citation of a context passage
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Citation {
    /// Cited passage
    pub passage_id: PassageId,
    /// Source document
    pub document_id: String,
    /// Human-readable source, e.g. "JNC 8, Section Recommendations, Page 4"
    pub label: String,
    /// Start of the cited excerpt
    pub snippet: String,
    /// Similarity score
    pub score: f32,
}

impl Citation {
    pub fn from_excerpt(excerpt: &Excerpt) -> Self {
        Self {
            passage_id: excerpt.passage_id.clone(),
            document_id: excerpt.document_id.clone(),
            label: excerpt.label.clone(),
            snippet: truncate_snippet(&excerpt.text, SNIPPET_LEN),
            score: excerpt.score,
        }
    }
}

/// One passage of the assembled context
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContextPassage {
    pub passage_id: PassageId,
    pub document_id: String,
    pub label: String,
    pub text: String,
    pub score: f32,
    pub token_cost: usize,
    pub truncated: bool,
    /// Whether the answer cites this passage
    pub cited: bool,
}

/// Response from `POST /api/query`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryResponse {
    /// Request ID, echoed in logs
    pub request_id: Uuid,
    /// Generated answer; absent when only evidence is returned
    pub answer: Option<String>,
    /// Citations in order of first appearance in the answer
    pub citations: Vec<Citation>,
    /// End-to-end processing time in milliseconds
    pub latency_ms: u64,
    /// Terminal request state
    pub state: RequestState,
    /// Passages the answer was conditioned on
    pub context: Vec<ContextPassage>,
    /// Citation markers removed because they named passages outside the context
    pub dropped_citations: Vec<String>,
    /// Answer cites no passage, or there is no answer
    pub uncertain: bool,
    /// Served from the answer cache
    pub cached: bool,
    /// Why generation was skipped, for evidence-only responses
    #[serde(skip_serializing_if = "Option::is_none")]
    pub generation_error: Option<String>,
    /// Index snapshot generation the passages came from
    pub index_generation: u64,
}

impl From<QueryOutcome> for QueryResponse {
    fn from(outcome: QueryOutcome) -> Self {
        let cited: Vec<&PassageId> = outcome
            .answer
            .as_ref()
            .map(|a| a.citations.iter().collect())
            .unwrap_or_default();

        let citations = cited
            .iter()
            .filter_map(|id| {
                outcome
                    .context
                    .excerpts
                    .iter()
                    .find(|e| &e.passage_id == *id)
                    .map(Citation::from_excerpt)
            })
            .collect();

        let context = outcome
            .context
            .excerpts
            .iter()
            .map(|e| ContextPassage {
                passage_id: e.passage_id.clone(),
                document_id: e.document_id.clone(),
                label: e.label.clone(),
                text: e.text.clone(),
                score: e.score,
                token_cost: e.token_cost,
                truncated: e.truncated,
                cited: cited.contains(&&e.passage_id),
            })
            .collect();

        let (answer, dropped_citations, uncertain) = match outcome.answer {
            Some(answer) => (Some(answer.text), answer.dropped_citations, answer.uncertain),
            None => (None, Vec::new(), true),
        };

        Self {
            request_id: outcome.request_id,
            answer,
            citations,
            latency_ms: outcome.latency.as_millis() as u64,
            state: outcome.state,
            context,
            dropped_citations,
            uncertain,
            cached: outcome.cached,
            generation_error: outcome.generation_error,
            index_generation: outcome.index_generation,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::AssembledContext;
    use crate::types::Answer;
    use std::time::Duration;

    fn excerpt(id: &str, text: &str) -> Excerpt {
        Excerpt {
            passage_id: id.into(),
            document_id: format!("doc-{}", id),
            label: format!("Guideline {}", id),
            text: text.into(),
            score: 0.8,
            token_cost: 10,
            truncated: false,
        }
    }

    fn outcome(answer: Option<Answer>, state: RequestState) -> QueryOutcome {
        QueryOutcome {
            request_id: Uuid::new_v4(),
            state,
            context: AssembledContext {
                excerpts: vec![excerpt("a", "Metformin first."), excerpt("b", "Lifestyle changes.")],
                total_tokens: 20,
                budget: 100,
            },
            answer,
            generation_error: None,
            cached: false,
            latency: Duration::from_millis(42),
            index_generation: 3,
        }
    }

    #[test]
    fn test_response_from_answer() {
        let answer = Answer {
            text: "Start metformin [P:b] [P:a].".into(),
            citations: vec!["b".into(), "a".into()],
            latency: Duration::from_millis(30),
            uncertain: false,
            dropped_citations: vec!["zzz".into()],
            attempts: 1,
        };
        let response = QueryResponse::from(outcome(Some(answer), RequestState::Succeeded));

        let cited: Vec<&str> = response.citations.iter().map(|c| c.passage_id.as_str()).collect();
        assert_eq!(cited, vec!["b", "a"]);
        assert_eq!(response.citations[0].label, "Guideline b");
        assert!(response.context.iter().all(|p| p.cited));
        assert_eq!(response.latency_ms, 42);
        assert_eq!(response.dropped_citations, vec!["zzz".to_string()]);

        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json["state"], "succeeded");
        assert_eq!(json["latencyMs"], 42);
        assert_eq!(json["droppedCitations"][0], "zzz");
        assert!(json.get("generationError").is_none());
    }

    #[test]
    fn test_evidence_only_response() {
        let response = QueryResponse::from(outcome(None, RequestState::DegradedNoGeneration));

        assert!(response.answer.is_none());
        assert!(response.citations.is_empty());
        assert!(response.uncertain);
        assert_eq!(response.context.len(), 2);
        assert!(response.context.iter().all(|p| !p.cited));

        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json["state"], "degraded_no_generation");
        assert!(json["answer"].is_null());
    }
}

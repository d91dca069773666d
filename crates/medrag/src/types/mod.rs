//! Core types for the engine

pub mod answer;
pub mod passage;
pub mod query;
pub mod response;

pub use answer::Answer;
pub use passage::{Passage, PassageId, ScoredPassage, SourceMetadata};
pub use query::{Query, QueryRequest};
pub use response::{Citation, ContextPassage, QueryResponse};

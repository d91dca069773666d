//! medrag: retrieval-augmented inference engine for medical question answering
//!
//! Passages are indexed in an HNSW graph held as an immutable snapshot.
//! A query is embedded, matched against the live snapshot with metadata
//! filters, packed into a token-budgeted context and answered by a language
//! model whose citations are checked against that context. When the model is
//! unavailable the retrieved evidence is returned on its own.

pub mod cache;
pub mod config;
pub mod context;
pub mod engine;
pub mod error;
pub mod generation;
pub mod index;
pub mod providers;
pub mod retrieval;
pub mod server;
pub mod store;
pub mod types;

pub use config::RagConfig;
pub use engine::{QueryOutcome, RagEngine, RequestState};
pub use error::{Error, Result};
pub use index::{IndexHandle, IndexSnapshot};
pub use types::{
    answer::Answer,
    passage::{Passage, PassageId, ScoredPassage, SourceMetadata},
    query::QueryRequest,
    response::{Citation, QueryResponse},
};

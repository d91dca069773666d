//! Filtered top-k retrieval

pub mod filter;
pub mod retriever;

pub use filter::PassageFilter;
pub use retriever::{dedup_by_document, rank_order, RetrievalResult, RetrievalStrategy, Retriever};

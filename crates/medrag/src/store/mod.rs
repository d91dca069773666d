//! Passage ownership and corpus loading

pub mod document_store;
pub mod loader;

pub use document_store::{Corpus, DocumentStore};
pub use loader::{parse_jsonl, CorpusLoader, LoadReport};

//! Embedding index: HNSW graph, immutable snapshots and the live handle

pub mod distance;
pub mod handle;
pub mod hnsw;
pub mod snapshot;

pub use handle::IndexHandle;
pub use hnsw::{HnswGraph, VectorSet};
pub use snapshot::{IndexSnapshot, IndexStats};

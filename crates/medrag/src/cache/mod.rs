//! Answer caching

mod answer_cache;

pub use answer_cache::{AnswerCache, CacheStats, CachedAnswer};

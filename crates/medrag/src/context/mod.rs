//! Token-budgeted context assembly

pub mod assembler;

pub use assembler::{AssembledContext, CharRatioEstimator, ContextAssembler, Excerpt, TokenEstimator};

pub mod base;
pub mod classifier;
pub mod extractor;
pub mod merolagani;
pub mod token_store;

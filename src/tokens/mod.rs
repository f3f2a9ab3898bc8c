pub mod bpe;
pub mod estimator;

pub use estimator::{CharTally, ChunkingPlan, ContentKind, ModelProfile, TokenEstimator, TokenLimits};

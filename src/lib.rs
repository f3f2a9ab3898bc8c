//! Codewindow fits large source trees into bounded model context windows.
//!
//! It estimates token cost, splits files at structural boundaries, pages
//! through files, chunks and result sets with resumable encrypted cursors,
//! and analyzes many files concurrently under a fixed limit.

pub mod analyzer;
pub mod chunking;
pub mod config;
pub mod jobs;
pub mod logging;
pub mod pagination;
pub mod tokens;

// Re-export commonly used types for convenience
pub use analyzer::{AnalysisResult, BatchAnalysisResult, ConcurrentAnalyzer, FileAnalysisError};
pub use chunking::{Chunk, ChunkOptions, ChunkStrategy, Chunker};
pub use config::{EngineConfig, ResolvedConfig};
pub use pagination::{
    ContextManager, CursorCipher, CursorError, PageRequest, PagedResult, Paginator,
};
pub use tokens::{ContentKind, ModelProfile, TokenEstimator};

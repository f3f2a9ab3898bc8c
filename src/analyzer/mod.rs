//! Bounded-concurrency analysis of many files.

mod concurrent;
mod encoding;
mod error;
mod progress;
mod registry;
mod result;

pub use concurrent::{
    AnalyzerSettings, ConcurrentAnalyzer, DEFAULT_BATCH_PAUSE, DEFAULT_FILE_TIMEOUT,
    DEFAULT_MAX_CONCURRENT_FILES, DEFAULT_MAX_FILE_SIZE,
};
pub use encoding::{decode_bytes, TextEncoding};
pub use error::FileAnalysisError;
pub use progress::{ActiveGuard, ConcurrencyTracker, ProgressCallback, ProgressDetail, ProgressEvent};
pub use registry::{
    basic_analysis, AnalyzerRegistry, ContentAnalyzer, FileAnalyzer, PythonStructure,
    ScriptStructure,
};
pub use result::{AnalysisResult, AnalyzerStats, BatchAnalysisResult};

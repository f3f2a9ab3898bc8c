//! Resumable, cursor-driven pagination over files, chunks and result sets.

mod cipher;
mod context;
mod error;
mod manager;
mod store;
mod strategies;

pub use cipher::CursorCipher;
pub use context::{
    AnalysisSession, ContextUpdate, PaginationContext, SessionStatus, SessionUpdate,
};
pub use error::CursorError;
pub use manager::{
    ContextManager, ContextSpec, ContextSummary, SummaryPosition, SummaryProgress, SummaryTiming,
    SweepReport, DEFAULT_CLEANUP_INTERVAL, DEFAULT_CONTEXT_TTL, DEFAULT_SESSION_RETENTION,
};
pub use store::{ContextStore, MemoryStore};
pub use strategies::{
    ContentStrategy, FileEntry, FileStrategy, MixedPage, MixedStrategy, PageRequest, PagedResult,
    PaginationInfo, PaginationMode, PaginationStrategy, Paginator, ResultSetStrategy, SourceFile,
    DEFAULT_RESULT_PAGE_SIZE, UNKNOWN_FILE_TOKENS,
};

//! Page-at-a-time traversal over files, chunks and result lists.
//!
//! Every strategy takes its input plus an optional cursor and returns one
//! page and, while anything is left, the cursor for the next page. Cursors
//! are bound to the strategy and to a digest of the input; a cursor that is
//! missing, expired, tampered with or issued for other input restarts the
//! traversal from the first page.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::path::Path;
use std::sync::Arc;
use tracing::debug;

use super::context::PaginationContext;
use super::error::CursorError;
use super::manager::{ContextManager, ContextSpec};
use crate::chunking::{Chunk, ChunkOptions, Chunker};
use crate::tokens::{ContentKind, TokenEstimator};

/// Token cost assumed for a file with neither content nor size available
pub const UNKNOWN_FILE_TOKENS: usize = 1000;

/// Default number of records per result-set page
pub const DEFAULT_RESULT_PAGE_SIZE: usize = 50;

const INPUT_DIGEST_KEY: &str = "input";
/// Pages per file, carried by mixed cursors
const FILE_PAGES_KEY: &str = "file_pages";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaginationMode {
    FileByFile,
    ChunkByChunk,
    Mixed,
    ResultSet,
}

impl PaginationMode {
    pub fn as_str(self) -> &'static str {
        match self {
            PaginationMode::FileByFile => "file_by_file",
            PaginationMode::ChunkByChunk => "chunk_by_chunk",
            PaginationMode::Mixed => "mixed",
            PaginationMode::ResultSet => "result_set",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "file_by_file" | "files" | "file" => Some(PaginationMode::FileByFile),
            "chunk_by_chunk" | "chunks" | "content" => Some(PaginationMode::ChunkByChunk),
            "mixed" => Some(PaginationMode::Mixed),
            "result_set" | "results" => Some(PaginationMode::ResultSet),
            _ => None,
        }
    }

    fn default_analysis_id(self) -> &'static str {
        match self {
            PaginationMode::FileByFile => "file_pagination",
            PaginationMode::ChunkByChunk => "content_pagination",
            PaginationMode::Mixed => "mixed_pagination",
            PaginationMode::ResultSet => "result_pagination",
        }
    }
}

impl fmt::Display for PaginationMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A file offered for pagination. Content or size, when known, drive its cost.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceFile {
    pub path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
}

impl SourceFile {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            content: None,
            size: None,
        }
    }

    pub fn with_content(path: impl Into<String>, content: impl Into<String>) -> Self {
        let content = content.into();
        Self {
            path: path.into(),
            size: Some(content.len() as u64),
            content: Some(content),
        }
    }

    pub fn with_size(path: impl Into<String>, size: u64) -> Self {
        Self {
            path: path.into(),
            content: None,
            size: Some(size),
        }
    }

    pub fn kind(&self) -> ContentKind {
        ContentKind::from_path(Path::new(&self.path))
    }

    pub fn text(&self) -> &str {
        self.content.as_deref().unwrap_or("")
    }
}

/// Per-call pagination parameters
#[derive(Debug, Clone, Default)]
pub struct PageRequest {
    /// Files, chunks or records per page, depending on the strategy
    pub page_size: Option<usize>,
    /// Token budget for a file page (file strategy) or a whole-file page (mixed)
    pub max_tokens: Option<usize>,
    pub cursor: Option<String>,
    pub analysis_id: Option<String>,
    pub chunking: ChunkOptions,
}

impl PageRequest {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = Some(page_size);
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: usize) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    pub fn with_cursor(mut self, cursor: Option<String>) -> Self {
        self.cursor = cursor;
        self
    }

    pub fn with_analysis_id(mut self, analysis_id: impl Into<String>) -> Self {
        self.analysis_id = Some(analysis_id.into());
        self
    }

    pub fn with_chunking(mut self, chunking: ChunkOptions) -> Self {
        self.chunking = chunking;
        self
    }

    fn analysis_id(&self, mode: PaginationMode) -> String {
        self.analysis_id
            .clone()
            .unwrap_or_else(|| mode.default_analysis_id().to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaginationInfo {
    /// 1-based
    pub current_page: usize,
    pub total_pages: usize,
    pub has_next: bool,
    pub has_previous: bool,
    pub mode: PaginationMode,
    pub items_in_page: usize,
    pub total_items: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_index: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_index: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tokens_used: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_id: Option<String>,
}

impl PaginationInfo {
    fn new(mode: PaginationMode, current_page: usize, total_pages: usize, has_next: bool) -> Self {
        Self {
            current_page,
            total_pages,
            has_next,
            has_previous: current_page > 1,
            mode,
            items_in_page: 0,
            total_items: 0,
            start_index: None,
            end_index: None,
            tokens_used: None,
            file_id: None,
        }
    }

    fn empty(mode: PaginationMode) -> Self {
        Self::new(mode, 1, 1, false)
    }

    fn with_items(mut self, in_page: usize, total: usize) -> Self {
        self.items_in_page = in_page;
        self.total_items = total;
        self
    }

    fn with_range(mut self, start: usize, end_exclusive: usize) -> Self {
        self.start_index = Some(start);
        self.end_index = end_exclusive.checked_sub(1);
        self
    }
}

/// One page plus the cursor for the next one
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PagedResult<T> {
    pub content: T,
    pub info: PaginationInfo,
    /// Present only while there is a next page
    pub cursor: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
}

impl<T> PagedResult<T> {
    pub fn has_next_page(&self) -> bool {
        self.info.has_next
    }

    pub fn has_previous_page(&self) -> bool {
        self.info.has_previous
    }

    pub fn current_page(&self) -> usize {
        self.info.current_page
    }

    pub fn total_pages(&self) -> usize {
        self.info.total_pages
    }

    fn empty(content: T, mode: PaginationMode) -> Self {
        Self {
            content,
            info: PaginationInfo::empty(mode),
            cursor: None,
            session_id: None,
        }
    }
}

/// Common contract of the traversal strategies
pub trait PaginationStrategy<I: ?Sized> {
    type Page;

    fn mode(&self) -> PaginationMode;

    fn paginate(
        &self,
        input: &I,
        request: &PageRequest,
    ) -> Result<PagedResult<Self::Page>, CursorError>;

    /// Number of pages a traversal from the start would produce
    fn total_pages(&self, input: &I, request: &PageRequest) -> usize;
}

fn input_digest<'a>(parts: impl IntoIterator<Item = &'a str>) -> String {
    let mut context = md5::Context::new();
    for part in parts {
        context.consume(part.as_bytes());
        context.consume([0u8]);
    }
    format!("{:x}", context.compute())
}

/// Resume from the request's cursor if it belongs to this strategy and input
fn resume_bound(
    contexts: &ContextManager,
    request: &PageRequest,
    mode: PaginationMode,
    digest: &str,
) -> Option<PaginationContext> {
    let context = contexts.resume(request.cursor.as_deref())?;
    if context.strategy != mode.as_str() || context.metadata_str(INPUT_DIGEST_KEY) != Some(digest) {
        debug!(
            "Cursor for session {} was issued by {} for other input, restarting {} traversal",
            context.session_id, context.strategy, mode
        );
        return None;
    }
    Some(context)
}

/// Record the next position and seal it into a cursor
fn issue_cursor(
    contexts: &ContextManager,
    previous: Option<&PaginationContext>,
    spec: ContextSpec,
    digest: String,
) -> Result<(String, String), CursorError> {
    let spec = spec.with_metadata(INPUT_DIGEST_KEY, digest.into());
    let next = contexts.continue_from(previous, spec);
    let token = contexts.encode(&next)?;
    Ok((token, next.session_id))
}

/// Greedy page packing over per-item costs: stop before an item that would
/// exceed the budget or the item limit, unless the page is still empty.
fn page_end(costs: &[usize], start: usize, budget: usize, max_items: usize) -> (usize, usize) {
    let mut end = start;
    let mut used = 0;
    while end < costs.len() {
        let cost = costs[end];
        if end > start && (used + cost > budget || end - start >= max_items) {
            break;
        }
        used += cost;
        end += 1;
    }
    (end, used)
}

fn count_pages(costs: &[usize], budget: usize, max_items: usize) -> usize {
    let mut pages = 0;
    let mut start = 0;
    while start < costs.len() {
        start = page_end(costs, start, budget, max_items).0;
        pages += 1;
    }
    pages
}

/// Entry in a file page
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileEntry {
    pub path: String,
    pub estimated_tokens: usize,
}

/// Pages of whole files packed under a token budget
pub struct FileStrategy {
    estimator: TokenEstimator,
    contexts: Arc<ContextManager>,
}

impl FileStrategy {
    pub fn new(estimator: TokenEstimator, contexts: Arc<ContextManager>) -> Self {
        Self {
            estimator,
            contexts,
        }
    }

    /// Estimated cost of one file: from content, else size / 4, else a flat default
    pub fn file_tokens(&self, file: &SourceFile) -> usize {
        match (&file.content, file.size) {
            (Some(content), _) => self.estimator.estimate(content, file.kind()),
            (None, Some(size)) => usize::try_from(size / 4).unwrap_or(usize::MAX),
            (None, None) => UNKNOWN_FILE_TOKENS,
        }
    }

    fn budget(&self, request: &PageRequest) -> usize {
        request
            .max_tokens
            .unwrap_or_else(|| self.estimator.safe_limit() / 2)
            .max(1)
    }

    fn digest(files: &[SourceFile]) -> String {
        input_digest(files.iter().map(|f| f.path.as_str()))
    }
}

impl PaginationStrategy<[SourceFile]> for FileStrategy {
    type Page = Vec<FileEntry>;

    fn mode(&self) -> PaginationMode {
        PaginationMode::FileByFile
    }

    fn paginate(
        &self,
        files: &[SourceFile],
        request: &PageRequest,
    ) -> Result<PagedResult<Self::Page>, CursorError> {
        let mode = self.mode();
        if files.is_empty() {
            return Ok(PagedResult::empty(Vec::new(), mode));
        }

        let budget = self.budget(request);
        let max_files = request.page_size.unwrap_or(files.len()).max(1);
        let costs: Vec<usize> = files.iter().map(|f| self.file_tokens(f)).collect();
        let digest = Self::digest(files);

        let resumed = resume_bound(&self.contexts, request, mode, &digest);
        let start = resumed
            .as_ref()
            .map(|ctx| ctx.file_index)
            .filter(|&index| index < files.len())
            .unwrap_or(0);

        let (end, tokens_used) = page_end(&costs, start, budget, max_files);
        let pages_before = count_pages(&costs[..start], budget, max_files);
        let pages_after = count_pages(&costs[start..], budget, max_files);
        let has_next = end < files.len();

        let mut info = PaginationInfo::new(
            mode,
            pages_before + 1,
            pages_before + pages_after,
            has_next,
        )
        .with_items(end - start, files.len())
        .with_range(start, end);
        info.tokens_used = Some(tokens_used);

        let (cursor, session_id) = if has_next {
            let spec = ContextSpec::new(request.analysis_id(mode), mode.as_str())
                .with_file(files[end].path.clone())
                .with_totals(files.len(), 1)
                .at(end, 0);
            let (token, session) = issue_cursor(&self.contexts, resumed.as_ref(), spec, digest)?;
            (Some(token), Some(session))
        } else {
            (None, resumed.map(|ctx| ctx.session_id))
        };

        let content = files[start..end]
            .iter()
            .zip(&costs[start..end])
            .map(|(file, &estimated_tokens)| FileEntry {
                path: file.path.clone(),
                estimated_tokens,
            })
            .collect();

        Ok(PagedResult {
            content,
            info,
            cursor,
            session_id,
        })
    }

    fn total_pages(&self, files: &[SourceFile], request: &PageRequest) -> usize {
        let costs: Vec<usize> = files.iter().map(|f| self.file_tokens(f)).collect();
        let max_files = request.page_size.unwrap_or(files.len()).max(1);
        count_pages(&costs, self.budget(request), max_files).max(1)
    }
}

/// Pages of chunks from a single file
pub struct ContentStrategy {
    chunker: Chunker,
    contexts: Arc<ContextManager>,
}

impl ContentStrategy {
    pub fn new(chunker: Chunker, contexts: Arc<ContextManager>) -> Self {
        Self { chunker, contexts }
    }

    fn digest(file: &SourceFile, request: &PageRequest) -> String {
        let options = format!("{:?}/{:?}", request.chunking, request.page_size);
        input_digest([file.path.as_str(), file.text(), options.as_str()])
    }
}

impl PaginationStrategy<SourceFile> for ContentStrategy {
    type Page = Vec<Chunk>;

    fn mode(&self) -> PaginationMode {
        PaginationMode::ChunkByChunk
    }

    fn paginate(
        &self,
        file: &SourceFile,
        request: &PageRequest,
    ) -> Result<PagedResult<Self::Page>, CursorError> {
        let mode = self.mode();
        let chunks = self.chunker.chunk(&file.path, file.text(), &request.chunking);
        if chunks.is_empty() {
            return Ok(PagedResult::empty(Vec::new(), mode));
        }

        let per_page = request.page_size.unwrap_or(1).max(1);
        let digest = Self::digest(file, request);
        let resumed = resume_bound(&self.contexts, request, mode, &digest);
        let start = resumed
            .as_ref()
            .map_or(0, |ctx| ctx.chunk_index)
            .min(chunks.len() - 1);
        let end = (start + per_page).min(chunks.len());
        let has_next = end < chunks.len();

        let pages_before = start.div_ceil(per_page);
        let pages_after = (chunks.len() - start).div_ceil(per_page);
        let mut info = PaginationInfo::new(
            mode,
            pages_before + 1,
            pages_before + pages_after,
            has_next,
        )
        .with_items(end - start, chunks.len())
        .with_range(start, end);
        info.tokens_used = Some(
            chunks[start..end]
                .iter()
                .map(|c| c.metadata.estimated_tokens)
                .sum(),
        );
        info.file_id = Some(file.path.clone());

        let (cursor, session_id) = if has_next {
            let spec = ContextSpec::new(request.analysis_id(mode), mode.as_str())
                .with_file(file.path.clone())
                .with_totals(1, chunks.len())
                .at(0, end);
            let (token, session) = issue_cursor(&self.contexts, resumed.as_ref(), spec, digest)?;
            (Some(token), Some(session))
        } else {
            (None, resumed.map(|ctx| ctx.session_id))
        };

        let mut chunks = chunks;
        chunks.truncate(end);
        let content = chunks.split_off(start);

        Ok(PagedResult {
            content,
            info,
            cursor,
            session_id,
        })
    }

    fn total_pages(&self, file: &SourceFile, request: &PageRequest) -> usize {
        let per_page = request.page_size.unwrap_or(1).max(1);
        let chunks = self.chunker.chunk(&file.path, file.text(), &request.chunking);
        chunks.len().div_ceil(per_page).max(1)
    }
}

/// One page of the mixed traversal
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MixedPage {
    /// The file fits the budget and is returned whole
    CompleteFile {
        path: String,
        content: String,
        estimated_tokens: usize,
    },
    /// A run of chunks from a file that does not fit
    FileChunks {
        path: String,
        chunks: Vec<Chunk>,
        total_chunks: usize,
    },
    Empty,
}

/// Whole files when they fit, chunk pages when they do not
pub struct MixedStrategy {
    chunker: Chunker,
    contexts: Arc<ContextManager>,
}

enum FilePlan {
    Whole(usize),
    Chunked(Vec<Chunk>),
}

impl MixedStrategy {
    pub fn new(chunker: Chunker, contexts: Arc<ContextManager>) -> Self {
        Self { chunker, contexts }
    }

    fn budget(&self, request: &PageRequest) -> usize {
        request
            .max_tokens
            .unwrap_or_else(|| self.chunker.estimator().safe_limit())
            .max(1)
    }

    fn plan(&self, file: &SourceFile, request: &PageRequest) -> FilePlan {
        let tokens = self
            .chunker
            .estimator()
            .estimate(file.text(), file.kind());
        if tokens <= self.budget(request) {
            FilePlan::Whole(tokens)
        } else {
            FilePlan::Chunked(self.chunker.chunk(&file.path, file.text(), &request.chunking))
        }
    }

    fn pages_for(&self, file: &SourceFile, request: &PageRequest, per_page: usize) -> usize {
        match self.plan(file, request) {
            FilePlan::Whole(_) => 1,
            FilePlan::Chunked(chunks) => chunks.len().div_ceil(per_page).max(1),
        }
    }

    /// Pages each file takes. Computed once per traversal and then read back
    /// from the cursor, so later pages only chunk the file they return.
    fn page_plan(
        &self,
        files: &[SourceFile],
        request: &PageRequest,
        per_page: usize,
        resumed: Option<&PaginationContext>,
    ) -> Vec<usize> {
        let carried = resumed
            .and_then(|ctx| ctx.metadata.get(FILE_PAGES_KEY))
            .and_then(|value| serde_json::from_value::<Vec<usize>>(value.clone()).ok())
            .filter(|plan| plan.len() == files.len());
        match carried {
            Some(plan) => plan,
            None => files
                .iter()
                .map(|f| self.pages_for(f, request, per_page))
                .collect(),
        }
    }

    fn digest(files: &[SourceFile], request: &PageRequest) -> String {
        let options = format!(
            "{:?}/{:?}/{:?}",
            request.chunking, request.page_size, request.max_tokens
        );
        input_digest(
            files
                .iter()
                .flat_map(|f| [f.path.as_str(), f.text()])
                .chain(std::iter::once(options.as_str())),
        )
    }
}

impl PaginationStrategy<[SourceFile]> for MixedStrategy {
    type Page = MixedPage;

    fn mode(&self) -> PaginationMode {
        PaginationMode::Mixed
    }

    fn paginate(
        &self,
        files: &[SourceFile],
        request: &PageRequest,
    ) -> Result<PagedResult<Self::Page>, CursorError> {
        let mode = self.mode();
        if files.is_empty() {
            return Ok(PagedResult::empty(MixedPage::Empty, mode));
        }

        let per_page = request.page_size.unwrap_or(1).max(1);
        let digest = Self::digest(files, request);
        let resumed = resume_bound(&self.contexts, request, mode, &digest);
        let (file_index, chunk_index) = match resumed.as_ref() {
            Some(ctx) if ctx.file_index < files.len() => (ctx.file_index, ctx.chunk_index),
            _ => (0, 0),
        };
        let plan = self.page_plan(files, request, per_page, resumed.as_ref());

        let file = &files[file_index];
        let (content, next, total_chunks, start, end) = match self.plan(file, request) {
            FilePlan::Whole(estimated_tokens) => (
                MixedPage::CompleteFile {
                    path: file.path.clone(),
                    content: file.text().to_string(),
                    estimated_tokens,
                },
                (file_index + 1, 0),
                1,
                0,
                1,
            ),
            FilePlan::Chunked(mut chunks) => {
                let total = chunks.len();
                let start = chunk_index.min(total.saturating_sub(1));
                let end = (start + per_page).min(total);
                let next = if end < total {
                    (file_index, end)
                } else {
                    (file_index + 1, 0)
                };
                chunks.truncate(end);
                let page = chunks.split_off(start);
                (
                    MixedPage::FileChunks {
                        path: file.path.clone(),
                        chunks: page,
                        total_chunks: total,
                    },
                    next,
                    total,
                    start,
                    end,
                )
            }
        };

        let pages_before =
            plan[..file_index].iter().sum::<usize>() + start.div_ceil(per_page);
        let pages_after = (total_chunks - start).div_ceil(per_page).max(1)
            + plan[file_index + 1..].iter().sum::<usize>();
        let has_next = next.0 < files.len();

        let mut info = PaginationInfo::new(
            mode,
            pages_before + 1,
            pages_before + pages_after,
            has_next,
        )
        .with_items(end - start, total_chunks)
        .with_range(start, end);
        info.file_id = Some(file.path.clone());

        let (cursor, session_id) = if has_next {
            let next_chunks = if next.0 == file_index { total_chunks } else { 1 };
            let spec = ContextSpec::new(request.analysis_id(mode), mode.as_str())
                .with_file(files[next.0].path.clone())
                .with_totals(files.len(), next_chunks)
                .at(next.0, next.1)
                .with_metadata(FILE_PAGES_KEY, Value::from(plan));
            let (token, session) = issue_cursor(&self.contexts, resumed.as_ref(), spec, digest)?;
            (Some(token), Some(session))
        } else {
            (None, resumed.map(|ctx| ctx.session_id))
        };

        Ok(PagedResult {
            content,
            info,
            cursor,
            session_id,
        })
    }

    fn total_pages(&self, files: &[SourceFile], request: &PageRequest) -> usize {
        let per_page = request.page_size.unwrap_or(1).max(1);
        files
            .iter()
            .map(|f| self.pages_for(f, request, per_page))
            .sum::<usize>()
            .max(1)
    }
}

/// Offset pagination over precomputed records
pub struct ResultSetStrategy {
    contexts: Arc<ContextManager>,
}

impl ResultSetStrategy {
    pub fn new(contexts: Arc<ContextManager>) -> Self {
        Self { contexts }
    }

    fn page_size(request: &PageRequest) -> usize {
        request.page_size.unwrap_or(DEFAULT_RESULT_PAGE_SIZE).max(1)
    }
}

impl<T: Clone> PaginationStrategy<[T]> for ResultSetStrategy {
    type Page = Vec<T>;

    fn mode(&self) -> PaginationMode {
        PaginationMode::ResultSet
    }

    fn paginate(
        &self,
        results: &[T],
        request: &PageRequest,
    ) -> Result<PagedResult<Self::Page>, CursorError> {
        let mode = PaginationMode::ResultSet;
        if results.is_empty() {
            return Ok(PagedResult::empty(Vec::new(), mode));
        }

        let page_size = Self::page_size(request);
        let total_pages = results.len().div_ceil(page_size);
        let digest = input_digest([
            results.len().to_string().as_str(),
            page_size.to_string().as_str(),
        ]);
        let resumed = resume_bound(&self.contexts, request, mode, &digest);
        let current_page = resumed
            .as_ref()
            .map_or(1, |ctx| ctx.chunk_index)
            .clamp(1, total_pages);

        let start = (current_page - 1) * page_size;
        let end = (start + page_size).min(results.len());
        let has_next = current_page < total_pages;

        let info = PaginationInfo::new(mode, current_page, total_pages, has_next)
            .with_items(end - start, results.len())
            .with_range(start, end);

        let (cursor, session_id) = if has_next {
            let spec = ContextSpec::new(request.analysis_id(mode), mode.as_str())
                .with_file("results")
                .with_totals(1, total_pages)
                .at(0, current_page + 1);
            let (token, session) = issue_cursor(&self.contexts, resumed.as_ref(), spec, digest)?;
            (Some(token), Some(session))
        } else {
            (None, resumed.map(|ctx| ctx.session_id))
        };

        Ok(PagedResult {
            content: results[start..end].to_vec(),
            info,
            cursor,
            session_id,
        })
    }

    fn total_pages(&self, results: &[T], request: &PageRequest) -> usize {
        results.len().div_ceil(Self::page_size(request)).max(1)
    }
}

/// One instance of every strategy over a shared chunker and context manager
pub struct Paginator {
    files: FileStrategy,
    content: ContentStrategy,
    mixed: MixedStrategy,
    results: ResultSetStrategy,
    contexts: Arc<ContextManager>,
}

impl Paginator {
    pub fn new(chunker: Chunker, contexts: Arc<ContextManager>) -> Self {
        Self {
            files: FileStrategy::new(chunker.estimator().clone(), contexts.clone()),
            content: ContentStrategy::new(chunker.clone(), contexts.clone()),
            mixed: MixedStrategy::new(chunker, contexts.clone()),
            results: ResultSetStrategy::new(contexts.clone()),
            contexts,
        }
    }

    pub fn contexts(&self) -> &Arc<ContextManager> {
        &self.contexts
    }

    pub fn files(&self) -> &FileStrategy {
        &self.files
    }

    pub fn content(&self) -> &ContentStrategy {
        &self.content
    }

    pub fn mixed(&self) -> &MixedStrategy {
        &self.mixed
    }

    pub fn results(&self) -> &ResultSetStrategy {
        &self.results
    }

    pub fn paginate_files(
        &self,
        files: &[SourceFile],
        request: &PageRequest,
    ) -> Result<PagedResult<Vec<FileEntry>>, CursorError> {
        self.files.paginate(files, request)
    }

    pub fn paginate_content(
        &self,
        file: &SourceFile,
        request: &PageRequest,
    ) -> Result<PagedResult<Vec<Chunk>>, CursorError> {
        self.content.paginate(file, request)
    }

    pub fn paginate_mixed(
        &self,
        files: &[SourceFile],
        request: &PageRequest,
    ) -> Result<PagedResult<MixedPage>, CursorError> {
        self.mixed.paginate(files, request)
    }

    pub fn paginate_results<T: Clone>(
        &self,
        results: &[T],
        request: &PageRequest,
    ) -> Result<PagedResult<Vec<T>>, CursorError> {
        self.results.paginate(results, request)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunking::ChunkStrategy;
    use crate::pagination::CursorCipher;

    fn paginator() -> Paginator {
        let contexts = Arc::new(ContextManager::new(CursorCipher::generate()));
        Paginator::new(Chunker::default(), contexts)
    }

    #[test]
    fn test_file_pages_pack_by_budget() {
        let p = paginator();
        let files: Vec<SourceFile> = (0..5)
            .map(|i| SourceFile::with_size(format!("f{i}.rs"), 400))
            .collect();
        // 100 tokens each, 250 per page -> pages of 2, 2, 1
        let request = PageRequest::new().with_max_tokens(250);

        let first = p.paginate_files(&files, &request).unwrap();
        assert_eq!(first.content.len(), 2);
        assert_eq!(first.info.total_pages, 3);
        assert_eq!(first.info.current_page, 1);
        assert!(first.has_next_page() && !first.has_previous_page());

        let second = p
            .paginate_files(&files, &request.clone().with_cursor(first.cursor.clone()))
            .unwrap();
        assert_eq!(second.content[0].path, "f2.rs");
        assert_eq!(second.info.current_page, 2);
        assert_eq!(second.session_id, first.session_id);

        let third = p
            .paginate_files(&files, &request.clone().with_cursor(second.cursor))
            .unwrap();
        assert_eq!(third.content.len(), 1);
        assert_eq!(third.info.current_page, 3);
        assert!(third.cursor.is_none());
    }

    #[test]
    fn test_oversized_file_is_emitted_alone() {
        let p = paginator();
        let files = vec![
            SourceFile::with_size("huge.rs", 40_000),
            SourceFile::with_size("small.rs", 40),
        ];
        let request = PageRequest::new().with_max_tokens(100);
        let page = p.paginate_files(&files, &request).unwrap();
        assert_eq!(page.content.len(), 1);
        assert_eq!(page.content[0].path, "huge.rs");
        assert_eq!(page.content[0].estimated_tokens, 10_000);
    }

    #[test]
    fn test_unknown_cost_and_page_size_limit() {
        let p = paginator();
        let files: Vec<SourceFile> = (0..3).map(|i| SourceFile::new(format!("{i}"))).collect();
        assert_eq!(p.files().file_tokens(&files[0]), UNKNOWN_FILE_TOKENS);

        let request = PageRequest::new().with_page_size(1).with_max_tokens(1_000_000);
        assert_eq!(p.files().total_pages(&files, &request), 3);
    }

    #[test]
    fn test_foreign_cursor_restarts() {
        let p = paginator();
        let results: Vec<u32> = (0..120).collect();
        let page = p.paginate_results(&results, &PageRequest::new()).unwrap();
        assert!(page.cursor.is_some());

        // A result-set cursor means nothing to the file strategy
        let files: Vec<SourceFile> = (0..3).map(|i| SourceFile::with_size(format!("{i}"), 4)).collect();
        let request = PageRequest::new().with_page_size(1).with_cursor(page.cursor);
        let restarted = p.paginate_files(&files, &request).unwrap();
        assert_eq!(restarted.info.current_page, 1);
        assert_eq!(restarted.content[0].path, "0");
    }

    #[test]
    fn test_result_set_offsets() {
        let p = paginator();
        let results: Vec<u32> = (0..120).collect();
        let mut request = PageRequest::new();
        let mut pages = Vec::new();
        loop {
            let page = p.paginate_results(&results, &request).unwrap();
            pages.push(page.content.clone());
            match page.cursor {
                Some(cursor) => request = request.with_cursor(Some(cursor)),
                None => break,
            }
        }
        assert_eq!(pages.len(), 3);
        assert_eq!(pages[2], (100..120).collect::<Vec<_>>());
        assert_eq!(pages.concat(), results);
    }

    #[test]
    fn test_content_pages_walk_every_chunk() {
        let p = paginator();
        let body: String = (0..200).map(|i| format!("line {i}\n")).collect();
        let file = SourceFile::with_content("notes.txt", body.clone());
        let request = PageRequest::new().with_chunking(
            ChunkOptions::default()
                .with_strategy(ChunkStrategy::Lines)
                .with_max_tokens(50)
                .with_overlap_lines(0),
        );

        let total = p.content().total_pages(&file, &request);
        let mut seen = String::new();
        let mut request = request;
        let mut count = 0;
        loop {
            let page = p.paginate_content(&file, &request).unwrap();
            count += 1;
            assert_eq!(page.info.current_page, count);
            assert_eq!(page.info.total_pages, total);
            for chunk in &page.content {
                seen.push_str(chunk.body());
            }
            match page.cursor {
                Some(cursor) => request = request.with_cursor(Some(cursor)),
                None => break,
            }
        }
        assert_eq!(count, total);
        assert_eq!(seen, body);
    }

    #[test]
    fn test_mixed_switches_between_whole_files_and_chunks() {
        let p = paginator();
        let big: String = (0..300).map(|i| format!("value {i}\n")).collect();
        let files = vec![
            SourceFile::with_content("a.txt", "small file\n"),
            SourceFile::with_content("b.txt", big.clone()),
            SourceFile::with_content("c.txt", "another small one\n"),
        ];
        let request = PageRequest::new()
            .with_max_tokens(200)
            .with_chunking(ChunkOptions::default().with_max_tokens(150).with_overlap_chars(0));

        let total = p.mixed().total_pages(&files, &request);
        let mut request = request;
        let mut pages = Vec::new();
        loop {
            let page = p.paginate_mixed(&files, &request).unwrap();
            assert_eq!(page.info.total_pages, total);
            assert_eq!(page.info.current_page, pages.len() + 1);
            let cursor = page.cursor.clone();
            pages.push(page.content);
            match cursor {
                Some(cursor) => request = request.with_cursor(Some(cursor)),
                None => break,
            }
        }

        assert_eq!(pages.len(), total);
        assert!(matches!(&pages[0], MixedPage::CompleteFile { path, .. } if path == "a.txt"));
        assert!(matches!(pages.last(), Some(MixedPage::CompleteFile { path, .. }) if path == "c.txt"));

        let rebuilt: String = pages
            .iter()
            .filter_map(|page| match page {
                MixedPage::FileChunks { chunks, .. } => {
                    Some(chunks.iter().map(Chunk::body).collect::<String>())
                }
                _ => None,
            })
            .collect();
        assert_eq!(rebuilt, big);
    }

    #[test]
    fn test_mixed_cursor_carries_the_page_plan() {
        let p = paginator();
        let big: String = (0..300).map(|i| format!("value {i}\n")).collect();
        let files = vec![
            SourceFile::with_content("a.txt", "small file\n"),
            SourceFile::with_content("b.txt", big),
            SourceFile::with_content("c.txt", "another small one\n"),
        ];
        let request = PageRequest::new()
            .with_max_tokens(200)
            .with_chunking(ChunkOptions::default().with_max_tokens(150).with_overlap_chars(0));
        let total = p.mixed().total_pages(&files, &request);

        let first = p.paginate_mixed(&files, &request).unwrap();
        let cursor = first.cursor.unwrap();
        let mut context = p.contexts().decode(&cursor).unwrap();
        assert_eq!(
            context.metadata[FILE_PAGES_KEY],
            serde_json::json!([1, total - 2, 1])
        );

        // Later pages take their totals from the cursor instead of re-chunking
        context
            .metadata
            .insert(FILE_PAGES_KEY.into(), serde_json::json!([5, 1, 7]));
        let rewritten = p.contexts().encode(&context).unwrap();
        let second = p
            .paginate_mixed(&files, &request.clone().with_cursor(Some(rewritten)))
            .unwrap();
        assert_eq!(second.info.current_page, 6);
        assert_eq!(second.info.total_pages, total + 10);

        // A plan that does not match the file list is recomputed
        context
            .metadata
            .insert(FILE_PAGES_KEY.into(), serde_json::json!([5, 1]));
        let mismatched = p.contexts().encode(&context).unwrap();
        let third = p
            .paginate_mixed(&files, &request.with_cursor(Some(mismatched)))
            .unwrap();
        assert_eq!(third.info.total_pages, total);
    }

    #[test]
    fn test_empty_inputs() {
        let p = paginator();
        let page = p.paginate_files(&[], &PageRequest::new()).unwrap();
        assert!(page.content.is_empty());
        assert_eq!((page.info.current_page, page.info.total_pages), (1, 1));
        assert!(!page.has_next_page());

        let page = p
            .paginate_content(&SourceFile::with_content("a.rs", ""), &PageRequest::new())
            .unwrap();
        assert!(page.content.is_empty());

        let page = p.paginate_mixed(&[], &PageRequest::new()).unwrap();
        assert_eq!(page.content, MixedPage::Empty);
    }
}

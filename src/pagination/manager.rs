use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tracing::{debug, info};
use uuid::Uuid;

use super::cipher::CursorCipher;
use super::context::{
    AnalysisSession, ContextUpdate, PaginationContext, SessionStatus, SessionUpdate,
};
use super::error::CursorError;
use super::store::{ContextStore, MemoryStore};

pub const DEFAULT_CONTEXT_TTL: Duration = Duration::from_secs(30 * 60);
pub const DEFAULT_CLEANUP_INTERVAL: Duration = Duration::from_secs(5 * 60);
pub const DEFAULT_SESSION_RETENTION: Duration = Duration::from_secs(60 * 60);

/// Arguments for [`ContextManager::create`]
#[derive(Debug, Clone, Default)]
pub struct ContextSpec {
    pub analysis_id: String,
    pub strategy: String,
    pub file_id: String,
    pub total_files: usize,
    pub total_chunks: usize,
    pub file_index: usize,
    pub chunk_index: usize,
    /// `None` uses the manager's default TTL
    pub ttl: Option<Duration>,
    pub metadata: Map<String, Value>,
}

impl ContextSpec {
    pub fn new(analysis_id: impl Into<String>, strategy: impl Into<String>) -> Self {
        Self {
            analysis_id: analysis_id.into(),
            strategy: strategy.into(),
            ..Default::default()
        }
    }

    pub fn with_file(mut self, file_id: impl Into<String>) -> Self {
        self.file_id = file_id.into();
        self
    }

    pub fn with_totals(mut self, total_files: usize, total_chunks: usize) -> Self {
        self.total_files = total_files;
        self.total_chunks = total_chunks;
        self
    }

    pub fn at(mut self, file_index: usize, chunk_index: usize) -> Self {
        self.file_index = file_index;
        self.chunk_index = chunk_index;
        self
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }
}

/// Counts from one sweep
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SweepReport {
    pub contexts_removed: usize,
    pub sessions_removed: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SummaryPosition {
    pub file_index: usize,
    pub chunk_index: usize,
    pub file_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SummaryProgress {
    pub percentage: f64,
    pub files_remaining: usize,
    pub chunks_remaining: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SummaryTiming {
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub time_remaining_secs: u64,
}

/// Human-facing view of a context
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextSummary {
    pub session_id: String,
    pub analysis_id: String,
    pub position: SummaryPosition,
    pub total_files: usize,
    pub total_chunks: usize,
    pub progress: SummaryProgress,
    pub timing: SummaryTiming,
    pub strategy: String,
    pub metadata: Map<String, Value>,
}

/// Owns pagination contexts and analysis sessions, and seals cursors.
///
/// All state lives behind the [`ContextStore`]; the manager itself only
/// keeps configuration and the time of the last opportunistic sweep.
pub struct ContextManager {
    store: Arc<dyn ContextStore>,
    cipher: CursorCipher,
    default_ttl: Duration,
    cleanup_interval: Duration,
    session_retention: Duration,
    last_sweep: Mutex<Instant>,
}

impl ContextManager {
    pub fn new(cipher: CursorCipher) -> Self {
        Self {
            store: Arc::new(MemoryStore::new()),
            cipher,
            default_ttl: DEFAULT_CONTEXT_TTL,
            cleanup_interval: DEFAULT_CLEANUP_INTERVAL,
            session_retention: DEFAULT_SESSION_RETENTION,
            last_sweep: Mutex::new(Instant::now()),
        }
    }

    pub fn with_store(mut self, store: Arc<dyn ContextStore>) -> Self {
        self.store = store;
        self
    }

    pub fn with_default_ttl(mut self, ttl: Duration) -> Self {
        self.default_ttl = ttl;
        self
    }

    pub fn with_cleanup_interval(mut self, interval: Duration) -> Self {
        self.cleanup_interval = interval;
        self
    }

    pub fn with_session_retention(mut self, retention: Duration) -> Self {
        self.session_retention = retention;
        self
    }

    pub fn default_ttl(&self) -> Duration {
        self.default_ttl
    }

    pub fn cleanup_interval(&self) -> Duration {
        self.cleanup_interval
    }

    pub fn context_count(&self) -> usize {
        self.store.context_count()
    }

    fn generate_session_id(components: &[&str]) -> String {
        let seed = format!("{}:{}", components.join(":"), Uuid::new_v4());
        let digest = format!("{:x}", md5::compute(seed.as_bytes()));
        digest[..16].to_string()
    }

    pub fn create(&self, spec: ContextSpec) -> PaginationContext {
        let session_id = Self::generate_session_id(&[&spec.analysis_id, &spec.file_id]);
        let context = PaginationContext {
            session_id,
            analysis_id: spec.analysis_id,
            file_index: spec.file_index.min(spec.total_files),
            chunk_index: spec.chunk_index.min(spec.total_chunks),
            total_files: spec.total_files,
            total_chunks: spec.total_chunks,
            file_id: spec.file_id,
            strategy: spec.strategy,
            created_at: Utc::now(),
            ttl_secs: spec.ttl.unwrap_or(self.default_ttl).as_secs(),
            metadata: spec.metadata,
        };
        self.store.put_context(context.clone());
        self.maybe_sweep();
        context
    }

    /// Replace a live context with an updated copy
    pub fn update(&self, session_id: &str, update: ContextUpdate) -> Option<PaginationContext> {
        let current = self.get(session_id)?;
        let next = update.apply(&current);
        self.store.put_context(next.clone());
        Some(next)
    }

    /// Store and return a copy of `context` moved to a new position
    pub fn advance(
        &self,
        context: &PaginationContext,
        file_index: usize,
        chunk_index: usize,
    ) -> PaginationContext {
        let next = context.advanced(file_index, chunk_index);
        self.store.put_context(next.clone());
        next
    }

    /// Next context of a traversal. Keeps the session of `previous` when
    /// there is one, otherwise starts a new session.
    pub fn continue_from(
        &self,
        previous: Option<&PaginationContext>,
        spec: ContextSpec,
    ) -> PaginationContext {
        let Some(previous) = previous else {
            return self.create(spec);
        };
        let next = PaginationContext {
            session_id: previous.session_id.clone(),
            analysis_id: previous.analysis_id.clone(),
            file_index: spec.file_index.min(spec.total_files),
            chunk_index: spec.chunk_index.min(spec.total_chunks),
            total_files: spec.total_files,
            total_chunks: spec.total_chunks,
            file_id: spec.file_id,
            strategy: spec.strategy,
            created_at: Utc::now(),
            ttl_secs: spec.ttl.map_or(previous.ttl_secs, |ttl| ttl.as_secs()),
            metadata: spec.metadata,
        };
        self.store.put_context(next.clone());
        next
    }

    /// Live context for `session_id`; expired ones are evicted on access
    pub fn get(&self, session_id: &str) -> Option<PaginationContext> {
        let context = self.store.get_context(session_id)?;
        if context.is_expired() {
            self.store.remove_context(session_id);
            return None;
        }
        Some(context)
    }

    pub fn encode(&self, context: &PaginationContext) -> Result<String, CursorError> {
        self.cipher.seal(context)
    }

    /// Open a cursor and make sure its context is tracked again
    pub fn decode(&self, token: &str) -> Result<PaginationContext, CursorError> {
        let context = self.cipher.open(token)?;
        if context.is_expired() {
            return Err(CursorError::Expired {
                session_id: context.session_id,
            });
        }
        if self.store.get_context(&context.session_id).is_none() {
            self.store.put_context(context.clone());
        }
        Ok(context)
    }

    /// Fail-closed decode: any problem with the cursor means "no cursor"
    pub fn resume(&self, token: Option<&str>) -> Option<PaginationContext> {
        let token = token.filter(|t| !t.trim().is_empty())?;
        match self.decode(token) {
            Ok(context) => Some(context),
            Err(e) => {
                debug!("Ignoring pagination cursor, restarting traversal: {}", e);
                None
            }
        }
    }

    pub fn create_session(
        &self,
        analysis_kind: &str,
        source: &str,
        source_kind: &str,
        session_id: Option<String>,
    ) -> AnalysisSession {
        let session_id =
            session_id.unwrap_or_else(|| Self::generate_session_id(&[analysis_kind, source]));

        let mut progress = Map::new();
        progress.insert("files_processed".into(), Value::from(0));
        progress.insert("total_files".into(), Value::from(0));
        progress.insert("current_file".into(), Value::from(""));
        progress.insert("percentage".into(), Value::from(0.0));

        let session = AnalysisSession {
            session_id,
            analysis_kind: analysis_kind.to_string(),
            source: source.to_string(),
            source_kind: source_kind.to_string(),
            started_at: Utc::now(),
            status: SessionStatus::Running,
            progress,
            result: None,
            error: None,
        };
        self.store.put_session(session.clone());
        session
    }

    pub fn update_session(&self, session_id: &str, update: SessionUpdate) -> Option<AnalysisSession> {
        let mut update = Some(update);
        self.store.modify_session(session_id, &mut |session| {
            if let Some(update) = update.take() {
                update.apply(session);
            }
        })
    }

    pub fn get_session(&self, session_id: &str) -> Option<AnalysisSession> {
        self.store.get_session(session_id)
    }

    pub fn list_active_sessions(&self) -> Vec<AnalysisSession> {
        let mut sessions: Vec<_> = self
            .store
            .sessions()
            .into_iter()
            .filter(AnalysisSession::is_running)
            .collect();
        sessions.sort_by(|a, b| a.started_at.cmp(&b.started_at));
        sessions
    }

    /// Remove a session and every context created under its id.
    /// Returns whether the session existed.
    pub fn cleanup_session(&self, session_id: &str) -> bool {
        let removed = self.store.remove_session(session_id).is_some();
        let contexts = self
            .store
            .purge_contexts(&mut |ctx| ctx.analysis_id == session_id);
        info!(
            "Cleaned up session {}: session removed={}, contexts removed={}",
            session_id, removed, contexts
        );
        removed
    }

    /// Drop expired contexts and finished sessions past the retention window
    pub fn cleanup_expired(&self) -> SweepReport {
        let now = Utc::now();
        let retention = self.session_retention;
        let contexts_removed = self.store.purge_contexts(&mut |ctx| ctx.is_expired_at(now));
        let sessions_removed = self.store.purge_sessions(&mut |session| {
            !session.is_running()
                && (now - session.started_at)
                    .to_std()
                    .map(|age| age > retention)
                    .unwrap_or(false)
        });

        *self.last_sweep.lock().unwrap_or_else(|p| p.into_inner()) = Instant::now();

        if contexts_removed > 0 || sessions_removed > 0 {
            info!(
                "Cleaned up {} expired contexts and {} old sessions",
                contexts_removed, sessions_removed
            );
        }
        SweepReport {
            contexts_removed,
            sessions_removed,
        }
    }

    fn maybe_sweep(&self) {
        let due = {
            let last = self.last_sweep.lock().unwrap_or_else(|p| p.into_inner());
            last.elapsed() >= self.cleanup_interval
        };
        if due {
            self.cleanup_expired();
        }
    }

    /// Periodic sweep on the current tokio runtime; stops once the manager is dropped
    pub fn spawn_sweeper(self: &Arc<Self>) -> JoinHandle<()> {
        let manager = Arc::downgrade(self);
        let period = self.cleanup_interval.max(Duration::from_secs(1));
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(manager) = manager.upgrade() else {
                    debug!("Context manager dropped, stopping sweeper");
                    break;
                };
                manager.cleanup_expired();
            }
        })
    }

    pub fn context_summary(&self, context: &PaginationContext) -> ContextSummary {
        ContextSummary {
            session_id: context.session_id.clone(),
            analysis_id: context.analysis_id.clone(),
            position: SummaryPosition {
                file_index: context.file_index,
                chunk_index: context.chunk_index,
                file_id: context.file_id.clone(),
            },
            total_files: context.total_files,
            total_chunks: context.total_chunks,
            progress: SummaryProgress {
                percentage: context.progress_percentage(),
                files_remaining: context.total_files.saturating_sub(context.file_index),
                chunks_remaining: context.total_chunks.saturating_sub(context.chunk_index),
            },
            timing: SummaryTiming {
                created_at: context.created_at,
                expires_at: context.expires_at(),
                time_remaining_secs: context.time_remaining().as_secs(),
            },
            strategy: context.strategy.clone(),
            metadata: context.metadata.clone(),
        }
    }
}

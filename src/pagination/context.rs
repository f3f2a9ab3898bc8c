use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::time::Duration;

/// Resumable position inside a multi-page traversal.
///
/// Contexts are never changed in place once handed out; advancing produces a
/// new value (see [`PaginationContext::advanced`]).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaginationContext {
    pub session_id: String,
    pub analysis_id: String,
    pub file_index: usize,
    pub chunk_index: usize,
    pub total_files: usize,
    /// Chunks in the current file
    pub total_chunks: usize,
    pub file_id: String,
    pub strategy: String,
    pub created_at: DateTime<Utc>,
    pub ttl_secs: u64,
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

impl PaginationContext {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }

    pub fn expires_at(&self) -> DateTime<Utc> {
        i64::try_from(self.ttl_secs)
            .ok()
            .and_then(ChronoDuration::try_seconds)
            .and_then(|ttl| self.created_at.checked_add_signed(ttl))
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }

    /// A zero TTL is expired from the moment it is created
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at()
    }

    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }

    pub fn time_remaining(&self) -> Duration {
        (self.expires_at() - Utc::now()).to_std().unwrap_or_default()
    }

    /// Share of the traversal already consumed, 0-100
    pub fn progress_percentage(&self) -> f64 {
        if self.total_chunks == 0 || self.total_files == 0 {
            return 100.0;
        }
        let completed = self.file_index * self.total_chunks + self.chunk_index;
        let total = self.total_files * self.total_chunks;
        (completed as f64 / total as f64 * 100.0).min(100.0)
    }

    /// Copy of this context moved to a new position, with a fresh lifetime
    pub fn advanced(&self, file_index: usize, chunk_index: usize) -> Self {
        let mut next = self.clone();
        next.file_index = file_index.min(next.total_files);
        next.chunk_index = chunk_index.min(next.total_chunks);
        next.created_at = Utc::now();
        next
    }

    pub fn metadata_str(&self, key: &str) -> Option<&str> {
        self.metadata.get(key).and_then(Value::as_str)
    }
}

/// Field changes accepted by `ContextManager::update`
#[derive(Debug, Clone, Default)]
pub struct ContextUpdate {
    pub file_index: Option<usize>,
    pub chunk_index: Option<usize>,
    pub file_id: Option<String>,
    pub total_chunks: Option<usize>,
    pub metadata: Option<Map<String, Value>>,
}

impl ContextUpdate {
    pub fn position(file_index: usize, chunk_index: usize) -> Self {
        Self {
            file_index: Some(file_index),
            chunk_index: Some(chunk_index),
            ..Default::default()
        }
    }

    pub fn with_file(mut self, file_id: impl Into<String>) -> Self {
        self.file_id = Some(file_id.into());
        self
    }

    pub fn with_total_chunks(mut self, total_chunks: usize) -> Self {
        self.total_chunks = Some(total_chunks);
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: Value) -> Self {
        self.metadata
            .get_or_insert_with(Map::new)
            .insert(key.into(), value);
        self
    }

    pub(crate) fn apply(self, context: &PaginationContext) -> PaginationContext {
        let mut next = context.clone();
        if let Some(total) = self.total_chunks {
            next.total_chunks = total;
        }
        if let Some(file_id) = self.file_id {
            next.file_id = file_id;
        }
        if let Some(index) = self.file_index {
            next.file_index = index.min(next.total_files);
        }
        if let Some(index) = self.chunk_index {
            next.chunk_index = index.min(next.total_chunks);
        }
        if let Some(metadata) = self.metadata {
            next.metadata.extend(metadata);
        }
        next
    }
}

/// Lifecycle of one analysis traversal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl SessionStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            SessionStatus::Running => "running",
            SessionStatus::Completed => "completed",
            SessionStatus::Failed => "failed",
            SessionStatus::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Scope of one full multi-page analysis request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisSession {
    pub session_id: String,
    pub analysis_kind: String,
    pub source: String,
    pub source_kind: String,
    pub started_at: DateTime<Utc>,
    pub status: SessionStatus,
    pub progress: Map<String, Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl AnalysisSession {
    pub fn is_running(&self) -> bool {
        self.status == SessionStatus::Running
    }

    pub fn duration(&self) -> Duration {
        (Utc::now() - self.started_at).to_std().unwrap_or_default()
    }
}

/// Field changes accepted by `ContextManager::update_session`
#[derive(Debug, Clone, Default)]
pub struct SessionUpdate {
    pub status: Option<SessionStatus>,
    pub progress: Option<Map<String, Value>>,
    pub result: Option<Value>,
    pub error: Option<String>,
}

impl SessionUpdate {
    pub fn status(status: SessionStatus) -> Self {
        Self {
            status: Some(status),
            ..Default::default()
        }
    }

    pub fn with_progress(mut self, key: impl Into<String>, value: Value) -> Self {
        self.progress
            .get_or_insert_with(Map::new)
            .insert(key.into(), value);
        self
    }

    pub fn with_result(mut self, result: Value) -> Self {
        self.result = Some(result);
        self
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }

    pub(crate) fn apply(self, session: &mut AnalysisSession) {
        if let Some(status) = self.status {
            session.status = status;
        }
        if let Some(progress) = self.progress {
            session.progress.extend(progress);
        }
        if self.result.is_some() {
            session.result = self.result;
        }
        if self.error.is_some() {
            session.error = self.error;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn context(ttl_secs: u64) -> PaginationContext {
        PaginationContext {
            session_id: "s1".into(),
            analysis_id: "a1".into(),
            file_index: 1,
            chunk_index: 2,
            total_files: 4,
            total_chunks: 5,
            file_id: "src/lib.rs".into(),
            strategy: "mixed".into(),
            created_at: Utc::now(),
            ttl_secs,
            metadata: Map::new(),
        }
    }

    #[test]
    fn test_zero_ttl_is_expired_immediately() {
        let ctx = context(0);
        assert!(ctx.is_expired());
        assert_eq!(ctx.time_remaining(), Duration::ZERO);
        assert!(!context(60).is_expired());
    }

    #[test]
    fn test_progress_percentage() {
        let ctx = context(60);
        // (1 * 5 + 2) / (4 * 5)
        assert!((ctx.progress_percentage() - 35.0).abs() < 1e-9);

        let mut done = context(60);
        done.total_chunks = 0;
        assert_eq!(done.progress_percentage(), 100.0);
    }

    #[test]
    fn test_advanced_is_a_copy() {
        let ctx = context(60);
        let next = ctx.advanced(3, 9);
        assert_eq!(ctx.file_index, 1);
        assert_eq!(next.file_index, 3);
        // Clamped to total_chunks
        assert_eq!(next.chunk_index, 5);
        assert_eq!(next.session_id, ctx.session_id);
    }

    #[test]
    fn test_update_merges_metadata() {
        let mut ctx = context(60);
        ctx.metadata.insert("a".into(), json!(1));
        let next = ContextUpdate::default()
            .with_metadata("b", json!(2))
            .with_total_chunks(7)
            .apply(&ctx);
        assert_eq!(next.metadata.get("a"), Some(&json!(1)));
        assert_eq!(next.metadata.get("b"), Some(&json!(2)));
        assert_eq!(next.total_chunks, 7);
    }

    #[test]
    fn test_session_update() {
        let mut session = AnalysisSession {
            session_id: "s".into(),
            analysis_kind: "full".into(),
            source: "/repo".into(),
            source_kind: "local".into(),
            started_at: Utc::now(),
            status: SessionStatus::Running,
            progress: Map::new(),
            result: None,
            error: None,
        };
        SessionUpdate::status(SessionStatus::Failed)
            .with_error("disk gone")
            .with_progress("files_processed", json!(3))
            .apply(&mut session);
        assert!(!session.is_running());
        assert_eq!(session.error.as_deref(), Some("disk gone"));
        assert_eq!(session.progress["files_processed"], json!(3));
    }
}

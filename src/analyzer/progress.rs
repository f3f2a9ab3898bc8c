use serde::Serialize;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// What a progress notification refers to
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProgressDetail {
    File { path: String, success: bool },
    Batch { batch: usize, total_batches: usize },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProgressEvent {
    pub message: String,
    /// 0.0 - 1.0
    pub progress: f64,
    pub completed: usize,
    pub total: usize,
    pub detail: ProgressDetail,
}

impl ProgressEvent {
    pub(crate) fn file(completed: usize, total: usize, path: &str, success: bool) -> Self {
        Self {
            message: format!("Processed {}/{} files", completed, total),
            progress: fraction(completed, total),
            completed,
            total,
            detail: ProgressDetail::File {
                path: path.to_string(),
                success,
            },
        }
    }

    pub(crate) fn batch(batch: usize, total_batches: usize, completed: usize, total: usize) -> Self {
        Self {
            message: format!("Completed batch {}/{}", batch, total_batches),
            progress: fraction(completed, total),
            completed,
            total,
            detail: ProgressDetail::Batch {
                batch,
                total_batches,
            },
        }
    }
}

fn fraction(completed: usize, total: usize) -> f64 {
    if total == 0 {
        1.0
    } else {
        completed as f64 / total as f64
    }
}

pub type ProgressCallback = Arc<dyn Fn(&ProgressEvent) + Send + Sync>;

/// Counts files under analysis right now and the highest count seen
#[derive(Debug, Default)]
pub struct ConcurrencyTracker {
    active: AtomicUsize,
    peak: AtomicUsize,
}

impl ConcurrencyTracker {
    pub fn enter(self: &Arc<Self>) -> ActiveGuard {
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        ActiveGuard {
            tracker: Arc::clone(self),
        }
    }

    pub fn active(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    pub fn reset_peak(&self) {
        self.peak.store(self.active(), Ordering::SeqCst);
    }
}

/// Decrements the active count on drop
pub struct ActiveGuard {
    tracker: Arc<ConcurrencyTracker>,
}

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        self.tracker.active.fetch_sub(1, Ordering::SeqCst);
    }
}

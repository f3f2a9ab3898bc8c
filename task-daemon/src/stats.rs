use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Counters maintained incrementally as tasks move through their lifecycle
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskCounters {
    pub tasks_created: u64,
    pub tasks_completed: u64,
    /// Terminal failures only; attempts that were retried are counted in `retries`
    pub tasks_failed: u64,
    pub tasks_cancelled: u64,
    pub retries: u64,
    pub timeouts: u64,
    pub total_execution_time_ms: u64,
}

impl TaskCounters {
    pub(crate) fn record_execution(&mut self, elapsed: Duration) {
        self.total_execution_time_ms += elapsed.as_millis() as u64;
    }

    pub fn average_execution_time_ms(&self) -> f64 {
        let finished = self.tasks_completed + self.tasks_failed;
        if finished == 0 {
            0.0
        } else {
            self.total_execution_time_ms as f64 / finished as f64
        }
    }
}

/// Snapshot returned by `BackgroundProcessor::stats`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessorStats {
    #[serde(flatten)]
    pub counters: TaskCounters,
    pub average_execution_time_ms: f64,
    pub running_tasks: usize,
    pub pending_tasks: usize,
    pub total_tasks: usize,
    pub queue_size: usize,
    pub workers: usize,
    pub is_running: bool,
    pub uptime_secs: u64,
}

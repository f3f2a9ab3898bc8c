//! Task model: identity, lifecycle status, priority and result records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::error::TaskFailure;

pub type TaskId = String;

/// Invoked once when a task reaches a terminal state through execution
pub type CompletionCallback = Arc<dyn Fn(&TaskResult) + Send + Sync>;

/// Lifecycle status of a background task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
    Paused,
}

impl TaskStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Running => "running",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
            TaskStatus::Cancelled => "cancelled",
            TaskStatus::Paused => "paused",
        }
    }

    /// Parse status from string (case-insensitive)
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "pending" => Some(TaskStatus::Pending),
            "running" => Some(TaskStatus::Running),
            "completed" => Some(TaskStatus::Completed),
            "failed" => Some(TaskStatus::Failed),
            "cancelled" | "canceled" => Some(TaskStatus::Cancelled),
            "paused" => Some(TaskStatus::Paused),
            _ => None,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Cancelled
        )
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Priority levels for queued tasks
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskPriority {
    Low = 1,
    Normal = 2,
    High = 3,
    Urgent = 4,
}

impl TaskPriority {
    /// All priorities, highest first (dequeue order)
    pub const DESCENDING: [TaskPriority; 4] = [
        TaskPriority::Urgent,
        TaskPriority::High,
        TaskPriority::Normal,
        TaskPriority::Low,
    ];

    pub fn as_u8(self) -> u8 {
        self as u8
    }

    /// Parse priority from string (case-insensitive)
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "urgent" | "u" | "4" => Some(TaskPriority::Urgent),
            "high" | "h" | "3" => Some(TaskPriority::High),
            "normal" | "n" | "2" => Some(TaskPriority::Normal),
            "low" | "l" | "1" => Some(TaskPriority::Low),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TaskPriority::Urgent => "urgent",
            TaskPriority::High => "high",
            TaskPriority::Normal => "normal",
            TaskPriority::Low => "low",
        }
    }
}

impl Default for TaskPriority {
    fn default() -> Self {
        TaskPriority::Normal
    }
}

/// Outcome record stored on a task once it finishes
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskResult {
    pub task_id: TaskId,
    pub status: TaskStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<TaskFailure>,
    pub execution_time_ms: u64,
    /// Total attempts made, including the final one
    pub attempts: u32,
}

/// A unit of background work tracked by the processor
#[derive(Clone, Serialize)]
pub struct Task {
    pub id: TaskId,
    pub task_type: String,
    pub parameters: Value,
    pub priority: TaskPriority,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub status: TaskStatus,
    pub progress: Map<String, Value>,
    pub result: Option<TaskResult>,
    /// Error of the most recent failed attempt, kept across retries
    pub last_error: Option<TaskFailure>,
    pub retry_count: u32,
    pub max_retries: u32,
    pub timeout_ms: u64,
    pub metadata: Map<String, Value>,
    #[serde(skip)]
    pub(crate) callback: Option<CompletionCallback>,
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("id", &self.id)
            .field("task_type", &self.task_type)
            .field("priority", &self.priority)
            .field("status", &self.status)
            .field("retry_count", &self.retry_count)
            .field("max_retries", &self.max_retries)
            .field("timeout_ms", &self.timeout_ms)
            .field("has_callback", &self.callback.is_some())
            .finish()
    }
}

impl Task {
    pub(crate) fn new(
        id: TaskId,
        task_type: String,
        parameters: Value,
        priority: TaskPriority,
        timeout: Duration,
        max_retries: u32,
    ) -> Self {
        Self {
            id,
            task_type,
            parameters,
            priority,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            status: TaskStatus::Pending,
            progress: Map::new(),
            result: None,
            last_error: None,
            retry_count: 0,
            max_retries,
            timeout_ms: timeout.as_millis() as u64,
            metadata: Map::new(),
            callback: None,
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Time spent in the current (or last) attempt
    pub fn execution_time(&self) -> Duration {
        match (self.started_at, self.completed_at) {
            (Some(start), Some(end)) => (end - start).to_std().unwrap_or_default(),
            (Some(start), None) => (Utc::now() - start).to_std().unwrap_or_default(),
            _ => Duration::ZERO,
        }
    }

    /// Time since the task was created, or until it completed
    pub fn total_time(&self) -> Duration {
        let end = self.completed_at.unwrap_or_else(Utc::now);
        (end - self.created_at).to_std().unwrap_or_default()
    }

    pub fn update_progress(&mut self, key: impl Into<String>, value: Value) {
        self.progress.insert(key.into(), value);
        self.progress
            .insert("updated_at".to_string(), Value::from(Utc::now().to_rfc3339()));
    }

    /// Whether `self.status -> next` is a legal lifecycle step.
    ///
    /// `failed -> pending` is only legal while retries remain.
    pub fn can_transition(&self, next: TaskStatus) -> bool {
        use TaskStatus::*;
        match (self.status, next) {
            (Pending, Running) | (Pending, Cancelled) | (Pending, Paused) => true,
            (Paused, Pending) | (Paused, Cancelled) => true,
            (Running, Completed) | (Running, Failed) | (Running, Cancelled) => true,
            (Failed, Pending) => self.retry_count < self.max_retries,
            _ => false,
        }
    }

    /// Apply a lifecycle step, returning false (and leaving the task untouched)
    /// when the step is illegal.
    pub(crate) fn transition(&mut self, next: TaskStatus) -> bool {
        if !self.can_transition(next) {
            return false;
        }
        let now = Utc::now();
        match next {
            TaskStatus::Running => {
                self.started_at = Some(now);
                self.completed_at = None;
            }
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Cancelled => {
                self.completed_at = Some(now);
            }
            TaskStatus::Pending => {
                if self.status == TaskStatus::Failed {
                    self.retry_count += 1;
                    self.started_at = None;
                    self.completed_at = None;
                }
            }
            TaskStatus::Paused => {}
        }
        self.status = next;
        true
    }

    pub(crate) fn make_result(&self, result: Option<Value>, error: Option<TaskFailure>) -> TaskResult {
        TaskResult {
            task_id: self.id.clone(),
            status: self.status,
            result,
            error,
            execution_time_ms: self.execution_time().as_millis() as u64,
            attempts: self.retry_count + 1,
        }
    }
}

use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Errors raised at the submission boundary of the processor.
///
/// These are never retried: the caller gets them back immediately.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProcessorError {
    #[error("Task queue is full (capacity {capacity})")]
    QueueFull { capacity: usize },

    #[error("No handler registered for task type: {0}")]
    UnknownTaskType(String),

    #[error("A task with id {0} already exists")]
    DuplicateTaskId(String),

    #[error("Background processor is shutting down")]
    ShuttingDown,
}

/// Why a single task attempt failed. Both variants are retryable.
#[derive(Debug, Error, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TaskFailure {
    #[error("Task timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    #[error("Task execution failed: {message}")]
    Execution { message: String },
}

impl TaskFailure {
    pub fn timeout(timeout: Duration) -> Self {
        TaskFailure::Timeout {
            timeout_ms: timeout.as_millis() as u64,
        }
    }

    pub fn execution(message: impl Into<String>) -> Self {
        TaskFailure::Execution {
            message: message.into(),
        }
    }

    /// Short machine-readable label for logs and result records
    pub fn kind(&self) -> &'static str {
        match self {
            TaskFailure::Timeout { .. } => "timeout",
            TaskFailure::Execution { .. } => "execution",
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, TaskFailure::Timeout { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failure_kinds_are_distinct() {
        let timeout = TaskFailure::timeout(Duration::from_millis(250));
        let exec = TaskFailure::execution("boom");

        assert!(timeout.is_timeout());
        assert!(!exec.is_timeout());
        assert_eq!(timeout.kind(), "timeout");
        assert_eq!(exec.kind(), "execution");
        assert_eq!(timeout.to_string(), "Task timed out after 250ms");
        assert_eq!(exec.to_string(), "Task execution failed: boom");
    }

    #[test]
    fn test_failure_serializes_with_kind_tag() {
        let json = serde_json::to_value(TaskFailure::execution("bad input")).unwrap();
        assert_eq!(json["kind"], "execution");
        assert_eq!(json["message"], "bad input");

        let back: TaskFailure = serde_json::from_value(json).unwrap();
        assert_eq!(back, TaskFailure::execution("bad input"));
    }
}

use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Why one file in a batch could not be analyzed.
///
/// Recorded on the file's [`AnalysisResult`](super::AnalysisResult); never
/// aborts the rest of the batch.
#[derive(Debug, Error, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FileAnalysisError {
    #[error("File too large: {size} bytes exceeds the {limit} byte limit")]
    FileTooLarge { size: u64, limit: u64 },

    #[error("Failed to read file: {message}")]
    UnreadableFile { message: String },

    #[error("Analysis timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    #[error("Analysis failed: {message}")]
    Execution { message: String },
}

impl FileAnalysisError {
    pub fn timeout(timeout: Duration) -> Self {
        FileAnalysisError::Timeout {
            timeout_ms: timeout.as_millis() as u64,
        }
    }

    pub fn unreadable(message: impl Into<String>) -> Self {
        FileAnalysisError::UnreadableFile {
            message: message.into(),
        }
    }

    pub fn execution(message: impl Into<String>) -> Self {
        FileAnalysisError::Execution {
            message: message.into(),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            FileAnalysisError::FileTooLarge { .. } => "file_too_large",
            FileAnalysisError::UnreadableFile { .. } => "unreadable_file",
            FileAnalysisError::Timeout { .. } => "timeout",
            FileAnalysisError::Execution { .. } => "execution",
        }
    }
}

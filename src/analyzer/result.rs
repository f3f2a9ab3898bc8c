use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::time::Duration;

use super::error::FileAnalysisError;

/// Outcome for a single file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisResult {
    pub file_path: String,
    pub success: bool,
    #[serde(default)]
    pub data: Map<String, Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<FileAnalysisError>,
    pub execution_time_ms: u64,
    pub file_size: u64,
}

impl AnalysisResult {
    pub fn succeeded(
        file_path: impl Into<String>,
        data: Map<String, Value>,
        elapsed: Duration,
        file_size: u64,
    ) -> Self {
        Self {
            file_path: file_path.into(),
            success: true,
            data,
            error: None,
            execution_time_ms: elapsed.as_millis() as u64,
            file_size,
        }
    }

    pub fn failed(
        file_path: impl Into<String>,
        error: FileAnalysisError,
        elapsed: Duration,
        file_size: u64,
    ) -> Self {
        Self {
            file_path: file_path.into(),
            success: false,
            data: Map::new(),
            error: Some(error),
            execution_time_ms: elapsed.as_millis() as u64,
            file_size,
        }
    }

    pub fn size_mb(&self) -> f64 {
        self.file_size as f64 / (1024.0 * 1024.0)
    }
}

/// Aggregate over one `analyze` call. Results are in completion order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchAnalysisResult {
    pub total_files: usize,
    pub successful: usize,
    pub failed: usize,
    pub results: Vec<AnalysisResult>,
    pub execution_time_ms: u64,
    #[serde(default)]
    pub errors: Vec<String>,
}

impl BatchAnalysisResult {
    pub fn from_results(total_files: usize, results: Vec<AnalysisResult>, elapsed: Duration) -> Self {
        let successful = results.iter().filter(|r| r.success).count();
        let errors = results
            .iter()
            .filter_map(|r| {
                r.error
                    .as_ref()
                    .map(|e| format!("{}: {}", r.file_path, e))
            })
            .collect();
        Self {
            total_files,
            successful,
            failed: results.len() - successful,
            results,
            execution_time_ms: elapsed.as_millis() as u64,
            errors,
        }
    }

    /// Percentage of files analyzed successfully; 100 for an empty batch
    pub fn success_rate(&self) -> f64 {
        if self.total_files == 0 {
            return 100.0;
        }
        self.successful as f64 / self.total_files as f64 * 100.0
    }

    pub fn result_for(&self, file_path: &str) -> Option<&AnalysisResult> {
        self.results.iter().find(|r| r.file_path == file_path)
    }
}

/// Running totals across every `analyze` call on one analyzer
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AnalyzerStats {
    pub files_processed: u64,
    pub errors: u64,
    pub batches: u64,
    pub total_processing_time_ms: u64,
}

impl AnalyzerStats {
    pub(crate) fn record_batch(&mut self, batch: &BatchAnalysisResult) {
        self.files_processed += batch.results.len() as u64;
        self.errors += batch.failed as u64;
        self.batches += 1;
        self.total_processing_time_ms += batch.execution_time_ms;
    }

    pub fn average_file_time_ms(&self) -> f64 {
        if self.files_processed == 0 {
            0.0
        } else {
            self.total_processing_time_ms as f64 / self.files_processed as f64
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_success_rate() {
        let results = vec![
            AnalysisResult::succeeded("a.rs", Map::new(), Duration::ZERO, 10),
            AnalysisResult::succeeded("b.rs", Map::new(), Duration::ZERO, 10),
            AnalysisResult::failed(
                "c.rs",
                FileAnalysisError::FileTooLarge { size: 20, limit: 10 },
                Duration::ZERO,
                20,
            ),
        ];
        let batch = BatchAnalysisResult::from_results(3, results, Duration::from_millis(5));
        assert_eq!((batch.successful, batch.failed), (2, 1));
        assert!((batch.success_rate() - 66.666).abs() < 0.01);
        assert_eq!(batch.errors.len(), 1);
        assert!(batch.result_for("c.rs").is_some_and(|r| !r.success));

        let empty = BatchAnalysisResult::from_results(0, Vec::new(), Duration::ZERO);
        assert_eq!(empty.success_rate(), 100.0);
    }

    #[test]
    fn test_stats_average() {
        let mut stats = AnalyzerStats::default();
        assert_eq!(stats.average_file_time_ms(), 0.0);
        let batch = BatchAnalysisResult::from_results(
            2,
            vec![
                AnalysisResult::succeeded("a", Map::new(), Duration::ZERO, 1),
                AnalysisResult::succeeded("b", Map::new(), Duration::ZERO, 1),
            ],
            Duration::from_millis(40),
        );
        stats.record_batch(&batch);
        assert_eq!(stats.average_file_time_ms(), 20.0);
    }
}

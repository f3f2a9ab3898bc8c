//! Background jobs that run the concurrent analyzer through the task processor.

use anyhow::{Context, Result};
use async_trait::async_trait;
use ignore::WalkBuilder;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

use crate::analyzer::ConcurrentAnalyzer;
use task_daemon::{Task, TaskContext, TaskHandler, TaskRequest};

/// Task type served by [`AnalyzeFilesHandler`]
pub const ANALYZE_FILES_TASK: &str = "analyze_files";

/// Directories skipped on top of the gitignore rules
const ALWAYS_SKIPPED: &[&str] = &[
    "node_modules",
    "target",
    "dist",
    "build",
    "vendor",
    "__pycache__",
    ".git",
    ".svn",
    ".hg",
];

/// Regular files under `root`, gitignore-aware, sorted by path
pub fn discover_files(root: &Path) -> Vec<PathBuf> {
    let mut builder = WalkBuilder::new(root);
    builder.git_ignore(true);
    builder.git_global(true);
    builder.git_exclude(true);
    builder.filter_entry(|entry| {
        entry
            .file_name()
            .to_str()
            .map_or(true, |name| !ALWAYS_SKIPPED.contains(&name))
    });

    let mut files = Vec::new();
    for entry in builder.build() {
        match entry {
            Ok(entry) if entry.file_type().is_some_and(|t| t.is_file()) => {
                files.push(entry.into_path());
            }
            Ok(_) => {}
            Err(e) => debug!("Skipping unreadable entry: {}", e),
        }
    }
    files.sort();
    files
}

/// Parameters of an `analyze_files` task.
///
/// Either `paths` or `root` must be given; `root` is walked when `paths` is empty.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalyzeFilesParams {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub paths: Vec<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub root: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub kinds: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub batch_size: Option<usize>,
}

impl AnalyzeFilesParams {
    pub fn for_root(root: impl Into<PathBuf>) -> Self {
        Self {
            root: Some(root.into()),
            ..Default::default()
        }
    }

    pub fn for_paths(paths: Vec<PathBuf>) -> Self {
        Self {
            paths,
            ..Default::default()
        }
    }

    pub fn with_batch_size(mut self, batch_size: Option<usize>) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub fn with_kinds(mut self, kinds: Vec<String>) -> Self {
        self.kinds = kinds;
        self
    }

    pub fn into_request(self) -> Result<TaskRequest> {
        let parameters = serde_json::to_value(self).context("Failed to encode task parameters")?;
        Ok(TaskRequest::new(ANALYZE_FILES_TASK, parameters))
    }

    /// Explicit paths, or the files under `root`. The walk runs on the
    /// blocking pool.
    async fn resolve_paths(&self) -> Result<Vec<PathBuf>> {
        if !self.paths.is_empty() {
            return Ok(self.paths.clone());
        }
        let Some(root) = self.root.clone() else {
            anyhow::bail!("analyze_files needs either `paths` or `root`");
        };
        tokio::task::spawn_blocking(move || discover_files(&root))
            .await
            .context("File discovery task failed")
    }
}

/// Runs a batch analysis as a background task; the result is the batch summary
pub struct AnalyzeFilesHandler {
    analyzer: Arc<ConcurrentAnalyzer>,
}

impl AnalyzeFilesHandler {
    pub fn new(analyzer: Arc<ConcurrentAnalyzer>) -> Self {
        Self { analyzer }
    }
}

#[async_trait]
impl TaskHandler for AnalyzeFilesHandler {
    async fn handle(&self, task: Task, ctx: TaskContext) -> Result<Value> {
        let params: AnalyzeFilesParams = serde_json::from_value(task.parameters.clone())
            .context("Invalid analyze_files parameters")?;
        let paths = params.resolve_paths().await?;

        ctx.report_progress("files_total", json!(paths.len())).await;
        if ctx.is_cancelled().await {
            anyhow::bail!("task {} was cancelled before analysis started", ctx.task_id());
        }

        info!("Task {} analyzing {} files", ctx.task_id(), paths.len());
        let batch = self
            .analyzer
            .analyze(&paths, &params.kinds, params.batch_size)
            .await;

        ctx.report_progress("files_processed", json!(batch.results.len()))
            .await;
        ctx.report_progress("success_rate", json!(batch.success_rate()))
            .await;
        serde_json::to_value(&batch).context("Failed to encode batch result")
    }
}

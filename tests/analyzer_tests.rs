//! Integration tests for the concurrent analyzer and the background job that wraps it

use anyhow::Result;
use async_trait::async_trait;
use codewindow::analyzer::{
    AnalyzerSettings, ConcurrentAnalyzer, ContentAnalyzer, FileAnalysisError, FileAnalyzer,
    ProgressDetail, ProgressEvent,
};
use codewindow::jobs::{AnalyzeFilesHandler, AnalyzeFilesParams, ANALYZE_FILES_TASK};
use codewindow::tokens::TokenEstimator;
use serde_json::{json, Value};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use task_daemon::{BackgroundProcessor, ProcessorConfig, TaskStatus};
use tempfile::TempDir;

/// Sleeps so that overlapping analyses are observable
struct Slow(Duration);

#[async_trait]
impl FileAnalyzer for Slow {
    async fn analyze(&self, _file_path: &str, content: &str) -> Result<Value> {
        tokio::time::sleep(self.0).await;
        Ok(json!({ "bytes": content.len() }))
    }
}

/// Fails by panicking instead of returning an error
struct Exploding;

#[async_trait]
impl FileAnalyzer for Exploding {
    async fn analyze(&self, _file_path: &str, _content: &str) -> Result<Value> {
        panic!("boom");
    }
}

struct TodoCounter;

#[async_trait]
impl ContentAnalyzer for TodoCounter {
    async fn analyze(&self, content: &str, _file_path: &str) -> Result<Value> {
        Ok(json!(content.matches("TODO").count()))
    }
}

fn write_files(dir: &Path, count: usize, ext: &str) -> Vec<PathBuf> {
    (0..count)
        .map(|i| {
            let path = dir.join(format!("file_{i:02}.{ext}"));
            fs::write(&path, format!("// file {i}\n")).unwrap();
            path
        })
        .collect()
}

fn key(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

#[tokio::test]
async fn test_concurrency_never_exceeds_the_limit() {
    let dir = TempDir::new().unwrap();
    let files = write_files(dir.path(), 12, "slow");

    let analyzer = ConcurrentAnalyzer::new(
        AnalyzerSettings::default().with_max_concurrent_files(3),
        TokenEstimator::default(),
    );
    analyzer.register_file_analyzer("slow", Arc::new(Slow(Duration::from_millis(40))));

    let batch = analyzer.analyze(&files, &[], None).await;

    assert_eq!(batch.total_files, 12);
    assert_eq!(batch.successful, 12);
    assert!(analyzer.peak_concurrency() <= 3);
    assert!(analyzer.peak_concurrency() >= 1);
    assert_eq!(analyzer.active_files(), 0);
    for path in &files {
        let result = batch.result_for(&key(path)).unwrap();
        assert_eq!(result.data["file_analysis"]["bytes"], json!(fs::metadata(path).unwrap().len()));
    }
}

#[tokio::test]
async fn test_failures_are_reported_per_file() {
    let dir = TempDir::new().unwrap();
    let ok = dir.path().join("ok.txt");
    let big = dir.path().join("big.txt");
    let missing = dir.path().join("missing.txt");
    fs::write(&ok, "fine\n").unwrap();
    fs::write(&big, "x".repeat(4096)).unwrap();

    let analyzer = ConcurrentAnalyzer::new(
        AnalyzerSettings::default().with_max_file_size(1024),
        TokenEstimator::default(),
    );
    let batch = analyzer
        .analyze(&[ok.clone(), big.clone(), missing.clone()], &[], None)
        .await;

    assert_eq!((batch.successful, batch.failed), (1, 2));
    assert_eq!(batch.errors.len(), 2);
    assert!((batch.success_rate() - 100.0 / 3.0).abs() < 0.01);
    assert!(matches!(
        batch.result_for(&key(&big)).unwrap().error,
        Some(FileAnalysisError::FileTooLarge { size: 4096, limit: 1024 })
    ));
    assert!(matches!(
        batch.result_for(&key(&missing)).unwrap().error,
        Some(FileAnalysisError::UnreadableFile { .. })
    ));

    let stats = analyzer.stats();
    assert_eq!(stats.files_processed, 3);
    assert_eq!(stats.errors, 2);
    assert_eq!(stats.batches, 1);
}

#[tokio::test]
async fn test_slow_file_times_out_without_blocking_others() {
    let dir = TempDir::new().unwrap();
    let slow = dir.path().join("stuck.slow");
    let quick = dir.path().join("quick.txt");
    fs::write(&slow, "wait").unwrap();
    fs::write(&quick, "done").unwrap();

    let analyzer = ConcurrentAnalyzer::new(
        AnalyzerSettings::default().with_timeout_per_file(Duration::from_millis(100)),
        TokenEstimator::default(),
    );
    analyzer.register_file_analyzer(".slow", Arc::new(Slow(Duration::from_secs(5))));

    let batch = analyzer.analyze(&[slow.clone(), quick.clone()], &[], None).await;
    assert!(batch.result_for(&key(&quick)).unwrap().success);
    assert!(matches!(
        batch.result_for(&key(&slow)).unwrap().error,
        Some(FileAnalysisError::Timeout { .. })
    ));
}

#[tokio::test]
async fn test_panicking_analyzer_is_reported_against_its_file() {
    let dir = TempDir::new().unwrap();
    let bad = dir.path().join("bad.boom");
    let good = dir.path().join("good.txt");
    fs::write(&bad, "payload").unwrap();
    fs::write(&good, "fine\n").unwrap();

    let analyzer = ConcurrentAnalyzer::new(
        AnalyzerSettings::default().with_max_concurrent_files(1),
        TokenEstimator::default(),
    );
    analyzer.register_file_analyzer(".boom", Arc::new(Exploding));

    let batch = analyzer.analyze(&[bad.clone(), good.clone()], &[], None).await;
    assert_eq!((batch.total_files, batch.successful, batch.failed), (2, 1, 1));
    assert!(batch.result_for(&key(&good)).unwrap().success);

    let failed = batch.result_for(&key(&bad)).unwrap();
    assert_eq!(failed.file_path, key(&bad));
    match &failed.error {
        Some(FileAnalysisError::Execution { message }) => assert!(message.contains("boom")),
        other => panic!("expected an execution error, got {other:?}"),
    }
    // the permit was released despite the panic
    assert_eq!(analyzer.active_files(), 0);
}

#[tokio::test]
async fn test_content_kinds_and_legacy_encodings() {
    let dir = TempDir::new().unwrap();
    let notes = dir.path().join("notes.txt");
    let legacy = dir.path().join("legacy.txt");
    fs::write(&notes, "TODO one\nTODO two\n").unwrap();
    // "café" in Latin-1
    fs::write(&legacy, [0x63, 0x61, 0x66, 0xE9, 0x0A]).unwrap();

    let analyzer = ConcurrentAnalyzer::default();
    analyzer.register_content_analyzer("todos", Arc::new(TodoCounter));
    assert_eq!(analyzer.registered_content_analyzers(), vec!["todos"]);

    let kinds = vec!["todos".to_string()];
    let batch = analyzer.analyze(&[notes.clone(), legacy.clone()], &kinds, None).await;
    assert_eq!(batch.result_for(&key(&notes)).unwrap().data["todos"], 2);

    let legacy_result = batch.result_for(&key(&legacy)).unwrap();
    assert!(legacy_result.success);
    assert_eq!(legacy_result.data["encoding"], "latin-1");
    assert_eq!(legacy_result.data["todos"], 0);
}

#[tokio::test]
async fn test_batches_report_progress_in_order() {
    let dir = TempDir::new().unwrap();
    let files = write_files(dir.path(), 7, "txt");

    let analyzer = ConcurrentAnalyzer::new(
        AnalyzerSettings::default().with_batch_pause(Duration::from_millis(1)),
        TokenEstimator::default(),
    );
    let events: Arc<Mutex<Vec<ProgressEvent>>> = Arc::default();
    let sink = Arc::clone(&events);
    analyzer.add_progress_callback(Arc::new(move |event: &ProgressEvent| {
        sink.lock().unwrap().push(event.clone());
    }));

    let batch = analyzer.analyze(&files, &[], Some(3)).await;
    assert_eq!(batch.successful, 7);

    let events = events.lock().unwrap();
    let batches: Vec<(usize, usize)> = events
        .iter()
        .filter_map(|e| match e.detail {
            ProgressDetail::Batch {
                batch,
                total_batches,
            } => Some((batch, total_batches)),
            _ => None,
        })
        .collect();
    assert_eq!(batches, vec![(1, 3), (2, 3), (3, 3)]);

    let completed: Vec<usize> = events
        .iter()
        .filter(|e| matches!(e.detail, ProgressDetail::File { .. }))
        .map(|e| e.completed)
        .collect();
    assert_eq!(completed, (1..=7).collect::<Vec<_>>());
    assert_eq!(events.last().unwrap().progress, 1.0);
}

#[tokio::test]
async fn test_job_analyzes_a_directory_in_the_background() {
    let dir = TempDir::new().unwrap();
    write_files(dir.path(), 5, "js");
    fs::write(dir.path().join(".gitignore"), "ignored/\n").unwrap();
    fs::create_dir(dir.path().join("ignored")).unwrap();
    fs::write(dir.path().join("ignored/skip.js"), "skip").unwrap();
    // gitignore rules only apply inside a repository
    fs::create_dir(dir.path().join(".git")).unwrap();

    let processor = BackgroundProcessor::new(ProcessorConfig::default().with_workers(2));
    let analyzer = Arc::new(ConcurrentAnalyzer::default());
    processor.register_task_handler(ANALYZE_FILES_TASK, AnalyzeFilesHandler::new(analyzer.clone()));
    processor.start().await;

    let request = AnalyzeFilesParams::for_root(dir.path())
        .with_batch_size(Some(2))
        .into_request()
        .unwrap();
    let task_id = processor.submit(request).await.unwrap();
    let task = processor
        .wait_for(&task_id, Duration::from_secs(10))
        .await
        .unwrap();
    processor.stop(Duration::from_secs(1)).await;

    assert_eq!(task.status, TaskStatus::Completed);
    let result = task.result.unwrap().result.unwrap();
    // hidden files and ignored directories are not walked
    assert_eq!(result["total_files"], 5);
    assert_eq!(result["failed"], 0);
    assert_eq!(task.progress["files_processed"], 5);
    assert_eq!(analyzer.stats().batches, 1);
}

#[tokio::test]
async fn test_job_without_inputs_fails() {
    let processor = BackgroundProcessor::new(
        ProcessorConfig::default()
            .with_workers(1)
            .with_default_max_retries(0),
    );
    processor.register_task_handler(
        ANALYZE_FILES_TASK,
        AnalyzeFilesHandler::new(Arc::new(ConcurrentAnalyzer::default())),
    );
    processor.start().await;

    let request = AnalyzeFilesParams::default().into_request().unwrap();
    let task_id = processor.submit(request).await.unwrap();
    let task = processor
        .wait_for(&task_id, Duration::from_secs(5))
        .await
        .unwrap();
    processor.stop(Duration::from_secs(1)).await;

    assert_eq!(task.status, TaskStatus::Failed);
    assert!(task.last_error.is_some());
}

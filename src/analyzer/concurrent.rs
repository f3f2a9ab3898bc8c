use futures::FutureExt;
use std::any::Any;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, RwLock};
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, error, info};

use super::encoding::{decode_bytes, TextEncoding};
use super::error::FileAnalysisError;
use super::progress::{ConcurrencyTracker, ProgressCallback, ProgressEvent};
use super::registry::{AnalyzerRegistry, ContentAnalyzer, FileAnalyzer};
use super::result::{AnalysisResult, AnalyzerStats, BatchAnalysisResult};
use crate::tokens::TokenEstimator;

pub const DEFAULT_MAX_CONCURRENT_FILES: usize = 8;
pub const DEFAULT_MAX_FILE_SIZE: u64 = 10 * 1024 * 1024;
pub const DEFAULT_FILE_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_BATCH_PAUSE: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnalyzerSettings {
    pub max_concurrent_files: usize,
    /// Bytes; larger files are rejected before they are read
    pub max_file_size: u64,
    /// Covers reading and analyzing one file, not the wait for a permit
    pub timeout_per_file: Duration,
    /// Pause between sequential batches
    pub batch_pause: Duration,
}

impl Default for AnalyzerSettings {
    fn default() -> Self {
        Self {
            max_concurrent_files: DEFAULT_MAX_CONCURRENT_FILES,
            max_file_size: DEFAULT_MAX_FILE_SIZE,
            timeout_per_file: DEFAULT_FILE_TIMEOUT,
            batch_pause: DEFAULT_BATCH_PAUSE,
        }
    }
}

impl AnalyzerSettings {
    pub fn with_max_concurrent_files(mut self, max: usize) -> Self {
        self.max_concurrent_files = max;
        self
    }

    pub fn with_max_file_size(mut self, bytes: u64) -> Self {
        self.max_file_size = bytes;
        self
    }

    pub fn with_timeout_per_file(mut self, timeout: Duration) -> Self {
        self.timeout_per_file = timeout;
        self
    }

    pub fn with_batch_pause(mut self, pause: Duration) -> Self {
        self.batch_pause = pause;
        self
    }
}

/// State shared with the per-file tasks
struct Shared {
    settings: AnalyzerSettings,
    estimator: TokenEstimator,
    semaphore: Semaphore,
    tracker: Arc<ConcurrencyTracker>,
}

impl Shared {
    async fn analyze_file(
        &self,
        path: &Path,
        registry: &AnalyzerRegistry,
        kinds: &[String],
    ) -> AnalysisResult {
        let file_path = path.display().to_string();
        let Ok(_permit) = self.semaphore.acquire().await else {
            return AnalysisResult::failed(
                file_path,
                FileAnalysisError::execution("analyzer has been shut down"),
                Duration::ZERO,
                0,
            );
        };
        let _active = self.tracker.enter();
        let started = Instant::now();

        let size = match tokio::fs::metadata(path).await {
            Ok(meta) if meta.is_file() => meta.len(),
            Ok(_) => {
                let error = FileAnalysisError::unreadable("not a regular file");
                return AnalysisResult::failed(file_path, error, started.elapsed(), 0);
            }
            Err(e) => {
                let error = FileAnalysisError::unreadable(e.to_string());
                return AnalysisResult::failed(file_path, error, started.elapsed(), 0);
            }
        };
        if size > self.settings.max_file_size {
            let error = FileAnalysisError::FileTooLarge {
                size,
                limit: self.settings.max_file_size,
            };
            return AnalysisResult::failed(file_path, error, started.elapsed(), size);
        }

        let timeout = self.settings.timeout_per_file;
        let work = async {
            let bytes = tokio::fs::read(path)
                .await
                .map_err(|e| FileAnalysisError::unreadable(e.to_string()))?;
            let (content, encoding) = decode_bytes(&bytes);
            let mut data = registry
                .run(&file_path, &content, kinds, &self.estimator)
                .await;
            if encoding != TextEncoding::Utf8 {
                debug!("Decoded {} as {}", file_path, encoding.as_str());
                data.insert("encoding".into(), encoding.as_str().into());
            }
            Ok::<_, FileAnalysisError>(data)
        };

        match tokio::time::timeout(timeout, work).await {
            Ok(Ok(data)) => AnalysisResult::succeeded(file_path, data, started.elapsed(), size),
            Ok(Err(e)) => {
                debug!("Failed to analyze {}: {}", file_path, e);
                AnalysisResult::failed(file_path, e, started.elapsed(), size)
            }
            Err(_) => {
                debug!("Analysis of {} timed out after {:?}", file_path, timeout);
                AnalysisResult::failed(
                    file_path,
                    FileAnalysisError::timeout(timeout),
                    started.elapsed(),
                    size,
                )
            }
        }
    }
}

/// Analyzes many files in parallel under a fixed number of permits.
///
/// Each file is isolated: its own size check, timeout, decoding fallback and
/// error record. A failing file never aborts the batch.
pub struct ConcurrentAnalyzer {
    shared: Arc<Shared>,
    registry: RwLock<AnalyzerRegistry>,
    callbacks: RwLock<Vec<ProgressCallback>>,
    stats: Mutex<AnalyzerStats>,
}

impl ConcurrentAnalyzer {
    pub fn new(settings: AnalyzerSettings, estimator: TokenEstimator) -> Self {
        let permits = settings.max_concurrent_files.max(1);
        Self {
            shared: Arc::new(Shared {
                settings,
                estimator,
                semaphore: Semaphore::new(permits),
                tracker: Arc::new(ConcurrencyTracker::default()),
            }),
            registry: RwLock::new(AnalyzerRegistry::new()),
            callbacks: RwLock::new(Vec::new()),
            stats: Mutex::new(AnalyzerStats::default()),
        }
    }

    /// Start from the given registry instead of an empty one
    pub fn with_registry(self, registry: AnalyzerRegistry) -> Self {
        *self.registry.write().unwrap_or_else(|p| p.into_inner()) = registry;
        self
    }

    pub fn settings(&self) -> &AnalyzerSettings {
        &self.shared.settings
    }

    pub fn register_file_analyzer(&self, extension: &str, analyzer: Arc<dyn FileAnalyzer>) {
        self.registry
            .write()
            .unwrap_or_else(|p| p.into_inner())
            .register_file_analyzer(extension, analyzer);
        info!("Registered analyzer for {} files", extension);
    }

    pub fn register_content_analyzer(&self, kind: &str, analyzer: Arc<dyn ContentAnalyzer>) {
        self.registry
            .write()
            .unwrap_or_else(|p| p.into_inner())
            .register_content_analyzer(kind, analyzer);
        info!("Registered content analyzer for {}", kind);
    }

    pub fn registered_file_analyzers(&self) -> Vec<String> {
        self.registry_snapshot().file_extensions()
    }

    pub fn registered_content_analyzers(&self) -> Vec<String> {
        self.registry_snapshot().content_kinds()
    }

    pub fn add_progress_callback(&self, callback: ProgressCallback) {
        self.callbacks
            .write()
            .unwrap_or_else(|p| p.into_inner())
            .push(callback);
    }

    pub fn stats(&self) -> AnalyzerStats {
        self.stats.lock().unwrap_or_else(|p| p.into_inner()).clone()
    }

    /// Most files seen under analysis at the same time
    pub fn peak_concurrency(&self) -> usize {
        self.shared.tracker.peak()
    }

    pub fn active_files(&self) -> usize {
        self.shared.tracker.active()
    }

    fn registry_snapshot(&self) -> AnalyzerRegistry {
        self.registry
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .clone()
    }

    fn callbacks_snapshot(&self) -> Vec<ProgressCallback> {
        self.callbacks
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .clone()
    }

    fn notify(callbacks: &[ProgressCallback], event: &ProgressEvent) {
        for callback in callbacks {
            callback(event);
        }
    }

    /// Analyze `paths`, optionally in sequential batches of `batch_size`.
    ///
    /// Results are in completion order; look them up by path.
    pub async fn analyze<P: AsRef<Path>>(
        &self,
        paths: &[P],
        kinds: &[String],
        batch_size: Option<usize>,
    ) -> BatchAnalysisResult {
        let started = Instant::now();
        let paths: Vec<PathBuf> = paths.iter().map(|p| p.as_ref().to_path_buf()).collect();
        let total = paths.len();
        let registry = Arc::new(self.registry_snapshot());
        let callbacks = self.callbacks_snapshot();
        let kinds: Arc<[String]> = kinds.into();

        info!(
            "Analyzing {} files with up to {} in parallel",
            total, self.shared.settings.max_concurrent_files
        );

        let mut results = Vec::with_capacity(total);
        match batch_size.filter(|&size| size > 0) {
            Some(size) => {
                let total_batches = total.div_ceil(size);
                for (index, batch) in paths.chunks(size).enumerate() {
                    let number = index + 1;
                    info!(
                        "Processing batch {}/{} ({} files)",
                        number,
                        total_batches,
                        batch.len()
                    );
                    let done = results.len();
                    let batch_results = self
                        .analyze_concurrent(batch, &registry, &kinds, done, total, &callbacks)
                        .await;
                    results.extend(batch_results);

                    let event = ProgressEvent::batch(number, total_batches, results.len(), total);
                    Self::notify(&callbacks, &event);

                    if number < total_batches {
                        tokio::time::sleep(self.shared.settings.batch_pause).await;
                    }
                }
            }
            None => {
                let all = self
                    .analyze_concurrent(&paths, &registry, &kinds, 0, total, &callbacks)
                    .await;
                results.extend(all);
            }
        }

        let batch = BatchAnalysisResult::from_results(total, results, started.elapsed());
        self.stats
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .record_batch(&batch);

        info!(
            "Batch analysis completed: {} successful, {} failed, {}ms total",
            batch.successful, batch.failed, batch.execution_time_ms
        );
        batch
    }

    async fn analyze_concurrent(
        &self,
        paths: &[PathBuf],
        registry: &Arc<AnalyzerRegistry>,
        kinds: &Arc<[String]>,
        already_done: usize,
        total: usize,
        callbacks: &[ProgressCallback],
    ) -> Vec<AnalysisResult> {
        let mut tasks = JoinSet::new();
        // Paths still waiting for a result
        let mut outstanding: HashMap<String, usize> = HashMap::new();
        for path in paths {
            let shared = Arc::clone(&self.shared);
            let registry = Arc::clone(registry);
            let kinds = Arc::clone(kinds);
            let path = path.clone();
            *outstanding.entry(path.display().to_string()).or_default() += 1;
            tasks.spawn(async move {
                let work = shared.analyze_file(&path, &registry, &kinds);
                match AssertUnwindSafe(work).catch_unwind().await {
                    Ok(result) => result,
                    Err(panic) => {
                        let file_path = path.display().to_string();
                        let message = panic_message(panic.as_ref());
                        error!("Analyzer panicked on {}: {}", file_path, message);
                        AnalysisResult::failed(
                            file_path,
                            FileAnalysisError::execution(format!("analyzer panicked: {message}")),
                            Duration::ZERO,
                            0,
                        )
                    }
                }
            });
        }

        let mut results = Vec::with_capacity(paths.len());
        let record = |result: AnalysisResult, results: &mut Vec<AnalysisResult>| {
            let completed = already_done + results.len() + 1;
            let event = ProgressEvent::file(completed, total, &result.file_path, result.success);
            Self::notify(callbacks, &event);
            results.push(result);
        };
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(result) => {
                    if let Some(count) = outstanding.get_mut(&result.file_path) {
                        *count -= 1;
                    }
                    record(result, &mut results);
                }
                Err(e) => error!("File analysis task did not finish: {}", e),
            }
        }

        // A task that ended without a result (e.g. cancelled) still gets one
        for (file_path, count) in outstanding {
            for _ in 0..count {
                let error = FileAnalysisError::execution("analysis task did not complete");
                record(
                    AnalysisResult::failed(file_path.clone(), error, Duration::ZERO, 0),
                    &mut results,
                );
            }
        }
        results
    }

    /// Analyze one file under the same permit pool and limits
    pub async fn analyze_single_file(&self, path: impl AsRef<Path>, kinds: &[String]) -> AnalysisResult {
        let registry = self.registry_snapshot();
        self.shared
            .analyze_file(path.as_ref(), &registry, kinds)
            .await
    }

    /// Refuse further work; files already holding a permit finish normally
    pub fn shutdown(&self) {
        info!("Shutting down concurrent analyzer");
        self.shared.semaphore.close();
        self.callbacks
            .write()
            .unwrap_or_else(|p| p.into_inner())
            .clear();
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

impl Default for ConcurrentAnalyzer {
    fn default() -> Self {
        Self::new(AnalyzerSettings::default(), TokenEstimator::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyzer::ProgressDetail;
    use anyhow::Result;
    use async_trait::async_trait;
    use serde_json::{json, Value};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    fn write(dir: &TempDir, name: &str, content: &[u8]) -> PathBuf {
        let path = dir.path().join(name);
        std::fs::write(&path, content).unwrap();
        path
    }

    struct Slow {
        delay: Duration,
        active: AtomicUsize,
        peak: AtomicUsize,
    }

    impl Slow {
        fn new(delay: Duration) -> Arc<Self> {
            Arc::new(Self {
                delay,
                active: AtomicUsize::new(0),
                peak: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl FileAnalyzer for Slow {
        async fn analyze(&self, _file_path: &str, content: &str) -> Result<Value> {
            let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            self.active.fetch_sub(1, Ordering::SeqCst);
            Ok(json!({ "len": content.len() }))
        }
    }

    #[tokio::test]
    async fn test_oversized_file_fails_alone() {
        let dir = TempDir::new().unwrap();
        let files = vec![
            write(&dir, "a.txt", b"alpha\n"),
            write(&dir, "b.txt", b"beta\n"),
            write(&dir, "big.txt", &[b'x'; 512]),
        ];
        let analyzer = ConcurrentAnalyzer::new(
            AnalyzerSettings::default().with_max_file_size(100),
            TokenEstimator::default(),
        );

        let batch = analyzer.analyze(&files, &[], None).await;
        assert_eq!(batch.total_files, 3);
        assert_eq!((batch.successful, batch.failed), (2, 1));
        assert!((batch.success_rate() - 66.7).abs() < 0.1);

        let big = batch
            .result_for(&files[2].display().to_string())
            .unwrap();
        assert_eq!(
            big.error,
            Some(FileAnalysisError::FileTooLarge {
                size: 512,
                limit: 100
            })
        );
        assert_eq!(analyzer.stats().files_processed, 3);
        assert_eq!(analyzer.stats().errors, 1);
    }

    #[tokio::test]
    async fn test_permits_bound_concurrency() {
        let dir = TempDir::new().unwrap();
        let files: Vec<PathBuf> = (0..12)
            .map(|i| write(&dir, &format!("f{i}.txt"), b"data\n"))
            .collect();
        let analyzer = ConcurrentAnalyzer::new(
            AnalyzerSettings::default().with_max_concurrent_files(3),
            TokenEstimator::default(),
        );
        let slow = Slow::new(Duration::from_millis(30));
        analyzer.register_file_analyzer("txt", slow.clone());

        let batch = analyzer.analyze(&files, &[], None).await;
        assert_eq!(batch.successful, 12);
        assert!(slow.peak.load(Ordering::SeqCst) <= 3);
        assert!(analyzer.peak_concurrency() <= 3);
        assert!(analyzer.peak_concurrency() >= 1);
        assert_eq!(analyzer.active_files(), 0);
        assert_eq!(batch.results[0].data["file_analysis"]["len"], 5);
    }

    #[tokio::test]
    async fn test_timeout_and_missing_file() {
        let dir = TempDir::new().unwrap();
        let slow_file = write(&dir, "slow.txt", b"zzz");
        let missing = dir.path().join("missing.txt");
        let analyzer = ConcurrentAnalyzer::new(
            AnalyzerSettings::default().with_timeout_per_file(Duration::from_millis(20)),
            TokenEstimator::default(),
        );
        analyzer.register_file_analyzer(".txt", Slow::new(Duration::from_secs(5)));

        let result = analyzer.analyze_single_file(&slow_file, &[]).await;
        assert_eq!(result.error, Some(FileAnalysisError::Timeout { timeout_ms: 20 }));

        let result = analyzer.analyze_single_file(&missing, &[]).await;
        assert!(matches!(
            result.error,
            Some(FileAnalysisError::UnreadableFile { .. })
        ));
    }

    #[tokio::test]
    async fn test_batches_report_progress() {
        let dir = TempDir::new().unwrap();
        let files: Vec<PathBuf> = (0..5)
            .map(|i| write(&dir, &format!("{i}.md"), b"# title\n"))
            .collect();
        let analyzer = ConcurrentAnalyzer::new(
            AnalyzerSettings::default().with_batch_pause(Duration::from_millis(1)),
            TokenEstimator::default(),
        );
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = events.clone();
        analyzer.add_progress_callback(Arc::new(move |event: &ProgressEvent| {
            sink.lock().unwrap().push(event.clone());
        }));

        let batch = analyzer.analyze(&files, &[], Some(2)).await;
        assert_eq!(batch.successful, 5);

        let events = events.lock().unwrap();
        let file_events: Vec<_> = events
            .iter()
            .filter(|e| matches!(e.detail, ProgressDetail::File { .. }))
            .map(|e| e.completed)
            .collect();
        assert_eq!(file_events, vec![1, 2, 3, 4, 5]);
        assert_eq!(events.len(), 5 + 3);
        assert_eq!(events.last().unwrap().progress, 1.0);
    }

    #[tokio::test]
    async fn test_shutdown_refuses_new_work() {
        let dir = TempDir::new().unwrap();
        let file = write(&dir, "a.txt", b"a");
        let analyzer = ConcurrentAnalyzer::default();
        analyzer.shutdown();
        let result = analyzer.analyze_single_file(&file, &[]).await;
        assert!(matches!(result.error, Some(FileAnalysisError::Execution { .. })));
    }
}

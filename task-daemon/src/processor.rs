//! Background task processor
//!
//! Owns the task map, a bounded priority queue and a fixed pool of worker
//! loops. Workers pull one task at a time, run the registered handler under
//! the task's timeout and either store the result, schedule a retry or mark
//! the task terminally failed. A separate sweep loop drops tasks that have
//! been finished for longer than the retention window.
//!
//! Lock discipline: the task map, the handler table and the counters each
//! have their own lock and no code path holds two of them at once.

use serde_json::{Map, Value};
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex, RwLock as StdRwLock};
use std::time::{Duration, Instant};
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};
use tracing::{debug, info, warn};

use crate::config::ProcessorConfig;
use crate::error::{ProcessorError, TaskFailure};
use crate::handler::{TaskContext, TaskHandler};
use crate::queue::{QueueItem, TaskQueue};
use crate::stats::{ProcessorStats, TaskCounters};
use crate::task::{CompletionCallback, Task, TaskId, TaskPriority, TaskResult, TaskStatus};

pub(crate) type TaskMap = Mutex<HashMap<TaskId, Task>>;

/// Idle workers re-check the queue at least this often
const IDLE_POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Polling interval used by `wait_for`
const WAIT_POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Everything needed to submit one task
pub struct TaskRequest {
    task_type: String,
    parameters: Value,
    priority: TaskPriority,
    timeout: Option<Duration>,
    max_retries: Option<u32>,
    callback: Option<CompletionCallback>,
    metadata: Map<String, Value>,
    id: Option<TaskId>,
}

impl TaskRequest {
    pub fn new(task_type: impl Into<String>, parameters: Value) -> Self {
        Self {
            task_type: task_type.into(),
            parameters,
            priority: TaskPriority::Normal,
            timeout: None,
            max_retries: None,
            callback: None,
            metadata: Map::new(),
            id: None,
        }
    }

    pub fn with_priority(mut self, priority: TaskPriority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = Some(max_retries);
        self
    }

    pub fn with_callback<F>(mut self, callback: F) -> Self
    where
        F: Fn(&TaskResult) + Send + Sync + 'static,
    {
        self.callback = Some(Arc::new(callback));
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    /// Use a caller-chosen id instead of a generated UUID
    pub fn with_id(mut self, id: impl Into<TaskId>) -> Self {
        self.id = Some(id.into());
        self
    }
}

/// Filters for [`BackgroundProcessor::list`]
#[derive(Debug, Clone, Default)]
pub struct TaskFilter {
    pub status: Option<TaskStatus>,
    pub task_type: Option<String>,
    pub limit: Option<usize>,
}

impl TaskFilter {
    pub fn with_status(mut self, status: TaskStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_type(mut self, task_type: impl Into<String>) -> Self {
        self.task_type = Some(task_type.into());
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    fn matches(&self, task: &Task) -> bool {
        self.status.map_or(true, |s| task.status == s)
            && self
                .task_type
                .as_deref()
                .map_or(true, |t| task.task_type == t)
    }
}

/// What a finished attempt turned into, decided under the task-map lock
enum Settled {
    Discarded,
    Completed {
        result: TaskResult,
        callback: Option<CompletionCallback>,
    },
    Retry {
        priority: TaskPriority,
        attempt: u32,
        failure: TaskFailure,
    },
    Failed {
        result: TaskResult,
        callback: Option<CompletionCallback>,
        failure: TaskFailure,
    },
}

struct ProcessorInner {
    config: ProcessorConfig,
    tasks: Arc<TaskMap>,
    queue: TaskQueue,
    handlers: StdRwLock<HashMap<String, Arc<dyn TaskHandler>>>,
    counters: StdMutex<TaskCounters>,
    shutdown_tx: watch::Sender<bool>,
    running: AtomicBool,
    started_at: StdMutex<Option<Instant>>,
}

impl ProcessorInner {
    fn counters(&self) -> std::sync::MutexGuard<'_, TaskCounters> {
        self.counters.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn handler_for(&self, task_type: &str) -> Option<Arc<dyn TaskHandler>> {
        self.handlers
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(task_type)
            .cloned()
    }

    fn is_shutting_down(&self) -> bool {
        *self.shutdown_tx.borrow()
    }

    async fn worker_loop(self: Arc<Self>, worker_id: usize) {
        debug!("Task worker {} starting", worker_id);
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        while !*shutdown_rx.borrow() {
            let item = match self.queue.dequeue().await {
                Some(item) => item,
                None => {
                    tokio::select! {
                        _ = self.queue.notified() => {}
                        _ = shutdown_rx.changed() => {}
                        _ = sleep(IDLE_POLL_INTERVAL) => {}
                    }
                    continue;
                }
            };

            self.run_task(worker_id, item.task_id).await;

            // Small yield to allow other tasks to run
            tokio::task::yield_now().await;
        }

        debug!("Task worker {} shut down", worker_id);
    }

    async fn run_task(self: &Arc<Self>, worker_id: usize, task_id: TaskId) {
        let snapshot = {
            let mut tasks = self.tasks.lock().await;
            let Some(task) = tasks.get_mut(&task_id) else {
                debug!("Worker {}: task {} no longer exists", worker_id, task_id);
                return;
            };
            if !task.transition(TaskStatus::Running) {
                debug!(
                    "Worker {}: skipping task {} in state {}",
                    worker_id, task_id, task.status
                );
                return;
            }
            task.clone()
        };

        debug!(
            "Worker {}: running task {} ({}, attempt {})",
            worker_id,
            task_id,
            snapshot.task_type,
            snapshot.retry_count + 1
        );

        let task_timeout = snapshot.timeout();
        let started = Instant::now();
        let outcome = match self.handler_for(&snapshot.task_type) {
            Some(handler) => {
                let ctx = TaskContext::new(task_id.clone(), Arc::clone(&self.tasks));
                let mut join = tokio::spawn(async move { handler.handle(snapshot, ctx).await });
                match timeout(task_timeout, &mut join).await {
                    Ok(Ok(Ok(value))) => Ok(value),
                    Ok(Ok(Err(e))) => Err(TaskFailure::execution(format!("{e:#}"))),
                    Ok(Err(join_err)) if join_err.is_panic() => {
                        Err(TaskFailure::execution("task handler panicked"))
                    }
                    Ok(Err(join_err)) => Err(TaskFailure::execution(join_err.to_string())),
                    Err(_) => {
                        join.abort();
                        Err(TaskFailure::timeout(task_timeout))
                    }
                }
            }
            None => Err(TaskFailure::execution(format!(
                "no handler registered for task type {}",
                snapshot.task_type
            ))),
        };
        let elapsed = started.elapsed();

        let settled = self.settle(&task_id, outcome).await;
        self.record(&task_id, settled, elapsed).await;
    }

    /// Apply the attempt's outcome to the task under the task-map lock
    async fn settle(&self, task_id: &str, outcome: Result<Value, TaskFailure>) -> Settled {
        let mut tasks = self.tasks.lock().await;
        let Some(task) = tasks.get_mut(task_id) else {
            return Settled::Discarded;
        };
        if task.status != TaskStatus::Running {
            // Cancelled while the handler was in flight
            return Settled::Discarded;
        }

        match outcome {
            Ok(value) => {
                task.transition(TaskStatus::Completed);
                let result = task.make_result(Some(value), None);
                task.result = Some(result.clone());
                Settled::Completed {
                    result,
                    callback: task.callback.clone(),
                }
            }
            Err(failure) => {
                task.transition(TaskStatus::Failed);
                task.last_error = Some(failure.clone());
                if task.transition(TaskStatus::Pending) {
                    Settled::Retry {
                        priority: task.priority,
                        attempt: task.retry_count,
                        failure,
                    }
                } else {
                    let result = task.make_result(None, Some(failure.clone()));
                    task.result = Some(result.clone());
                    Settled::Failed {
                        result,
                        callback: task.callback.clone(),
                        failure,
                    }
                }
            }
        }
    }

    async fn record(&self, task_id: &str, settled: Settled, elapsed: Duration) {
        match settled {
            Settled::Discarded => {
                debug!("Discarding outcome of task {} (cancelled or removed)", task_id);
            }
            Settled::Completed { result, callback } => {
                {
                    let mut counters = self.counters();
                    counters.tasks_completed += 1;
                    counters.record_execution(elapsed);
                }
                info!("Task {} completed in {:?}", task_id, elapsed);
                invoke_callback(callback, &result);
            }
            Settled::Retry {
                priority,
                attempt,
                failure,
            } => {
                {
                    let mut counters = self.counters();
                    counters.retries += 1;
                    if failure.is_timeout() {
                        counters.timeouts += 1;
                    }
                }
                warn!(
                    "Task {} failed ({}), retrying (retry {}): {}",
                    task_id,
                    failure.kind(),
                    attempt,
                    failure
                );
                self.queue
                    .requeue(QueueItem::new(task_id.to_string(), priority))
                    .await;
            }
            Settled::Failed {
                result,
                callback,
                failure,
            } => {
                {
                    let mut counters = self.counters();
                    counters.tasks_failed += 1;
                    if failure.is_timeout() {
                        counters.timeouts += 1;
                    }
                    counters.record_execution(elapsed);
                }
                warn!(
                    "Task {} failed permanently after {} attempts: {}",
                    task_id, result.attempts, failure
                );
                invoke_callback(callback, &result);
            }
        }
    }

    async fn sweep_loop(self: Arc<Self>) {
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        let interval = self.config.cleanup_interval();

        while !*shutdown_rx.borrow() {
            tokio::select! {
                _ = sleep(interval) => {}
                _ = shutdown_rx.changed() => break,
            }
            self.cleanup_finished().await;
        }
        debug!("Task sweep loop shut down");
    }

    async fn cleanup_finished(&self) -> usize {
        let retention = chrono::Duration::from_std(self.config.retention())
            .unwrap_or_else(|_| chrono::Duration::days(1));
        let cutoff = chrono::Utc::now() - retention;

        let removed = {
            let mut tasks = self.tasks.lock().await;
            let before = tasks.len();
            tasks.retain(|_, task| {
                !(task.is_terminal() && task.completed_at.map_or(false, |done| done <= cutoff))
            });
            before - tasks.len()
        };

        if removed > 0 {
            info!("Cleaned up {} finished tasks", removed);
        }
        removed
    }
}

fn invoke_callback(callback: Option<CompletionCallback>, result: &TaskResult) {
    if let Some(callback) = callback {
        if catch_unwind(AssertUnwindSafe(|| callback(result))).is_err() {
            warn!("Completion callback for task {} panicked", result.task_id);
        }
    }
}

/// Bounded, retrying background task processor
pub struct BackgroundProcessor {
    inner: Arc<ProcessorInner>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl BackgroundProcessor {
    pub fn new(config: ProcessorConfig) -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        let queue = TaskQueue::new(config.max_queue_size);
        Self {
            inner: Arc::new(ProcessorInner {
                config,
                tasks: Arc::new(Mutex::new(HashMap::new())),
                queue,
                handlers: StdRwLock::new(HashMap::new()),
                counters: StdMutex::new(TaskCounters::default()),
                shutdown_tx,
                running: AtomicBool::new(false),
                started_at: StdMutex::new(None),
            }),
            workers: Mutex::new(Vec::new()),
        }
    }

    pub fn config(&self) -> &ProcessorConfig {
        &self.inner.config
    }

    /// Register (or replace) the handler for a task type
    pub fn register_task_handler<H>(&self, task_type: impl Into<String>, handler: H)
    where
        H: TaskHandler + 'static,
    {
        let task_type = task_type.into();
        info!("Registered task handler for type: {}", task_type);
        self.inner
            .handlers
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(task_type, Arc::new(handler));
    }

    pub fn registered_task_types(&self) -> Vec<String> {
        let mut types: Vec<String> = self
            .inner
            .handlers
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .keys()
            .cloned()
            .collect();
        types.sort();
        types
    }

    /// Spawn the worker pool and the sweep loop. Calling it twice is a no-op.
    pub async fn start(&self) {
        if self.inner.running.swap(true, Ordering::SeqCst) {
            return;
        }
        self.inner.shutdown_tx.send_replace(false);
        *self
            .inner
            .started_at
            .lock()
            .unwrap_or_else(|e| e.into_inner()) = Some(Instant::now());

        let mut workers = self.workers.lock().await;
        for worker_id in 0..self.inner.config.max_workers {
            workers.push(tokio::spawn(Arc::clone(&self.inner).worker_loop(worker_id)));
        }
        workers.push(tokio::spawn(Arc::clone(&self.inner).sweep_loop()));

        info!(
            "Background processor started with {} workers",
            self.inner.config.max_workers
        );
    }

    /// Stop the workers, waiting at most `wait` for in-flight tasks, then
    /// cancel everything still pending or paused.
    pub async fn stop(&self, wait: Duration) {
        if !self.inner.running.swap(false, Ordering::SeqCst) {
            return;
        }
        self.inner.shutdown_tx.send_replace(true);

        let handles: Vec<JoinHandle<()>> = self.workers.lock().await.drain(..).collect();
        let aborts: Vec<_> = handles.iter().map(|h| h.abort_handle()).collect();
        match timeout(wait, futures::future::join_all(handles)).await {
            Ok(_) => debug!("All task workers shut down gracefully"),
            Err(_) => {
                warn!("Task worker shutdown timed out after {:?}", wait);
                for abort in aborts {
                    abort.abort();
                }
            }
        }

        self.inner.queue.clear().await;
        let cancelled = {
            let mut tasks = self.inner.tasks.lock().await;
            tasks
                .values_mut()
                .filter(|t| matches!(t.status, TaskStatus::Pending | TaskStatus::Paused))
                .fold(0u64, |n, t| n + u64::from(t.transition(TaskStatus::Cancelled)))
        };
        self.inner.counters().tasks_cancelled += cancelled;

        info!(
            "Background processor stopped ({} pending tasks cancelled)",
            cancelled
        );
    }

    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::SeqCst)
    }

    /// Queue a task. Fails fast on unknown types, an id that is still
    /// tracked, a full queue or shutdown.
    pub async fn submit(&self, request: TaskRequest) -> Result<TaskId, ProcessorError> {
        if self.inner.is_shutting_down() {
            return Err(ProcessorError::ShuttingDown);
        }
        if self.inner.handler_for(&request.task_type).is_none() {
            return Err(ProcessorError::UnknownTaskType(request.task_type));
        }

        let config = &self.inner.config;
        let id = request
            .id
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        let mut task = Task::new(
            id.clone(),
            request.task_type,
            request.parameters,
            request.priority,
            request.timeout.unwrap_or_else(|| config.default_timeout()),
            request.max_retries.unwrap_or(config.default_max_retries),
        );
        task.metadata = request.metadata;
        task.callback = request.callback;
        let priority = task.priority;
        let task_type = task.task_type.clone();

        match self.inner.tasks.lock().await.entry(id.clone()) {
            Entry::Occupied(_) => return Err(ProcessorError::DuplicateTaskId(id)),
            Entry::Vacant(slot) => {
                slot.insert(task);
            }
        }

        if !self
            .inner
            .queue
            .enqueue(QueueItem::new(id.clone(), priority))
            .await
        {
            self.inner.tasks.lock().await.remove(&id);
            return Err(ProcessorError::QueueFull {
                capacity: self.inner.queue.capacity(),
            });
        }

        self.inner.counters().tasks_created += 1;
        info!(
            "Submitted task {} (type: {}, priority: {})",
            id,
            task_type,
            priority.as_str()
        );
        Ok(id)
    }

    pub async fn status(&self, task_id: &str) -> Option<Task> {
        self.inner.tasks.lock().await.get(task_id).cloned()
    }

    /// Cancel a pending, paused or running task.
    ///
    /// A running handler is not interrupted; its outcome is discarded.
    pub async fn cancel(&self, task_id: &str) -> bool {
        let previous = {
            let mut tasks = self.inner.tasks.lock().await;
            match tasks.get_mut(task_id) {
                Some(task) => {
                    let previous = task.status;
                    if !task.transition(TaskStatus::Cancelled) {
                        return false;
                    }
                    previous
                }
                None => return false,
            }
        };

        if previous == TaskStatus::Pending {
            self.inner.queue.remove(task_id).await;
        }
        self.inner.counters().tasks_cancelled += 1;
        info!("Cancelled task {} (was {})", task_id, previous);
        true
    }

    /// Take a pending task out of the queue without cancelling it
    pub async fn pause(&self, task_id: &str) -> bool {
        let paused = {
            let mut tasks = self.inner.tasks.lock().await;
            tasks
                .get_mut(task_id)
                .map_or(false, |t| t.transition(TaskStatus::Paused))
        };
        if paused {
            self.inner.queue.remove(task_id).await;
            debug!("Paused task {}", task_id);
        }
        paused
    }

    /// Put a paused task back in the queue
    pub async fn resume(&self, task_id: &str) -> bool {
        let priority = {
            let mut tasks = self.inner.tasks.lock().await;
            match tasks.get_mut(task_id) {
                Some(task) if task.status == TaskStatus::Paused => {
                    task.transition(TaskStatus::Pending);
                    task.priority
                }
                _ => return false,
            }
        };
        self.inner
            .queue
            .requeue(QueueItem::new(task_id.to_string(), priority))
            .await;
        debug!("Resumed task {}", task_id);
        true
    }

    /// Tasks matching `filter`, newest first
    pub async fn list(&self, filter: &TaskFilter) -> Vec<Task> {
        let mut matching: Vec<Task> = {
            let tasks = self.inner.tasks.lock().await;
            tasks
                .values()
                .filter(|t| filter.matches(t))
                .cloned()
                .collect()
        };
        matching.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        if let Some(limit) = filter.limit {
            matching.truncate(limit);
        }
        matching
    }

    /// Poll until the task is terminal or `wait` elapses
    pub async fn wait_for(&self, task_id: &str, wait: Duration) -> Option<Task> {
        let deadline = Instant::now() + wait;
        loop {
            let task = self.status(task_id).await?;
            if task.is_terminal() || Instant::now() >= deadline {
                return Some(task);
            }
            sleep(WAIT_POLL_INTERVAL).await;
        }
    }

    /// Drop terminal tasks older than the retention window right away
    pub async fn cleanup_finished(&self) -> usize {
        self.inner.cleanup_finished().await
    }

    pub async fn stats(&self) -> ProcessorStats {
        let counters = self.inner.counters().clone();
        let (running_tasks, pending_tasks, total_tasks) = {
            let tasks = self.inner.tasks.lock().await;
            let running = tasks
                .values()
                .filter(|t| t.status == TaskStatus::Running)
                .count();
            let pending = tasks
                .values()
                .filter(|t| t.status == TaskStatus::Pending)
                .count();
            (running, pending, tasks.len())
        };
        let uptime_secs = self
            .inner
            .started_at
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .map_or(0, |t| t.elapsed().as_secs());

        ProcessorStats {
            average_execution_time_ms: counters.average_execution_time_ms(),
            counters,
            running_tasks,
            pending_tasks,
            total_tasks,
            queue_size: self.inner.queue.len(),
            workers: self.inner.config.max_workers,
            is_running: self.is_running(),
            uptime_secs,
        }
    }
}

impl Drop for BackgroundProcessor {
    fn drop(&mut self) {
        // Workers hold their own Arc to the inner state; tell them to exit.
        self.inner.shutdown_tx.send_replace(true);
    }
}

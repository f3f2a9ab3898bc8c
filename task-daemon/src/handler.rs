//! Task handler trait and the context handed to running handlers

use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;
use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;

use crate::processor::TaskMap;
use crate::task::{Task, TaskId, TaskStatus};

/// Executes one type of background task.
///
/// Handlers receive a snapshot of the task taken when it was dequeued. An
/// `Err` is recorded as an execution failure and retried while the task has
/// retries left.
#[async_trait]
pub trait TaskHandler: Send + Sync {
    async fn handle(&self, task: Task, ctx: TaskContext) -> Result<Value>;
}

/// Handle given to a running handler for progress reporting and cancellation
#[derive(Clone)]
pub struct TaskContext {
    task_id: TaskId,
    tasks: Arc<TaskMap>,
}

impl TaskContext {
    pub(crate) fn new(task_id: TaskId, tasks: Arc<TaskMap>) -> Self {
        Self { task_id, tasks }
    }

    pub fn task_id(&self) -> &str {
        &self.task_id
    }

    /// Record a progress value on the task; visible through `status()`
    pub async fn report_progress(&self, key: impl Into<String>, value: Value) {
        let mut tasks = self.tasks.lock().await;
        if let Some(task) = tasks.get_mut(&self.task_id) {
            task.update_progress(key, value);
        }
    }

    /// True once the task was cancelled (or dropped by the sweep).
    ///
    /// Cancellation is cooperative: long-running handlers should poll this.
    pub async fn is_cancelled(&self) -> bool {
        let tasks = self.tasks.lock().await;
        match tasks.get(&self.task_id) {
            Some(task) => task.status == TaskStatus::Cancelled,
            None => true,
        }
    }
}

/// Adapter turning an async closure into a [`TaskHandler`]
pub struct FnHandler<F, Fut> {
    func: F,
    _marker: PhantomData<fn() -> Fut>,
}

/// Wrap `func` so it can be registered as a task handler
pub fn handler_fn<F, Fut>(func: F) -> FnHandler<F, Fut>
where
    F: Fn(Task, TaskContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value>> + Send + 'static,
{
    FnHandler {
        func,
        _marker: PhantomData,
    }
}

#[async_trait]
impl<F, Fut> TaskHandler for FnHandler<F, Fut>
where
    F: Fn(Task, TaskContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value>> + Send + 'static,
{
    async fn handle(&self, task: Task, ctx: TaskContext) -> Result<Value> {
        (self.func)(task, ctx).await
    }
}

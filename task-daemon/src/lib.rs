// Background task processor library
// Bounded priority queue + worker pool with retries, timeouts and cleanup

pub mod config;
pub mod error;
pub mod handler;
pub mod processor;
pub mod queue;
pub mod stats;
pub mod task;

// Re-export commonly used types
pub use config::ProcessorConfig;
pub use error::{ProcessorError, TaskFailure};
pub use handler::{handler_fn, FnHandler, TaskContext, TaskHandler};
pub use processor::{BackgroundProcessor, TaskFilter, TaskRequest};
pub use queue::{QueueItem, QueueMetrics, TaskQueue};
pub use stats::{ProcessorStats, TaskCounters};
pub use task::{CompletionCallback, Task, TaskId, TaskPriority, TaskResult, TaskStatus};

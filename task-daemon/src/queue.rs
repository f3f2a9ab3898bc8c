//! Bounded multi-level priority queue feeding the worker pool
//!
//! The queue only holds task ids; the tasks themselves live in the
//! processor's task map. One lane per priority, FIFO inside a lane, highest
//! lane drained first.

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, Notify};
use tracing::{debug, warn};

use crate::task::{TaskId, TaskPriority};

/// Entry in the task queue
#[derive(Debug, Clone)]
pub struct QueueItem {
    pub task_id: TaskId,
    pub priority: TaskPriority,
    pub enqueued_at: Instant,
}

impl QueueItem {
    pub fn new(task_id: TaskId, priority: TaskPriority) -> Self {
        Self {
            task_id,
            priority,
            enqueued_at: Instant::now(),
        }
    }

    /// Time spent waiting in the queue
    pub fn age(&self) -> Duration {
        self.enqueued_at.elapsed()
    }
}

#[derive(Debug, Default)]
struct Lanes {
    urgent: VecDeque<QueueItem>,
    high: VecDeque<QueueItem>,
    normal: VecDeque<QueueItem>,
    low: VecDeque<QueueItem>,
}

impl Lanes {
    fn lane_mut(&mut self, priority: TaskPriority) -> &mut VecDeque<QueueItem> {
        match priority {
            TaskPriority::Urgent => &mut self.urgent,
            TaskPriority::High => &mut self.high,
            TaskPriority::Normal => &mut self.normal,
            TaskPriority::Low => &mut self.low,
        }
    }

    fn lane(&self, priority: TaskPriority) -> &VecDeque<QueueItem> {
        match priority {
            TaskPriority::Urgent => &self.urgent,
            TaskPriority::High => &self.high,
            TaskPriority::Normal => &self.normal,
            TaskPriority::Low => &self.low,
        }
    }

    fn len(&self) -> usize {
        self.urgent.len() + self.high.len() + self.normal.len() + self.low.len()
    }
}

/// Thread-safe bounded priority queue of task ids
#[derive(Debug)]
pub struct TaskQueue {
    /// All lanes behind one lock so the capacity check and push are atomic
    lanes: Mutex<Lanes>,

    /// Items currently queued, readable without the lock
    total_items: AtomicUsize,

    total_enqueued: AtomicU64,
    total_dequeued: AtomicU64,
    total_rejected: AtomicU64,

    /// Maximum queue size (0 = unlimited)
    max_size: usize,

    /// Wakes one idle worker per enqueued item
    notify: Notify,

    created_at: Instant,
}

impl TaskQueue {
    pub fn new(max_size: usize) -> Self {
        Self {
            lanes: Mutex::new(Lanes::default()),
            total_items: AtomicUsize::new(0),
            total_enqueued: AtomicU64::new(0),
            total_dequeued: AtomicU64::new(0),
            total_rejected: AtomicU64::new(0),
            max_size,
            notify: Notify::new(),
            created_at: Instant::now(),
        }
    }

    pub fn unlimited() -> Self {
        Self::new(0)
    }

    pub fn capacity(&self) -> usize {
        self.max_size
    }

    /// Enqueue a new item, returning false when the queue is at capacity
    pub async fn enqueue(&self, item: QueueItem) -> bool {
        let mut lanes = self.lanes.lock().await;
        if self.max_size > 0 && lanes.len() >= self.max_size {
            drop(lanes);
            self.total_rejected.fetch_add(1, Ordering::Relaxed);
            warn!(
                "Task queue at maximum capacity ({}), rejecting task {}",
                self.max_size, item.task_id
            );
            return false;
        }
        self.push_locked(&mut lanes, item);
        true
    }

    /// Put an already-accepted task back in line, ignoring the capacity limit.
    ///
    /// Used for retries and resumed tasks, which were admitted once already.
    pub async fn requeue(&self, item: QueueItem) {
        let mut lanes = self.lanes.lock().await;
        self.push_locked(&mut lanes, item);
    }

    fn push_locked(&self, lanes: &mut Lanes, item: QueueItem) {
        debug!(
            "Enqueued {} priority task {} (queue size: {})",
            item.priority.as_str(),
            item.task_id,
            lanes.len() + 1
        );
        lanes.lane_mut(item.priority).push_back(item);
        self.total_items.fetch_add(1, Ordering::Relaxed);
        self.total_enqueued.fetch_add(1, Ordering::Relaxed);
        self.notify.notify_one();
    }

    /// Pop the oldest item of the highest non-empty priority
    pub async fn dequeue(&self) -> Option<QueueItem> {
        let mut lanes = self.lanes.lock().await;
        for priority in TaskPriority::DESCENDING {
            if let Some(item) = lanes.lane_mut(priority).pop_front() {
                drop(lanes);
                self.total_items.fetch_sub(1, Ordering::Relaxed);
                self.total_dequeued.fetch_add(1, Ordering::Relaxed);
                debug!(
                    "Dequeued {} priority task {} after {:?}",
                    priority.as_str(),
                    item.task_id,
                    item.age()
                );
                return Some(item);
            }
        }
        None
    }

    /// Remove a specific task from whichever lane holds it
    pub async fn remove(&self, task_id: &str) -> bool {
        let mut lanes = self.lanes.lock().await;
        for priority in TaskPriority::DESCENDING {
            let lane = lanes.lane_mut(priority);
            if let Some(pos) = lane.iter().position(|item| item.task_id == task_id) {
                lane.remove(pos);
                self.total_items.fetch_sub(1, Ordering::Relaxed);
                return true;
            }
        }
        false
    }

    /// Wait until something is enqueued. Spurious wakeups are possible.
    pub async fn notified(&self) {
        self.notify.notified().await
    }

    pub fn len(&self) -> usize {
        self.total_items.load(Ordering::Relaxed)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drain every queued item, returning the removed task ids
    pub async fn clear(&self) -> Vec<TaskId> {
        let mut lanes = self.lanes.lock().await;
        let mut drained = Vec::with_capacity(lanes.len());
        for priority in TaskPriority::DESCENDING {
            drained.extend(lanes.lane_mut(priority).drain(..).map(|i| i.task_id));
        }
        self.total_items.store(0, Ordering::Relaxed);
        debug!("Cleared {} queued tasks", drained.len());
        drained
    }

    pub async fn metrics(&self) -> QueueMetrics {
        let lanes = self.lanes.lock().await;
        let total_items = lanes.len();
        QueueMetrics {
            total_items,
            urgent_items: lanes.lane(TaskPriority::Urgent).len(),
            high_items: lanes.lane(TaskPriority::High).len(),
            normal_items: lanes.lane(TaskPriority::Normal).len(),
            low_items: lanes.lane(TaskPriority::Low).len(),
            total_enqueued: self.total_enqueued.load(Ordering::Relaxed),
            total_dequeued: self.total_dequeued.load(Ordering::Relaxed),
            total_rejected: self.total_rejected.load(Ordering::Relaxed),
            max_size: self.max_size,
            utilization_ratio: if self.max_size > 0 {
                total_items as f64 / self.max_size as f64
            } else {
                0.0
            },
            age_seconds: self.created_at.elapsed().as_secs(),
        }
    }
}

/// Point-in-time queue counters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueMetrics {
    pub total_items: usize,
    pub urgent_items: usize,
    pub high_items: usize,
    pub normal_items: usize,
    pub low_items: usize,
    pub total_enqueued: u64,
    pub total_dequeued: u64,
    pub total_rejected: u64,
    pub max_size: usize,
    pub utilization_ratio: f64,
    pub age_seconds: u64,
}

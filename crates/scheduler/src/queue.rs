//! Shared priority queue feeding the dispatch loop.
//!
//! A binary max-heap keyed by `(priority, Reverse(sequence))`: higher
//! priority pops first, and among equals the earliest submission wins.
//! Many producers push concurrently; the dispatch loop is the only consumer.

use std::cmp::{Ordering, Reverse};
use std::collections::{BinaryHeap, HashMap, HashSet};
use std::sync::{Mutex, MutexGuard, PoisonError};

use strata_core::{LayerType, TaskId};

use crate::error::SchedulerError;
use crate::task::Task;

struct QueuedTask(Task);

impl QueuedTask {
    fn key(&self) -> (i32, Reverse<u64>) {
        (self.0.priority, Reverse(self.0.sequence))
    }
}

impl PartialEq for QueuedTask {
    fn eq(&self, other: &Self) -> bool {
        self.key() == other.key()
    }
}

impl Eq for QueuedTask {}

impl PartialOrd for QueuedTask {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for QueuedTask {
    fn cmp(&self, other: &Self) -> Ordering {
        self.key().cmp(&other.key())
    }
}

#[derive(Default)]
struct Inner {
    heap: BinaryHeap<QueuedTask>,
    ids: HashSet<TaskId>,
    per_layer: HashMap<LayerType, usize>,
}

impl Inner {
    fn forget(&mut self, task: &Task) {
        self.ids.remove(&task.id);
        if let Some(n) = self.per_layer.get_mut(&task.layer_type) {
            *n = n.saturating_sub(1);
        }
    }
}

/// Thread-safe priority queue of pending tasks.
#[derive(Default)]
pub struct PriorityTaskQueue {
    inner: Mutex<Inner>,
}

impl PriorityTaskQueue {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Insert a task. Rejects a task whose id is already queued.
    pub fn push(&self, task: Task) -> Result<(), SchedulerError> {
        let mut inner = self.lock();
        if !inner.ids.insert(task.id) {
            return Err(SchedulerError::DuplicateTask(task.id));
        }
        *inner.per_layer.entry(task.layer_type).or_default() += 1;
        inner.heap.push(QueuedTask(task));
        Ok(())
    }

    /// Insert a task unless its layer is already at `backlog_limit`, counting
    /// both the tasks still queued here and the `in_pool` tasks its pool
    /// holds. Check and insert happen under one lock.
    pub fn push_bounded(&self, task: Task, in_pool: usize, backlog_limit: usize) -> Result<(), SchedulerError> {
        let mut inner = self.lock();
        let queued = inner.per_layer.get(&task.layer_type).copied().unwrap_or(0);
        if queued + in_pool >= backlog_limit {
            return Err(SchedulerError::PoolSaturated {
                layer: task.layer_type,
                backlog_limit,
            });
        }
        if !inner.ids.insert(task.id) {
            return Err(SchedulerError::DuplicateTask(task.id));
        }
        *inner.per_layer.entry(task.layer_type).or_default() += 1;
        inner.heap.push(QueuedTask(task));
        Ok(())
    }

    /// Put back a task the dispatch loop could not place. Keeps its original
    /// sequence, so it stays ahead of later submissions of equal priority.
    pub(crate) fn requeue(&self, task: Task) {
        let mut inner = self.lock();
        inner.ids.insert(task.id);
        *inner.per_layer.entry(task.layer_type).or_default() += 1;
        inner.heap.push(QueuedTask(task));
    }

    /// Remove and return the highest-priority task.
    pub fn pop_highest(&self) -> Option<Task> {
        let mut inner = self.lock();
        let QueuedTask(task) = inner.heap.pop()?;
        inner.forget(&task);
        Some(task)
    }

    /// Remove every queued task, highest priority first.
    pub fn drain(&self) -> Vec<Task> {
        let mut inner = self.lock();
        let heap = std::mem::take(&mut inner.heap);
        inner.ids.clear();
        inner.per_layer.clear();
        heap.into_sorted_vec().into_iter().rev().map(|q| q.0).collect()
    }

    pub fn len(&self) -> usize {
        self.lock().heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().heap.is_empty()
    }

    /// Number of queued tasks targeting `layer_type`.
    pub fn queued_for(&self, layer_type: LayerType) -> usize {
        self.lock().per_layer.get(&layer_type).copied().unwrap_or(0)
    }

    pub fn contains(&self, id: &TaskId) -> bool {
        self.lock().ids.contains(id)
    }
}

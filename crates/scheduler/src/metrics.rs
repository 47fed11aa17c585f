//! Global and per-layer counters plus a bounded history of recent outcomes.

use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};

use strata_core::LayerType;

use crate::types::{TaskOutcome, TaskStatus};

// ── Ring buffer ──────────────────────────────────────────────────────

/// A fixed-size ring buffer backed by `VecDeque`.
#[derive(Debug, Clone)]
pub struct RingBuffer<T> {
    buf: VecDeque<T>,
    capacity: usize,
}

impl<T> RingBuffer<T> {
    /// Create a new ring buffer with the given capacity.
    pub fn new(capacity: usize) -> Self {
        Self {
            buf: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Push an item, evicting the oldest if at capacity.
    pub fn push(&mut self, item: T) {
        if self.capacity == 0 {
            return;
        }
        if self.buf.len() == self.capacity {
            self.buf.pop_front();
        }
        self.buf.push_back(item);
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Iterate over items from oldest to newest.
    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.buf.iter()
    }
}

// ── Counters ─────────────────────────────────────────────────────────

/// Outcome counters for one layer.
#[derive(Debug, Clone, Default)]
pub struct LayerStats {
    /// Terminal outcomes attributed to the layer. Only ever increases.
    pub processed_tasks: u64,
    /// Outcomes that reached an executor; the divisor for the average.
    pub executed: u64,
    pub avg_processing_time_ms: f64,
    pub completed: u64,
    pub failed: u64,
    pub timed_out: u64,
}

impl LayerStats {
    fn record(&mut self, outcome: &TaskOutcome) {
        self.processed_tasks += 1;
        match outcome.status {
            TaskStatus::Completed => self.completed += 1,
            TaskStatus::Failed => self.failed += 1,
            TaskStatus::TimedOut => self.timed_out += 1,
            TaskStatus::LayerUnavailable | TaskStatus::Cancelled => {}
        }

        if !outcome.status.was_executed() {
            return;
        }
        self.executed += 1;

        // Incremental mean: new_avg = prev_avg + (x - prev_avg) / count
        let x = outcome.processing_time_ms as f64;
        self.avg_processing_time_ms = if self.executed == 1 {
            x
        } else {
            self.avg_processing_time_ms + (x - self.avg_processing_time_ms) / self.executed as f64
        };
    }
}

/// Scheduler-wide counters.
#[derive(Debug, Clone, Default)]
pub struct GlobalCounters {
    pub submitted: u64,
    pub completed: u64,
    pub failed: u64,
    pub timed_out: u64,
    pub layer_unavailable: u64,
    pub cancelled: u64,
}

impl GlobalCounters {
    pub fn terminal(&self) -> u64 {
        self.completed + self.failed + self.timed_out + self.layer_unavailable + self.cancelled
    }

    /// Fraction of terminal outcomes that completed; 1.0 before any outcome.
    pub fn success_rate(&self) -> f64 {
        match self.terminal() {
            0 => 1.0,
            n => self.completed as f64 / n as f64,
        }
    }
}

struct Inner {
    global: GlobalCounters,
    layers: HashMap<LayerType, LayerStats>,
    history: RingBuffer<TaskOutcome>,
}

/// Thread-safe metrics collector. Every update for one outcome happens under
/// a single lock, so readers never see a half-applied outcome.
pub struct MetricsController {
    inner: Mutex<Inner>,
}

impl MetricsController {
    pub fn new(history_capacity: usize) -> Self {
        Self {
            inner: Mutex::new(Inner {
                global: GlobalCounters::default(),
                layers: HashMap::new(),
                history: RingBuffer::new(history_capacity),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Count an accepted submission.
    pub fn record_submitted(&self) {
        self.lock().global.submitted += 1;
    }

    /// Fold a terminal outcome into global and per-layer counters.
    pub fn record_outcome(&self, outcome: &TaskOutcome) {
        let mut inner = self.lock();
        let g = &mut inner.global;
        match outcome.status {
            TaskStatus::Completed => g.completed += 1,
            TaskStatus::Failed => g.failed += 1,
            TaskStatus::TimedOut => g.timed_out += 1,
            TaskStatus::LayerUnavailable => g.layer_unavailable += 1,
            TaskStatus::Cancelled => g.cancelled += 1,
        }
        inner.layers.entry(outcome.layer_type).or_default().record(outcome);
        inner.history.push(outcome.clone());
    }

    pub fn global(&self) -> GlobalCounters {
        self.lock().global.clone()
    }

    pub fn layer(&self, layer_type: LayerType) -> LayerStats {
        self.lock().layers.get(&layer_type).cloned().unwrap_or_default()
    }

    /// Snapshot of global and per-layer counters taken under one lock.
    pub fn snapshot(&self) -> (GlobalCounters, HashMap<LayerType, LayerStats>) {
        let inner = self.lock();
        (inner.global.clone(), inner.layers.clone())
    }

    /// Recent outcomes, oldest first.
    pub fn recent(&self) -> Vec<TaskOutcome> {
        self.lock().history.iter().cloned().collect()
    }
}

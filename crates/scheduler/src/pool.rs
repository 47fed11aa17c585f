//! Per-layer bounded worker pool.
//!
//! A pool owns up to `max_workers` worker tasks pulling from one bounded
//! channel. The channel capacity is the backlog bound: admission is a
//! non-blocking `try_send`, so a full backlog is reported as
//! [`AdmissionError::Saturated`] instead of stalling the dispatch loop.
//!
//! Workers are spawned on demand and retire after `idle_timeout` as long as
//! the pool stays above its `min_workers` floor. Pools never lend workers to
//! each other; a burst on one layer cannot starve another.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use strata_core::LayerType;
use tokio::runtime::Handle;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

use crate::events::OutcomeSink;
use crate::task::{Task, TaskExecutor};
use crate::timeout::run_guarded;
use crate::types::TaskOutcome;

/// Reasons a pool cannot be built. The layer is marked inactive instead.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PoolError {
    #[error("no executor registered for layer {0}")]
    NoExecutor(LayerType),
    #[error("layer {layer} has invalid capacity (max_workers={max_workers}, backlog_limit={backlog_limit})")]
    InvalidCapacity {
        layer: LayerType,
        max_workers: usize,
        backlog_limit: usize,
    },
    #[error("no tokio runtime available to host workers")]
    NoRuntime,
}

/// Admission failure. The rejected task is handed back to the caller.
#[derive(Debug, thiserror::Error)]
pub enum AdmissionError {
    #[error("pool backlog is full")]
    Saturated(Task),
    #[error("pool is shut down")]
    Closed(Task),
}

impl AdmissionError {
    pub fn into_task(self) -> Task {
        match self {
            AdmissionError::Saturated(t) | AdmissionError::Closed(t) => t,
        }
    }
}

/// Sizing and idle policy for one pool.
#[derive(Debug, Clone, Copy)]
pub struct PoolSettings {
    pub max_workers: usize,
    pub backlog_limit: usize,
    pub min_workers: usize,
    pub idle_timeout: Duration,
}

#[derive(Debug, Default)]
struct PoolCounters {
    /// Worker tasks alive.
    live: AtomicUsize,
    /// Workers parked waiting for the next task.
    idle: AtomicUsize,
    /// Admitted tasks not yet picked up by a worker.
    waiting: AtomicUsize,
    /// Tasks executing right now.
    running: AtomicUsize,
    peak_running: AtomicUsize,
}

impl PoolCounters {
    /// Updates the peak counter if current exceeds it.
    fn update_peak(&self, current: usize) {
        let mut peak = self.peak_running.load(Ordering::Relaxed);
        while current > peak {
            match self.peak_running.compare_exchange_weak(
                peak,
                current,
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => break,
                Err(p) => peak = p,
            }
        }
    }
}

/// State shared between the pool handle and its worker tasks.
struct Shared {
    layer_type: LayerType,
    settings: PoolSettings,
    executor: Arc<dyn TaskExecutor>,
    sink: OutcomeSink,
    receiver: tokio::sync::Mutex<mpsc::Receiver<Task>>,
    counters: PoolCounters,
    /// Cancelled when the drain grace expires; in-flight tasks race against it.
    force: CancellationToken,
}

impl Shared {
    /// Give up this worker's slot if the pool is above its floor.
    fn try_retire(&self) -> bool {
        let mut live = self.counters.live.load(Ordering::SeqCst);
        while live > self.settings.min_workers {
            match self.counters.live.compare_exchange(
                live,
                live - 1,
                Ordering::SeqCst,
                Ordering::SeqCst,
            ) {
                Ok(_) => return true,
                Err(current) => live = current,
            }
        }
        false
    }

    async fn run_one(&self, task: Task) {
        let running = self.counters.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.counters.update_peak(running);

        let outcome = if self.force.is_cancelled() {
            TaskOutcome::cancelled(task.id, task.layer_type, "pool force-drained before start", Duration::ZERO)
        } else {
            run_guarded(self.executor.as_ref(), task, &self.force).await
        };

        self.counters.running.fetch_sub(1, Ordering::SeqCst);
        self.sink.deliver(outcome);
    }
}

async fn worker_loop(shared: Arc<Shared>, worker_id: usize) {
    debug!(layer = %shared.layer_type, worker_id, "worker started");
    loop {
        shared.counters.idle.fetch_add(1, Ordering::SeqCst);
        let next = {
            let mut rx = shared.receiver.lock().await;
            tokio::time::timeout(shared.settings.idle_timeout, rx.recv()).await
        };
        shared.counters.idle.fetch_sub(1, Ordering::SeqCst);

        match next {
            Ok(Some(task)) => {
                shared.counters.waiting.fetch_sub(1, Ordering::SeqCst);
                shared.run_one(task).await;
            }
            // Channel closed and backlog drained.
            Ok(None) => break,
            Err(_idle) => {
                if shared.counters.waiting.load(Ordering::SeqCst) == 0 && shared.try_retire() {
                    debug!(layer = %shared.layer_type, worker_id, "idle worker retired");
                    return;
                }
            }
        }
    }
    shared.counters.live.fetch_sub(1, Ordering::SeqCst);
    debug!(layer = %shared.layer_type, worker_id, "worker stopped");
}

/// Bounded-concurrency executor serving one layer.
pub struct WorkerPool {
    shared: Arc<Shared>,
    sender: Mutex<Option<mpsc::Sender<Task>>>,
    tracker: TaskTracker,
    runtime: Handle,
    next_worker_id: AtomicUsize,
    destroyed: AtomicBool,
}

impl WorkerPool {
    /// Build a pool and spawn its floor of idle workers on the current runtime.
    pub fn new(
        layer_type: LayerType,
        settings: PoolSettings,
        executor: Option<Arc<dyn TaskExecutor>>,
        sink: OutcomeSink,
    ) -> Result<Self, PoolError> {
        let executor = executor.ok_or(PoolError::NoExecutor(layer_type))?;
        if settings.max_workers == 0 || settings.backlog_limit == 0 {
            return Err(PoolError::InvalidCapacity {
                layer: layer_type,
                max_workers: settings.max_workers,
                backlog_limit: settings.backlog_limit,
            });
        }
        let runtime = Handle::try_current().map_err(|_| PoolError::NoRuntime)?;

        let settings = PoolSettings {
            // At least one worker always stays alive so admitted work is never stranded.
            min_workers: settings.min_workers.clamp(1, settings.max_workers),
            ..settings
        };
        let (tx, rx) = mpsc::channel(settings.backlog_limit);

        let pool = Self {
            shared: Arc::new(Shared {
                layer_type,
                settings,
                executor,
                sink,
                receiver: tokio::sync::Mutex::new(rx),
                counters: PoolCounters::default(),
                force: CancellationToken::new(),
            }),
            sender: Mutex::new(Some(tx)),
            tracker: TaskTracker::new(),
            runtime,
            next_worker_id: AtomicUsize::new(0),
            destroyed: AtomicBool::new(false),
        };

        pool.shared.counters.live.store(settings.min_workers, Ordering::SeqCst);
        for _ in 0..settings.min_workers {
            pool.spawn_worker();
        }

        info!(
            layer = %layer_type,
            max_workers = settings.max_workers,
            backlog_limit = settings.backlog_limit,
            "worker pool ready"
        );
        Ok(pool)
    }

    fn sender(&self) -> MutexGuard<'_, Option<mpsc::Sender<Task>>> {
        self.sender.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Caller must already have reserved the slot in `live`.
    fn spawn_worker(&self) {
        let id = self.next_worker_id.fetch_add(1, Ordering::Relaxed);
        self.tracker
            .spawn_on(worker_loop(Arc::clone(&self.shared), id), &self.runtime);
    }

    /// Spawn another worker if work is waiting, nobody idle can take it,
    /// and the pool is below `max_workers`.
    fn ensure_worker(&self) {
        let c = &self.shared.counters;
        loop {
            let live = c.live.load(Ordering::SeqCst);
            if live >= self.shared.settings.max_workers
                || c.idle.load(Ordering::SeqCst) >= c.waiting.load(Ordering::SeqCst)
            {
                return;
            }
            if c
                .live
                .compare_exchange(live, live + 1, Ordering::SeqCst, Ordering::SeqCst)
                .is_ok()
            {
                self.spawn_worker();
                return;
            }
        }
    }

    /// Admit a task. Returns as soon as the task is in the backlog; the
    /// outcome is delivered to the pool's sink when it finishes.
    pub fn run(&self, task: Task) -> Result<(), AdmissionError> {
        let guard = self.sender();
        let Some(tx) = guard.as_ref() else {
            return Err(AdmissionError::Closed(task));
        };

        self.shared.counters.waiting.fetch_add(1, Ordering::SeqCst);
        match tx.try_send(task) {
            Ok(()) => {
                drop(guard);
                self.ensure_worker();
                Ok(())
            }
            Err(e) => {
                self.shared.counters.waiting.fetch_sub(1, Ordering::SeqCst);
                match e {
                    TrySendError::Full(task) => Err(AdmissionError::Saturated(task)),
                    TrySendError::Closed(task) => Err(AdmissionError::Closed(task)),
                }
            }
        }
    }

    /// Stop admissions, let in-flight and backlogged tasks finish within
    /// `grace`, then cancel whatever is left and wait for the workers.
    pub async fn shutdown(&self, grace: Duration) {
        let Some(tx) = self.sender().take() else {
            return;
        };
        drop(tx);
        self.tracker.close();

        let layer = self.shared.layer_type;
        info!(layer = %layer, in_flight = self.running(), backlog = self.backlog(), "draining worker pool");

        if tokio::time::timeout(grace, self.tracker.wait()).await.is_err() {
            warn!(
                layer = %layer,
                grace_ms = grace.as_millis() as u64,
                in_flight = self.running(),
                backlog = self.backlog(),
                "drain grace expired, cancelling remaining tasks"
            );
            self.shared.force.cancel();
            self.tracker.wait().await;
        }

        self.destroyed.store(true, Ordering::SeqCst);
        info!(layer = %layer, "worker pool destroyed");
    }

    pub fn layer_type(&self) -> LayerType {
        self.shared.layer_type
    }

    pub fn max_workers(&self) -> usize {
        self.shared.settings.max_workers
    }

    pub fn backlog_limit(&self) -> usize {
        self.shared.settings.backlog_limit
    }

    /// Whether the next admission would be rejected.
    pub fn is_saturated(&self) -> bool {
        self.backlog() >= self.shared.settings.backlog_limit
    }

    /// Whether admissions have been closed.
    pub fn is_closed(&self) -> bool {
        self.sender().is_none()
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::SeqCst)
    }

    pub fn running(&self) -> usize {
        self.shared.counters.running.load(Ordering::SeqCst)
    }

    pub fn backlog(&self) -> usize {
        self.shared.counters.waiting.load(Ordering::SeqCst)
    }

    pub fn live_workers(&self) -> usize {
        self.shared.counters.live.load(Ordering::SeqCst)
    }

    pub fn peak_running(&self) -> usize {
        self.shared.counters.peak_running.load(Ordering::SeqCst)
    }
}

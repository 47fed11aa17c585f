use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use chrono::Utc;
use strata_core::{LayerType, Payload, TaskId};
use tokio::sync::{broadcast, Notify};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::SchedulerConfig;
use crate::error::SchedulerError;
use crate::events::{EventBus, OutcomeSink, SchedulerEvent};
use crate::metrics::{LayerStats, MetricsController};
use crate::pool::WorkerPool;
use crate::queue::PriorityTaskQueue;
use crate::registry::{LayerConfig, LayerRegistry};
use crate::task::{Task, TaskExecutor};
use crate::types::{DispatchState, LayerStatus, SystemStatus, TaskOutcome};

/// Background tasks of a started scheduler.
pub(super) struct RunHandles {
    pub(super) shutdown: CancellationToken,
    pub(super) dispatch: JoinHandle<()>,
    pub(super) ticker: JoinHandle<()>,
}

/// The layered priority scheduler.
///
/// Cheap to clone: every clone is a handle onto the same queue, registry and
/// counters, so request handlers can each hold one and call [`submit`].
///
/// [`submit`]: Scheduler::submit
#[derive(Clone)]
pub struct Scheduler {
    pub(super) config: Arc<SchedulerConfig>,
    /// Task bodies per layer; read at `start()`.
    pub(super) executors: Arc<RwLock<HashMap<LayerType, Arc<dyn TaskExecutor>>>>,
    pub(super) queue: Arc<PriorityTaskQueue>,
    pub(super) metrics: Arc<MetricsController>,
    pub(super) events: EventBus,
    pub(super) sink: OutcomeSink,
    /// Present while started.
    pub(super) registry: Arc<RwLock<Option<Arc<LayerRegistry>>>>,
    pub(super) state: Arc<AtomicU8>,
    /// Submission counter; breaks priority ties.
    pub(super) sequence: Arc<AtomicU64>,
    /// Wakes the dispatch loop when work arrives.
    pub(super) wakeup: Arc<Notify>,
    pub(super) lifecycle: Arc<tokio::sync::Mutex<Option<RunHandles>>>,
}

impl Scheduler {
    /// Create a stopped scheduler. Register executors, then call `start()`.
    pub fn new(config: SchedulerConfig) -> Self {
        let metrics = Arc::new(MetricsController::new(config.history_capacity));
        let events = EventBus::new(config.event_capacity);
        let sink = OutcomeSink::new(Arc::clone(&metrics), events.clone());
        Self {
            config: Arc::new(config),
            executors: Arc::new(RwLock::new(HashMap::new())),
            queue: Arc::new(PriorityTaskQueue::new()),
            metrics,
            events,
            sink,
            registry: Arc::new(RwLock::new(None)),
            state: Arc::new(AtomicU8::new(DispatchState::Stopped as u8)),
            sequence: Arc::new(AtomicU64::new(0)),
            wakeup: Arc::new(Notify::new()),
            lifecycle: Arc::new(tokio::sync::Mutex::new(None)),
        }
    }

    /// Register the task body for a layer. Takes effect at the next `start()`.
    pub fn register_executor(&self, layer_type: LayerType, executor: Arc<dyn TaskExecutor>) {
        info!("Registered executor for layer: {}", layer_type);
        self.executors
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(layer_type, executor);
    }

    /// Builder-style [`register_executor`](Self::register_executor).
    pub fn with_executor(self, layer_type: LayerType, executor: Arc<dyn TaskExecutor>) -> Self {
        self.register_executor(layer_type, executor);
        self
    }

    /// Queue a task and return its id immediately; the outcome arrives later
    /// on the event stream.
    ///
    /// Fails fast with [`SchedulerError::PoolSaturated`] when the target
    /// layer already holds `backlog_limit` tasks between the shared queue and
    /// its pool's backlog. Before `start()` the configured limit applies to
    /// the queued tasks alone.
    pub fn submit(
        &self,
        layer_type: LayerType,
        payload: Payload,
        priority: i32,
        timeout_ms: Option<u64>,
    ) -> Result<TaskId, SchedulerError> {
        let timeout = timeout_ms
            .map(Duration::from_millis)
            .unwrap_or_else(|| self.config.default_timeout());
        let sequence = self.sequence.fetch_add(1, Ordering::SeqCst);
        let task = Task::new(layer_type, payload, priority, timeout, sequence);
        let id = task.id;

        let pushed = match self.admission_bound(layer_type) {
            Some((in_pool, backlog_limit)) => self.queue.push_bounded(task, in_pool, backlog_limit),
            None => self.queue.push(task),
        };
        if let Err(e) = pushed {
            warn!(layer = %layer_type, error = %e, "submission rejected");
            return Err(e);
        }
        self.metrics.record_submitted();
        self.wakeup.notify_one();

        debug!(task_id = %id, layer = %layer_type, priority, "task submitted");
        Ok(id)
    }

    /// `(tasks held by the pool, backlog limit)` for a layer that can accept
    /// work. `None` for layers that will resolve as unavailable.
    fn admission_bound(&self, layer_type: LayerType) -> Option<(usize, usize)> {
        match self.current_registry() {
            Some(registry) => registry
                .resolve(layer_type)?
                .active_pool()
                .map(|pool| (pool.backlog(), pool.backlog_limit())),
            None => self
                .config
                .layer(layer_type)
                .map(|_| (0, self.config.backlog_limit)),
        }
    }

    /// Submit with the layer's priority weight and the default timeout.
    pub fn submit_to_layer(&self, layer_type: LayerType, payload: Payload) -> Result<TaskId, SchedulerError> {
        let priority = self
            .config
            .layer(layer_type)
            .map(|spec| spec.priority_weight)
            .unwrap_or(self.config.default_priority);
        self.submit(layer_type, payload, priority, None)
    }

    /// Subscribe to outcome and status events.
    pub fn subscribe(&self) -> broadcast::Receiver<SchedulerEvent> {
        self.events.subscribe()
    }

    /// Recent terminal outcomes, oldest first.
    pub fn recent_outcomes(&self) -> Vec<TaskOutcome> {
        self.metrics.recent()
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    pub fn state(&self) -> DispatchState {
        DispatchState::from_u8(self.state.load(Ordering::SeqCst))
    }

    pub(super) fn set_state(&self, state: DispatchState) {
        self.state.store(state as u8, Ordering::SeqCst);
    }

    pub fn is_running(&self) -> bool {
        self.state() == DispatchState::Running
    }

    pub fn queue_depth(&self) -> usize {
        self.queue.len()
    }

    pub(super) fn current_registry(&self) -> Option<Arc<LayerRegistry>> {
        self.registry
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub(super) fn replace_registry(&self, registry: Option<Arc<LayerRegistry>>) -> Option<Arc<LayerRegistry>> {
        let mut slot = self.registry.write().unwrap_or_else(PoisonError::into_inner);
        std::mem::replace(&mut *slot, registry)
    }

    /// Snapshot of the whole scheduler. Never waits on the dispatch loop.
    pub fn status(&self) -> SystemStatus {
        let (global, stats) = self.metrics.snapshot();
        let state = self.state();

        let layers: Vec<LayerStatus> = match self.current_registry() {
            Some(registry) => registry
                .entries()
                .map(|entry| {
                    self.layer_status(
                        &entry.config,
                        entry.is_active(),
                        entry.pool().map(Arc::as_ref),
                        stats.get(&entry.config.layer_type),
                    )
                })
                .collect(),
            None => {
                let parallelism = self.config.resolved_parallelism();
                self.config
                    .layers
                    .iter()
                    .enumerate()
                    .map(|(id, spec)| {
                        let config = LayerConfig {
                            id,
                            layer_type: spec.layer_type,
                            max_workers: spec.resolve_max_workers(parallelism),
                            priority_weight: spec.priority_weight,
                        };
                        self.layer_status(&config, false, None, stats.get(&spec.layer_type))
                    })
                    .collect()
            }
        };

        let active: Vec<&LayerStatus> = layers.iter().filter(|l| l.is_active).collect();
        SystemStatus {
            running: state == DispatchState::Running,
            state,
            total_layers: layers.len(),
            active_layers: active.len(),
            total_workers: active.iter().map(|l| l.max_workers).sum(),
            busy_workers: layers.iter().map(|l| l.running).sum(),
            queue_depth: self.queue.len(),
            submitted: global.submitted,
            completed: global.completed,
            failed: global.failed,
            timed_out: global.timed_out,
            layer_unavailable: global.layer_unavailable,
            cancelled: global.cancelled,
            success_rate: global.success_rate(),
            layers,
            timestamp: Utc::now(),
        }
    }

    fn layer_status(
        &self,
        config: &LayerConfig,
        is_active: bool,
        pool: Option<&WorkerPool>,
        stats: Option<&LayerStats>,
    ) -> LayerStatus {
        let stats = stats.cloned().unwrap_or_default();
        LayerStatus {
            id: config.id,
            layer_type: config.layer_type,
            max_workers: config.max_workers,
            priority_weight: config.priority_weight,
            is_active,
            processed_tasks: stats.processed_tasks,
            avg_processing_time_ms: stats.avg_processing_time_ms,
            completed: stats.completed,
            failed: stats.failed,
            timed_out: stats.timed_out,
            running: pool.map(|p| p.running()).unwrap_or(0),
            backlog: pool.map(|p| p.backlog()).unwrap_or(0),
            queued: self.queue.queued_for(config.layer_type),
            peak_running: pool.map(|p| p.peak_running()).unwrap_or(0),
        }
    }
}

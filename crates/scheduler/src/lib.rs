//! Layered priority task scheduler.
//!
//! Work is submitted against a [`LayerType`]; the dispatch loop drains a
//! shared priority queue into per-layer [`WorkerPool`]s, each with its own
//! bounded concurrency and backlog. Every dispatched task runs under a
//! timeout race and produces exactly one [`TaskOutcome`], which is folded
//! into the metrics and broadcast as a [`SchedulerEvent`].

pub mod config;
pub mod error;
pub mod events;
pub mod metrics;
pub mod pool;
pub mod queue;
pub mod registry;
pub mod runner;
pub mod task;
pub mod timeout;
pub mod types;

pub use config::{LayerSpec, SchedulerConfig};
pub use error::SchedulerError;
pub use events::{EventBus, OutcomeSink, SchedulerEvent};
pub use metrics::{MetricsController, RingBuffer};
pub use pool::{AdmissionError, PoolError, PoolSettings, WorkerPool};
pub use queue::PriorityTaskQueue;
pub use registry::{LayerConfig, LayerRegistry};
pub use runner::Scheduler;
pub use task::{ExecutionError, FnExecutor, Task, TaskContext, TaskExecutor};
pub use types::{DispatchState, LayerStatus, SystemStatus, TaskOutcome, TaskStatus};

pub use strata_core::{LayerType, Payload, TaskId};

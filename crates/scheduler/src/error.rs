use strata_core::{LayerType, TaskId};
use thiserror::Error;

/// Scheduler-level errors. Per-task failures never surface here; they are
/// reported as [`TaskOutcome`](crate::TaskOutcome)s instead.
#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("no layer initialized successfully; scheduler refuses to start")]
    NoActiveLayers,

    #[error("invalid scheduler config: {0}")]
    InvalidConfig(String),

    #[error("worker pool for layer {layer} is saturated (backlog {backlog_limit})")]
    PoolSaturated { layer: LayerType, backlog_limit: usize },

    #[error("task {0} is already queued")]
    DuplicateTask(TaskId),

    #[error("config I/O error: {0}")]
    ConfigIo(#[from] std::io::Error),

    #[error("config parse error: {0}")]
    ConfigParse(#[from] toml::de::Error),
}

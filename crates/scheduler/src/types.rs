use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strata_core::{LayerType, Payload, TaskId};

/// Terminal status of a submitted task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Completed,
    /// The task body returned an error or panicked.
    Failed,
    TimedOut,
    /// Layer unknown to the registry or inactive.
    LayerUnavailable,
    /// Terminated by shutdown before producing a result.
    Cancelled,
}

impl TaskStatus {
    pub fn is_success(&self) -> bool {
        matches!(self, TaskStatus::Completed)
    }

    /// Whether a task with this status reached an executor.
    pub fn was_executed(&self) -> bool {
        !matches!(self, TaskStatus::LayerUnavailable)
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskStatus::Completed => write!(f, "completed"),
            TaskStatus::Failed => write!(f, "failed"),
            TaskStatus::TimedOut => write!(f, "timed_out"),
            TaskStatus::LayerUnavailable => write!(f, "layer_unavailable"),
            TaskStatus::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Terminal result record for a task.
#[derive(Debug, Clone, Serialize)]
pub struct TaskOutcome {
    pub task_id: TaskId,
    pub layer_type: LayerType,
    pub status: TaskStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Payload>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub processing_time_ms: u64,
    pub timestamp: DateTime<Utc>,
}

impl TaskOutcome {
    fn new(task_id: TaskId, layer_type: LayerType, status: TaskStatus, elapsed: Duration) -> Self {
        Self {
            task_id,
            layer_type,
            status,
            result: None,
            error: None,
            processing_time_ms: elapsed.as_millis() as u64,
            timestamp: Utc::now(),
        }
    }

    pub fn completed(task_id: TaskId, layer_type: LayerType, result: Payload, elapsed: Duration) -> Self {
        Self {
            result: Some(result),
            ..Self::new(task_id, layer_type, TaskStatus::Completed, elapsed)
        }
    }

    pub fn failed(task_id: TaskId, layer_type: LayerType, error: impl Into<String>, elapsed: Duration) -> Self {
        Self {
            error: Some(error.into()),
            ..Self::new(task_id, layer_type, TaskStatus::Failed, elapsed)
        }
    }

    /// Reports the configured timeout as the processing time.
    pub fn timed_out(task_id: TaskId, layer_type: LayerType, timeout: Duration) -> Self {
        Self {
            error: Some(format!("task exceeded timeout of {}ms", timeout.as_millis())),
            ..Self::new(task_id, layer_type, TaskStatus::TimedOut, timeout)
        }
    }

    pub fn layer_unavailable(task_id: TaskId, layer_type: LayerType) -> Self {
        Self {
            error: Some(format!("layer {layer_type} is unavailable")),
            ..Self::new(task_id, layer_type, TaskStatus::LayerUnavailable, Duration::ZERO)
        }
    }

    pub fn cancelled(task_id: TaskId, layer_type: LayerType, reason: impl Into<String>, elapsed: Duration) -> Self {
        Self {
            error: Some(reason.into()),
            ..Self::new(task_id, layer_type, TaskStatus::Cancelled, elapsed)
        }
    }
}

/// Dispatch loop state machine: `Stopped -> Running -> Stopping -> Stopped`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum DispatchState {
    Stopped = 0,
    Running = 1,
    Stopping = 2,
}

impl DispatchState {
    pub(crate) fn from_u8(v: u8) -> Self {
        match v {
            1 => DispatchState::Running,
            2 => DispatchState::Stopping,
            _ => DispatchState::Stopped,
        }
    }
}

/// Per-layer row of [`SystemStatus`].
#[derive(Debug, Clone, Serialize)]
pub struct LayerStatus {
    pub id: usize,
    pub layer_type: LayerType,
    pub max_workers: usize,
    pub priority_weight: i32,
    pub is_active: bool,
    pub processed_tasks: u64,
    pub avg_processing_time_ms: f64,
    pub completed: u64,
    pub failed: u64,
    pub timed_out: u64,
    /// Tasks executing right now.
    pub running: usize,
    /// Tasks admitted to the pool but not yet running.
    pub backlog: usize,
    /// Tasks for this layer still in the shared priority queue.
    pub queued: usize,
    pub peak_running: usize,
}

/// Point-in-time view of the whole scheduler. Derived on demand, never stored.
#[derive(Debug, Clone, Serialize)]
pub struct SystemStatus {
    pub running: bool,
    pub state: DispatchState,
    pub total_layers: usize,
    pub active_layers: usize,
    /// Sum of `max_workers` across active layers.
    pub total_workers: usize,
    pub busy_workers: usize,
    pub queue_depth: usize,
    pub submitted: u64,
    pub completed: u64,
    pub failed: u64,
    pub timed_out: u64,
    pub layer_unavailable: u64,
    pub cancelled: u64,
    /// `completed / terminal outcomes`, 1.0 before any outcome.
    pub success_rate: f64,
    pub layers: Vec<LayerStatus>,
    pub timestamp: DateTime<Utc>,
}

impl SystemStatus {
    /// Total terminal outcomes recorded so far.
    pub fn terminal(&self) -> u64 {
        self.completed + self.failed + self.timed_out + self.layer_unavailable + self.cancelled
    }

    pub fn layer(&self, layer_type: LayerType) -> Option<&LayerStatus> {
        self.layers.iter().find(|l| l.layer_type == layer_type)
    }
}

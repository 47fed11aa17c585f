use std::future::Future;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use strata_core::{LayerType, Payload, TaskId};
use tokio_util::sync::CancellationToken;

/// Error type for task body execution.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ExecutionError {
    #[error("Task failed: {0}")]
    Failed(String),
    #[error("Invalid payload: {0}")]
    InvalidPayload(String),
    #[error("Task cancelled")]
    Cancelled,
}

/// A submitted unit of work. Owned by the queue until dispatch, then by the
/// worker pool that runs it.
#[derive(Debug)]
pub struct Task {
    pub id: TaskId,
    pub layer_type: LayerType,
    pub payload: Payload,
    pub priority: i32,
    pub submitted_at: Instant,
    /// Submission sequence number; breaks priority ties in FIFO order.
    pub sequence: u64,
    pub timeout: Duration,
}

impl Task {
    pub fn new(
        layer_type: LayerType,
        payload: Payload,
        priority: i32,
        timeout: Duration,
        sequence: u64,
    ) -> Self {
        Self {
            id: TaskId::new(),
            layer_type,
            payload,
            priority,
            submitted_at: Instant::now(),
            sequence,
            timeout,
        }
    }
}

/// What an executor learns about the task it is running.
#[derive(Debug, Clone)]
pub struct TaskContext {
    pub task_id: TaskId,
    pub layer_type: LayerType,
    pub priority: i32,
    pub timeout: Duration,
    /// Cancelled when the timeout fires or the pool is force-drained.
    /// Long-running bodies should poll it or select on `cancelled()`.
    pub cancel: CancellationToken,
}

/// Task body for one layer, supplied by the integrating application.
///
/// The scheduler never inspects payloads; decoding them is the executor's job.
#[async_trait]
pub trait TaskExecutor: Send + Sync {
    async fn execute(&self, ctx: TaskContext, payload: Payload) -> Result<Payload, ExecutionError>;
}

/// Adapts an async closure into a [`TaskExecutor`].
///
/// ```ignore
/// let echo = FnExecutor::new(|_ctx, payload| async move { Ok(payload) });
/// ```
pub struct FnExecutor<F> {
    f: F,
}

impl<F, Fut> FnExecutor<F>
where
    F: Fn(TaskContext, Payload) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Payload, ExecutionError>> + Send + 'static,
{
    pub fn new(f: F) -> Self {
        Self { f }
    }
}

#[async_trait]
impl<F, Fut> TaskExecutor for FnExecutor<F>
where
    F: Fn(TaskContext, Payload) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Payload, ExecutionError>> + Send + 'static,
{
    async fn execute(&self, ctx: TaskContext, payload: Payload) -> Result<Payload, ExecutionError> {
        (self.f)(ctx, payload).await
    }
}

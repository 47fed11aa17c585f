//! Per-task execution guard.
//!
//! Races the executor against the task's timeout and the pool's forced
//! shutdown token. The loser is dropped, which stops an async body at its
//! next await point; the task's own cancellation token is also cancelled so
//! bodies that do blocking work can notice and bail out. A body that never
//! yields and never checks its token cannot be interrupted.

use std::panic::AssertUnwindSafe;
use std::time::Instant;

use futures::FutureExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::task::{ExecutionError, Task, TaskContext, TaskExecutor};
use crate::types::TaskOutcome;

enum Race<T> {
    Finished(T),
    TimedOut,
    Shutdown,
}

/// Run `task` on `executor`, producing exactly one terminal outcome.
pub async fn run_guarded(
    executor: &dyn TaskExecutor,
    task: Task,
    shutdown: &CancellationToken,
) -> TaskOutcome {
    let Task {
        id,
        layer_type,
        payload,
        priority,
        timeout,
        ..
    } = task;

    let cancel = shutdown.child_token();
    let ctx = TaskContext {
        task_id: id,
        layer_type,
        priority,
        timeout,
        cancel: cancel.clone(),
    };

    let started = Instant::now();
    let execution = AssertUnwindSafe(executor.execute(ctx, payload)).catch_unwind();

    let race = tokio::select! {
        biased;
        _ = shutdown.cancelled() => Race::Shutdown,
        result = execution => Race::Finished(result),
        _ = tokio::time::sleep(timeout) => Race::TimedOut,
    };
    let elapsed = started.elapsed();

    match race {
        Race::Finished(Ok(Ok(result))) => TaskOutcome::completed(id, layer_type, result, elapsed),
        Race::Finished(Ok(Err(ExecutionError::Cancelled))) => {
            TaskOutcome::cancelled(id, layer_type, ExecutionError::Cancelled.to_string(), elapsed)
        }
        Race::Finished(Ok(Err(e))) => {
            debug!(task_id = %id, layer = %layer_type, error = %e, "task body returned error");
            TaskOutcome::failed(id, layer_type, e.to_string(), elapsed)
        }
        Race::Finished(Err(panic)) => {
            let msg = panic_message(panic.as_ref());
            warn!(task_id = %id, layer = %layer_type, panic = %msg, "task body panicked");
            TaskOutcome::failed(id, layer_type, format!("task panicked: {msg}"), elapsed)
        }
        Race::TimedOut => {
            cancel.cancel();
            debug!(task_id = %id, layer = %layer_type, timeout_ms = timeout.as_millis() as u64, "task timed out");
            TaskOutcome::timed_out(id, layer_type, timeout)
        }
        Race::Shutdown => {
            cancel.cancel();
            warn!(task_id = %id, layer = %layer_type, "task cancelled by forced shutdown");
            TaskOutcome::cancelled(id, layer_type, "cancelled by scheduler shutdown", elapsed)
        }
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    use strata_core::{LayerType, Payload};

    use super::*;
    use crate::task::FnExecutor;
    use crate::types::TaskStatus;

    fn task(timeout_ms: u64) -> Task {
        Task::new(
            LayerType::RealTime,
            Payload::from_static(b"in"),
            5,
            Duration::from_millis(timeout_ms),
            0,
        )
    }

    fn sleeper(ms: u64) -> Arc<dyn TaskExecutor> {
        Arc::new(FnExecutor::new(move |_ctx: TaskContext, payload: Payload| async move {
            tokio::time::sleep(Duration::from_millis(ms)).await;
            Ok::<Payload, ExecutionError>(payload)
        }))
    }

    #[tokio::test]
    async fn completes_within_timeout() {
        let outcome = run_guarded(sleeper(5).as_ref(), task(1000), &CancellationToken::new()).await;
        assert_eq!(outcome.status, TaskStatus::Completed);
        assert_eq!(outcome.result.as_deref(), Some(&b"in"[..]));
    }

    #[tokio::test(start_paused = true)]
    async fn slow_body_times_out_at_deadline() {
        let outcome = run_guarded(sleeper(500).as_ref(), task(100), &CancellationToken::new()).await;
        assert_eq!(outcome.status, TaskStatus::TimedOut);
        assert_eq!(outcome.processing_time_ms, 100);
    }

    #[tokio::test]
    async fn timeout_cancels_task_token() {
        let saw_cancel = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&saw_cancel);
        let exec = FnExecutor::new(move |ctx: TaskContext, _payload: Payload| {
            let flag = Arc::clone(&flag);
            async move {
                let token = ctx.cancel.clone();
                // Observe cancellation from a detached task, as blocking work would.
                tokio::spawn(async move {
                    token.cancelled().await;
                    flag.store(true, Ordering::SeqCst);
                });
                tokio::time::sleep(Duration::from_secs(10)).await;
                Ok::<Payload, ExecutionError>(Payload::new())
            }
        });

        let outcome = run_guarded(&exec, task(20), &CancellationToken::new()).await;
        assert_eq!(outcome.status, TaskStatus::TimedOut);
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(saw_cancel.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn body_error_is_surfaced() {
        let exec = FnExecutor::new(|_ctx, _payload| async move {
            Err::<Payload, _>(ExecutionError::Failed("upstream 503".into()))
        });
        let outcome = run_guarded(&exec, task(1000), &CancellationToken::new()).await;
        assert_eq!(outcome.status, TaskStatus::Failed);
        assert!(outcome.error.unwrap().contains("upstream 503"));
    }

    #[tokio::test]
    async fn panic_becomes_failed_outcome() {
        let exec = FnExecutor::new(|_ctx, _payload| async move {
            if true {
                panic!("kaboom");
            }
            Ok::<Payload, ExecutionError>(Payload::new())
        });
        let outcome = run_guarded(&exec, task(1000), &CancellationToken::new()).await;
        assert_eq!(outcome.status, TaskStatus::Failed);
        assert!(outcome.error.unwrap().contains("kaboom"));
    }

    #[tokio::test]
    async fn shutdown_token_cancels_in_flight() {
        let shutdown = CancellationToken::new();
        let trigger = shutdown.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            trigger.cancel();
        });

        let outcome = run_guarded(sleeper(5_000).as_ref(), task(10_000), &shutdown).await;
        assert_eq!(outcome.status, TaskStatus::Cancelled);
        assert!(outcome.processing_time_ms < 5_000);
    }

    #[tokio::test]
    async fn body_reporting_cancel_is_cancelled() {
        let exec = FnExecutor::new(|_ctx, _payload| async move {
            Err::<Payload, _>(ExecutionError::Cancelled)
        });
        let outcome = run_guarded(&exec, task(1000), &CancellationToken::new()).await;
        assert_eq!(outcome.status, TaskStatus::Cancelled);
    }
}

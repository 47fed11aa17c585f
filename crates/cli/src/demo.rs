//! Synthetic workload: every layer gets an executor that sleeps for the
//! requested time, and tasks are spread round-robin across the layer table.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};

use strata_scheduler::{
    ExecutionError, LayerType, Payload, Scheduler, SchedulerConfig, SchedulerError, SchedulerEvent,
    SystemStatus, TaskContext, TaskExecutor, TaskId,
};

use crate::cli::RunArgs;

/// Payload understood by [`DemoExecutor`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DemoWork {
    pub work_ms: u64,
    #[serde(default)]
    pub fail: bool,
}

impl DemoWork {
    pub fn to_payload(&self) -> Result<Payload, serde_json::Error> {
        serde_json::to_vec(self).map(Payload::from)
    }
}

/// Sleeps for `work_ms`, honouring the task's cancellation token.
pub struct DemoExecutor;

#[async_trait]
impl TaskExecutor for DemoExecutor {
    async fn execute(&self, ctx: TaskContext, payload: Payload) -> Result<Payload, ExecutionError> {
        let work: DemoWork =
            serde_json::from_slice(&payload).map_err(|e| ExecutionError::InvalidPayload(e.to_string()))?;

        tokio::select! {
            _ = ctx.cancel.cancelled() => return Err(ExecutionError::Cancelled),
            _ = tokio::time::sleep(Duration::from_millis(work.work_ms)) => {}
        }

        if work.fail {
            return Err(ExecutionError::Failed(format!("{} simulated failure", ctx.layer_type)));
        }
        let result = serde_json::json!({ "layer": ctx.layer_type, "work_ms": work.work_ms });
        serde_json::to_vec(&result)
            .map(Payload::from)
            .map_err(|e| ExecutionError::Failed(e.to_string()))
    }
}

/// Work item `i` of the synthetic run.
pub fn work_for(i: usize, args: &RunArgs) -> DemoWork {
    DemoWork {
        work_ms: (i as u64 * 37) % args.max_work_ms.max(1) + 1,
        fail: args.fail_every > 0 && i % args.fail_every == args.fail_every - 1,
    }
}

/// Submit the workload, wait for every outcome (or Ctrl-C), then stop.
pub async fn run(config: SchedulerConfig, args: RunArgs) -> Result<SystemStatus> {
    let layers: Vec<LayerType> = config.layers.iter().map(|l| l.layer_type).collect();
    if layers.is_empty() {
        anyhow::bail!("no layers configured");
    }
    let grace = args
        .grace_ms
        .map(Duration::from_millis)
        .unwrap_or_else(|| config.drain_grace());

    let scheduler = Scheduler::new(config);
    for layer in &layers {
        scheduler.register_executor(*layer, Arc::new(DemoExecutor));
    }
    let mut rx = scheduler.subscribe();
    scheduler.start().await.context("failed to start scheduler")?;

    let mut pending: HashSet<TaskId> = HashSet::with_capacity(args.tasks);
    let mut rejected = 0usize;
    for i in 0..args.tasks {
        let layer = layers[i % layers.len()];
        let payload = work_for(i, &args).to_payload()?;
        let submitted = match args.timeout_ms {
            Some(timeout_ms) => {
                let priority = scheduler
                    .config()
                    .layer(layer)
                    .map(|l| l.priority_weight)
                    .unwrap_or(scheduler.config().default_priority);
                scheduler.submit(layer, payload, priority, Some(timeout_ms))
            }
            None => scheduler.submit_to_layer(layer, payload),
        };
        match submitted {
            Ok(id) => {
                pending.insert(id);
            }
            Err(SchedulerError::PoolSaturated { layer, backlog_limit }) => {
                warn!(layer = %layer, backlog_limit, "submission rejected, backlog full");
                rejected += 1;
            }
            Err(e) => return Err(e.into()),
        }
    }
    info!(submitted = pending.len(), rejected, "workload submitted");

    let interrupted = tokio::select! {
        _ = wait_for(&mut rx, &mut pending, args.json) => false,
        _ = tokio::signal::ctrl_c() => true,
    };
    if interrupted {
        warn!(outstanding = pending.len(), "interrupted, shutting down");
    }

    scheduler.stop_with_grace(grace).await;
    Ok(scheduler.status())
}

async fn wait_for(
    rx: &mut tokio::sync::broadcast::Receiver<SchedulerEvent>,
    pending: &mut HashSet<TaskId>,
    json: bool,
) {
    while !pending.is_empty() {
        match rx.recv().await {
            Ok(SchedulerEvent::TaskCompleted(outcome)) | Ok(SchedulerEvent::TaskFailed(outcome)) => {
                pending.remove(&outcome.task_id);
                debug!(
                    task_id = %outcome.task_id,
                    layer = %outcome.layer_type,
                    status = %outcome.status,
                    processing_time_ms = outcome.processing_time_ms,
                    "outcome"
                );
                if json {
                    match serde_json::to_string(&outcome) {
                        Ok(line) => println!("{line}"),
                        Err(e) => warn!(error = %e, "failed to encode outcome"),
                    }
                }
            }
            Ok(SchedulerEvent::StatusTick(status)) => info!(
                queue_depth = status.queue_depth,
                busy_workers = status.busy_workers,
                completed = status.completed,
                failed = status.failed,
                "progress"
            ),
            Err(RecvError::Lagged(skipped)) => {
                warn!(skipped, "event stream lagged, falling back to status counters");
                return;
            }
            Err(RecvError::Closed) => return,
        }
    }
}

/// Human-readable summary of a finished run.
pub fn render_summary(status: &SystemStatus) -> String {
    let mut out = format!(
        "{:<16} {:>7} {:>9} {:>9} {:>7} {:>9} {:>6}\n",
        "layer", "workers", "processed", "completed", "failed", "timed_out", "avg_ms"
    );
    for layer in &status.layers {
        out.push_str(&format!(
            "{:<16} {:>7} {:>9} {:>9} {:>7} {:>9} {:>6.1}\n",
            layer.layer_type.as_str(),
            layer.max_workers,
            layer.processed_tasks,
            layer.completed,
            layer.failed,
            layer.timed_out,
            layer.avg_processing_time_ms
        ));
    }
    out.push_str(&format!(
        "submitted={} completed={} failed={} timed_out={} unavailable={} cancelled={} success_rate={:.1}%\n",
        status.submitted,
        status.completed,
        status.failed,
        status.timed_out,
        status.layer_unavailable,
        status.cancelled,
        status.success_rate * 100.0
    ));
    out
}

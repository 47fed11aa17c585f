use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::pool::AdmissionError;
use crate::registry::LayerRegistry;
use crate::task::Task;
use crate::types::TaskOutcome;

use super::Scheduler;

impl Scheduler {
    /// Move queued tasks into their layer pools until `shutdown` fires.
    ///
    /// Admission never waits for execution, so one slow layer does not hold
    /// back dispatch to the others.
    pub(super) async fn dispatch_loop(self, registry: Arc<LayerRegistry>, shutdown: CancellationToken) {
        let poll = self.config.poll_interval();
        info!(
            layers = registry.len(),
            active = registry.active_count(),
            poll_ms = poll.as_millis() as u64,
            "dispatch loop started"
        );

        // Tasks whose pool was full during this pass. They go back on the
        // queue once it is empty, so a full layer never blocks the others.
        let mut deferred: Vec<Task> = Vec::new();
        while !shutdown.is_cancelled() {
            match self.queue.pop_highest() {
                Some(task) => {
                    if let Some(task) = self.dispatch_one(&registry, task) {
                        deferred.push(task);
                    }
                    tokio::task::yield_now().await;
                }
                None if !deferred.is_empty() => {
                    debug!(count = deferred.len(), "requeueing tasks for saturated pools");
                    for task in deferred.drain(..) {
                        self.queue.requeue(task);
                    }
                    tokio::select! {
                        _ = shutdown.cancelled() => break,
                        _ = tokio::time::sleep(poll) => {}
                    }
                }
                None => {
                    tokio::select! {
                        _ = shutdown.cancelled() => break,
                        _ = self.wakeup.notified() => {}
                        _ = tokio::time::sleep(poll) => {}
                    }
                }
            }
        }
        for task in deferred {
            self.queue.requeue(task);
        }

        info!(queued = self.queue.len(), "dispatch loop stopped");
    }

    /// Route one task: unknown or inactive layers get an immediate
    /// `LayerUnavailable` outcome, everything else goes to the pool.
    ///
    /// Hands the task back when its pool is full.
    pub(super) fn dispatch_one(&self, registry: &LayerRegistry, task: Task) -> Option<Task> {
        let layer = task.layer_type;
        let Some(pool) = registry.resolve(layer).and_then(|e| e.active_pool()) else {
            debug!(task_id = %task.id, layer = %layer, "layer unavailable, skipping execution");
            self.sink.deliver(TaskOutcome::layer_unavailable(task.id, layer));
            return None;
        };

        let task_id = task.id;
        match pool.run(task) {
            Ok(()) => {
                debug!(task_id = %task_id, layer = %layer, "task dispatched");
                None
            }
            Err(AdmissionError::Saturated(task)) => {
                debug!(task_id = %task_id, layer = %layer, backlog = pool.backlog(), "pool saturated, deferring");
                Some(task)
            }
            Err(AdmissionError::Closed(task)) => {
                debug!(task_id = %task_id, layer = %layer, "pool closed, layer unavailable");
                self.sink.deliver(TaskOutcome::layer_unavailable(task.id, layer));
                None
            }
        }
    }
}

use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::error::SchedulerError;
use crate::events::SchedulerEvent;
use crate::registry::LayerRegistry;
use crate::types::{DispatchState, TaskOutcome};

use super::core::RunHandles;
use super::Scheduler;

impl Scheduler {
    /// Build the layer registry and start the dispatch loop and status ticker.
    ///
    /// Fails with [`SchedulerError::NoActiveLayers`] when no layer pool could
    /// be built; the scheduler then stays stopped. Starting a running
    /// scheduler is a no-op.
    pub async fn start(&self) -> Result<(), SchedulerError> {
        let mut lifecycle = self.lifecycle.lock().await;
        if lifecycle.is_some() {
            debug!("start requested but scheduler is already running");
            return Ok(());
        }

        let executors = self
            .executors
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone();
        let registry = Arc::new(LayerRegistry::initialize(&self.config, &executors, &self.sink)?);
        self.replace_registry(Some(Arc::clone(&registry)));

        let shutdown = CancellationToken::new();
        self.set_state(DispatchState::Running);

        let dispatch = tokio::spawn(self.clone().dispatch_loop(Arc::clone(&registry), shutdown.clone()));
        let ticker = tokio::spawn(self.clone().status_ticker(shutdown.clone()));
        *lifecycle = Some(RunHandles {
            shutdown,
            dispatch,
            ticker,
        });

        info!(
            "Scheduler started with {} active of {} layers, {} workers, {} queued tasks",
            registry.active_count(),
            registry.len(),
            registry.total_workers(),
            self.queue.len()
        );
        Ok(())
    }

    /// Stop with the configured drain grace. Idempotent.
    pub async fn stop(&self) {
        self.stop_with_grace(self.config.drain_grace()).await;
    }

    /// Stop dispatching, give in-flight work `grace` to finish, then cancel
    /// the rest and tear down every pool. Tasks still queued are reported as
    /// `Cancelled`. Calling this on a stopped scheduler does nothing.
    pub async fn stop_with_grace(&self, grace: Duration) {
        let mut lifecycle = self.lifecycle.lock().await;
        let Some(handles) = lifecycle.take() else {
            debug!("stop requested but scheduler is not running");
            return;
        };

        info!(grace_ms = grace.as_millis() as u64, "Scheduler shutdown requested");
        self.set_state(DispatchState::Stopping);
        handles.shutdown.cancel();

        if let Err(e) = handles.dispatch.await {
            error!(error = %e, "dispatch loop ended abnormally");
        }
        if let Err(e) = handles.ticker.await {
            error!(error = %e, "status ticker ended abnormally");
        }

        let undispatched = self.queue.drain();
        if !undispatched.is_empty() {
            info!(count = undispatched.len(), "cancelling undispatched tasks");
        }
        for task in undispatched {
            self.sink.deliver(TaskOutcome::cancelled(
                task.id,
                task.layer_type,
                "scheduler stopped before dispatch",
                Duration::ZERO,
            ));
        }

        // The registry stays published while pools drain so status() keeps
        // reporting the work still in flight.
        if let Some(registry) = self.current_registry() {
            join_all(registry.pools().map(|pool| pool.shutdown(grace))).await;
        }
        self.replace_registry(None);

        self.set_state(DispatchState::Stopped);
        info!("Scheduler stopped");
    }

    /// Publish a `StatusTick` every `status_interval` until shutdown.
    async fn status_ticker(self, shutdown: CancellationToken) {
        let mut interval = tokio::time::interval(self.config.status_interval());
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately; skip it.
        interval.tick().await;

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = interval.tick() => {
                    let status = self.status();
                    debug!(
                        queue_depth = status.queue_depth,
                        busy_workers = status.busy_workers,
                        completed = status.completed,
                        failed = status.failed,
                        success_rate = status.success_rate,
                        "status tick"
                    );
                    self.events.publish(SchedulerEvent::StatusTick(status));
                }
            }
        }
    }
}

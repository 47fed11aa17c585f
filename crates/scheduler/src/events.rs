//! Event stream consumed by the surrounding transport layer.

use std::sync::Arc;

use serde::Serialize;
use tokio::sync::broadcast;
use tracing::debug;

use crate::metrics::MetricsController;
use crate::types::{SystemStatus, TaskOutcome, TaskStatus};

/// Events published by a running scheduler.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum SchedulerEvent {
    TaskCompleted(TaskOutcome),
    /// Any terminal status other than `Completed`.
    TaskFailed(TaskOutcome),
    StatusTick(SystemStatus),
}

impl SchedulerEvent {
    pub fn for_outcome(outcome: TaskOutcome) -> Self {
        if outcome.status == TaskStatus::Completed {
            SchedulerEvent::TaskCompleted(outcome)
        } else {
            SchedulerEvent::TaskFailed(outcome)
        }
    }
}

/// Broadcast fan-out of [`SchedulerEvent`]s. Slow subscribers lag and lose
/// the oldest events rather than blocking publishers.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<SchedulerEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SchedulerEvent> {
        self.tx.subscribe()
    }

    pub fn publish(&self, event: SchedulerEvent) {
        // No subscribers is not an error.
        let _ = self.tx.send(event);
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

/// Where terminal outcomes go: metrics first, then listeners, so a listener
/// reacting to an event already sees it reflected in the status.
#[derive(Clone)]
pub struct OutcomeSink {
    metrics: Arc<MetricsController>,
    events: EventBus,
}

impl OutcomeSink {
    pub fn new(metrics: Arc<MetricsController>, events: EventBus) -> Self {
        Self { metrics, events }
    }

    pub fn deliver(&self, outcome: TaskOutcome) {
        debug!(
            task_id = %outcome.task_id,
            layer = %outcome.layer_type,
            status = %outcome.status,
            ms = outcome.processing_time_ms,
            "task outcome"
        );
        self.metrics.record_outcome(&outcome);
        self.events.publish(SchedulerEvent::for_outcome(outcome));
    }
}

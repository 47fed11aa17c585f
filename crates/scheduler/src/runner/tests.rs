use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use strata_core::{LayerType, Payload};
use tokio::sync::broadcast;

use crate::config::{LayerSpec, SchedulerConfig};
use crate::error::SchedulerError;
use crate::events::SchedulerEvent;
use crate::runner::Scheduler;
use crate::task::{ExecutionError, Task, TaskContext, TaskExecutor};
use crate::types::{DispatchState, TaskOutcome, TaskStatus};

/// Mock executor for testing.
struct MockExecutor {
    delay: Duration,
    fail: bool,
    execute_count: Arc<AtomicUsize>,
    seen: Arc<Mutex<Vec<Payload>>>,
}

impl MockExecutor {
    fn new(delay_ms: u64) -> Self {
        Self {
            delay: Duration::from_millis(delay_ms),
            fail: false,
            execute_count: Arc::new(AtomicUsize::new(0)),
            seen: Arc::new(Mutex::new(Vec::new())),
        }
    }

    fn failing() -> Self {
        Self {
            fail: true,
            ..Self::new(0)
        }
    }

    fn execution_count(&self) -> usize {
        self.execute_count.load(Ordering::SeqCst)
    }

    fn seen(&self) -> Vec<Payload> {
        self.seen.lock().unwrap().clone()
    }
}

#[async_trait]
impl TaskExecutor for MockExecutor {
    async fn execute(&self, _ctx: TaskContext, payload: Payload) -> Result<Payload, ExecutionError> {
        self.execute_count.fetch_add(1, Ordering::SeqCst);
        self.seen.lock().unwrap().push(payload.clone());
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if self.fail {
            return Err(ExecutionError::Failed("mock failure".into()));
        }
        Ok(payload)
    }
}

fn config(layers: Vec<LayerSpec>) -> SchedulerConfig {
    SchedulerConfig {
        poll_interval_ms: 5,
        ..SchedulerConfig::with_layers(layers)
    }
}

async fn next_outcome(rx: &mut broadcast::Receiver<SchedulerEvent>) -> TaskOutcome {
    loop {
        match tokio::time::timeout(Duration::from_secs(5), rx.recv()).await {
            Ok(Ok(SchedulerEvent::TaskCompleted(o))) | Ok(Ok(SchedulerEvent::TaskFailed(o))) => return o,
            Ok(Ok(SchedulerEvent::StatusTick(_))) => continue,
            other => panic!("no outcome received: {other:?}"),
        }
    }
}

#[test]
fn scheduler_creation() {
    let scheduler = Scheduler::new(SchedulerConfig::default());
    assert_eq!(scheduler.state(), DispatchState::Stopped);
    assert!(!scheduler.is_running());
    assert_eq!(scheduler.queue_depth(), 0);

    let status = scheduler.status();
    assert_eq!(status.total_layers, 12);
    assert_eq!(status.active_layers, 0);
    assert_eq!(status.total_workers, 0);
    assert_eq!(status.success_rate, 1.0);
}

#[test]
fn submit_before_start_queues() {
    let scheduler = Scheduler::new(SchedulerConfig::default());
    let a = scheduler
        .submit(LayerType::Analytics, Payload::from_static(b"a"), 3, None)
        .unwrap();
    let b = scheduler.submit_to_layer(LayerType::FastPath, Payload::new()).unwrap();

    assert_ne!(a, b);
    assert_eq!(scheduler.queue_depth(), 2);
    let status = scheduler.status();
    assert_eq!(status.submitted, 2);
    assert_eq!(status.layer(LayerType::Analytics).unwrap().queued, 1);
}

#[test]
fn submit_before_start_honours_backlog_limit() {
    let scheduler = Scheduler::new(SchedulerConfig {
        backlog_limit: 2,
        ..config(vec![LayerSpec::new(LayerType::FastPath, 0.5, 10)])
    });
    scheduler.submit(LayerType::FastPath, Payload::new(), 5, None).unwrap();
    scheduler.submit(LayerType::FastPath, Payload::new(), 5, None).unwrap();

    let err = scheduler
        .submit(LayerType::FastPath, Payload::new(), 5, None)
        .unwrap_err();
    assert!(matches!(
        err,
        SchedulerError::PoolSaturated { layer: LayerType::FastPath, backlog_limit: 2 }
    ));

    // Unconfigured layers are not bounded; they resolve as unavailable later.
    scheduler.submit(LayerType::Backup, Payload::new(), 1, None).unwrap();
    assert_eq!(scheduler.queue_depth(), 3);
    assert_eq!(scheduler.status().submitted, 3);
}

#[tokio::test]
async fn start_without_executors_fails() {
    let scheduler = Scheduler::new(config(vec![LayerSpec::new(LayerType::Neural, 0.5, 7)]));
    let err = scheduler.start().await.unwrap_err();
    assert!(matches!(err, SchedulerError::NoActiveLayers));
    assert_eq!(scheduler.state(), DispatchState::Stopped);
    // Stop on a scheduler that never started is harmless.
    scheduler.stop().await;
}

#[tokio::test]
async fn executes_submitted_task() {
    let exec = Arc::new(MockExecutor::new(0));
    let scheduler = Scheduler::new(config(vec![LayerSpec::new(LayerType::FastPath, 0.5, 10)]))
        .with_executor(LayerType::FastPath, exec.clone());
    let mut rx = scheduler.subscribe();
    scheduler.start().await.unwrap();
    assert!(scheduler.is_running());

    let id = scheduler
        .submit(LayerType::FastPath, Payload::from_static(b"ping"), 5, Some(1000))
        .unwrap();
    let outcome = next_outcome(&mut rx).await;

    assert_eq!(outcome.task_id, id);
    assert_eq!(outcome.status, TaskStatus::Completed);
    assert_eq!(outcome.result.as_deref(), Some(&b"ping"[..]));
    assert_eq!(exec.execution_count(), 1);

    scheduler.stop().await;
    assert_eq!(scheduler.state(), DispatchState::Stopped);
}

#[tokio::test]
async fn start_twice_is_noop() {
    let exec = Arc::new(MockExecutor::new(0));
    let scheduler = Scheduler::new(config(vec![LayerSpec::new(LayerType::Storage, 0.5, 5)]))
        .with_executor(LayerType::Storage, exec);
    scheduler.start().await.unwrap();
    scheduler.start().await.unwrap();
    assert!(scheduler.is_running());
    scheduler.stop().await;
    scheduler.stop().await;
    assert!(!scheduler.is_running());
}

#[tokio::test]
async fn unconfigured_layer_reports_unavailable() {
    let exec = Arc::new(MockExecutor::new(0));
    let scheduler = Scheduler::new(config(vec![LayerSpec::new(LayerType::FastPath, 0.5, 10)]))
        .with_executor(LayerType::FastPath, exec.clone());
    let mut rx = scheduler.subscribe();
    scheduler.start().await.unwrap();

    scheduler.submit(LayerType::Backup, Payload::new(), 1, None).unwrap();
    let outcome = next_outcome(&mut rx).await;

    assert_eq!(outcome.status, TaskStatus::LayerUnavailable);
    assert_eq!(outcome.layer_type, LayerType::Backup);
    assert_eq!(exec.execution_count(), 0);
    assert_eq!(scheduler.status().layer_unavailable, 1);

    scheduler.stop().await;
}

#[tokio::test]
async fn failed_executor_isolated_from_other_layers() {
    let bad = Arc::new(MockExecutor::failing());
    let good = Arc::new(MockExecutor::new(0));
    let scheduler = Scheduler::new(config(vec![
        LayerSpec::new(LayerType::Security, 0.5, 9),
        LayerSpec::new(LayerType::Analytics, 0.5, 6),
    ]))
    .with_executor(LayerType::Security, bad)
    .with_executor(LayerType::Analytics, good);
    let mut rx = scheduler.subscribe();
    scheduler.start().await.unwrap();

    scheduler.submit(LayerType::Security, Payload::new(), 9, None).unwrap();
    scheduler.submit(LayerType::Analytics, Payload::new(), 6, None).unwrap();

    let mut statuses = vec![next_outcome(&mut rx).await, next_outcome(&mut rx).await];
    statuses.sort_by_key(|o| o.layer_type.as_str());
    assert_eq!(statuses[0].layer_type, LayerType::Analytics);
    assert_eq!(statuses[0].status, TaskStatus::Completed);
    assert_eq!(statuses[1].status, TaskStatus::Failed);
    assert!(statuses[1].error.as_deref().unwrap().contains("mock failure"));

    let status = scheduler.status();
    assert_eq!(status.completed, 1);
    assert_eq!(status.failed, 1);
    assert_eq!(status.success_rate, 0.5);
    assert!(status.layer(LayerType::Security).unwrap().is_active);

    scheduler.stop().await;
}

#[tokio::test]
async fn priority_order_within_a_layer() {
    let exec = Arc::new(MockExecutor::new(5));
    let scheduler = Scheduler::new(config(vec![
        LayerSpec::new(LayerType::CoreProcessing, 0.5, 8).with_max_workers(1)
    ]))
    .with_executor(LayerType::CoreProcessing, exec.clone());
    let mut rx = scheduler.subscribe();

    for (label, priority) in [("low", 1), ("high", 9), ("mid", 5), ("high2", 9)] {
        scheduler
            .submit(LayerType::CoreProcessing, Payload::from(label), priority, None)
            .unwrap();
    }
    scheduler.start().await.unwrap();
    for _ in 0..4 {
        next_outcome(&mut rx).await;
    }

    let order: Vec<Payload> = exec.seen();
    let expected: Vec<Payload> = ["high", "high2", "mid", "low"].into_iter().map(Payload::from).collect();
    assert_eq!(order, expected);

    scheduler.stop().await;
}

#[tokio::test]
async fn stop_cancels_undispatched_tasks() {
    let exec = Arc::new(MockExecutor::new(0));
    let scheduler = Scheduler::new(config(vec![LayerSpec::new(LayerType::Integration, 0.5, 6)]))
        .with_executor(LayerType::Integration, exec.clone());
    let mut rx = scheduler.subscribe();
    scheduler.start().await.unwrap();

    // Halt the dispatch loop only, so the next submission stays queued.
    if let Some(handles) = scheduler.lifecycle.lock().await.as_ref() {
        handles.shutdown.cancel();
    }
    tokio::time::sleep(Duration::from_millis(50)).await;
    scheduler.submit(LayerType::Integration, Payload::new(), 1, None).unwrap();
    assert_eq!(scheduler.queue_depth(), 1);

    scheduler.stop().await;
    let outcome = next_outcome(&mut rx).await;
    assert_eq!(outcome.status, TaskStatus::Cancelled);
    assert_eq!(scheduler.queue_depth(), 0);
    assert_eq!(scheduler.status().cancelled, 1);
    assert_eq!(exec.execution_count(), 0);
}

#[tokio::test]
async fn status_reports_layer_rows_in_config_order() {
    let exec = Arc::new(MockExecutor::new(0));
    let scheduler = Scheduler::new(config(vec![
        LayerSpec::new(LayerType::Monitoring, 0.25, 3).with_max_workers(2),
        LayerSpec::new(LayerType::RealTime, 0.25, 9).with_max_workers(3),
    ]))
    .with_executor(LayerType::Monitoring, exec.clone())
    .with_executor(LayerType::RealTime, exec);
    scheduler.start().await.unwrap();

    let status = scheduler.status();
    assert!(status.running);
    assert_eq!(status.state, DispatchState::Running);
    assert_eq!(status.active_layers, 2);
    assert_eq!(status.total_workers, 5);
    let ids: Vec<(usize, LayerType)> = status.layers.iter().map(|l| (l.id, l.layer_type)).collect();
    assert_eq!(ids, vec![(0, LayerType::Monitoring), (1, LayerType::RealTime)]);

    scheduler.stop().await;
}

#[tokio::test]
async fn saturated_pool_defers_dispatch() {
    let exec = Arc::new(MockExecutor::new(100));
    let scheduler = Scheduler::new(SchedulerConfig {
        backlog_limit: 1,
        ..config(vec![LayerSpec::new(LayerType::FastPath, 0.5, 10).with_max_workers(1)])
    })
    .with_executor(LayerType::FastPath, exec.clone());
    let mut rx = scheduler.subscribe();
    scheduler.start().await.unwrap();

    // One task running, one waiting in the pool backlog.
    scheduler.submit(LayerType::FastPath, Payload::new(), 5, None).unwrap();
    tokio::time::sleep(Duration::from_millis(30)).await;
    scheduler.submit(LayerType::FastPath, Payload::new(), 5, None).unwrap();
    tokio::time::sleep(Duration::from_millis(30)).await;

    let registry = scheduler.current_registry().unwrap();
    let extra = Task::new(LayerType::FastPath, Payload::new(), 5, Duration::from_secs(5), u64::MAX);
    let extra_id = extra.id;
    let handed_back = scheduler.dispatch_one(&registry, extra).unwrap();
    assert_eq!(handed_back.id, extra_id);
    assert_eq!(scheduler.status().failed, 0);

    // The dispatch loop retries it once the pool has room.
    scheduler.queue.requeue(handed_back);

    for _ in 0..3 {
        assert_eq!(next_outcome(&mut rx).await.status, TaskStatus::Completed);
    }
    assert_eq!(exec.execution_count(), 3);
    assert_eq!(scheduler.status().failed, 0);

    scheduler.stop().await;
}

#[tokio::test]
async fn closed_pool_reports_layer_unavailable() {
    let exec = Arc::new(MockExecutor::new(0));
    let scheduler = Scheduler::new(config(vec![LayerSpec::new(LayerType::Storage, 0.5, 5)]))
        .with_executor(LayerType::Storage, exec.clone());
    let mut rx = scheduler.subscribe();
    scheduler.start().await.unwrap();

    let registry = scheduler.current_registry().unwrap();
    let pool = registry.resolve(LayerType::Storage).unwrap().pool().unwrap().clone();
    pool.shutdown(Duration::from_millis(10)).await;

    let task = Task::new(LayerType::Storage, Payload::new(), 5, Duration::from_secs(1), 0);
    let id = task.id;
    assert!(scheduler.dispatch_one(&registry, task).is_none());

    let outcome = next_outcome(&mut rx).await;
    assert_eq!(outcome.task_id, id);
    assert_eq!(outcome.status, TaskStatus::LayerUnavailable);
    assert_eq!(exec.execution_count(), 0);

    scheduler.stop().await;
}

#[tokio::test]
async fn saturated_layer_does_not_hold_back_others() {
    let slow = Arc::new(MockExecutor::new(100));
    let fast = Arc::new(MockExecutor::new(0));
    let scheduler = Scheduler::new(SchedulerConfig {
        backlog_limit: 1,
        poll_interval_ms: 200,
        ..SchedulerConfig::with_layers(vec![
            LayerSpec::new(LayerType::FastPath, 0.5, 10).with_max_workers(1),
            LayerSpec::new(LayerType::Backup, 0.5, 1).with_max_workers(1),
        ])
    })
    .with_executor(LayerType::FastPath, slow.clone())
    .with_executor(LayerType::Backup, fast.clone());
    let mut rx = scheduler.subscribe();

    // Queue more FastPath work than its pool can hold, ahead of a
    // low-priority Backup task.
    for sequence in 0..3 {
        let task = Task::new(LayerType::FastPath, Payload::new(), 9, Duration::from_secs(5), sequence);
        scheduler.queue.push(task).unwrap();
    }
    let backup = Task::new(LayerType::Backup, Payload::new(), 1, Duration::from_secs(5), 3);
    let backup_id = backup.id;
    scheduler.queue.push(backup).unwrap();
    scheduler.start().await.unwrap();

    let first = next_outcome(&mut rx).await;
    assert_eq!(first.task_id, backup_id);
    assert_eq!(first.status, TaskStatus::Completed);

    for _ in 0..3 {
        assert_eq!(next_outcome(&mut rx).await.status, TaskStatus::Completed);
    }
    assert_eq!(slow.execution_count(), 3);
    assert_eq!(fast.execution_count(), 1);
    assert_eq!(scheduler.status().failed, 0);

    scheduler.stop().await;
}

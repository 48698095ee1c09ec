//! Integration tests for the task runner: strict serialization, failure
//! capture, and advisory cancellation.

use anyhow::anyhow;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

use opsd::tasks::events::EventLog;
use opsd::tasks::runner::{Emitter, FakeExecutor, OpsRunner, QueuedTask, TaskExecutor};
use opsd::tasks::store::{InMemoryTaskStore, TaskStore};
use opsd::tasks::{EventKind, TaskStatus};

fn harness(executor: Arc<dyn TaskExecutor>) -> (Arc<dyn TaskStore>, Arc<EventLog>, Arc<OpsRunner>) {
    let store: Arc<dyn TaskStore> = Arc::new(InMemoryTaskStore::new());
    let events = Arc::new(EventLog::new(Arc::clone(&store)));
    let runner = Arc::new(OpsRunner::new(
        Arc::clone(&store),
        Arc::clone(&events),
        executor,
    ));
    (store, events, runner)
}

async fn wait_for_status(
    store: &Arc<dyn TaskStore>,
    id: i64,
    wanted: TaskStatus,
    deadline: Duration,
) -> bool {
    let start = std::time::Instant::now();
    while start.elapsed() < deadline {
        if store.get(id).await.status == wanted {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    false
}

/// Records start/end markers so overlap between task bodies is detectable.
struct RecordingExecutor {
    log: Arc<Mutex<Vec<(i64, &'static str)>>>,
}

#[async_trait]
impl TaskExecutor for RecordingExecutor {
    async fn run(&self, task: &QueuedTask, _emit: &Emitter) -> anyhow::Result<bool> {
        self.log.lock().await.push((task.id, "start"));
        tokio::time::sleep(Duration::from_millis(50)).await;
        self.log.lock().await.push((task.id, "end"));
        Ok(true)
    }
}

struct FailingExecutor;

#[async_trait]
impl TaskExecutor for FailingExecutor {
    async fn run(&self, _task: &QueuedTask, _emit: &Emitter) -> anyhow::Result<bool> {
        Err(anyhow!("boom"))
    }
}

#[tokio::test]
async fn worker_runs_tasks_strictly_serially() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let (store, _events, runner) = harness(Arc::new(RecordingExecutor {
        log: Arc::clone(&log),
    }));

    let first = store.create("first", None).await.unwrap();
    let second = store.create("second", None).await.unwrap();
    runner
        .enqueue(QueuedTask {
            id: first,
            title: "first".into(),
            body: None,
        })
        .await;
    runner
        .enqueue(QueuedTask {
            id: second,
            title: "second".into(),
            body: None,
        })
        .await;

    assert!(wait_for_status(&store, second, TaskStatus::Success, Duration::from_secs(3)).await);

    let entries = log.lock().await.clone();
    assert_eq!(
        entries,
        vec![
            (first, "start"),
            (first, "end"),
            (second, "start"),
            (second, "end"),
        ],
        "second task must not start before the first finishes"
    );
    assert_eq!(store.get(first).await.status, TaskStatus::Success);
}

#[tokio::test]
async fn executor_error_becomes_failed_status_with_message() {
    let (store, _events, runner) = harness(Arc::new(FailingExecutor));
    let id = store.create("doomed", None).await.unwrap();
    runner
        .enqueue(QueuedTask {
            id,
            title: "doomed".into(),
            body: None,
        })
        .await;

    assert!(wait_for_status(&store, id, TaskStatus::Failed, Duration::from_secs(3)).await);
    assert_eq!(store.get(id).await.error.as_deref(), Some("boom"));
}

#[tokio::test]
async fn cancel_mid_run_is_advisory_but_sticky() {
    let (store, events, runner) = harness(Arc::new(FakeExecutor));
    let id = store.create("slow", None).await.unwrap();
    runner
        .enqueue(QueuedTask {
            id,
            title: "slow".into(),
            body: None,
        })
        .await;

    assert!(wait_for_status(&store, id, TaskStatus::Running, Duration::from_secs(3)).await);

    // Out-of-band cancel while the body is mid-execution (what the cancel
    // endpoint does).
    store
        .update_status(id, TaskStatus::Cancelled, None, None, None)
        .await;
    events
        .append(id, EventKind::Log, serde_json::json!({"msg": "cancelled"}))
        .await;

    // The body keeps running to completion and its terminal write must not
    // overwrite the cancellation.
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(store.get(id).await.status, TaskStatus::Cancelled);

    let drained = events.drain(id).await;
    let kinds: Vec<EventKind> = drained.iter().map(|e| e.kind).collect();
    assert!(kinds.contains(&EventKind::Done), "fake run still completed");
    assert_eq!(
        kinds.iter().filter(|k| **k == EventKind::Tick).count(),
        4,
        "scheduled ticks still emitted after cancel"
    );
    assert!(drained
        .iter()
        .any(|e| e.kind == EventKind::Log && e.data["msg"] == "cancelled"));
}

#[tokio::test]
async fn queue_drains_to_zero() {
    let (store, _events, runner) = harness(Arc::new(RecordingExecutor {
        log: Arc::new(Mutex::new(Vec::new())),
    }));
    let id = store.create("t", None).await.unwrap();
    runner
        .enqueue(QueuedTask {
            id,
            title: "t".into(),
            body: None,
        })
        .await;
    assert!(wait_for_status(&store, id, TaskStatus::Success, Duration::from_secs(3)).await);
    assert_eq!(runner.queue_len().await, 0);
}

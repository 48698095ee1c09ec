// tasks/runner.rs — single-worker FIFO execution of ops tasks.
//
// One background tokio task drains the queue serially; at most one worker
// exists per process. Task bodies report progress through an Emitter bound
// to their task id — the loop only observes overall success or failure.
// There is no retry, no backpressure (the queue is unbounded), and no drain
// on shutdown: queued-but-not-started tasks are abandoned at process exit.

use anyhow::Result;
use async_trait::async_trait;
use serde_json::json;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::events::EventLog;
use super::store::TaskStore;
use super::{EventKind, TaskStatus};

/// Poll interval when the queue is empty.
const IDLE_POLL: Duration = Duration::from_millis(200);

/// A task as carried on the queue.
#[derive(Debug, Clone)]
pub struct QueuedTask {
    pub id: i64,
    pub title: String,
    pub body: Option<String>,
}

/// Emits progress events for one task (dual write via the event log).
#[derive(Clone)]
pub struct Emitter {
    task_id: i64,
    events: Arc<EventLog>,
}

impl Emitter {
    pub fn new(task_id: i64, events: Arc<EventLog>) -> Self {
        Self { task_id, events }
    }

    pub async fn emit(&self, kind: EventKind, data: serde_json::Value) {
        self.events.append(self.task_id, kind, data).await;
    }
}

/// Executes one task to completion.
///
/// `Ok(true)` = success, `Ok(false)` = failed, `Err` = failed with the
/// message captured on the task record. Bodies are expected to call
/// `emit.emit(..)` as they make progress; the worker loop has no visibility
/// into progress semantics.
#[async_trait]
pub trait TaskExecutor: Send + Sync {
    async fn run(&self, task: &QueuedTask, emit: &Emitter) -> Result<bool>;
}

/// Deterministic executor for tests and demos: four ticks, then done.
pub struct FakeExecutor;

#[async_trait]
impl TaskExecutor for FakeExecutor {
    async fn run(&self, _task: &QueuedTask, emit: &Emitter) -> Result<bool> {
        for seq in 1..=4u32 {
            emit.emit(
                EventKind::Tick,
                json!({"seq": seq, "msg": format!("tick {seq}")}),
            )
            .await;
            tokio::time::sleep(Duration::from_millis(120)).await;
        }
        emit.emit(EventKind::Done, json!({"msg": "done"})).await;
        Ok(true)
    }
}

/// Placeholder for the real execution path.
pub struct StubExecutor;

#[async_trait]
impl TaskExecutor for StubExecutor {
    async fn run(&self, _task: &QueuedTask, emit: &Emitter) -> Result<bool> {
        emit.emit(
            EventKind::Log,
            json!({"msg": "starting real run (no-op in this stub)"}),
        )
        .await;
        tokio::time::sleep(Duration::from_millis(200)).await;
        emit.emit(EventKind::Done, json!({"msg": "done"})).await;
        Ok(true)
    }
}

struct RunnerInner {
    queue: Mutex<VecDeque<QueuedTask>>,
    worker: Mutex<Option<JoinHandle<()>>>,
    store: Arc<dyn TaskStore>,
    events: Arc<EventLog>,
    executor: Arc<dyn TaskExecutor>,
}

/// The task execution service: FIFO queue plus a lazily-started worker.
pub struct OpsRunner {
    inner: Arc<RunnerInner>,
}

impl OpsRunner {
    pub fn new(
        store: Arc<dyn TaskStore>,
        events: Arc<EventLog>,
        executor: Arc<dyn TaskExecutor>,
    ) -> Self {
        Self {
            inner: Arc::new(RunnerInner {
                queue: Mutex::new(VecDeque::new()),
                worker: Mutex::new(None),
                store,
                events,
                executor,
            }),
        }
    }

    /// Enqueue a task and make sure the worker is alive.
    pub async fn enqueue(&self, task: QueuedTask) {
        self.inner.queue.lock().await.push_back(task);
        self.ensure_worker().await;
    }

    /// Current queue depth (not counting a task mid-execution).
    pub async fn queue_len(&self) -> usize {
        self.inner.queue.lock().await.len()
    }

    /// Spawn the worker unless a live one already exists.
    async fn ensure_worker(&self) {
        let mut guard = self.inner.worker.lock().await;
        if guard.as_ref().is_some_and(|handle| !handle.is_finished()) {
            return;
        }
        let inner = Arc::clone(&self.inner);
        *guard = Some(tokio::spawn(worker_loop(inner)));
    }
}

async fn worker_loop(inner: Arc<RunnerInner>) {
    loop {
        let task = inner.queue.lock().await.pop_front();
        let Some(task) = task else {
            tokio::time::sleep(IDLE_POLL).await;
            continue;
        };

        debug!(task_id = task.id, title = %task.title, "task started");
        inner
            .store
            .update_status(task.id, TaskStatus::Running, None, None, None)
            .await;

        let emitter = Emitter::new(task.id, Arc::clone(&inner.events));
        match inner.executor.run(&task, &emitter).await {
            Ok(true) => {
                inner
                    .store
                    .update_status(task.id, TaskStatus::Success, None, None, None)
                    .await;
            }
            Ok(false) => {
                inner
                    .store
                    .update_status(task.id, TaskStatus::Failed, None, None, None)
                    .await;
            }
            Err(e) => {
                warn!(task_id = task.id, err = %e, "task body failed");
                inner
                    .store
                    .update_status(task.id, TaskStatus::Failed, None, None, Some(&e.to_string()))
                    .await;
            }
        }
    }
}

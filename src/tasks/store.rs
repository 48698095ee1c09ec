// tasks/store.rs — task persistence behind a trait.
//
// Two implementations: SQLite-backed when a data directory is usable, pure
// in-memory otherwise. The choice is made once at startup; there is no
// per-call fallback and no migration between the two (tasks created in
// memory stay invisible to a database that appears later).

use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use tokio::sync::Mutex;
use tracing::warn;

use super::{EventKind, TaskRecord, TaskStatus};
use crate::storage::{Storage, TaskEventRow};

/// In-memory ids start above this floor so they never collide with ids a
/// previously-reachable database handed out.
const IN_PROC_ID_FLOOR: i64 = 1000;

#[async_trait]
pub trait TaskStore: Send + Sync {
    /// Insert a new task in `queued` state and return its id.
    async fn create(&self, title: &str, body: Option<&str>) -> anyhow::Result<i64>;

    /// Best-effort status write. Backend failures are logged, never returned —
    /// task execution must not fail over status bookkeeping.
    async fn update_status(
        &self,
        id: i64,
        status: TaskStatus,
        branch: Option<&str>,
        pr_number: Option<i64>,
        error: Option<&str>,
    );

    /// Fetch a task; unknown ids yield a synthetic `unknown` record.
    async fn get(&self, id: i64) -> TaskRecord;

    /// Newest-first listing.
    async fn list(&self, limit: i64) -> Vec<TaskRecord>;

    /// Best-effort persistent event insert (no-op for the in-memory store,
    /// where the in-process ring is the only record).
    async fn insert_event(&self, task_id: i64, kind: EventKind, data: &Value);

    /// Full persisted event history, ascending id. `None` when this store has
    /// no persistent event table — callers fall back to the in-process ring.
    /// A transient read failure yields `Some(empty)`: that poll is skipped.
    async fn events(&self, task_id: i64) -> Option<Vec<TaskEventRow>>;
}

// ─── SQLite-backed store ─────────────────────────────────────────────────────

pub struct SqliteTaskStore {
    storage: Storage,
}

impl SqliteTaskStore {
    pub fn new(storage: Storage) -> Self {
        Self { storage }
    }
}

#[async_trait]
impl TaskStore for SqliteTaskStore {
    async fn create(&self, title: &str, body: Option<&str>) -> anyhow::Result<i64> {
        self.storage.insert_task(title, body).await
    }

    async fn update_status(
        &self,
        id: i64,
        status: TaskStatus,
        branch: Option<&str>,
        pr_number: Option<i64>,
        error: Option<&str>,
    ) {
        if let Err(e) = self
            .storage
            .update_task_status(id, status.as_str(), branch, pr_number, error)
            .await
        {
            warn!(task_id = id, status = %status, err = %e, "task status write failed");
        }
    }

    async fn get(&self, id: i64) -> TaskRecord {
        match self.storage.get_task(id).await {
            Ok(Some(row)) => row.into(),
            Ok(None) => TaskRecord::unknown(id),
            Err(e) => {
                warn!(task_id = id, err = %e, "task read failed");
                TaskRecord::unknown(id)
            }
        }
    }

    async fn list(&self, limit: i64) -> Vec<TaskRecord> {
        match self.storage.list_tasks(limit).await {
            Ok(rows) => rows.into_iter().map(TaskRecord::from).collect(),
            Err(e) => {
                warn!(err = %e, "task listing failed");
                Vec::new()
            }
        }
    }

    async fn insert_event(&self, task_id: i64, kind: EventKind, data: &Value) {
        if let Err(e) = self
            .storage
            .insert_task_event(task_id, kind.as_str(), data)
            .await
        {
            warn!(task_id, kind = %kind, err = %e, "event persist failed");
        }
    }

    async fn events(&self, task_id: i64) -> Option<Vec<TaskEventRow>> {
        match self.storage.list_task_events(task_id).await {
            Ok(rows) => Some(rows),
            Err(e) => {
                warn!(task_id, err = %e, "event poll failed");
                Some(Vec::new())
            }
        }
    }
}

// ─── In-memory store ─────────────────────────────────────────────────────────

struct InMemoryInner {
    next_id: i64,
    tasks: HashMap<i64, TaskRecord>,
}

/// Fallback store when SQLite is unavailable. Ids are handed out from a
/// monotonic counter; everything is lost on process exit.
pub struct InMemoryTaskStore {
    inner: Mutex<InMemoryInner>,
}

impl InMemoryTaskStore {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(InMemoryInner {
                next_id: IN_PROC_ID_FLOOR,
                tasks: HashMap::new(),
            }),
        }
    }
}

impl Default for InMemoryTaskStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TaskStore for InMemoryTaskStore {
    async fn create(&self, title: &str, body: Option<&str>) -> anyhow::Result<i64> {
        let mut inner = self.inner.lock().await;
        inner.next_id += 1;
        let id = inner.next_id;
        inner.tasks.insert(
            id,
            TaskRecord {
                id,
                title: title.to_string(),
                body: body.map(str::to_string),
                status: TaskStatus::Queued,
                created_at: chrono::Utc::now().to_rfc3339(),
                branch: None,
                pr_number: None,
                error: None,
            },
        );
        Ok(id)
    }

    async fn update_status(
        &self,
        id: i64,
        status: TaskStatus,
        branch: Option<&str>,
        pr_number: Option<i64>,
        error: Option<&str>,
    ) {
        let mut inner = self.inner.lock().await;
        let Some(task) = inner.tasks.get_mut(&id) else {
            return;
        };
        // Cancellation is sticky: worker writes never overwrite it.
        if task.status == TaskStatus::Cancelled && status != TaskStatus::Cancelled {
            return;
        }
        task.status = status;
        if let Some(b) = branch {
            task.branch = Some(b.to_string());
        }
        if let Some(n) = pr_number {
            task.pr_number = Some(n);
        }
        if let Some(e) = error {
            task.error = Some(e.to_string());
        }
    }

    async fn get(&self, id: i64) -> TaskRecord {
        self.inner
            .lock()
            .await
            .tasks
            .get(&id)
            .cloned()
            .unwrap_or_else(|| TaskRecord::unknown(id))
    }

    async fn list(&self, limit: i64) -> Vec<TaskRecord> {
        let inner = self.inner.lock().await;
        let mut items: Vec<TaskRecord> = inner.tasks.values().cloned().collect();
        // Ids are assigned in creation order, so id-descending is newest-first.
        items.sort_by(|a, b| b.id.cmp(&a.id));
        items.truncate(limit.max(0) as usize);
        items
    }

    async fn insert_event(&self, _task_id: i64, _kind: EventKind, _data: &Value) {}

    async fn events(&self, _task_id: i64) -> Option<Vec<TaskEventRow>> {
        None
    }
}

// ─── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn in_memory_ids_are_monotonic_and_above_floor() {
        let store = InMemoryTaskStore::new();
        let mut last = IN_PROC_ID_FLOOR;
        for _ in 0..5 {
            let id = store.create("t", None).await.unwrap();
            assert!(id > last, "ids must be strictly increasing");
            last = id;
        }
        assert!(last > IN_PROC_ID_FLOOR);
    }

    #[tokio::test]
    async fn unknown_id_yields_synthetic_record() {
        let store = InMemoryTaskStore::new();
        let record = store.get(424242).await;
        assert_eq!(record.id, 424242);
        assert_eq!(record.status, TaskStatus::Unknown);
    }

    #[tokio::test]
    async fn list_is_newest_first_and_bounded() {
        let store = InMemoryTaskStore::new();
        for i in 0..4 {
            store.create(&format!("task {i}"), None).await.unwrap();
        }
        let items = store.list(2).await;
        assert_eq!(items.len(), 2);
        assert!(items[0].id > items[1].id);
        assert_eq!(items[0].title, "task 3");
    }

    #[tokio::test]
    async fn cancelled_status_is_sticky() {
        let store = InMemoryTaskStore::new();
        let id = store.create("t", None).await.unwrap();
        store
            .update_status(id, TaskStatus::Cancelled, None, None, None)
            .await;
        store
            .update_status(id, TaskStatus::Success, None, None, None)
            .await;
        assert_eq!(store.get(id).await.status, TaskStatus::Cancelled);
    }
}

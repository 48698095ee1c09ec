// tasks/events.rs — per-task bounded event ring, mirrored to persistence.
//
// Every append goes to the persistent event table best-effort AND to an
// in-process ring unconditionally, so live SSE subscribers keep seeing
// events when the database write fails or lags. The ring is lost on process
// restart; the persistent table is the durable copy when one exists.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::Mutex;

use super::store::TaskStore;
use super::{EventKind, TaskEvent};

/// Per-task ring capacity; oldest entries are evicted first.
const RING_CAP: usize = 200;

pub struct EventLog {
    store: Arc<dyn TaskStore>,
    rings: Mutex<HashMap<i64, VecDeque<TaskEvent>>>,
}

impl EventLog {
    pub fn new(store: Arc<dyn TaskStore>) -> Self {
        Self {
            store,
            rings: Mutex::new(HashMap::new()),
        }
    }

    /// Dual write: best-effort persistent insert, unconditional ring append.
    pub async fn append(&self, task_id: i64, kind: EventKind, data: serde_json::Value) {
        self.store.insert_event(task_id, kind, &data).await;

        let event = TaskEvent {
            created_at: chrono::Utc::now().to_rfc3339(),
            kind,
            data,
        };
        let mut rings = self.rings.lock().await;
        let ring = rings.entry(task_id).or_default();
        ring.push_back(event);
        while ring.len() > RING_CAP {
            ring.pop_front();
        }
    }

    /// Snapshot of the ring for one task, oldest first. Non-consuming —
    /// multiple subscribers may read the same buffer.
    pub async fn drain(&self, task_id: i64) -> Vec<TaskEvent> {
        self.rings
            .lock()
            .await
            .get(&task_id)
            .map(|ring| ring.iter().cloned().collect())
            .unwrap_or_default()
    }
}

// ─── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tasks::store::InMemoryTaskStore;
    use serde_json::json;

    fn log() -> EventLog {
        EventLog::new(Arc::new(InMemoryTaskStore::new()))
    }

    #[tokio::test]
    async fn ring_keeps_only_the_most_recent_200() {
        let log = log();
        for seq in 0..250 {
            log.append(1, EventKind::Tick, json!({"seq": seq})).await;
        }
        let events = log.drain(1).await;
        assert_eq!(events.len(), 200);
        assert_eq!(events[0].data["seq"], 50);
        assert_eq!(events[199].data["seq"], 249);
    }

    #[tokio::test]
    async fn drain_is_non_consuming() {
        let log = log();
        log.append(7, EventKind::Log, json!({"msg": "hello"})).await;
        assert_eq!(log.drain(7).await.len(), 1);
        assert_eq!(log.drain(7).await.len(), 1);
    }

    #[tokio::test]
    async fn rings_are_per_task() {
        let log = log();
        log.append(1, EventKind::Tick, json!({})).await;
        log.append(2, EventKind::Tick, json!({})).await;
        assert_eq!(log.drain(1).await.len(), 1);
        assert_eq!(log.drain(2).await.len(), 1);
        assert!(log.drain(3).await.is_empty());
    }
}

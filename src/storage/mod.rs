// storage/mod.rs — SQLite persistence for ops tasks and their event log.
//
// One WAL-mode database at {data_dir}/opsd.db. Schema lives in
// src/storage/migrations and is applied on open.

use anyhow::{Context as _, Result};
use chrono::Utc;
use serde_json::{json, Value};
use sqlx::{sqlite::SqliteConnectOptions, ConnectOptions, SqlitePool};
use std::{path::Path, str::FromStr};

/// Default timeout for individual SQLite queries.
/// Prevents hung queries from blocking the daemon indefinitely.
const QUERY_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(30);

/// Execute a future with the standard query timeout.
async fn with_timeout<T>(fut: impl std::future::Future<Output = Result<T>>) -> Result<T> {
    match tokio::time::timeout(QUERY_TIMEOUT, fut).await {
        Ok(result) => result,
        Err(_) => Err(anyhow::anyhow!(
            "database query timed out after {}s",
            QUERY_TIMEOUT.as_secs()
        )),
    }
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct TaskRow {
    pub id: i64,
    pub title: String,
    pub body: Option<String>,
    pub status: String,
    pub branch: Option<String>,
    pub pr_number: Option<i64>,
    pub error: Option<String>,
    pub created_at: String,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct TaskEventRow {
    pub id: i64,
    pub task_id: i64,
    pub kind: String,
    /// JSON text as stored; see [`TaskEventRow::to_json`].
    pub data: String,
    pub created_at: String,
}

impl TaskEventRow {
    /// Row as a JSON object with `data` parsed back into a structure.
    pub fn to_json(&self) -> Value {
        let data: Value = serde_json::from_str(&self.data).unwrap_or(Value::Null);
        json!({
            "id": self.id,
            "task_id": self.task_id,
            "kind": self.kind,
            "data": data,
            "created_at": self.created_at,
        })
    }
}

#[derive(Clone)]
pub struct Storage {
    pool: SqlitePool,
}

impl Storage {
    pub async fn new(data_dir: &Path) -> Result<Self> {
        Self::new_with_slow_query(data_dir, 0).await
    }

    /// Open (or create) the database, with optional slow-query logging.
    ///
    /// `slow_query_ms` is the threshold in milliseconds — queries exceeding it
    /// are logged at WARN level. Set to 0 to disable slow-query logging.
    pub async fn new_with_slow_query(data_dir: &Path, slow_query_ms: u64) -> Result<Self> {
        tokio::fs::create_dir_all(data_dir).await?;
        let db_path = data_dir.join("opsd.db");
        let mut opts =
            SqliteConnectOptions::from_str(&format!("sqlite://{}?mode=rwc", db_path.display()))?
                .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
                .synchronous(sqlx::sqlite::SqliteSynchronous::Normal)
                .create_if_missing(true);

        if slow_query_ms > 0 {
            opts = opts.log_slow_statements(
                log::LevelFilter::Warn,
                std::time::Duration::from_millis(slow_query_ms),
            );
        }

        let pool = SqlitePool::connect_with(opts).await?;
        sqlx::migrate!("src/storage/migrations")
            .run(&pool)
            .await
            .context("failed to run database migrations")?;
        Ok(Self { pool })
    }

    /// Return a clone of the connection pool (cheap — Arc-backed).
    pub fn pool(&self) -> SqlitePool {
        self.pool.clone()
    }

    // ─── Tasks ────────────────────────────────────────────────────────────────

    pub async fn insert_task(&self, title: &str, body: Option<&str>) -> Result<i64> {
        let now = Utc::now().to_rfc3339();
        let result = sqlx::query(
            "INSERT INTO ops_tasks (title, body, status, created_at) VALUES (?, ?, 'queued', ?)",
        )
        .bind(title)
        .bind(body)
        .bind(&now)
        .execute(&self.pool)
        .await?;
        Ok(result.last_insert_rowid())
    }

    pub async fn get_task(&self, id: i64) -> Result<Option<TaskRow>> {
        Ok(sqlx::query_as("SELECT * FROM ops_tasks WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?)
    }

    pub async fn list_tasks(&self, limit: i64) -> Result<Vec<TaskRow>> {
        with_timeout(async {
            Ok(
                sqlx::query_as("SELECT * FROM ops_tasks ORDER BY created_at DESC, id DESC LIMIT ?")
                    .bind(limit)
                    .fetch_all(&self.pool)
                    .await?,
            )
        })
        .await
    }

    /// Write a status transition. `branch` / `pr_number` / `error` only
    /// overwrite when provided.
    ///
    /// Worker writes must not clobber an out-of-band cancellation, so any
    /// write of a non-`cancelled` status skips rows already cancelled.
    pub async fn update_task_status(
        &self,
        id: i64,
        status: &str,
        branch: Option<&str>,
        pr_number: Option<i64>,
        error: Option<&str>,
    ) -> Result<()> {
        let guard = if status == "cancelled" {
            ""
        } else {
            " AND status != 'cancelled'"
        };
        let sql = format!(
            "UPDATE ops_tasks SET status = ?, \
             branch = COALESCE(?, branch), \
             pr_number = COALESCE(?, pr_number), \
             error = COALESCE(?, error) \
             WHERE id = ?{guard}"
        );
        sqlx::query(&sql)
            .bind(status)
            .bind(branch)
            .bind(pr_number)
            .bind(error)
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    // ─── Task events ──────────────────────────────────────────────────────────

    pub async fn insert_task_event(&self, task_id: i64, kind: &str, data: &Value) -> Result<()> {
        let now = Utc::now().to_rfc3339();
        sqlx::query(
            "INSERT INTO ops_task_events (task_id, kind, data, created_at) VALUES (?, ?, ?, ?)",
        )
        .bind(task_id)
        .bind(kind)
        .bind(data.to_string())
        .bind(&now)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Full event history for a task, ascending by insertion id — the order
    /// SSE subscribers receive.
    pub async fn list_task_events(&self, task_id: i64) -> Result<Vec<TaskEventRow>> {
        with_timeout(async {
            Ok(
                sqlx::query_as("SELECT * FROM ops_task_events WHERE task_id = ? ORDER BY id ASC")
                    .bind(task_id)
                    .fetch_all(&self.pool)
                    .await?,
            )
        })
        .await
    }
}

// ─── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    async fn open_temp() -> (tempfile::TempDir, Storage) {
        let dir = tempfile::tempdir().unwrap();
        let storage = Storage::new(dir.path()).await.unwrap();
        (dir, storage)
    }

    #[tokio::test]
    async fn task_insert_and_fetch() {
        let (_dir, storage) = open_temp().await;
        let id = storage.insert_task("build", Some("the body")).await.unwrap();
        let row = storage.get_task(id).await.unwrap().unwrap();
        assert_eq!(row.title, "build");
        assert_eq!(row.body.as_deref(), Some("the body"));
        assert_eq!(row.status, "queued");
    }

    #[tokio::test]
    async fn terminal_write_does_not_clobber_cancelled() {
        let (_dir, storage) = open_temp().await;
        let id = storage.insert_task("t", None).await.unwrap();
        storage
            .update_task_status(id, "cancelled", None, None, None)
            .await
            .unwrap();
        storage
            .update_task_status(id, "success", None, None, None)
            .await
            .unwrap();
        let row = storage.get_task(id).await.unwrap().unwrap();
        assert_eq!(row.status, "cancelled");
    }

    #[tokio::test]
    async fn events_come_back_in_insertion_order() {
        let (_dir, storage) = open_temp().await;
        let id = storage.insert_task("t", None).await.unwrap();
        for seq in 1..=3 {
            storage
                .insert_task_event(id, "tick", &json!({"seq": seq}))
                .await
                .unwrap();
        }
        let rows = storage.list_task_events(id).await.unwrap();
        let seqs: Vec<i64> = rows
            .iter()
            .map(|r| r.to_json()["data"]["seq"].as_i64().unwrap())
            .collect();
        assert_eq!(seqs, vec![1, 2, 3]);
    }
}

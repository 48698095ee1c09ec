// tasks/mod.rs — domain types for ops tasks and their progress events.

pub mod events;
pub mod runner;
pub mod store;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Lifecycle states of an ops task.
///
/// `queued → running → {success, failed}`; `cancelled` is written out-of-band
/// by the cancel endpoint and is sticky against later worker writes.
/// `unknown` is only ever synthesized for lookups of ids nobody has.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Queued,
    Running,
    Success,
    Failed,
    Cancelled,
    Unknown,
}

impl TaskStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Running => "running",
            Self::Success => "success",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
            Self::Unknown => "unknown",
        }
    }

    /// Parse a stored status string; anything unrecognized maps to `Unknown`.
    pub fn parse(s: &str) -> Self {
        match s {
            "queued" => Self::Queued,
            "running" => Self::Running,
            "success" => Self::Success,
            "failed" => Self::Failed,
            "cancelled" => Self::Cancelled,
            _ => Self::Unknown,
        }
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Progress event kinds task bodies may emit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Tick,
    Log,
    Done,
    Error,
}

impl EventKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Tick => "tick",
            Self::Log => "log",
            Self::Done => "done",
            Self::Error => "error",
        }
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A task record as returned by the API.
#[derive(Debug, Clone, Serialize)]
pub struct TaskRecord {
    pub id: i64,
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
    pub status: TaskStatus,
    pub created_at: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub branch: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pr_number: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl TaskRecord {
    /// Synthetic record for an id neither store knows — lookups always get a
    /// 200-shaped answer, never a not-found error.
    pub fn unknown(id: i64) -> Self {
        Self {
            id,
            title: String::new(),
            body: None,
            status: TaskStatus::Unknown,
            created_at: String::new(),
            branch: None,
            pr_number: None,
            error: None,
        }
    }
}

impl From<crate::storage::TaskRow> for TaskRecord {
    fn from(row: crate::storage::TaskRow) -> Self {
        Self {
            id: row.id,
            title: row.title,
            body: row.body,
            status: TaskStatus::parse(&row.status),
            created_at: row.created_at,
            branch: row.branch,
            pr_number: row.pr_number,
            error: row.error,
        }
    }
}

/// One entry in the in-process event ring.
#[derive(Debug, Clone, Serialize)]
pub struct TaskEvent {
    pub created_at: String,
    pub kind: EventKind,
    pub data: Value,
}

pub mod config;
pub mod rest;
pub mod storage;
pub mod stream_token;
pub mod tasks;

use anyhow::Result;
use std::sync::Arc;
use tracing::{info, warn};

use config::OpsConfig;
use storage::Storage;
use tasks::events::EventLog;
use tasks::runner::{FakeExecutor, OpsRunner, StubExecutor, TaskExecutor};
use tasks::store::{InMemoryTaskStore, SqliteTaskStore, TaskStore};

/// Shared application state passed to every route handler.
pub struct AppContext {
    pub config: Arc<OpsConfig>,
    /// Task persistence — SQLite or in-memory, chosen once at startup.
    pub store: Arc<dyn TaskStore>,
    /// In-process event ring with persistent mirroring.
    pub events: Arc<EventLog>,
    /// Queue + single background worker.
    pub runner: Arc<OpsRunner>,
    pub started_at: std::time::Instant,
}

/// Wire up storage, event log, and runner from config.
///
/// SQLite failures at startup degrade to the in-memory store with a warning
/// rather than refusing to start — a dependency hiccup must not take the
/// daemon down. The choice is not revisited afterwards.
pub async fn bootstrap(config: Arc<OpsConfig>) -> Result<Arc<AppContext>> {
    let store: Arc<dyn TaskStore> = if config.in_memory {
        info!("running on the in-memory task store");
        Arc::new(InMemoryTaskStore::new())
    } else {
        match Storage::new_with_slow_query(&config.data_dir, config.slow_query_threshold_ms).await {
            Ok(storage) => {
                info!(data_dir = %config.data_dir.display(), "sqlite task store ready");
                Arc::new(SqliteTaskStore::new(storage))
            }
            Err(e) => {
                warn!(err = %e, "sqlite unavailable — falling back to the in-memory task store");
                Arc::new(InMemoryTaskStore::new())
            }
        }
    };

    let events = Arc::new(EventLog::new(Arc::clone(&store)));
    let executor: Arc<dyn TaskExecutor> = if config.fake_mode {
        info!("fake mode — deterministic task execution");
        Arc::new(FakeExecutor)
    } else {
        Arc::new(StubExecutor)
    };
    let runner = Arc::new(OpsRunner::new(
        Arc::clone(&store),
        Arc::clone(&events),
        executor,
    ));

    Ok(Arc::new(AppContext {
        config,
        store,
        events,
        runner,
        started_at: std::time::Instant::now(),
    }))
}

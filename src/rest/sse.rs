// rest/sse.rs — live task progress as Server-Sent Events.
//
// GET /ops/tasks/{id}/stream
//
// Authorized by admin token or by a stream token scoped to the task id.
// Fake mode emits a fixed tick/done sequence and closes. Real mode replays
// the in-process ring, then re-polls the full persisted history every 500ms
// (or re-drains the ring when no persistent backend exists) until the client
// disconnects — duplicate delivery is expected and clients render
// idempotently. A `done` event does not close the stream.

use axum::{
    extract::{ConnectInfo, Path, Query, State},
    http::HeaderMap,
    response::sse::{Event, KeepAlive, KeepAliveStream, Sse},
};
use futures_util::stream::{self, BoxStream, StreamExt};
use serde::Deserialize;
use serde_json::{json, Value};
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use crate::rest::auth;
use crate::rest::routes::ops::{forbidden, ApiError};
use crate::stream_token;
use crate::AppContext;

/// Delay between polls of the event history.
const POLL_INTERVAL: Duration = Duration::from_millis(500);
/// Spacing of deterministic fake-mode frames.
const FAKE_TICK_INTERVAL: Duration = Duration::from_millis(100);

type SseStream = BoxStream<'static, Result<Event, Infallible>>;

#[derive(Deserialize, Default)]
pub struct StreamQuery {
    token: Option<String>,
    admin_token: Option<String>,
}

pub async fn task_stream(
    State(ctx): State<Arc<AppContext>>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    Path(task_id): Path<i64>,
    Query(query): Query<StreamQuery>,
    headers: HeaderMap,
) -> Result<Sse<KeepAliveStream<SseStream>>, ApiError> {
    if !authorized(&ctx, &headers, &query, peer, task_id) {
        return Err(forbidden());
    }

    let stream: SseStream = if ctx.config.fake_mode {
        fake_stream().boxed()
    } else {
        live_stream(ctx, task_id).boxed()
    };

    Ok(Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("ping"),
    ))
}

fn authorized(
    ctx: &AppContext,
    headers: &HeaderMap,
    query: &StreamQuery,
    peer: SocketAddr,
    task_id: i64,
) -> bool {
    if auth::is_admin(&ctx.config, headers, query.admin_token.as_deref(), peer) {
        return true;
    }
    let Some(token) = query.token.as_deref() else {
        return false;
    };
    match stream_token::validate_token(token, ctx.config.effective_stream_secret().as_deref()) {
        // The embedded task id must match the path — a token for task 5 does
        // not open task 6's stream.
        Ok(payload) => payload.get("task_id").and_then(Value::as_i64) == Some(task_id),
        Err(e) => {
            debug!(task_id, err = %e, "stream token rejected");
            false
        }
    }
}

/// Deterministic stream for tests/demos: four ticks, one done, end.
fn fake_stream() -> impl futures_util::Stream<Item = Result<Event, Infallible>> + Send {
    stream::unfold(0u32, |i| async move {
        if i > 0 {
            tokio::time::sleep(FAKE_TICK_INTERVAL).await;
        }
        let payload = match i {
            0..=3 => json!({"kind": "tick", "seq": i + 1, "msg": format!("tick {}", i + 1)}),
            4 => json!({"kind": "done"}),
            _ => return None,
        };
        Some((Ok(Event::default().data(payload.to_string())), i + 1))
    })
}

enum LivePhase {
    Replay,
    Poll,
}

/// Replay-then-poll stream over the real event history.
fn live_stream(
    ctx: Arc<AppContext>,
    task_id: i64,
) -> impl futures_util::Stream<Item = Result<Event, Infallible>> + Send {
    stream::unfold(LivePhase::Replay, move |phase| {
        let ctx = Arc::clone(&ctx);
        async move {
            let batch: Vec<Value> = match phase {
                LivePhase::Replay => ring_snapshot(&ctx, task_id).await,
                LivePhase::Poll => {
                    tokio::time::sleep(POLL_INTERVAL).await;
                    match ctx.store.events(task_id).await {
                        Some(rows) => rows.iter().map(|r| r.to_json()).collect(),
                        None => ring_snapshot(&ctx, task_id).await,
                    }
                }
            };
            let frames: Vec<Result<Event, Infallible>> = batch
                .into_iter()
                .map(|v| Ok(Event::default().data(v.to_string())))
                .collect();
            Some((stream::iter(frames), LivePhase::Poll))
        }
    })
    .flatten()
}

async fn ring_snapshot(ctx: &AppContext, task_id: i64) -> Vec<Value> {
    ctx.events
        .drain(task_id)
        .await
        .iter()
        .map(|ev| serde_json::to_value(ev).unwrap_or(Value::Null))
        .collect()
}

// rest/routes/ops.rs — ops task REST routes.
//
// All endpoints here are admin-gated. Task submission returns as soon as the
// record exists and the task is queued; execution happens on the background
// worker and is observed via /ops/tasks/{id} or the SSE stream.

use axum::{
    extract::{ConnectInfo, Path, Query, State},
    http::{HeaderMap, StatusCode},
    Json,
};
use serde::Deserialize;
use serde_json::{json, Map, Value};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::warn;

use crate::rest::auth;
use crate::stream_token;
use crate::tasks::runner::QueuedTask;
use crate::tasks::{EventKind, TaskStatus};
use crate::AppContext;

pub type ApiError = (StatusCode, Json<Value>);

pub fn forbidden() -> ApiError {
    (
        StatusCode::FORBIDDEN,
        Json(json!({"ok": false, "error": "admin token required"})),
    )
}

fn bad_request(msg: &str) -> ApiError {
    (StatusCode::BAD_REQUEST, Json(json!({"error": msg})))
}

#[derive(Deserialize, Default)]
pub struct AdminQuery {
    admin_token: Option<String>,
}

#[derive(Deserialize, Default)]
pub struct ListQuery {
    limit: Option<i64>,
    admin_token: Option<String>,
}

#[derive(Deserialize)]
pub struct CreateTaskRequest {
    title: Option<String>,
    body: Option<String>,
}

pub async fn create_task(
    State(ctx): State<Arc<AppContext>>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    Query(query): Query<AdminQuery>,
    headers: HeaderMap,
    Json(req): Json<CreateTaskRequest>,
) -> Result<Json<Value>, ApiError> {
    if !auth::is_admin(&ctx.config, &headers, query.admin_token.as_deref(), peer) {
        return Err(forbidden());
    }
    let title = match req.title.as_deref() {
        Some(t) if !t.is_empty() => t,
        _ => return Err(bad_request("title required")),
    };

    let id = ctx
        .store
        .create(title, req.body.as_deref())
        .await
        .map_err(|e| {
            warn!(err = %e, "task insert failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({"error": e.to_string()})),
            )
        })?;

    ctx.runner
        .enqueue(QueuedTask {
            id,
            title: title.to_string(),
            body: req.body.clone(),
        })
        .await;

    Ok(Json(json!({"id": id})))
}

pub async fn list_tasks(
    State(ctx): State<Arc<AppContext>>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    Query(query): Query<ListQuery>,
    headers: HeaderMap,
) -> Result<Json<Value>, ApiError> {
    if !auth::is_admin(&ctx.config, &headers, query.admin_token.as_deref(), peer) {
        return Err(forbidden());
    }
    let limit = query.limit.unwrap_or(20);
    let items = ctx.store.list(limit).await;
    Ok(Json(json!({"items": items})))
}

pub async fn get_task(
    State(ctx): State<Arc<AppContext>>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    Path(task_id): Path<i64>,
    Query(query): Query<AdminQuery>,
    headers: HeaderMap,
) -> Result<Json<Value>, ApiError> {
    if !auth::is_admin(&ctx.config, &headers, query.admin_token.as_deref(), peer) {
        return Err(forbidden());
    }
    let record = ctx.store.get(task_id).await;
    Ok(Json(json!(record)))
}

/// Advisory cancel: flips the stored status and notes it on the event log.
/// A body already executing runs to completion; only the recorded status
/// is protected from being overwritten by the worker's terminal write.
pub async fn cancel_task(
    State(ctx): State<Arc<AppContext>>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    Path(task_id): Path<i64>,
    Query(query): Query<AdminQuery>,
    headers: HeaderMap,
) -> Result<Json<Value>, ApiError> {
    if !auth::is_admin(&ctx.config, &headers, query.admin_token.as_deref(), peer) {
        return Err(forbidden());
    }
    ctx.store
        .update_status(task_id, TaskStatus::Cancelled, None, None, None)
        .await;
    ctx.events
        .append(task_id, EventKind::Log, json!({"msg": "cancelled"}))
        .await;
    Ok(Json(json!({"ok": true})))
}

#[derive(Deserialize)]
pub struct StreamTokenRequest {
    task_id: Option<i64>,
}

pub async fn create_stream_token(
    State(ctx): State<Arc<AppContext>>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    Query(query): Query<AdminQuery>,
    headers: HeaderMap,
    Json(req): Json<StreamTokenRequest>,
) -> Result<Json<Value>, ApiError> {
    if !auth::is_admin(&ctx.config, &headers, query.admin_token.as_deref(), peer) {
        return Err(forbidden());
    }
    let Some(task_id) = req.task_id else {
        return Err(bad_request("task_id required"));
    };

    let secret = ctx.config.effective_stream_secret();
    if secret.is_none() {
        warn!("issuing unsigned stream token — set OPS_STREAM_SECRET in production");
    }

    let mut payload = Map::new();
    payload.insert("task_id".to_string(), Value::from(task_id));
    let (token, expires_at) =
        stream_token::make_token(&payload, stream_token::DEFAULT_TTL_SECS, secret.as_deref())
            .map_err(|e| {
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(json!({"error": e.to_string()})),
                )
            })?;

    Ok(Json(json!({"token": token, "expires_at": expires_at})))
}

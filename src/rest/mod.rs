// rest/mod.rs — public REST API server.
//
// Endpoints:
//   GET  /health
//   POST /ops/tasks
//   GET  /ops/tasks
//   GET  /ops/tasks/{id}
//   POST /ops/tasks/{id}/cancel
//   POST /ops/stream_tokens
//   GET  /ops/tasks/{id}/stream   (SSE)

pub mod auth;
pub mod routes;
pub mod sse;

use anyhow::Result;
use axum::{
    routing::{get, post},
    Router,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tracing::info;

use crate::AppContext;

pub fn build_router(ctx: Arc<AppContext>) -> Router {
    Router::new()
        // Health (no auth)
        .route("/health", get(routes::health::health))
        // Ops tasks (admin-gated)
        .route(
            "/ops/tasks",
            get(routes::ops::list_tasks).post(routes::ops::create_task),
        )
        .route("/ops/tasks/{id}", get(routes::ops::get_task))
        .route("/ops/tasks/{id}/cancel", post(routes::ops::cancel_task))
        .route("/ops/stream_tokens", post(routes::ops::create_stream_token))
        // SSE (admin or stream token)
        .route("/ops/tasks/{id}/stream", get(sse::task_stream))
        .layer(CorsLayer::permissive())
        .with_state(ctx)
}

/// Serve the API on an already-bound listener. Split out so tests can bind
/// port 0 themselves.
pub async fn serve(listener: tokio::net::TcpListener, ctx: Arc<AppContext>) -> Result<()> {
    let router = build_router(ctx);
    axum::serve(
        listener,
        router.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;
    Ok(())
}

pub async fn start_rest_server(ctx: Arc<AppContext>) -> Result<()> {
    let bind = format!("{}:{}", ctx.config.bind_address, ctx.config.port);
    let addr: SocketAddr = bind.parse()?;
    info!("REST API listening on http://{}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    serve(listener, ctx).await
}

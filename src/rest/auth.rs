// rest/auth.rs — admin-token gate for privileged ops endpoints.
//
// A request is admin when it carries one of the configured tokens in the
// X-Admin-Token header or the admin_token query parameter (the query form
// exists for EventSource clients, which cannot set headers). With no tokens
// configured at all the gate degrades to loopback-only instead of open.

use axum::http::HeaderMap;
use std::net::SocketAddr;

use crate::config::OpsConfig;

pub const ADMIN_HEADER: &str = "x-admin-token";

pub fn is_admin(
    config: &OpsConfig,
    headers: &HeaderMap,
    query_token: Option<&str>,
    peer: SocketAddr,
) -> bool {
    if config.admin_tokens.is_empty() {
        return peer.ip().is_loopback();
    }
    let header_token = headers.get(ADMIN_HEADER).and_then(|v| v.to_str().ok());
    [header_token, query_token]
        .into_iter()
        .flatten()
        .any(|candidate| config.admin_tokens.iter().any(|t| t == candidate))
}

// ─── Tests ────────────────────────────────────────────────────────────────────

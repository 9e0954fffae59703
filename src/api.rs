//! The management HTTP API (A3): a small `axum` router bound to its own
//! address, giving read/write access to activation, the blocklist cache,
//! and the question log. Deliberately thin glue, not a deep engineering
//! target of this crate.

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
};
use serde::Deserialize;
use serde_json::json;
use tower_http::cors::CorsLayer;
use tracing::info;

use crate::activation::ToggleMode;
use crate::handler::Handler;
use crate::reload::Reloader;

#[derive(Clone)]
struct ApiState {
    handler: Arc<Handler>,
    reloader: Reloader,
}

pub fn router(handler: Arc<Handler>, reloader: Reloader) -> Router {
    let state = ApiState { handler, reloader };
    Router::new()
        .route("/application/active", get(get_active).put(put_active))
        .route("/blocklist/update", post(post_update))
        .route("/blockcache/exists/{name}", get(blockcache_exists))
        .route("/blockcache/length", get(blockcache_length))
        .route("/questioncache", get(questioncache))
        .route("/questioncache/client/{ip}", get(questioncache_client))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn get_active(State(state): State<ApiState>) -> impl IntoResponse {
    let active = state.handler.activation().query().await;
    Json(json!({ "active": active }))
}

#[derive(Debug, Deserialize)]
struct ActiveQuery {
    state: String,
    v: Option<String>,
    timeout: Option<u64>,
}

async fn put_active(
    State(state): State<ApiState>,
    Query(q): Query<ActiveQuery>,
) -> impl IntoResponse {
    if q.v.as_deref() != Some("1") {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": "Illegal value for 'version'" })),
        );
    }
    match q.state.as_str() {
        "On" => {
            let active = state.handler.activation().set(true).await;
            (StatusCode::OK, Json(json!({ "active": active })))
        }
        "Off" => {
            let active = state.handler.activation().set(false).await;
            (StatusCode::OK, Json(json!({ "active": active })))
        }
        "Snooze" => {
            let timeout = q.timeout.unwrap_or(300);
            let active = state
                .handler
                .activation()
                .toggle(ToggleMode::ForceOff, timeout)
                .await;
            (
                StatusCode::OK,
                Json(json!({ "active": active, "timeout": timeout })),
            )
        }
        _ => (
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": "Illegal value for 'state'" })),
        ),
    }
}

/// Fire-and-forget: queues the rebuild and returns immediately, matching
/// the original's `PerformUpdate(true)` call not being awaited by the
/// handler.
async fn post_update(State(state): State<ApiState>) -> impl IntoResponse {
    info!("blocklist update requested via API");
    state.reloader.spawn_reload();
    StatusCode::OK
}

async fn blockcache_exists(
    State(state): State<ApiState>,
    Path(name): Path<String>,
) -> impl IntoResponse {
    Json(json!({ "exists": state.handler.blockcache_exists(&name) }))
}

async fn blockcache_length(State(state): State<ApiState>) -> impl IntoResponse {
    Json(json!({ "length": state.handler.blockcache_len() }))
}

#[derive(Debug, Deserialize)]
struct QuestionCacheQuery {
    #[serde(rename = "highWater")]
    high_water: Option<i64>,
}

async fn questioncache(
    State(state): State<ApiState>,
    Query(q): Query<QuestionCacheQuery>,
) -> impl IntoResponse {
    let entries = state.handler.questionlog().since(q.high_water.unwrap_or(0));
    Json(json!({ "length": entries.len(), "items": entries_to_json(&entries) }))
}

async fn questioncache_client(
    State(state): State<ApiState>,
    Path(ip): Path<String>,
) -> impl IntoResponse {
    let Ok(ip): Result<IpAddr, _> = ip.parse() else {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": "Illegal value for 'client'" })),
        );
    };
    let entries = state.handler.questionlog().for_client(ip);
    (
        StatusCode::OK,
        Json(json!({ "length": entries.len(), "items": entries_to_json(&entries) })),
    )
}

fn entries_to_json(entries: &[crate::questionlog::QuestionLogEntry]) -> serde_json::Value {
    serde_json::Value::Array(
        entries
            .iter()
            .map(|e| {
                json!({
                    "date": e.date_unix,
                    "remote": e.client_ip.to_string(),
                    "blocked": e.blocked,
                    "name": e.name,
                    "qtype": e.qtype,
                    "qclass": e.qclass,
                })
            })
            .collect(),
    )
}

pub async fn serve(addr: SocketAddr, handler: Arc<Handler>, reloader: Reloader) -> crate::error::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| crate::error::Error::ListenBindError {
            addr: addr.to_string(),
            source: Arc::new(e),
        })?;
    info!(%addr, "management API listening");
    axum::serve(listener, router(handler, reloader))
        .await
        .map_err(|e| crate::error::Error::Io(Arc::new(e)))
}

//! Local-only JSON control plane.
//!
//! The pipeline dispatches loopback requests here for the recognized
//! `/api/…` paths; remote clients fall through to normal evaluation and
//! never reach these handlers. All endpoints are CORS-permissive so the
//! local editor UI can call them from the browser:
//!
//! - `GET  /api/proxy/status`      — runtime status snapshot
//! - `POST /api/proxy/enable`      — enable, optionally update origin port
//! - `POST /api/proxy/disable`     — disable, persist, shut the listener down
//! - `GET  /api/endpoints`         — endpoints currently in force
//! - `POST /api/reload-endpoints`  — re-read the project file
//! - `POST /api/redis/connect`     — attach the reputation store
//! - `POST /api/supabase/connect`  — attach the relational audit store

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post};
use axum::Router;
use serde::{Deserialize, Deserializer, Serialize};
use tower_http::cors::{Any, CorsLayer};
use tracing::{info, warn};

use crate::audit::{self, AuditSettings, DB_SETUP_RESPONSE};
use crate::proxy::Runtime;
use crate::reputation::redis::{RedisBackend, RedisSettings};
use crate::reputation::ReputationStore;

/// Deadline for store-connect operations initiated from the control plane.
const CONNECT_DEADLINE: Duration = Duration::from_secs(10);

/// Build the control-plane router.
pub fn router(runtime: Arc<Runtime>) -> Router {
    Router::new()
        .route("/api/proxy/status", get(proxy_status))
        .route("/api/proxy/enable", post(proxy_enable))
        .route("/api/proxy/disable", post(proxy_disable))
        .route("/api/endpoints", get(list_endpoints))
        .route("/api/reload-endpoints", post(reload_endpoints))
        .route("/api/redis/connect", post(redis_connect))
        .route("/api/supabase/connect", post(supabase_connect))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(runtime)
}

// ─── Request / Response Types ───────────────────────────────────────────────

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct StatusResponse {
    status: &'static str,
    enabled: bool,
    project: String,
    proxy_port: u16,
    server_port: u16,
    timestamp: i64,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EnableRequest {
    /// Accepts both a number and the editor's stringly form; an empty
    /// string means "leave the origin port alone".
    #[serde(default, deserialize_with = "port_or_empty")]
    server_port: Option<u16>,
}

fn port_or_empty<'de, D>(deserializer: D) -> Result<Option<u16>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Port {
        Number(u16),
        Text(String),
    }

    match Option::<Port>::deserialize(deserializer)? {
        None => Ok(None),
        Some(Port::Number(port)) => Ok(Some(port)),
        Some(Port::Text(text)) if text.trim().is_empty() => Ok(None),
        Some(Port::Text(text)) => text
            .trim()
            .parse()
            .map(Some)
            .map_err(serde::de::Error::custom),
    }
}

#[derive(Debug, Deserialize)]
struct RedisConnectRequest {
    #[serde(flatten)]
    settings: RedisSettings,
    #[serde(default, rename = "saveLimit")]
    save_limit: i64,
    #[serde(default, rename = "autoBlockThreshhold")]
    auto_block_threshold: i64,
    #[serde(default, rename = "timeToBlock")]
    time_to_block: u64,
}

#[derive(Debug, Deserialize)]
struct SupabaseConnectRequest {
    #[serde(flatten)]
    settings: AuditSettings,
    #[serde(default, rename = "saveLimit")]
    save_limit: i64,
    #[serde(default, rename = "autoBlockThreshhold")]
    auto_block_threshold: i64,
}

// ─── Handlers ───────────────────────────────────────────────────────────────

/// `GET /api/proxy/status`
async fn proxy_status(State(runtime): State<Arc<Runtime>>) -> Json<StatusResponse> {
    Json(StatusResponse {
        status: "running",
        enabled: runtime.policy.enabled(),
        project: runtime.current_project.clone(),
        proxy_port: runtime.proxy_port,
        server_port: runtime.origin_port.load(Ordering::Relaxed),
        timestamp: chrono::Utc::now().timestamp(),
    })
}

/// `POST /api/proxy/enable`
async fn proxy_enable(
    State(runtime): State<Arc<Runtime>>,
    Json(request): Json<EnableRequest>,
) -> Json<serde_json::Value> {
    if let Some(port) = request.server_port {
        runtime.origin_port.store(port, Ordering::Relaxed);
    }
    runtime.policy.set_enabled(true);
    if let Err(e) = runtime.policy.save_enabled(true) {
        warn!("failed to persist proxyEnabled: {}", e);
    }
    info!(
        "proxy enabled via API, forwarding to origin port {}",
        runtime.origin_port.load(Ordering::Relaxed)
    );
    Json(serde_json::json!({"message": "Proxy enabled"}))
}

/// `POST /api/proxy/disable`
async fn proxy_disable(State(runtime): State<Arc<Runtime>>) -> Json<serde_json::Value> {
    runtime.policy.set_enabled(false);
    if let Err(e) = runtime.policy.save_enabled(false) {
        warn!("failed to persist proxyEnabled: {}", e);
    }

    if let Some(pool) = runtime.audit.write().await.take() {
        pool.close().await;
        info!("audit connection pool closed");
    }

    info!("proxy disabled via API; shutting down listener");
    runtime.request_shutdown();
    Json(serde_json::json!({"message": "Proxy disabled"}))
}

/// `GET /api/endpoints`
async fn list_endpoints(State(runtime): State<Arc<Runtime>>) -> Json<serde_json::Value> {
    let endpoints = runtime.policy.endpoints();
    Json(serde_json::json!({
        "project": runtime.current_project,
        "endpoints": endpoints.as_slice(),
    }))
}

/// `POST /api/reload-endpoints`
async fn reload_endpoints(State(runtime): State<Arc<Runtime>>) -> Response {
    match runtime.policy.reload() {
        Ok(count) => {
            info!(
                "endpoints reloaded for project: {} ({} endpoints)",
                runtime.current_project, count
            );
            Json(serde_json::json!({"message": "Endpoints reloaded"})).into_response()
        }
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(serde_json::json!({"error": e.to_string()})),
        )
            .into_response(),
    }
}

/// `POST /api/redis/connect`
async fn redis_connect(
    State(runtime): State<Arc<Runtime>>,
    Json(request): Json<RedisConnectRequest>,
) -> Response {
    let backend = match tokio::time::timeout(
        CONNECT_DEADLINE,
        RedisBackend::connect(&request.settings),
    )
    .await
    {
        Ok(Ok(backend)) => backend,
        Ok(Err(e)) => {
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("failed to connect to Redis: {e}"),
            )
                .into_response();
        }
        Err(_) => {
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                "timed out connecting to Redis",
            )
                .into_response();
        }
    };

    runtime
        .save_limit
        .store(request.save_limit, Ordering::Relaxed);
    runtime
        .auto_block_threshold
        .store(request.auto_block_threshold, Ordering::Relaxed);
    runtime
        .time_to_block
        .store(request.time_to_block, Ordering::Relaxed);
    *runtime.reputation.write().await = Some(ReputationStore::new(Arc::new(backend)));

    "Successfully connected to Redis database".into_response()
}

/// `POST /api/supabase/connect`
async fn supabase_connect(
    State(runtime): State<Arc<Runtime>>,
    Json(request): Json<SupabaseConnectRequest>,
) -> Response {
    let pool = match tokio::time::timeout(CONNECT_DEADLINE, audit::connect(&request.settings)).await
    {
        Ok(Ok(pool)) => pool,
        Ok(Err(e)) => {
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("failed to connect to database: {e}"),
            )
                .into_response();
        }
        Err(_) => {
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                "timed out connecting to database",
            )
                .into_response();
        }
    };

    match audit::ips_table_exists(&pool).await {
        Ok(true) => {
            runtime
                .save_limit
                .store(request.save_limit, Ordering::Relaxed);
            runtime
                .auto_block_threshold
                .store(request.auto_block_threshold, Ordering::Relaxed);
            *runtime.audit.write().await = Some(pool);
            "Successfully connected to Supabase database".into_response()
        }
        Ok(false) => {
            pool.close().await;
            DB_SETUP_RESPONSE.into_response()
        }
        Err(e) => {
            pool.close().await;
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("failed to verify audit schema: {e}"),
            )
                .into_response()
        }
    }
}

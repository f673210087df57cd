//! The per-request pipeline.
//!
//! Every inbound request runs these steps in order:
//!
//! 1. Reputation pre-check: clients whose score is at or below the
//!    auto-block threshold get 403 before any rule work.
//! 2. Body capture: the body is buffered and re-attached so downstream
//!    consumers can read it again.
//! 3. Loopback requests under `/public/` are served from the local static
//!    directory.
//! 4. Loopback requests to recognized control paths are dispatched to the
//!    control plane; non-loopback requests to those paths fall through to
//!    normal evaluation.
//! 5. The first endpoint whose pattern matches the normalized path is
//!    evaluated: allowed requests are forwarded, denied ones get 403 and a
//!    reputation penalty.
//! 6. Unmatched requests are forwarded, except HTML navigations which get
//!    the local UI entrypoint.

use std::net::{IpAddr, SocketAddr};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::extract::{ConnectInfo, Request, State};
use axum::http::request::Parts;
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use tower::ServiceExt;
use tower_http::services::{ServeDir, ServeFile};
use tracing::{debug, error, warn};

use super::{forward, Runtime, STORE_DEADLINE};
use crate::error::GatewardenError;
use crate::policy::evaluator::{self, RequestFields};
use crate::policy::{body, path};

/// Control-plane paths the pipeline recognizes, besides the
/// `/api/proxy/…` prefix.
const CONTROL_PATHS: &[&str] = &[
    "/api/endpoints",
    "/api/reload-endpoints",
    "/api/redis/connect",
    "/api/supabase/connect",
];

pub(crate) fn is_control_path(path: &str) -> bool {
    path.starts_with("/api/proxy/") || CONTROL_PATHS.contains(&path)
}

/// Axum entry point; unwraps the extractors and runs the pipeline.
pub async fn handle(
    State(runtime): State<Arc<Runtime>>,
    ConnectInfo(remote): ConnectInfo<SocketAddr>,
    request: Request,
) -> Response {
    handle_request(runtime, remote, request).await
}

/// Run one request through the pipeline.
pub async fn handle_request(
    runtime: Arc<Runtime>,
    remote: SocketAddr,
    request: Request,
) -> Response {
    let client_ip = canonical_ip(remote.ip());

    if let Some(score) = reputation_precheck(&runtime, client_ip).await {
        if score <= runtime.auto_block_threshold.load(Ordering::Relaxed) {
            debug!("pre-blocking {} (score {})", client_ip, score);
            return StatusCode::FORBIDDEN.into_response();
        }
    }

    let (parts, raw_body) = request.into_parts();
    let body_bytes = match axum::body::to_bytes(raw_body, usize::MAX).await {
        Ok(bytes) => bytes,
        Err(e) => {
            error!("error reading request body: {}", e);
            return (StatusCode::INTERNAL_SERVER_ERROR, "Error reading body").into_response();
        }
    };

    let request_path = parts.uri.path().to_string();

    // Static files are only ever served to the local operator.
    if client_ip.is_loopback() && request_path.starts_with("/public/") {
        return serve_static(&runtime, &parts, &request_path).await;
    }

    if client_ip.is_loopback() && is_control_path(&request_path) {
        let request = Request::from_parts(parts, Body::from(body_bytes));
        return match crate::web::router(runtime.clone()).oneshot(request).await {
            Ok(response) => response,
            Err(never) => match never {},
        };
    }

    let normalized = request_path.trim_start_matches('/');
    let endpoints = runtime.policy.endpoints();
    if let Some(endpoint) = endpoints
        .iter()
        .find(|ep| path::matches(&ep.path, normalized))
    {
        let fields = gather_fields(&parts, &body_bytes, &endpoint.path, normalized);
        if evaluator::evaluate_request(&endpoint.request, &fields).is_allow() {
            return forward::forward(&runtime, parts, body_bytes).await;
        }

        warn!("blocked request to /{} from {}", normalized, client_ip);
        apply_block_penalty(&runtime, client_ip).await;
        return (StatusCode::FORBIDDEN, "Request blocked by defensive proxy").into_response();
    }

    // HTML navigations to undeclared paths get the local UI.
    if accepts_html(&parts.headers) {
        return serve_ui(&runtime).await;
    }

    forward::forward(&runtime, parts, body_bytes).await
}

/// Strip the IPv4-mapped form so `::ffff:127.0.0.1` counts as loopback.
fn canonical_ip(ip: IpAddr) -> IpAddr {
    match ip {
        IpAddr::V6(v6) => v6.to_canonical(),
        v4 => v4,
    }
}

/// Look up the client's reputation score, treating store errors and
/// timeouts as "no record".
async fn reputation_precheck(runtime: &Runtime, ip: IpAddr) -> Option<i64> {
    let guard = runtime.reputation.read().await;
    let store = guard.as_ref()?;
    match tokio::time::timeout(STORE_DEADLINE, store.lookup(&ip.to_string())).await {
        Ok(Ok(score)) => score,
        Ok(Err(e)) => {
            warn!("reputation lookup failed for {}: {}", ip, e);
            None
        }
        Err(_) => {
            warn!("reputation lookup timed out for {}; continuing without store", ip);
            None
        }
    }
}

/// Record a block against `ip`: unknown clients are inserted at score 0,
/// known ones are penalized. Failures are logged; the block response
/// stands either way.
async fn apply_block_penalty(runtime: &Runtime, ip: IpAddr) {
    let guard = runtime.reputation.read().await;
    let Some(store) = guard.as_ref() else {
        return;
    };

    let key = ip.to_string();
    let update = async {
        match store.lookup(&key).await? {
            Some(score) => {
                let threshold = runtime.auto_block_threshold.load(Ordering::Relaxed);
                let ttl = Duration::from_secs(runtime.time_to_block.load(Ordering::Relaxed));
                store.penalize(&key, score, threshold, ttl).await?;
            }
            None => {
                if ip.is_loopback() && !runtime.take_loopback_insert() {
                    debug!("loopback {} already recorded once; skipping insert", ip);
                    return Ok(());
                }
                let limit = runtime.save_limit.load(Ordering::Relaxed);
                store.insert_new(&key, limit).await?;
            }
        }
        Ok::<(), GatewardenError>(())
    };

    match tokio::time::timeout(STORE_DEADLINE, update).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => warn!("reputation update failed for {}: {}", ip, e),
        Err(_) => warn!("reputation update timed out for {}", ip),
    }
}

/// Collect the observed fields of one request for the evaluator.
fn gather_fields(parts: &Parts, body_bytes: &[u8], pattern: &str, path: &str) -> RequestFields {
    let content_type = parts
        .headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");

    RequestFields {
        headers: header_fields(&parts.headers),
        cookies: cookie_fields(&parts.headers),
        body: body::extract(body_bytes, content_type),
        url_values: path::capture_segments(pattern, path),
    }
}

/// One `(name, value)` entry per header value.
fn header_fields(headers: &HeaderMap) -> Vec<(String, String)> {
    headers
        .iter()
        .map(|(name, value)| {
            (
                name.as_str().to_string(),
                String::from_utf8_lossy(value.as_bytes()).into_owned(),
            )
        })
        .collect()
}

/// One `(name, value)` entry per cookie across all `Cookie` headers.
fn cookie_fields(headers: &HeaderMap) -> Vec<(String, String)> {
    let mut fields = Vec::new();
    for value in headers.get_all(header::COOKIE) {
        let Ok(raw) = value.to_str() else { continue };
        for pair in raw.split(';') {
            let pair = pair.trim();
            if pair.is_empty() {
                continue;
            }
            let (name, value) = pair.split_once('=').unwrap_or((pair, ""));
            fields.push((name.trim().to_string(), value.to_string()));
        }
    }
    fields
}

fn accepts_html(headers: &HeaderMap) -> bool {
    headers
        .get(header::ACCEPT)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|accept| accept.contains("text/html"))
}

async fn serve_static(runtime: &Runtime, parts: &Parts, path: &str) -> Response {
    let stripped = path.strip_prefix("/public").unwrap_or(path);
    let uri = if stripped.is_empty() { "/" } else { stripped };

    let request = match Request::builder()
        .method(parts.method.clone())
        .uri(uri)
        .body(Body::empty())
    {
        Ok(request) => request,
        Err(_) => return StatusCode::BAD_REQUEST.into_response(),
    };

    match ServeDir::new(&runtime.public_dir).oneshot(request).await {
        Ok(response) => response.map(Body::new),
        Err(_) => StatusCode::INTERNAL_SERVER_ERROR.into_response(),
    }
}

async fn serve_ui(runtime: &Runtime) -> Response {
    let request = match Request::builder().uri("/").body(Body::empty()) {
        Ok(request) => request,
        Err(_) => return StatusCode::INTERNAL_SERVER_ERROR.into_response(),
    };

    let index = runtime.public_dir.join("index.html");
    match ServeFile::new(index).oneshot(request).await {
        Ok(response) => response.map(Body::new),
        Err(_) => StatusCode::INTERNAL_SERVER_ERROR.into_response(),
    }
}

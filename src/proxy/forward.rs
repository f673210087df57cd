//! Origin forwarder.
//!
//! A deliberately thin reverse-proxy leg: the request is rewritten to
//! `http://{originHost}:{originPort}` with its method, headers and buffered
//! body preserved, and the origin's response is streamed back unmodified.
//! Connection pooling and streaming semantics belong to the HTTP substrate.

use axum::body::{Body, Bytes};
use axum::http::request::Parts;
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use std::sync::atomic::Ordering;
use tracing::warn;

use super::Runtime;

/// Hop-by-hop headers, never forwarded in either direction.
const HOP_BY_HOP: &[&str] = &[
    "connection",
    "proxy-connection",
    "keep-alive",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

/// Forward a buffered request to the origin and stream the response back.
pub async fn forward(runtime: &Runtime, parts: Parts, body: Bytes) -> Response {
    let origin_port = runtime.origin_port.load(Ordering::Relaxed);
    let mut url = format!(
        "http://{}:{}{}",
        runtime.origin_host,
        origin_port,
        parts.uri.path()
    );
    if let Some(query) = parts.uri.query() {
        url.push('?');
        url.push_str(query);
    }

    let mut headers = parts.headers;
    strip_hop_headers(&mut headers);
    // The substrate derives these from the rewritten URL and buffered body.
    headers.remove(header::HOST);
    headers.remove(header::CONTENT_LENGTH);

    let upstream = runtime
        .http
        .request(parts.method, &url)
        .headers(headers)
        .body(body)
        .send()
        .await;

    match upstream {
        Ok(upstream) => {
            let status = upstream.status();
            let mut headers = upstream.headers().clone();
            strip_hop_headers(&mut headers);

            let mut response = Response::new(Body::from_stream(upstream.bytes_stream()));
            *response.status_mut() = status;
            *response.headers_mut() = headers;
            response
        }
        Err(e) => {
            warn!("failed to forward to origin {}: {}", url, e);
            (StatusCode::BAD_GATEWAY, "Bad Gateway").into_response()
        }
    }
}

fn strip_hop_headers(headers: &mut HeaderMap) {
    for name in HOP_BY_HOP {
        headers.remove(*name);
    }
}

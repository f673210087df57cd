use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::extract::Request;
use axum::http::StatusCode;
use gatewarden::proxy::{pipeline, Runtime};
use gatewarden::reputation::memory::MemoryBackend;
use gatewarden::reputation::ReputationStore;

const BLOCK_BODY: &str = "Request blocked by defensive proxy";

/// Start a throwaway origin that echoes the request path.
async fn start_origin() -> SocketAddr {
    let app = axum::Router::new().fallback(|request: Request| async move {
        format!("origin:{}", request.uri().path())
    });
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

fn write_project(dir: &tempfile::TempDir) -> PathBuf {
    let path = dir.path().join("current_project.json");
    let project = serde_json::json!({
        "currentProject": "shop",
        "proxyEnabled": true,
        "endpoints": [
            {
                "path": "/login",
                "method": "POST",
                "request": {
                    "headers": {
                        "whitelist": [],
                        "blacklist": [{"key": "x-debug", "value": ""}],
                        "mode": "off"
                    }
                }
            },
            {
                "path": "api/$$",
                "method": "POST",
                "request": {
                    "body": {
                        "whitelist": [{"key": "op", "value": "read"}],
                        "blacklist": [],
                        "mode": "whitelist"
                    }
                }
            },
            {
                "path": "files/$$",
                "method": "GET",
                "request": {
                    "body": {
                        "mode": "off",
                        "urlRules": [
                            {"value": "passwd", "ruleType": "value", "listType": "blacklist"}
                        ]
                    }
                }
            }
        ]
    });
    std::fs::write(&path, serde_json::to_string_pretty(&project).unwrap()).unwrap();
    path
}

/// Build a runtime over a fresh project file, static dir and origin, with an
/// in-memory reputation store attached.
async fn test_runtime(dir: &tempfile::TempDir) -> (Arc<Runtime>, Arc<MemoryBackend>) {
    let origin = start_origin().await;
    let project = write_project(dir);

    let public_dir = dir.path().join("public");
    std::fs::create_dir_all(&public_dir).unwrap();
    std::fs::write(public_dir.join("index.html"), "<html>gatewarden ui</html>").unwrap();
    std::fs::write(public_dir.join("styles.css"), "body { margin: 0 }").unwrap();

    let runtime = Runtime::new("shop", 3000, origin.port(), project, public_dir);
    runtime.policy.reload().unwrap();

    let backend = Arc::new(MemoryBackend::new());
    *runtime.reputation.write().await = Some(ReputationStore::new(backend.clone()));
    runtime
        .save_limit
        .store(-1, std::sync::atomic::Ordering::Relaxed);
    runtime
        .auto_block_threshold
        .store(-3, std::sync::atomic::Ordering::Relaxed);
    runtime
        .time_to_block
        .store(60, std::sync::atomic::Ordering::Relaxed);

    (runtime, backend)
}

async fn send(runtime: &Arc<Runtime>, remote: &str, request: Request) -> (StatusCode, String) {
    let remote: SocketAddr = remote.parse().unwrap();
    let response = pipeline::handle_request(runtime.clone(), remote, request).await;
    let status = response.status();
    let body = axum::body::to_bytes(response.into_body(), 1024 * 1024)
        .await
        .unwrap();
    (status, String::from_utf8_lossy(&body).into_owned())
}

fn get(uri: &str) -> Request {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

fn post_json(uri: &str, body: &str) -> Request {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

// ===== Static serving =====

#[tokio::test]
async fn loopback_static_fetch_serves_file() {
    let dir = tempfile::tempdir().unwrap();
    let (runtime, backend) = test_runtime(&dir).await;

    let (status, body) = send(&runtime, "127.0.0.1:9999", get("/public/styles.css")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, "body { margin: 0 }");

    // No endpoint evaluation, no reputation update.
    use gatewarden::reputation::KvBackend;
    assert_eq!(backend.len().await.unwrap(), 0);
}

#[tokio::test]
async fn remote_clients_never_get_static_files() {
    let dir = tempfile::tempdir().unwrap();
    let (runtime, _) = test_runtime(&dir).await;

    // Falls through to normal handling and is forwarded to the origin.
    let (status, body) = send(&runtime, "10.9.9.9:1234", get("/public/styles.css")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, "origin:/public/styles.css");
}

// ===== Rule evaluation =====

#[tokio::test]
async fn blacklisted_header_blocks_and_records_ip() {
    let dir = tempfile::tempdir().unwrap();
    let (runtime, _) = test_runtime(&dir).await;

    let request = Request::builder()
        .method("POST")
        .uri("/login")
        .header("x-debug", "1")
        .body(Body::empty())
        .unwrap();
    let (status, body) = send(&runtime, "10.0.0.5:4444", request).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body, BLOCK_BODY);

    let guard = runtime.reputation.read().await;
    let store = guard.as_ref().unwrap();
    assert_eq!(store.lookup("10.0.0.5").await.unwrap(), Some(0));
    assert_eq!(store.size().await.unwrap(), 1);
}

#[tokio::test]
async fn clean_login_is_forwarded() {
    let dir = tempfile::tempdir().unwrap();
    let (runtime, _) = test_runtime(&dir).await;

    let request = Request::builder()
        .method("POST")
        .uri("/login")
        .body(Body::empty())
        .unwrap();
    let (status, body) = send(&runtime, "10.0.0.5:4444", request).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, "origin:/login");
}

#[tokio::test]
async fn body_whitelist_miss_is_blocked() {
    let dir = tempfile::tempdir().unwrap();
    let (runtime, _) = test_runtime(&dir).await;

    let (status, body) = send(
        &runtime,
        "10.0.0.6:4444",
        post_json("/api/users", r#"{"op": "write"}"#),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body, BLOCK_BODY);
}

#[tokio::test]
async fn body_whitelist_hit_is_forwarded() {
    let dir = tempfile::tempdir().unwrap();
    let (runtime, _) = test_runtime(&dir).await;

    let (status, body) = send(
        &runtime,
        "10.0.0.6:4444",
        post_json("/api/users", r#"{"op": "read", "extra": "x"}"#),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, "origin:/api/users");
}

#[tokio::test]
async fn url_wildcard_blacklist_blocks_captured_value() {
    let dir = tempfile::tempdir().unwrap();
    let (runtime, _) = test_runtime(&dir).await;

    let (status, body) = send(&runtime, "10.0.0.7:4444", get("/files/passwd")).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body, BLOCK_BODY);

    let (status, body) = send(&runtime, "10.0.0.7:4444", get("/files/report")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, "origin:/files/report");
}

// ===== Reputation lifecycle =====

#[tokio::test]
async fn repeated_blocks_walk_the_score_down_and_attach_ttl() {
    let dir = tempfile::tempdir().unwrap();
    let (runtime, backend) = test_runtime(&dir).await;

    let blocked_request = || {
        Request::builder()
            .method("POST")
            .uri("/login")
            .header("x-debug", "1")
            .body(Body::empty())
            .unwrap()
    };

    // First block inserts the record at 0, each further block decrements.
    for expected in [0i64, -1, -2, -3] {
        let (status, body) = send(&runtime, "1.2.3.4:5555", blocked_request()).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(body, BLOCK_BODY);

        let guard = runtime.reputation.read().await;
        let store = guard.as_ref().unwrap();
        assert_eq!(store.lookup("1.2.3.4").await.unwrap(), Some(expected));
    }

    // At the threshold the record carries the block TTL.
    let ttl = backend.ttl("1.2.3.4").expect("record should have a TTL");
    assert!(ttl <= Duration::from_secs(60));
    assert!(ttl > Duration::from_secs(50));

    // Within the TTL the client is pre-blocked before any rule evaluation:
    // 403 with an empty body, not the block page.
    let (status, body) = send(&runtime, "1.2.3.4:5555", blocked_request()).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body, "");

    // Even a request that would pass the rules is pre-blocked.
    let (status, _) = send(&runtime, "1.2.3.4:5555", get("/files/report")).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn save_limit_drops_new_records_but_keeps_updating_old_ones() {
    let dir = tempfile::tempdir().unwrap();
    let (runtime, _) = test_runtime(&dir).await;
    runtime
        .save_limit
        .store(1, std::sync::atomic::Ordering::Relaxed);

    let blocked = || {
        Request::builder()
            .method("POST")
            .uri("/login")
            .header("x-debug", "1")
            .body(Body::empty())
            .unwrap()
    };

    send(&runtime, "10.1.1.1:1000", blocked()).await;
    send(&runtime, "10.1.1.2:1000", blocked()).await;

    let guard = runtime.reputation.read().await;
    let store = guard.as_ref().unwrap();
    assert_eq!(store.size().await.unwrap(), 1);
    assert_eq!(store.lookup("10.1.1.1").await.unwrap(), Some(0));
    assert_eq!(store.lookup("10.1.1.2").await.unwrap(), None);
    drop(guard);

    // The existing record still updates at the limit.
    send(&runtime, "10.1.1.1:1000", blocked()).await;
    let guard = runtime.reputation.read().await;
    let store = guard.as_ref().unwrap();
    assert_eq!(store.lookup("10.1.1.1").await.unwrap(), Some(-1));
}

#[tokio::test]
async fn loopback_is_recorded_at_most_once() {
    let dir = tempfile::tempdir().unwrap();
    let (runtime, _) = test_runtime(&dir).await;

    let blocked = || {
        Request::builder()
            .method("POST")
            .uri("/login")
            .header("x-debug", "1")
            .body(Body::empty())
            .unwrap()
    };

    send(&runtime, "127.0.0.1:1000", blocked()).await;
    // A second loopback address arrives with no record, but the one-per-process
    // allowance is spent.
    send(&runtime, "[::1]:1000", blocked()).await;

    let guard = runtime.reputation.read().await;
    let store = guard.as_ref().unwrap();
    assert_eq!(store.size().await.unwrap(), 1);
    assert_eq!(store.lookup("127.0.0.1").await.unwrap(), Some(0));
    assert_eq!(store.lookup("::1").await.unwrap(), None);
}

#[tokio::test]
async fn blocking_works_without_a_reputation_store() {
    let dir = tempfile::tempdir().unwrap();
    let (runtime, _) = test_runtime(&dir).await;
    *runtime.reputation.write().await = None;

    let request = Request::builder()
        .method("POST")
        .uri("/login")
        .header("x-debug", "1")
        .body(Body::empty())
        .unwrap();
    let (status, body) = send(&runtime, "10.0.0.5:4444", request).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body, BLOCK_BODY);
}

// ===== Fallback behavior =====

#[tokio::test]
async fn control_paths_from_remote_clients_fall_through() {
    let dir = tempfile::tempdir().unwrap();
    let (runtime, _) = test_runtime(&dir).await;

    let (status, body) = send(&runtime, "10.0.0.8:4444", get("/api/endpoints")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, "origin:/api/endpoints");
}

#[tokio::test]
async fn control_paths_from_loopback_reach_the_control_plane() {
    let dir = tempfile::tempdir().unwrap();
    let (runtime, _) = test_runtime(&dir).await;

    let (status, body) = send(&runtime, "127.0.0.1:4444", get("/api/endpoints")).await;
    assert_eq!(status, StatusCode::OK);
    let json: serde_json::Value = serde_json::from_str(&body).unwrap();
    assert_eq!(json["project"], "shop");
    assert_eq!(json["endpoints"].as_array().unwrap().len(), 3);
}

#[tokio::test]
async fn html_navigation_to_unmatched_path_serves_the_ui() {
    let dir = tempfile::tempdir().unwrap();
    let (runtime, _) = test_runtime(&dir).await;

    let request = Request::builder()
        .uri("/dashboard")
        .header("accept", "text/html,application/xhtml+xml")
        .body(Body::empty())
        .unwrap();
    let (status, body) = send(&runtime, "10.0.0.9:4444", request).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, "<html>gatewarden ui</html>");
}

#[tokio::test]
async fn unmatched_api_request_is_forwarded_unchanged() {
    let dir = tempfile::tempdir().unwrap();
    let (runtime, _) = test_runtime(&dir).await;

    let (status, body) = send(&runtime, "10.0.0.9:4444", get("/healthz?probe=1")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, "origin:/healthz");
}

#[tokio::test]
async fn unreachable_origin_yields_502() {
    let dir = tempfile::tempdir().unwrap();
    let (runtime, _) = test_runtime(&dir).await;

    // Grab a port that nothing is listening on.
    let closed = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = closed.local_addr().unwrap().port();
    drop(closed);
    runtime
        .origin_port
        .store(port, std::sync::atomic::Ordering::Relaxed);

    let (status, _) = send(&runtime, "10.0.0.9:4444", get("/healthz")).await;
    assert_eq!(status, StatusCode::BAD_GATEWAY);
}

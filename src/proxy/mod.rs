//! Proxy listener and runtime state.
//!
//! [`Runtime`] is the single record threaded through every handler: the
//! policy snapshot, the tunable scalars the control plane mutates, the
//! optional store handles and the shared HTTP client. Scalars are independent
//! atomic cells; readers may observe updates in any order relative to each
//! other, which is acceptable because each is meaningful on its own.
//!
//! [`ProxyServer`] binds the listener and runs the request pipeline with a
//! panic guard, shutting down gracefully (with a bounded grace period) when
//! the control plane disables the proxy.

pub mod forward;
pub mod pipeline;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU16, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use sqlx::PgPool;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tower_http::catch_panic::CatchPanicLayer;
use tracing::{error, info, warn};

use crate::error::Result;
use crate::policy::reload::PolicyHandle;
use crate::reputation::ReputationStore;

/// Deadline for per-request reputation store operations.
pub const STORE_DEADLINE: Duration = Duration::from_secs(5);

/// Grace period for draining connections on shutdown.
pub const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Process-wide proxy state shared by the pipeline and the control plane.
pub struct Runtime {
    pub current_project: String,
    pub proxy_port: u16,
    /// Origin host; requests are rewritten to `http://{host}:{port}`.
    pub origin_host: String,
    pub origin_port: AtomicU16,
    /// Maximum reputation records to keep; -1 disables the bound.
    pub save_limit: AtomicI64,
    /// Score at or below which a client is blocked outright.
    pub auto_block_threshold: AtomicI64,
    /// TTL in seconds attached to records at or below the threshold.
    pub time_to_block: AtomicU64,
    /// Loopback is recorded at most once per process lifetime.
    save_local_ip: AtomicBool,
    pub policy: Arc<PolicyHandle>,
    pub public_dir: PathBuf,
    pub reputation: tokio::sync::RwLock<Option<ReputationStore>>,
    pub audit: tokio::sync::RwLock<Option<PgPool>>,
    pub http: reqwest::Client,
    shutdown: watch::Sender<bool>,
}

impl Runtime {
    pub fn new(
        current_project: impl Into<String>,
        proxy_port: u16,
        origin_port: u16,
        project_file: PathBuf,
        public_dir: PathBuf,
    ) -> Arc<Self> {
        let (shutdown, _) = watch::channel(false);
        Arc::new(Self {
            current_project: current_project.into(),
            proxy_port,
            origin_host: "localhost".to_string(),
            origin_port: AtomicU16::new(origin_port),
            save_limit: AtomicI64::new(0),
            auto_block_threshold: AtomicI64::new(0),
            time_to_block: AtomicU64::new(0),
            save_local_ip: AtomicBool::new(true),
            policy: Arc::new(PolicyHandle::new(project_file)),
            public_dir,
            reputation: tokio::sync::RwLock::new(None),
            audit: tokio::sync::RwLock::new(None),
            http: reqwest::Client::new(),
            shutdown,
        })
    }

    /// Consume the one loopback insert allowance. Returns whether the caller
    /// may record a loopback address.
    pub fn take_loopback_insert(&self) -> bool {
        self.save_local_ip.swap(false, Ordering::SeqCst)
    }

    /// Ask the listener to shut down (used by `POST /api/proxy/disable`).
    pub fn request_shutdown(&self) {
        let _ = self.shutdown.send(true);
    }

    pub fn shutdown_signal(&self) -> watch::Receiver<bool> {
        self.shutdown.subscribe()
    }
}

/// The proxy listener.
pub struct ProxyServer {
    runtime: Arc<Runtime>,
}

impl ProxyServer {
    pub fn new(runtime: Arc<Runtime>) -> Self {
        Self { runtime }
    }

    fn app(&self) -> axum::Router {
        // Every path goes through the pipeline; the panic guard turns any
        // escaped panic into a 500 while the process keeps serving.
        axum::Router::new()
            .fallback(pipeline::handle)
            .with_state(self.runtime.clone())
            .layer(CatchPanicLayer::new())
    }

    /// Bind `listen_addr` and serve in a background task. Returns the actual
    /// bound address.
    pub async fn start(&self, listen_addr: &str) -> Result<SocketAddr> {
        let listener = TcpListener::bind(listen_addr).await?;
        let local_addr = listener.local_addr()?;
        info!("gatewarden proxy listening on {}", local_addr);

        let app = self.app();
        let mut shutdown_rx = self.runtime.shutdown_signal();
        let mut grace_rx = self.runtime.shutdown_signal();
        tokio::spawn(async move {
            let serve = async move {
                axum::serve(
                    listener,
                    app.into_make_service_with_connect_info::<SocketAddr>(),
                )
                .with_graceful_shutdown(async move {
                    let _ = shutdown_rx.changed().await;
                })
                .await
            };

            tokio::select! {
                result = serve => {
                    if let Err(e) = result {
                        error!("server error: {}", e);
                    }
                }
                _ = async {
                    let _ = grace_rx.changed().await;
                    tokio::time::sleep(SHUTDOWN_GRACE).await;
                } => {
                    warn!("shutdown grace period elapsed; dropping remaining connections");
                }
            }
        });

        Ok(local_addr)
    }
}

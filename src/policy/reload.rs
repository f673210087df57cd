//! Policy snapshot publication and hot reload.
//!
//! The endpoints in force live behind an `RwLock<Arc<Vec<Endpoint>>>` so the
//! request pipeline always reads a self-consistent snapshot: a reload swaps
//! the whole `Arc` and in-flight requests keep the list they started with.
//!
//! Reload triggers:
//!
//! - **Control plane**: `POST /api/reload-endpoints`.
//! - **File change**: [`start_file_watcher`] uses the [`notify`] crate to
//!   detect modifications to the project file.
//!
//! Invalid or unreadable project files are handled fail-safe: the previous
//! snapshot is retained and the error is logged.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};

use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tracing::{info, warn};

use super::config::{Endpoint, ProjectFile};
use crate::error::Result;

/// The policy currently in force: the endpoint snapshot, the enabled flag and
/// the project file they came from.
pub struct PolicyHandle {
    path: PathBuf,
    endpoints: RwLock<Arc<Vec<Endpoint>>>,
    /// Toggled by the control plane; persisted to the project file.
    pub proxy_enabled: AtomicBool,
}

impl PolicyHandle {
    /// Create an empty handle for the given project file. Call [`reload`]
    /// (or let the file watcher do it) to populate the snapshot.
    ///
    /// [`reload`]: PolicyHandle::reload
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            endpoints: RwLock::new(Arc::new(Vec::new())),
            proxy_enabled: AtomicBool::new(false),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The current endpoint snapshot. Cheap; clones an `Arc`.
    pub fn endpoints(&self) -> Arc<Vec<Endpoint>> {
        self.endpoints.read().unwrap().clone()
    }

    pub fn enabled(&self) -> bool {
        self.proxy_enabled.load(Ordering::Relaxed)
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.proxy_enabled.store(enabled, Ordering::Relaxed);
    }

    /// Re-read the project file and atomically replace the snapshot.
    ///
    /// Endpoint paths are normalized (leading `/` stripped) on the way in.
    /// On failure the previous snapshot is retained and the error returned.
    /// Returns the number of endpoints now in force.
    pub fn reload(&self) -> Result<usize> {
        let file = ProjectFile::load_from_path(&self.path)?;

        let mut endpoints = file.endpoints;
        for endpoint in &mut endpoints {
            endpoint.path = endpoint.path.trim_start_matches('/').to_string();
        }
        let count = endpoints.len();

        // Absent flag means disabled for fresh projects.
        self.set_enabled(file.proxy_enabled.unwrap_or(false));
        *self.endpoints.write().unwrap() = Arc::new(endpoints);

        info!(
            "loaded {} endpoints from {} (enabled: {})",
            count,
            self.path.display(),
            self.enabled()
        );
        Ok(count)
    }

    /// Persist the enabled flag with a read-modify-write of the project file,
    /// preserving any fields we do not model.
    pub fn save_enabled(&self, enabled: bool) -> Result<()> {
        let mut file = ProjectFile::load_from_path(&self.path)?;
        file.proxy_enabled = Some(enabled);
        let data = serde_json::to_string_pretty(&file)?;
        std::fs::write(&self.path, data)?;
        info!("saved proxyEnabled: {} to {}", enabled, self.path.display());
        Ok(())
    }
}

/// Start a file-system watcher that reloads the policy when the project file
/// changes.
///
/// Returns a [`RecommendedWatcher`] handle that must be kept alive for the
/// duration of the watch. Dropping the handle stops the watcher.
pub fn start_file_watcher(policy: Arc<PolicyHandle>) -> notify::Result<RecommendedWatcher> {
    let watch_path = policy.path().to_path_buf();
    let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| match res {
        Ok(event) => {
            if matches!(event.kind, EventKind::Modify(_) | EventKind::Create(_)) {
                info!("project file changed, reloading endpoints...");
                if let Err(e) = policy.reload() {
                    warn!("endpoint reload failed (keeping old snapshot): {}", e);
                }
            }
        }
        Err(e) => {
            warn!("file watcher error: {}", e);
        }
    })?;

    watcher.watch(&watch_path, RecursiveMode::NonRecursive)?;
    info!("watching {} for changes", watch_path.display());
    Ok(watcher)
}

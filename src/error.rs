//! Unified error handling for the Gatewarden library.
//!
//! Uses [`thiserror`] to define a single error enum that covers all failure
//! modes: policy-file I/O and parsing, reputation-store access, audit-store
//! access, and proxy runtime errors. Library code returns [`Result<T>`] which
//! aliases `std::result::Result<T, GatewardenError>`.
//!
//! The binary (`main.rs`) uses [`anyhow`] for top-level error propagation.

use thiserror::Error;

/// Unified error type for the Gatewarden library.
///
/// Each variant wraps an underlying error source, enabling automatic
/// conversion via `?` and preserving the original error chain for diagnostics.
#[derive(Debug, Error)]
pub enum GatewardenError {
    /// File I/O error (project file read/write, static file access).
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error (project file, API bodies).
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Reputation store error (connect, read, write).
    #[error("Reputation store error: {0}")]
    Store(#[from] redis::RedisError),

    /// Audit store error (connect, schema check).
    #[error("Audit store error: {0}")]
    Audit(#[from] sqlx::Error),

    /// Proxy runtime error (bind failure, forwarding setup, etc.).
    #[error("Proxy error: {0}")]
    Proxy(String),

    /// Missing required environment variable at startup.
    #[error("Config error: missing required environment variable `{0}`")]
    ConfigEnvVar(String),
}

/// Convenience type alias for `std::result::Result<T, GatewardenError>`.
pub type Result<T> = std::result::Result<T, GatewardenError>;

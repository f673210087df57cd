//! IP reputation store.
//!
//! Maps client IPs to an integer score kept in an external key-value store.
//! A new IP enters at score 0; every block decrements it by one. Once the
//! score reaches the auto-block threshold, the record gets a TTL so the
//! block expires on its own. The record count is bounded by a save limit.
//!
//! The storage itself sits behind [`KvBackend`] so the lifecycle logic can
//! run against Redis in production and an in-memory map in tests. Concurrent
//! updates are last-writer-wins at the storage layer; reputation is a soft
//! signal and the store makes no attempt to linearize read-modify-write
//! cycles beyond what the backend provides.

pub mod memory;
pub mod redis;

use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use crate::error::Result;

/// Save limit value that disables the record-count bound.
pub const UNLIMITED: i64 = -1;

/// Minimal key-value surface the reputation lifecycle needs.
#[async_trait::async_trait]
pub trait KvBackend: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>>;
    /// Set `key` to `value`, with an expiry when `ttl` is given.
    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<()>;
    /// Number of records currently held.
    async fn len(&self) -> Result<i64>;
    fn name(&self) -> &str;
}

/// Reputation store over a pluggable backend.
#[derive(Clone)]
pub struct ReputationStore {
    backend: Arc<dyn KvBackend>,
}

impl ReputationStore {
    pub fn new(backend: Arc<dyn KvBackend>) -> Self {
        Self { backend }
    }

    pub fn backend_name(&self) -> &str {
        self.backend.name()
    }

    /// Look up the score for `ip`. A record holding something that is not an
    /// integer is treated as missing.
    pub async fn lookup(&self, ip: &str) -> Result<Option<i64>> {
        let Some(raw) = self.backend.get(ip).await? else {
            return Ok(None);
        };
        match raw.trim().parse::<i64>() {
            Ok(score) => Ok(Some(score)),
            Err(_) => {
                warn!("invalid reputation value for {}: {:?}", ip, raw);
                Ok(None)
            }
        }
    }

    /// Insert `ip` at score 0, subject to the save limit. Returns whether the
    /// record was actually inserted.
    pub async fn insert_new(&self, ip: &str, save_limit: i64) -> Result<bool> {
        if save_limit > UNLIMITED {
            let count = self.backend.len().await?;
            if count >= save_limit {
                info!("save limit reached ({}); not saving {}", save_limit, ip);
                return Ok(false);
            }
        }
        self.backend.set(ip, "0", None).await?;
        info!("added new IP: {}", ip);
        Ok(true)
    }

    /// Decrement the score of `ip`. When the resulting score is at or below
    /// `threshold`, a TTL of `time_to_block` is attached so the record (and
    /// the block it causes) expires. Returns the new score.
    pub async fn penalize(
        &self,
        ip: &str,
        current: i64,
        threshold: i64,
        time_to_block: Duration,
    ) -> Result<i64> {
        let score = current - 1;
        let ttl = (score <= threshold && !time_to_block.is_zero()).then_some(time_to_block);
        self.backend.set(ip, &score.to_string(), ttl).await?;
        info!("updated IP reputation: {} to {}", ip, score);
        Ok(score)
    }

    /// Current record count, for the save-limit gate.
    pub async fn size(&self) -> Result<i64> {
        self.backend.len().await
    }
}

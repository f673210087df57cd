//! In-memory key-value backend.
//!
//! Used by the test suite so the reputation lifecycle can be exercised
//! without a running Redis. Expiry is honored lazily on access.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use super::KvBackend;
use crate::error::Result;

#[derive(Default)]
pub struct MemoryBackend {
    records: Mutex<HashMap<String, (String, Option<Instant>)>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// The remaining TTL of a record, if it has one. Test hook.
    pub fn ttl(&self, key: &str) -> Option<Duration> {
        let records = self.records.lock().unwrap();
        let (_, deadline) = records.get(key)?;
        (*deadline).map(|d| d.saturating_duration_since(Instant::now()))
    }
}

fn expired(deadline: &Option<Instant>) -> bool {
    deadline.is_some_and(|d| d <= Instant::now())
}

#[async_trait::async_trait]
impl KvBackend for MemoryBackend {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let mut records = self.records.lock().unwrap();
        match records.get(key) {
            Some((_, deadline)) if expired(deadline) => {
                records.remove(key);
                Ok(None)
            }
            Some((value, _)) => Ok(Some(value.clone())),
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<()> {
        let deadline = ttl.map(|ttl| Instant::now() + ttl);
        self.records
            .lock()
            .unwrap()
            .insert(key.to_string(), (value.to_string(), deadline));
        Ok(())
    }

    async fn len(&self) -> Result<i64> {
        let mut records = self.records.lock().unwrap();
        records.retain(|_, (_, deadline)| !expired(deadline));
        Ok(records.len() as i64)
    }

    fn name(&self) -> &str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn set_get_round_trip() {
        let backend = MemoryBackend::new();
        backend.set("1.2.3.4", "-2", None).await.unwrap();
        assert_eq!(backend.get("1.2.3.4").await.unwrap().as_deref(), Some("-2"));
        assert_eq!(backend.len().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn expired_records_vanish() {
        let backend = MemoryBackend::new();
        backend
            .set("1.2.3.4", "-4", Some(Duration::from_millis(10)))
            .await
            .unwrap();
        assert!(backend.ttl("1.2.3.4").is_some());

        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(backend.get("1.2.3.4").await.unwrap(), None);
        assert_eq!(backend.len().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn set_without_ttl_clears_existing_deadline() {
        let backend = MemoryBackend::new();
        backend
            .set("1.2.3.4", "-4", Some(Duration::from_secs(60)))
            .await
            .unwrap();
        backend.set("1.2.3.4", "0", None).await.unwrap();
        assert_eq!(backend.ttl("1.2.3.4"), None);
    }
}

//! In-process backend for single-node deployments and tests

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::time::Instant;
use trafficlight_core::Result;

use super::StoreBackend;

#[derive(Debug, Clone)]
struct MemoryEntry {
    value: Vec<u8>,
    ttl: Duration,
    expires_at: Instant,
}

impl MemoryEntry {
    fn new(value: &[u8], ttl: Duration) -> Self {
        Self {
            value: value.to_vec(),
            ttl,
            expires_at: Instant::now() + ttl,
        }
    }

    fn is_expired(&self, now: Instant) -> bool {
        now >= self.expires_at
    }
}

/// Expiring key-value map shared by every clone
///
/// Expired entries are dropped lazily when touched, or in bulk through
/// [`MemoryBackend::purge_expired`]. Clones share the same map, so several
/// stores built from one backend coordinate like separate processes talking
/// to the same server.
#[derive(Debug, Clone, Default)]
pub struct MemoryBackend {
    entries: Arc<DashMap<String, MemoryEntry>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live entries
    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.entries
            .iter()
            .filter(|entry| !entry.is_expired(now))
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// TTL a live entry was written with
    pub fn ttl_of(&self, key: &str) -> Option<Duration> {
        let now = Instant::now();
        self.entries
            .get(key)
            .filter(|entry| !entry.is_expired(now))
            .map(|entry| entry.ttl)
    }

    /// Drop every expired entry, returning how many were removed
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.entries.len();
        self.entries.retain(|_, entry| !entry.is_expired(now));
        before.saturating_sub(self.entries.len())
    }
}

#[async_trait]
impl StoreBackend for MemoryBackend {
    async fn set_if_absent(&self, key: &str, value: &[u8], ttl: Duration) -> Result<bool> {
        let now = Instant::now();
        match self.entries.entry(key.to_string()) {
            Entry::Occupied(mut occupied) => {
                if occupied.get().is_expired(now) {
                    occupied.insert(MemoryEntry::new(value, ttl));
                    Ok(true)
                } else {
                    Ok(false)
                }
            }
            Entry::Vacant(vacant) => {
                vacant.insert(MemoryEntry::new(value, ttl));
                Ok(true)
            }
        }
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.entries.remove(key);
        Ok(())
    }

    async fn set(&self, key: &str, value: &[u8], ttl: Duration) -> Result<()> {
        self.entries
            .insert(key.to_string(), MemoryEntry::new(value, ttl));
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let now = Instant::now();
        let value = match self.entries.get(key) {
            Some(entry) if !entry.is_expired(now) => return Ok(Some(entry.value.clone())),
            Some(_) => None,
            None => return Ok(None),
        };
        self.entries.remove_if(key, |_, entry| entry.is_expired(now));
        Ok(value)
    }
}

//! Two-tier cache: a per-process LRU in front of the shared redis store.
//!
//! Reads consult the local tier first and fall through to the shared tier,
//! repopulating the local tier on hit. Writes land in both. Dedupe locks
//! (`set_if_not_exists`) go only through the shared tier, which is the one
//! place atomicity across processes holds.

pub mod keys;
pub mod local;
pub mod memory;
pub mod shared;

use std::time::Duration;

use async_trait::async_trait;

pub use local::LocalCache;
pub use memory::MemoryCache;
pub use shared::SharedCache;

use crate::error::Result;

/// The cache operations the rest of the crate programs against.
///
/// Backed by [`TieredCache`] in production; [`MemoryCache`] stands in where
/// no shared store is reachable (tests, single-process development).
#[async_trait]
pub trait Cache: Send + Sync {
    async fn set(&self, key: &str, value: &[u8], ttl: Duration) -> Result<()>;
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;
    async fn delete(&self, key: &str) -> Result<()>;
    async fn exists(&self, key: &str) -> Result<bool>;
    async fn set_ttl(&self, key: &str, ttl: Duration) -> Result<()>;
    /// Atomic set-if-absent; the only supported dedupe primitive.
    async fn set_if_not_exists(&self, key: &str, value: &[u8], ttl: Duration) -> Result<bool>;
    async fn health(&self) -> Result<()>;
}

pub struct TieredCache {
    local: LocalCache,
    shared: SharedCache,
}

impl TieredCache {
    pub fn new(local: LocalCache, shared: SharedCache) -> Self {
        TieredCache { local, shared }
    }

    /// Write through both tiers. The shared tier is written first so a
    /// failure never leaves the local tier ahead of the shared one.
    pub async fn set(&self, key: &str, value: &[u8], ttl: Duration) -> Result<()> {
        self.shared.set(key, value, ttl).await?;
        self.local.set(key, value.to_vec(), Some(ttl));
        Ok(())
    }

    pub async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        if let Some(value) = self.local.get(key) {
            return Ok(Some(value));
        }
        let value = self.shared.get(key).await?;
        if let Some(ref value) = value {
            self.local.set(key, value.clone(), None);
        }
        Ok(value)
    }

    pub async fn delete(&self, key: &str) -> Result<()> {
        self.local.delete(key);
        self.shared.delete(key).await
    }

    pub async fn exists(&self, key: &str) -> Result<bool> {
        if self.local.exists(key) {
            return Ok(true);
        }
        self.shared.exists(key).await
    }

    pub async fn set_ttl(&self, key: &str, ttl: Duration) -> Result<()> {
        self.local.set_ttl(key, ttl);
        self.shared.set_ttl(key, ttl).await
    }

    /// Cross-process set-if-absent; shared tier only. Returns true when this
    /// process won the key.
    pub async fn set_if_not_exists(&self, key: &str, value: &[u8], ttl: Duration) -> Result<bool> {
        self.shared.set_if_not_exists(key, value, ttl).await
    }

    /// Shared-tier liveness probe.
    pub async fn health(&self) -> Result<()> {
        self.shared.ping().await
    }

    /// Direct access to the local tier for read-through hint caches that
    /// must never touch the network.
    pub fn local(&self) -> &LocalCache {
        &self.local
    }
}

#[async_trait]
impl Cache for TieredCache {
    async fn set(&self, key: &str, value: &[u8], ttl: Duration) -> Result<()> {
        TieredCache::set(self, key, value, ttl).await
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        TieredCache::get(self, key).await
    }

    async fn delete(&self, key: &str) -> Result<()> {
        TieredCache::delete(self, key).await
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        TieredCache::exists(self, key).await
    }

    async fn set_ttl(&self, key: &str, ttl: Duration) -> Result<()> {
        TieredCache::set_ttl(self, key, ttl).await
    }

    async fn set_if_not_exists(&self, key: &str, value: &[u8], ttl: Duration) -> Result<bool> {
        TieredCache::set_if_not_exists(self, key, value, ttl).await
    }

    async fn health(&self) -> Result<()> {
        TieredCache::health(self).await
    }
}

//! In-memory [`Cache`] implementation.
//!
//! Process-local only: `set_if_not_exists` is atomic within this process
//! and nothing more. Used by tests and single-process development runs
//! where no shared store is reachable.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use crate::cache::Cache;
use crate::error::Result;

#[derive(Default)]
pub struct MemoryCache {
    entries: Mutex<HashMap<String, (Vec<u8>, Instant)>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn live_value(entries: &mut HashMap<String, (Vec<u8>, Instant)>, key: &str) -> Option<Vec<u8>> {
        match entries.get(key) {
            Some((value, expires_at)) if *expires_at > Instant::now() => Some(value.clone()),
            Some(_) => {
                entries.remove(key);
                None
            }
            None => None,
        }
    }
}

#[async_trait]
impl Cache for MemoryCache {
    async fn set(&self, key: &str, value: &[u8], ttl: Duration) -> Result<()> {
        let mut entries = self.entries.lock().expect("memory cache lock poisoned");
        entries.insert(key.to_owned(), (value.to_vec(), Instant::now() + ttl));
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let mut entries = self.entries.lock().expect("memory cache lock poisoned");
        Ok(Self::live_value(&mut entries, key))
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let mut entries = self.entries.lock().expect("memory cache lock poisoned");
        entries.remove(key);
        Ok(())
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        let mut entries = self.entries.lock().expect("memory cache lock poisoned");
        Ok(Self::live_value(&mut entries, key).is_some())
    }

    async fn set_ttl(&self, key: &str, ttl: Duration) -> Result<()> {
        let mut entries = self.entries.lock().expect("memory cache lock poisoned");
        if let Some((_, expires_at)) = entries.get_mut(key) {
            *expires_at = Instant::now() + ttl;
        }
        Ok(())
    }

    async fn set_if_not_exists(&self, key: &str, value: &[u8], ttl: Duration) -> Result<bool> {
        let mut entries = self.entries.lock().expect("memory cache lock poisoned");
        if Self::live_value(&mut entries, key).is_some() {
            return Ok(false);
        }
        entries.insert(key.to_owned(), (value.to_vec(), Instant::now() + ttl));
        Ok(true)
    }

    async fn health(&self) -> Result<()> {
        Ok(())
    }
}

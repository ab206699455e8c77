//! Shared cache tier backed by redis.
//!
//! The connection manager reconnects on its own; every operation here is a
//! single round trip. `set_if_not_exists` is the only cross-process dedupe
//! primitive the rest of the crate may rely on.

use redis::AsyncCommands;
use redis::aio::ConnectionManager;
use std::time::Duration;

use crate::error::Result;

#[derive(Clone)]
pub struct SharedCache {
    conn: ConnectionManager,
}

impl SharedCache {
    pub async fn connect(url: &str) -> Result<Self> {
        let client = redis::Client::open(url).map_err(crate::error::Error::Cache)?;
        let conn = ConnectionManager::new(client).await?;
        Ok(SharedCache { conn })
    }

    pub fn from_manager(conn: ConnectionManager) -> Self {
        SharedCache { conn }
    }

    pub async fn set(&self, key: &str, value: &[u8], ttl: Duration) -> Result<()> {
        let mut conn = self.conn.clone();
        conn.set_ex::<_, _, ()>(key, value, ttl.as_secs().max(1))
            .await?;
        Ok(())
    }

    pub async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let mut conn = self.conn.clone();
        let value: Option<Vec<u8>> = conn.get(key).await?;
        Ok(value)
    }

    pub async fn delete(&self, key: &str) -> Result<()> {
        let mut conn = self.conn.clone();
        conn.del::<_, ()>(key).await?;
        Ok(())
    }

    pub async fn exists(&self, key: &str) -> Result<bool> {
        let mut conn = self.conn.clone();
        let exists: bool = conn.exists(key).await?;
        Ok(exists)
    }

    pub async fn set_ttl(&self, key: &str, ttl: Duration) -> Result<()> {
        let mut conn = self.conn.clone();
        conn.expire::<_, ()>(key, ttl.as_secs().max(1) as i64)
            .await?;
        Ok(())
    }

    /// Atomic `SET key value NX PX ttl`. Returns true when this call created
    /// the key, false when it already existed.
    pub async fn set_if_not_exists(&self, key: &str, value: &[u8], ttl: Duration) -> Result<bool> {
        let mut conn = self.conn.clone();
        let reply: Option<String> = redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("NX")
            .arg("PX")
            .arg(ttl.as_millis().max(1) as u64)
            .query_async(&mut conn)
            .await?;
        Ok(reply.is_some())
    }

    pub async fn ping(&self) -> Result<()> {
        let mut conn = self.conn.clone();
        let _: String = redis::cmd("PING").query_async(&mut conn).await?;
        Ok(())
    }
}

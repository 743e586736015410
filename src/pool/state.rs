//! Pool state as kept in the store
//!
//! Four keys make up the pool: the set of validated proxies, a cached count
//! of that set, and the protect/refresh cooldown flags.

use std::sync::Arc;
use std::time::Duration;

use crate::store::{KeyTtl, ProxyStore, StoreError};
use crate::Result;

/// Cooldown flags consulted by the replenishment controller
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flag {
    /// Suppresses low-watermark fetches while a recent fetch warms the pool
    Protect,
    /// Present until the next periodic refresh is due
    Refresh,
}

/// Store keys used by one pool
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolKeys {
    pub set: String,
    pub count: String,
    pub protect: String,
    pub refresh: String,
}

impl PoolKeys {
    pub fn new(prefix: &str) -> Self {
        Self {
            set: format!("{prefix}:proxy_set"),
            count: format!("{prefix}:proxy_count"),
            protect: format!("{prefix}:proxy_protect"),
            refresh: format!("{prefix}:proxy_refresh"),
        }
    }

    fn flag(&self, flag: Flag) -> &str {
        match flag {
            Flag::Protect => &self.protect,
            Flag::Refresh => &self.refresh,
        }
    }
}

/// Snapshot of the pool for display
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolStatus {
    pub size: u64,
    pub cached_count: Option<u64>,
    pub protect: KeyTtl,
    pub refresh: KeyTtl,
}

/// Handle on the pool's keys in a shared store
#[derive(Clone)]
pub struct PoolState {
    store: Arc<dyn ProxyStore>,
    keys: PoolKeys,
}

impl PoolState {
    pub fn new(store: Arc<dyn ProxyStore>, key_prefix: &str) -> Self {
        Self {
            store,
            keys: PoolKeys::new(key_prefix),
        }
    }

    pub fn keys(&self) -> &PoolKeys {
        &self.keys
    }

    pub fn store(&self) -> &Arc<dyn ProxyStore> {
        &self.store
    }

    /// Current members, exactly as stored
    pub async fn members(&self) -> Result<Vec<String>> {
        Ok(self.store.smembers(&self.keys.set).await?)
    }

    pub async fn size(&self) -> Result<u64> {
        Ok(self.store.scard(&self.keys.set).await?)
    }

    pub async fn contains(&self, member: &str) -> Result<bool> {
        Ok(self.store.sismember(&self.keys.set, member).await?)
    }

    /// Add a validated proxy; true if it was not already a member
    pub async fn admit(&self, member: &str) -> Result<bool> {
        Ok(self.store.sadd(&self.keys.set, member).await?)
    }

    /// Remove a proxy that failed validation; true if it was a member
    pub async fn evict(&self, member: &str) -> Result<bool> {
        Ok(self.store.srem(&self.keys.set, member).await?)
    }

    /// A random member, if the pool is not empty
    pub async fn sample(&self) -> Result<Option<String>> {
        Ok(self.store.srandmember(&self.keys.set).await?)
    }

    /// The count last published by a worker
    pub async fn cached_count(&self) -> Result<Option<u64>> {
        match self.store.get(&self.keys.count).await? {
            None => Ok(None),
            Some(raw) => raw.trim().parse().map(Some).map_err(|_| {
                StoreError::Decode {
                    key: self.keys.count.clone(),
                    value: raw,
                }
                .into()
            }),
        }
    }

    pub async fn publish_count(&self, count: u64) -> Result<()> {
        self.store
            .set(&self.keys.count, &count.to_string(), None)
            .await?;
        Ok(())
    }

    /// Count the set and publish the result
    pub async fn recount(&self) -> Result<u64> {
        let size = self.size().await?;
        self.publish_count(size).await?;
        Ok(size)
    }

    pub async fn flag_ttl(&self, flag: Flag) -> Result<KeyTtl> {
        Ok(self.store.ttl(self.keys.flag(flag)).await?)
    }

    /// Set a flag that expires after `ttl`
    pub async fn arm(&self, flag: Flag, ttl: Duration) -> Result<()> {
        self.store
            .set(self.keys.flag(flag), "1", Some(ttl))
            .await?;
        Ok(())
    }

    pub async fn clear(&self, flag: Flag) -> Result<()> {
        self.store.del(self.keys.flag(flag)).await?;
        Ok(())
    }

    pub async fn status(&self) -> Result<PoolStatus> {
        Ok(PoolStatus {
            size: self.size().await?,
            cached_count: self.cached_count().await?,
            protect: self.flag_ttl(Flag::Protect).await?,
            refresh: self.flag_ttl(Flag::Refresh).await?,
        })
    }
}

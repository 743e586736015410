//! Redis-backed store

use async_trait::async_trait;
use deadpool_redis::{Config as PoolConfig, Pool, Runtime};
use redis::AsyncCommands;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::{KeyTtl, ProxyStore, StoreError, StoreResult};

/// Connection settings for the Redis store
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Redis URL (e.g., redis://127.0.0.1:6379/0)
    pub url: String,
    /// Connection pool size
    pub pool_size: usize,
    /// Prefix for every key the pool writes
    pub key_prefix: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            url: "redis://127.0.0.1:6379".to_string(),
            pool_size: 16,
            key_prefix: "proxy_pool".to_string(),
        }
    }
}

/// Store backed by a pooled Redis connection
pub struct RedisStore {
    pool: Pool,
}

impl RedisStore {
    /// Connect and verify the server answers PING
    pub async fn connect(config: &StoreConfig) -> StoreResult<Self> {
        let pool = PoolConfig::from_url(&config.url)
            .builder()
            .map_err(|e| StoreError::Unavailable(format!("invalid redis url: {e}")))?
            .max_size(config.pool_size)
            .runtime(Runtime::Tokio1)
            .build()
            .map_err(|e| StoreError::Unavailable(format!("failed to build pool: {e}")))?;

        let store = Self { pool };
        store.ping().await?;
        tracing::info!(url = %config.url, "Connected to Redis");
        Ok(store)
    }

    async fn conn(&self) -> StoreResult<deadpool_redis::Connection> {
        Ok(self.pool.get().await?)
    }
}

#[async_trait]
impl ProxyStore for RedisStore {
    async fn sadd(&self, key: &str, member: &str) -> StoreResult<bool> {
        let mut conn = self.conn().await?;
        let added: i64 = conn.sadd(key, member).await?;
        Ok(added > 0)
    }

    async fn srem(&self, key: &str, member: &str) -> StoreResult<bool> {
        let mut conn = self.conn().await?;
        let removed: i64 = conn.srem(key, member).await?;
        Ok(removed > 0)
    }

    async fn sismember(&self, key: &str, member: &str) -> StoreResult<bool> {
        let mut conn = self.conn().await?;
        let present: bool = conn.sismember(key, member).await?;
        Ok(present)
    }

    async fn scard(&self, key: &str) -> StoreResult<u64> {
        let mut conn = self.conn().await?;
        let count: u64 = conn.scard(key).await?;
        Ok(count)
    }

    async fn srandmember(&self, key: &str) -> StoreResult<Option<String>> {
        let mut conn = self.conn().await?;
        let member: Option<String> = conn.srandmember(key).await?;
        Ok(member)
    }

    async fn smembers(&self, key: &str) -> StoreResult<Vec<String>> {
        let mut conn = self.conn().await?;
        let members: Vec<String> = conn.smembers(key).await?;
        Ok(members)
    }

    async fn get(&self, key: &str) -> StoreResult<Option<String>> {
        let mut conn = self.conn().await?;
        let value: Option<String> = conn.get(key).await?;
        Ok(value)
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> StoreResult<()> {
        let mut conn = self.conn().await?;
        let mut cmd = redis::cmd("SET");
        cmd.arg(key).arg(value);
        if let Some(ttl) = ttl {
            cmd.arg("EX").arg(ttl.as_secs().max(1));
        }
        let _: () = cmd.query_async(&mut *conn).await?;
        Ok(())
    }

    async fn exists(&self, key: &str) -> StoreResult<bool> {
        let mut conn = self.conn().await?;
        let present: bool = conn.exists(key).await?;
        Ok(present)
    }

    async fn del(&self, key: &str) -> StoreResult<bool> {
        let mut conn = self.conn().await?;
        let removed: i64 = conn.del(key).await?;
        Ok(removed > 0)
    }

    async fn expire(&self, key: &str, ttl: Duration) -> StoreResult<bool> {
        let mut conn = self.conn().await?;
        let applied: i64 = redis::cmd("EXPIRE")
            .arg(key)
            .arg(ttl.as_secs().max(1))
            .query_async(&mut *conn)
            .await?;
        Ok(applied == 1)
    }

    async fn ttl(&self, key: &str) -> StoreResult<KeyTtl> {
        let mut conn = self.conn().await?;
        let reply: i64 = redis::cmd("TTL").arg(key).query_async(&mut *conn).await?;
        Ok(KeyTtl::from_redis(reply))
    }

    async fn ping(&self) -> StoreResult<()> {
        let mut conn = self.conn().await?;
        let pong: String = redis::cmd("PING").query_async(&mut *conn).await?;
        if pong != "PONG" {
            return Err(StoreError::Decode {
                key: "PING".to_string(),
                value: pong,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_config_default() {
        let config = StoreConfig::default();
        assert_eq!(config.url, "redis://127.0.0.1:6379");
        assert_eq!(config.pool_size, 16);
        assert_eq!(config.key_prefix, "proxy_pool");
    }

    #[tokio::test]
    async fn test_connect_fails_without_server() {
        let config = StoreConfig {
            // Port 1 is never a Redis server
            url: "redis://127.0.0.1:1".to_string(),
            ..StoreConfig::default()
        };
        assert!(RedisStore::connect(&config).await.is_err());
    }
}

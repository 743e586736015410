//! Pool state storage
//!
//! The pool lives outside the process in a Redis-like store. Every operation
//! touches a single key or a single set member; nothing here relies on
//! multi-key transactions.

mod memory;
mod redis;

pub use self::memory::MemoryStore;
pub use self::redis::{RedisStore, StoreConfig};

use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

/// Errors raised by a store backend
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("redis command failed: {0}")]
    Command(#[from] ::redis::RedisError),

    #[error("connection pool error: {0}")]
    Pool(#[from] deadpool_redis::PoolError),

    #[error("unexpected value for key {key}: {value}")]
    Decode { key: String, value: String },
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Remaining lifetime of a key
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyTtl {
    /// Key does not exist
    Missing,
    /// Key exists without an expiry
    Persistent,
    /// Key exists and expires after the given duration
    Expires(Duration),
}

impl KeyTtl {
    /// Map a Redis TTL reply (-2 missing, -1 no expiry) to a `KeyTtl`
    pub fn from_redis(reply: i64) -> Self {
        match reply {
            -2 => KeyTtl::Missing,
            r if r < 0 => KeyTtl::Persistent,
            secs => KeyTtl::Expires(Duration::from_secs(secs as u64)),
        }
    }

    pub fn exists(&self) -> bool {
        !matches!(self, KeyTtl::Missing)
    }

    pub fn remaining(&self) -> Option<Duration> {
        match self {
            KeyTtl::Expires(d) => Some(*d),
            _ => None,
        }
    }
}

/// Key/value and set storage consumed by the pool
#[async_trait]
pub trait ProxyStore: Send + Sync {
    /// Add a member to a set, returning true if it was not present
    async fn sadd(&self, key: &str, member: &str) -> StoreResult<bool>;

    /// Remove a member from a set, returning true if it was present
    async fn srem(&self, key: &str, member: &str) -> StoreResult<bool>;

    async fn sismember(&self, key: &str, member: &str) -> StoreResult<bool>;

    async fn scard(&self, key: &str) -> StoreResult<u64>;

    /// A random member, or None for an empty set
    async fn srandmember(&self, key: &str) -> StoreResult<Option<String>>;

    async fn smembers(&self, key: &str) -> StoreResult<Vec<String>>;

    async fn get(&self, key: &str) -> StoreResult<Option<String>>;

    /// Set a scalar, optionally with a time-to-live
    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> StoreResult<()>;

    async fn exists(&self, key: &str) -> StoreResult<bool>;

    async fn del(&self, key: &str) -> StoreResult<bool>;

    /// Attach a TTL to an existing key; false if the key does not exist
    async fn expire(&self, key: &str, ttl: Duration) -> StoreResult<bool>;

    async fn ttl(&self, key: &str) -> StoreResult<KeyTtl>;

    /// Round-trip check used at startup
    async fn ping(&self) -> StoreResult<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_ttl_from_redis() {
        assert_eq!(KeyTtl::from_redis(-2), KeyTtl::Missing);
        assert_eq!(KeyTtl::from_redis(-1), KeyTtl::Persistent);
        assert_eq!(
            KeyTtl::from_redis(42),
            KeyTtl::Expires(Duration::from_secs(42))
        );
    }

    #[test]
    fn test_key_ttl_exists() {
        assert!(!KeyTtl::Missing.exists());
        assert!(KeyTtl::Persistent.exists());
        assert!(KeyTtl::Expires(Duration::from_secs(1)).exists());
        assert_eq!(KeyTtl::Persistent.remaining(), None);
    }
}

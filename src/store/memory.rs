//! In-process store with Redis-compatible semantics
//!
//! Useful for tests and for dry runs without a Redis server. Expiry is
//! evaluated lazily on access.

use async_trait::async_trait;
use rand::seq::IteratorRandom;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

use super::{KeyTtl, ProxyStore, StoreError, StoreResult};

#[derive(Debug)]
enum Value {
    Scalar(String),
    Set(HashSet<String>),
}

#[derive(Debug)]
struct Entry {
    value: Value,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

/// Store held entirely in memory
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, Entry>>,
    offline: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate the store becoming unreachable (or reachable again)
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    fn check_online(&self) -> StoreResult<()> {
        if self.offline.load(Ordering::SeqCst) {
            Err(StoreError::Unavailable("memory store is offline".to_string()))
        } else {
            Ok(())
        }
    }

    async fn with_entries<T>(&self, f: impl FnOnce(&mut HashMap<String, Entry>) -> T) -> StoreResult<T> {
        self.check_online()?;
        let mut entries = self.entries.lock().await;
        let now = Instant::now();
        entries.retain(|_, entry| !entry.is_expired(now));
        Ok(f(&mut entries))
    }
}

fn wrong_type(key: &str) -> StoreError {
    StoreError::Decode {
        key: key.to_string(),
        value: "WRONGTYPE".to_string(),
    }
}

#[async_trait]
impl ProxyStore for MemoryStore {
    async fn sadd(&self, key: &str, member: &str) -> StoreResult<bool> {
        self.with_entries(|entries| {
            let entry = entries.entry(key.to_string()).or_insert_with(|| Entry {
                value: Value::Set(HashSet::new()),
                expires_at: None,
            });
            match &mut entry.value {
                Value::Set(set) => Ok(set.insert(member.to_string())),
                Value::Scalar(_) => Err(wrong_type(key)),
            }
        })
        .await?
    }

    async fn srem(&self, key: &str, member: &str) -> StoreResult<bool> {
        self.with_entries(|entries| {
            let (removed, now_empty) = match entries.get_mut(key) {
                None => return Ok(false),
                Some(Entry {
                    value: Value::Set(set),
                    ..
                }) => (set.remove(member), set.is_empty()),
                Some(_) => return Err(wrong_type(key)),
            };
            // Redis drops a set once its last member is removed
            if now_empty {
                entries.remove(key);
            }
            Ok(removed)
        })
        .await?
    }

    async fn sismember(&self, key: &str, member: &str) -> StoreResult<bool> {
        self.with_entries(|entries| match entries.get(key) {
            None => Ok(false),
            Some(Entry {
                value: Value::Set(set),
                ..
            }) => Ok(set.contains(member)),
            Some(_) => Err(wrong_type(key)),
        })
        .await?
    }

    async fn scard(&self, key: &str) -> StoreResult<u64> {
        self.with_entries(|entries| match entries.get(key) {
            None => Ok(0),
            Some(Entry {
                value: Value::Set(set),
                ..
            }) => Ok(set.len() as u64),
            Some(_) => Err(wrong_type(key)),
        })
        .await?
    }

    async fn srandmember(&self, key: &str) -> StoreResult<Option<String>> {
        self.with_entries(|entries| match entries.get(key) {
            None => Ok(None),
            Some(Entry {
                value: Value::Set(set),
                ..
            }) => Ok(set.iter().choose(&mut rand::thread_rng()).cloned()),
            Some(_) => Err(wrong_type(key)),
        })
        .await?
    }

    async fn smembers(&self, key: &str) -> StoreResult<Vec<String>> {
        self.with_entries(|entries| match entries.get(key) {
            None => Ok(Vec::new()),
            Some(Entry {
                value: Value::Set(set),
                ..
            }) => Ok(set.iter().cloned().collect()),
            Some(_) => Err(wrong_type(key)),
        })
        .await?
    }

    async fn get(&self, key: &str) -> StoreResult<Option<String>> {
        self.with_entries(|entries| match entries.get(key) {
            None => Ok(None),
            Some(Entry {
                value: Value::Scalar(s),
                ..
            }) => Ok(Some(s.clone())),
            Some(_) => Err(wrong_type(key)),
        })
        .await?
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> StoreResult<()> {
        self.with_entries(|entries| {
            entries.insert(
                key.to_string(),
                Entry {
                    value: Value::Scalar(value.to_string()),
                    expires_at: ttl.map(|ttl| Instant::now() + ttl),
                },
            );
        })
        .await
    }

    async fn exists(&self, key: &str) -> StoreResult<bool> {
        self.with_entries(|entries| entries.contains_key(key)).await
    }

    async fn del(&self, key: &str) -> StoreResult<bool> {
        self.with_entries(|entries| entries.remove(key).is_some())
            .await
    }

    async fn expire(&self, key: &str, ttl: Duration) -> StoreResult<bool> {
        self.with_entries(|entries| match entries.get_mut(key) {
            Some(entry) => {
                entry.expires_at = Some(Instant::now() + ttl);
                true
            }
            None => false,
        })
        .await
    }

    async fn ttl(&self, key: &str) -> StoreResult<KeyTtl> {
        self.with_entries(|entries| match entries.get(key) {
            None => KeyTtl::Missing,
            Some(Entry {
                expires_at: None, ..
            }) => KeyTtl::Persistent,
            Some(Entry {
                expires_at: Some(at),
                ..
            }) => KeyTtl::Expires(at.saturating_duration_since(Instant::now())),
        })
        .await
    }

    async fn ping(&self) -> StoreResult<()> {
        self.check_online()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_set_operations() {
        let store = MemoryStore::new();
        assert!(store.sadd("pool", "http://1.1.1.1:80").await.unwrap());
        assert!(!store.sadd("pool", "http://1.1.1.1:80").await.unwrap());
        assert!(store.sadd("pool", "http://2.2.2.2:80").await.unwrap());
        assert_eq!(store.scard("pool").await.unwrap(), 2);
        assert!(store.sismember("pool", "http://2.2.2.2:80").await.unwrap());

        assert!(store.srem("pool", "http://2.2.2.2:80").await.unwrap());
        assert!(!store.srem("pool", "http://2.2.2.2:80").await.unwrap());
        assert_eq!(
            store.smembers("pool").await.unwrap(),
            vec!["http://1.1.1.1:80".to_string()]
        );
        assert_eq!(
            store.srandmember("pool").await.unwrap().as_deref(),
            Some("http://1.1.1.1:80")
        );
    }

    #[tokio::test]
    async fn test_empty_set_reads() {
        let store = MemoryStore::new();
        assert_eq!(store.scard("missing").await.unwrap(), 0);
        assert!(store.srandmember("missing").await.unwrap().is_none());
        assert!(store.smembers("missing").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_scalar_with_ttl_expires() {
        let store = MemoryStore::new();
        store
            .set("flag", "1", Some(Duration::from_millis(30)))
            .await
            .unwrap();
        assert!(store.exists("flag").await.unwrap());
        assert!(matches!(store.ttl("flag").await.unwrap(), KeyTtl::Expires(_)));

        tokio::time::sleep(Duration::from_millis(60)).await;
        assert!(!store.exists("flag").await.unwrap());
        assert_eq!(store.ttl("flag").await.unwrap(), KeyTtl::Missing);
    }

    #[tokio::test]
    async fn test_expire_and_del() {
        let store = MemoryStore::new();
        assert!(!store.expire("flag", Duration::from_secs(5)).await.unwrap());
        store.set("flag", "1", None).await.unwrap();
        assert_eq!(store.ttl("flag").await.unwrap(), KeyTtl::Persistent);
        assert!(store.expire("flag", Duration::from_secs(5)).await.unwrap());
        assert!(store.ttl("flag").await.unwrap().remaining().is_some());
        assert!(store.del("flag").await.unwrap());
        assert!(!store.del("flag").await.unwrap());
    }

    #[tokio::test]
    async fn test_wrong_type() {
        let store = MemoryStore::new();
        store.set("count", "3", None).await.unwrap();
        assert!(store.sadd("count", "x").await.is_err());
    }

    #[tokio::test]
    async fn test_offline_store_errors() {
        let store = MemoryStore::new();
        store.set_offline(true);
        assert!(matches!(
            store.scard("pool").await,
            Err(StoreError::Unavailable(_))
        ));
        assert!(store.ping().await.is_err());
        store.set_offline(false);
        assert!(store.ping().await.is_ok());
    }
}

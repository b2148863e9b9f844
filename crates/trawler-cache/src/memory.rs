//! In-process backend used by the test suites across the workspace.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::backend::Backend;
use crate::error::Result;
use trawler_core::util::now_ts;

#[derive(Default)]
pub struct MemoryBackend {
    inner: Mutex<HashMap<String, Entry>>,
}

enum Entry {
    List(VecDeque<String>),
    Hash(BTreeMap<String, String>),
    Zset(BTreeMap<String, f64>),
    Value { data: String, expires_at: i64 },
}

impl MemoryBackend {
    fn with_list<T>(&self, key: &str, f: impl FnOnce(&mut VecDeque<String>) -> T) -> T {
        let mut map = self.inner.lock().expect("memory backend poisoned");
        let entry = map
            .entry(key.to_string())
            .or_insert_with(|| Entry::List(VecDeque::new()));
        match entry {
            Entry::List(list) => f(list),
            _ => {
                *entry = Entry::List(VecDeque::new());
                match entry {
                    Entry::List(list) => f(list),
                    _ => unreachable!(),
                }
            }
        }
    }

    fn with_hash<T>(&self, key: &str, f: impl FnOnce(&mut BTreeMap<String, String>) -> T) -> T {
        let mut map = self.inner.lock().expect("memory backend poisoned");
        let entry = map
            .entry(key.to_string())
            .or_insert_with(|| Entry::Hash(BTreeMap::new()));
        match entry {
            Entry::Hash(hash) => f(hash),
            _ => {
                *entry = Entry::Hash(BTreeMap::new());
                match entry {
                    Entry::Hash(hash) => f(hash),
                    _ => unreachable!(),
                }
            }
        }
    }

    fn with_zset<T>(&self, key: &str, f: impl FnOnce(&mut BTreeMap<String, f64>) -> T) -> T {
        let mut map = self.inner.lock().expect("memory backend poisoned");
        let entry = map
            .entry(key.to_string())
            .or_insert_with(|| Entry::Zset(BTreeMap::new()));
        match entry {
            Entry::Zset(zset) => f(zset),
            _ => {
                *entry = Entry::Zset(BTreeMap::new());
                match entry {
                    Entry::Zset(zset) => f(zset),
                    _ => unreachable!(),
                }
            }
        }
    }
}

#[async_trait]
impl Backend for MemoryBackend {
    async fn rpush(&self, key: &str, value: &str) -> Result<()> {
        self.with_list(key, |l| l.push_back(value.to_string()));
        Ok(())
    }

    async fn lpush(&self, key: &str, value: &str) -> Result<()> {
        self.with_list(key, |l| l.push_front(value.to_string()));
        Ok(())
    }

    async fn lpop(&self, key: &str) -> Result<Option<String>> {
        Ok(self.with_list(key, |l| l.pop_front()))
    }

    async fn llen(&self, key: &str) -> Result<u64> {
        Ok(self.with_list(key, |l| l.len() as u64))
    }

    async fn del(&self, key: &str) -> Result<()> {
        self.inner.lock().expect("memory backend poisoned").remove(key);
        Ok(())
    }

    async fn hget(&self, key: &str, field: &str) -> Result<Option<String>> {
        Ok(self.with_hash(key, |h| h.get(field).cloned()))
    }

    async fn hset(&self, key: &str, field: &str, value: &str) -> Result<()> {
        self.with_hash(key, |h| h.insert(field.to_string(), value.to_string()));
        Ok(())
    }

    async fn hdel(&self, key: &str, field: &str) -> Result<()> {
        self.with_hash(key, |h| h.remove(field));
        Ok(())
    }

    async fn hincrby(&self, key: &str, field: &str, delta: i64) -> Result<i64> {
        Ok(self.with_hash(key, |h| {
            let current: i64 = h.get(field).and_then(|v| v.parse().ok()).unwrap_or(0);
            let next = current + delta;
            h.insert(field.to_string(), next.to_string());
            next
        }))
    }

    async fn hgetall(&self, key: &str) -> Result<Vec<(String, String)>> {
        Ok(self.with_hash(key, |h| {
            h.iter().map(|(k, v)| (k.clone(), v.clone())).collect()
        }))
    }

    async fn zadd(&self, key: &str, member: &str, score: f64) -> Result<()> {
        self.with_zset(key, |z| z.insert(member.to_string(), score));
        Ok(())
    }

    async fn zscore(&self, key: &str, member: &str) -> Result<Option<f64>> {
        Ok(self.with_zset(key, |z| z.get(member).copied()))
    }

    async fn zrem(&self, key: &str, member: &str) -> Result<()> {
        self.with_zset(key, |z| z.remove(member));
        Ok(())
    }

    async fn set_ex(&self, key: &str, value: &str, ttl_secs: u64) -> Result<()> {
        self.inner.lock().expect("memory backend poisoned").insert(
            key.to_string(),
            Entry::Value {
                data: value.to_string(),
                expires_at: now_ts() + ttl_secs as i64,
            },
        );
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        let map = self.inner.lock().expect("memory backend poisoned");
        Ok(match map.get(key) {
            Some(Entry::Value { data, expires_at }) if *expires_at > now_ts() => {
                Some(data.clone())
            }
            _ => None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn lists_are_fifo_with_head_insert() {
        let b = MemoryBackend::default();
        b.rpush("q", "a").await.unwrap();
        b.rpush("q", "b").await.unwrap();
        b.lpush("q", "first").await.unwrap();
        assert_eq!(b.lpop("q").await.unwrap().as_deref(), Some("first"));
        assert_eq!(b.lpop("q").await.unwrap().as_deref(), Some("a"));
        assert_eq!(b.llen("q").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn hincrby_starts_from_zero() {
        let b = MemoryBackend::default();
        assert_eq!(b.hincrby("h", "n", 3).await.unwrap(), 3);
        assert_eq!(b.hincrby("h", "n", -1).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn expired_values_read_as_absent() {
        let b = MemoryBackend::default();
        b.set_ex("k", "v", 0).await.unwrap();
        assert_eq!(b.get("k").await.unwrap(), None);
    }
}

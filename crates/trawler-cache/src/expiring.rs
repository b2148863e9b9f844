//! Recency primitives: TTL'd sets and a single expiring cell.

use crate::backend::{Backend, Cache};
use crate::error::Result;
use trawler_core::util::now_ts;

/// A set whose members fade after `ttl` seconds.
///
/// `contains` refreshes the member's timestamp — the TTL is rolling. That is
/// load-bearing for link dedup: a link spammed every hour is probed once, not
/// once per TTL window.
#[derive(Clone)]
pub struct ExpiringSet {
    cache: Cache,
    name: String,
    ttl: i64,
}

impl ExpiringSet {
    pub fn new(cache: &Cache, name: impl Into<String>, ttl_secs: u64) -> Self {
        Self {
            cache: cache.clone(),
            name: name.into(),
            ttl: ttl_secs as i64,
        }
    }

    pub async fn add(&self, member: &str) -> Result<()> {
        self.cache
            .backend()
            .zadd(&self.name, member, now_ts() as f64)
            .await
    }

    /// True iff `member` was added within the last `ttl` seconds; touches it.
    pub async fn contains(&self, member: &str) -> Result<bool> {
        let now = now_ts();
        match self.cache.backend().zscore(&self.name, member).await? {
            Some(score) if score as i64 + self.ttl > now => {
                self.cache
                    .backend()
                    .zadd(&self.name, member, now as f64)
                    .await?;
                Ok(true)
            }
            _ => {
                self.cache.backend().zrem(&self.name, member).await?;
                Ok(false)
            }
        }
    }

    pub async fn discard(&self, member: &str) -> Result<()> {
        self.cache.backend().zrem(&self.name, member).await
    }
}

/// A single string cell with a TTL.
#[derive(Clone)]
pub struct ExpiringValue {
    cache: Cache,
    name: String,
    ttl: u64,
}

impl ExpiringValue {
    pub fn new(cache: &Cache, name: impl Into<String>, ttl_secs: u64) -> Self {
        Self {
            cache: cache.clone(),
            name: name.into(),
            ttl: ttl_secs,
        }
    }

    pub async fn get(&self) -> Result<Option<String>> {
        self.cache.backend().get(&self.name).await
    }

    pub async fn set(&self, value: &str) -> Result<()> {
        self.cache.backend().set_ex(&self.name, value, self.ttl).await
    }
}

//! The key-value backend the substrate is written against.
//!
//! Production uses Redis through a [`redis::aio::ConnectionManager`]; the test
//! suites use [`crate::memory::MemoryBackend`]. Only the handful of commands
//! the substrate needs are part of the contract.

use std::sync::Arc;

use async_trait::async_trait;
use redis::AsyncCommands;

use crate::error::Result;

#[async_trait]
pub trait Backend: Send + Sync {
    async fn rpush(&self, key: &str, value: &str) -> Result<()>;
    async fn lpush(&self, key: &str, value: &str) -> Result<()>;
    async fn lpop(&self, key: &str) -> Result<Option<String>>;
    async fn llen(&self, key: &str) -> Result<u64>;
    async fn del(&self, key: &str) -> Result<()>;

    async fn hget(&self, key: &str, field: &str) -> Result<Option<String>>;
    async fn hset(&self, key: &str, field: &str, value: &str) -> Result<()>;
    async fn hdel(&self, key: &str, field: &str) -> Result<()>;
    async fn hincrby(&self, key: &str, field: &str, delta: i64) -> Result<i64>;
    async fn hgetall(&self, key: &str) -> Result<Vec<(String, String)>>;

    async fn zadd(&self, key: &str, member: &str, score: f64) -> Result<()>;
    async fn zscore(&self, key: &str, member: &str) -> Result<Option<f64>>;
    async fn zrem(&self, key: &str, member: &str) -> Result<()>;

    async fn set_ex(&self, key: &str, value: &str, ttl_secs: u64) -> Result<()>;
    async fn get(&self, key: &str) -> Result<Option<String>>;
}

/// Cheap-to-clone handle to the shared backend.
#[derive(Clone)]
pub struct Cache {
    backend: Arc<dyn Backend>,
}

impl Cache {
    /// Connect to Redis. Called once by the orchestrator; workers receive the
    /// handle by injection.
    pub async fn redis(url: &str) -> Result<Self> {
        let client = redis::Client::open(url)?;
        let manager = client.get_connection_manager().await?;
        Ok(Self {
            backend: Arc::new(RedisBackend { manager }),
        })
    }

    /// In-process backend for tests.
    pub fn memory() -> Self {
        Self {
            backend: Arc::new(crate::memory::MemoryBackend::default()),
        }
    }

    pub fn backend(&self) -> &Arc<dyn Backend> {
        &self.backend
    }
}

struct RedisBackend {
    manager: redis::aio::ConnectionManager,
}

#[async_trait]
impl Backend for RedisBackend {
    async fn rpush(&self, key: &str, value: &str) -> Result<()> {
        let mut con = self.manager.clone();
        con.rpush::<_, _, ()>(key, value).await?;
        Ok(())
    }

    async fn lpush(&self, key: &str, value: &str) -> Result<()> {
        let mut con = self.manager.clone();
        con.lpush::<_, _, ()>(key, value).await?;
        Ok(())
    }

    async fn lpop(&self, key: &str) -> Result<Option<String>> {
        let mut con = self.manager.clone();
        Ok(con.lpop(key, None).await?)
    }

    async fn llen(&self, key: &str) -> Result<u64> {
        let mut con = self.manager.clone();
        Ok(con.llen(key).await?)
    }

    async fn del(&self, key: &str) -> Result<()> {
        let mut con = self.manager.clone();
        con.del::<_, ()>(key).await?;
        Ok(())
    }

    async fn hget(&self, key: &str, field: &str) -> Result<Option<String>> {
        let mut con = self.manager.clone();
        Ok(con.hget(key, field).await?)
    }

    async fn hset(&self, key: &str, field: &str, value: &str) -> Result<()> {
        let mut con = self.manager.clone();
        con.hset::<_, _, _, ()>(key, field, value).await?;
        Ok(())
    }

    async fn hdel(&self, key: &str, field: &str) -> Result<()> {
        let mut con = self.manager.clone();
        con.hdel::<_, _, ()>(key, field).await?;
        Ok(())
    }

    async fn hincrby(&self, key: &str, field: &str, delta: i64) -> Result<i64> {
        let mut con = self.manager.clone();
        Ok(con.hincr(key, field, delta).await?)
    }

    async fn hgetall(&self, key: &str) -> Result<Vec<(String, String)>> {
        let mut con = self.manager.clone();
        Ok(con.hgetall(key).await?)
    }

    async fn zadd(&self, key: &str, member: &str, score: f64) -> Result<()> {
        let mut con = self.manager.clone();
        con.zadd::<_, _, _, ()>(key, member, score).await?;
        Ok(())
    }

    async fn zscore(&self, key: &str, member: &str) -> Result<Option<f64>> {
        let mut con = self.manager.clone();
        Ok(con.zscore(key, member).await?)
    }

    async fn zrem(&self, key: &str, member: &str) -> Result<()> {
        let mut con = self.manager.clone();
        con.zrem::<_, _, ()>(key, member).await?;
        Ok(())
    }

    async fn set_ex(&self, key: &str, value: &str, ttl_secs: u64) -> Result<()> {
        let mut con = self.manager.clone();
        con.set_ex::<_, _, ()>(key, value, ttl_secs).await?;
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        let mut con = self.manager.clone();
        Ok(con.get(key).await?)
    }
}

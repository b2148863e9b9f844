//! Named durable FIFO queues.

use std::marker::PhantomData;

use serde::{de::DeserializeOwned, Serialize};

use crate::backend::{Backend, Cache};
use crate::error::Result;

/// A durable FIFO addressed by name. Values are opaque strings; producers and
/// consumers agree on a JSON encoding per queue (see [`TypedQueue`]).
#[derive(Clone)]
pub struct Queue {
    cache: Cache,
    name: String,
}

impl Queue {
    pub fn new(cache: &Cache, name: impl Into<String>) -> Self {
        Self {
            cache: cache.clone(),
            name: name.into(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Append to the tail.
    pub async fn put(&self, value: &str) -> Result<()> {
        self.cache.backend().rpush(&self.name, value).await
    }

    /// Prepend to the head — retries that should cut the line.
    pub async fn insert(&self, value: &str) -> Result<()> {
        self.cache.backend().lpush(&self.name, value).await
    }

    /// Remove and return the head, or `None` when empty. Never blocks.
    pub async fn get(&self) -> Result<Option<String>> {
        self.cache.backend().lpop(&self.name).await
    }

    pub async fn qsize(&self) -> Result<u64> {
        self.cache.backend().llen(&self.name).await
    }

    pub async fn delete(&self) -> Result<()> {
        self.cache.backend().del(&self.name).await
    }
}

/// A queue whose payloads are one serde type.
#[derive(Clone)]
pub struct TypedQueue<T> {
    inner: Queue,
    _marker: PhantomData<fn() -> T>,
}

impl<T: Serialize + DeserializeOwned> TypedQueue<T> {
    pub fn new(cache: &Cache, name: impl Into<String>) -> Self {
        Self {
            inner: Queue::new(cache, name),
            _marker: PhantomData,
        }
    }

    pub fn raw(&self) -> &Queue {
        &self.inner
    }

    pub async fn put(&self, value: &T) -> Result<()> {
        self.inner.put(&serde_json::to_string(value)?).await
    }

    pub async fn insert(&self, value: &T) -> Result<()> {
        self.inner.insert(&serde_json::to_string(value)?).await
    }

    pub async fn get(&self) -> Result<Option<T>> {
        Ok(match self.inner.get().await? {
            Some(raw) => Some(serde_json::from_str(&raw)?),
            None => None,
        })
    }

    pub async fn qsize(&self) -> Result<u64> {
        self.inner.qsize().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct Task {
        id: i64,
    }

    #[tokio::test]
    async fn fifo_and_head_insert() {
        let cache = Cache::memory();
        let q = Queue::new(&cache, "test_queue");
        q.put("one").await.unwrap();
        q.put("two").await.unwrap();
        q.insert("zero").await.unwrap();

        assert_eq!(q.qsize().await.unwrap(), 3);
        assert_eq!(q.get().await.unwrap().as_deref(), Some("zero"));
        assert_eq!(q.get().await.unwrap().as_deref(), Some("one"));
        assert_eq!(q.get().await.unwrap().as_deref(), Some("two"));
        assert_eq!(q.get().await.unwrap(), None);
    }

    #[tokio::test]
    async fn queues_survive_handle_drops() {
        let cache = Cache::memory();
        Queue::new(&cache, "q").put("payload").await.unwrap();
        // A fresh handle over the same backend sees the value.
        assert_eq!(
            Queue::new(&cache, "q").get().await.unwrap().as_deref(),
            Some("payload")
        );
    }

    #[tokio::test]
    async fn typed_round_trip() {
        let cache = Cache::memory();
        let q: TypedQueue<Task> = TypedQueue::new(&cache, "typed");
        q.put(&Task { id: 7 }).await.unwrap();
        assert_eq!(q.get().await.unwrap(), Some(Task { id: 7 }));
    }
}

//! String-to-string hashes, plus the daily-rotating variant the OCR cache uses.

use crate::backend::{Backend, Cache};
use crate::error::Result;
use trawler_core::util::{local_hour, today, yesterday};

/// A named string→string hash.
#[derive(Clone)]
pub struct Dict {
    cache: Cache,
    name: String,
}

impl Dict {
    pub fn new(cache: &Cache, name: impl Into<String>) -> Self {
        Self {
            cache: cache.clone(),
            name: name.into(),
        }
    }

    pub async fn get(&self, field: &str) -> Result<Option<String>> {
        self.cache.backend().hget(&self.name, field).await
    }

    pub async fn set(&self, field: &str, value: &str) -> Result<()> {
        self.cache.backend().hset(&self.name, field, value).await
    }

    pub async fn delete(&self, field: &str) -> Result<()> {
        self.cache.backend().hdel(&self.name, field).await
    }

    pub async fn incrby(&self, field: &str, delta: i64) -> Result<i64> {
        self.cache.backend().hincrby(&self.name, field, delta).await
    }

    pub async fn items(&self) -> Result<Vec<(String, String)>> {
        self.cache.backend().hgetall(&self.name).await
    }

    /// Convenience for the many integer-valued fields.
    pub async fn get_i64(&self, field: &str) -> Result<Option<i64>> {
        Ok(self.get(field).await?.and_then(|v| v.parse().ok()))
    }
}

/// A [`Dict`] whose name carries the local date. Any accessor rotates the
/// name to today; at hour zero the previous day's hash is dropped.
#[derive(Clone)]
pub struct DailyDict {
    cache: Cache,
    base: String,
}

impl DailyDict {
    pub fn new(cache: &Cache, base: impl Into<String>) -> Self {
        Self {
            cache: cache.clone(),
            base: base.into(),
        }
    }

    async fn current(&self) -> Result<Dict> {
        if local_hour() == 0 {
            let stale = format!("{}/{}", self.base, yesterday());
            self.cache.backend().del(&stale).await?;
        }
        Ok(Dict::new(
            &self.cache,
            format!("{}/{}", self.base, today()),
        ))
    }

    pub async fn get(&self, field: &str) -> Result<Option<String>> {
        self.current().await?.get(field).await
    }

    pub async fn set(&self, field: &str, value: &str) -> Result<()> {
        self.current().await?.set(field, value).await
    }

    pub async fn delete(&self, field: &str) -> Result<()> {
        self.current().await?.delete(field).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn set_get_delete() {
        let cache = Cache::memory();
        let d = Dict::new(&cache, "status");
        d.set("last", "1700000000").await.unwrap();
        assert_eq!(d.get_i64("last").await.unwrap(), Some(1_700_000_000));
        d.delete("last").await.unwrap();
        assert_eq!(d.get("last").await.unwrap(), None);
    }

    #[tokio::test]
    async fn incrby_accumulates() {
        let cache = Cache::memory();
        let d = Dict::new(&cache, "counters");
        d.incrby("n", 2).await.unwrap();
        assert_eq!(d.incrby("n", 5).await.unwrap(), 7);
    }

    #[tokio::test]
    async fn daily_dict_isolates_by_date() {
        let cache = Cache::memory();
        let daily = DailyDict::new(&cache, "ocr");
        daily.set("file", "PROCESSING").await.unwrap();
        assert_eq!(
            daily.get("file").await.unwrap().as_deref(),
            Some("PROCESSING")
        );
        // The plain dict under yesterday's name is untouched.
        let stale = Dict::new(&cache, format!("ocr/{}", yesterday()));
        assert_eq!(stale.get("file").await.unwrap(), None);
    }
}

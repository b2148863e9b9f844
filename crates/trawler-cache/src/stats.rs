//! Counter coalescing for the metrics fan-out.
//!
//! Counters accumulate in one shared hash under keys shaped
//! `measurement|<tags-json>` where the tags object also carries the field
//! name under `"key"`. The report worker drains the hash every 30 s.

use std::collections::BTreeMap;

use serde_json::json;

use crate::backend::Cache;
use crate::dict::Dict;
use crate::error::Result;

pub const GLOBAL_STATISTICS: &str = "global_statistics";

#[derive(Clone)]
pub struct Statistics {
    dict: Dict,
}

/// One drained counter, ready for the time-series sink.
#[derive(Debug, Clone, PartialEq)]
pub struct CounterPoint {
    pub measurement: String,
    pub tags: BTreeMap<String, String>,
    pub field: String,
    pub value: i64,
}

impl Statistics {
    pub fn new(cache: &Cache) -> Self {
        Self {
            dict: Dict::new(cache, GLOBAL_STATISTICS),
        }
    }

    /// Bump `measurement`/`tags`/`field` by `delta`. Tags are sorted so the
    /// same logical counter always maps to the same hash key.
    pub async fn record(
        &self,
        measurement: &str,
        tags: &[(&str, &str)],
        field: &str,
        delta: i64,
    ) -> Result<()> {
        let mut sorted: BTreeMap<&str, &str> = tags.iter().copied().collect();
        sorted.insert("key", field);
        let key = format!("{measurement}|{}", json!(sorted));
        self.dict.incrby(&key, delta).await?;
        Ok(())
    }

    /// Read out every counter and reset it to zero. Unparseable keys are
    /// skipped (and left zeroed).
    pub async fn drain(&self) -> Result<Vec<CounterPoint>> {
        let mut points = Vec::new();
        for (key, value) in self.dict.items().await? {
            self.dict.set(&key, "0").await?;
            let value: i64 = value.parse().unwrap_or(0);
            if value == 0 {
                continue;
            }
            if let Some(point) = parse_counter_key(&key, value) {
                points.push(point);
            }
        }
        Ok(points)
    }
}

fn parse_counter_key(key: &str, value: i64) -> Option<CounterPoint> {
    let (measurement, tags_json) = key.split_once('|')?;
    let mut tags: BTreeMap<String, String> = serde_json::from_str(tags_json).ok()?;
    let field = tags.remove("key")?;
    Some(CounterPoint {
        measurement: measurement.to_string(),
        tags,
        field,
        value,
    })
}

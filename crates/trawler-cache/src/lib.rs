//! Redis-backed coordination substrate: durable queues, expiring sets,
//! string dicts and the statistics buffer.
//!
//! Everything the workers share lives here; worker instances themselves hold
//! no durable state. All operations are single-command atomic on the backend.

pub mod backend;
pub mod dict;
pub mod error;
pub mod expiring;
pub mod memory;
pub mod queue;
pub mod stats;

pub use backend::Cache;
pub use dict::{DailyDict, Dict};
pub use error::{CacheError, Result};
pub use expiring::{ExpiringSet, ExpiringValue};
pub use queue::{Queue, TypedQueue};
pub use stats::Statistics;

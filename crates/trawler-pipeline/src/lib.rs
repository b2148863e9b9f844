//! The worker fabric and every pipeline stage built on it: message ingress,
//! link discovery, admission and join, OCR coordination, history back-fill
//! and the metrics fan-out.

pub mod context;
pub mod discover;
pub mod fabric;
pub mod ingress;
pub mod online;
pub mod queues;
#[cfg(test)]
mod scenarios;
pub mod workers;

pub use context::AppContext;
pub use fabric::{run_worker, stat_line, Worker};

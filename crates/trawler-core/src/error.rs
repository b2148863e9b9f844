use thiserror::Error;

/// Process-level failures (config, bootstrap).
#[derive(Debug, Error)]
pub enum TrawlerError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Cache error: {0}")]
    Cache(String),

    #[error("Store error: {0}")]
    Store(String),

    #[error("Telegram error: {0}")]
    Telegram(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, TrawlerError>;

/// Failure taxonomy for one unit of worker work.
///
/// Handlers return this instead of raising through the fabric; the fabric maps
/// each variant onto a fixed recovery policy (drop, requeue, requeue + sleep).
#[derive(Debug, Error)]
pub enum IngestError {
    /// Network hiccups, store disconnects — safe to retry as-is.
    #[error("transient failure: {0}")]
    Transient(String),

    /// The remote told us to back off for a number of seconds.
    #[error("rate limited for {seconds}s")]
    RateLimited { seconds: u32 },

    /// The subject does not exist (bad link, expired invite, unknown peer).
    #[error("not found: {0}")]
    NotFound(String),

    /// We were kicked or the subject went private; humans should know.
    #[error("forbidden: {0}")]
    Forbidden(String),

    /// Account-wide quota hit (e.g. too many joined channels).
    #[error("quota exhausted")]
    QuotaExhausted,

    /// The session's auth key is gone; the operation is abandoned.
    #[error("authorization lost: {0}")]
    AuthLost(String),

    /// Anything else — a bug until proven otherwise.
    #[error("unexpected failure: {0}")]
    Programmer(String),
}

/// What the worker fabric does with a failed unit of work.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Recovery {
    /// Put the payload back on the queue and move on.
    Requeue,
    /// Requeue, then sleep this many seconds before the next pop.
    RequeueAfter(u32),
    /// Forget the payload.
    Drop,
    /// Forget the payload and tell the administrators.
    DropAndNotify,
    /// Requeue and tell the administrators — something is broken.
    RequeueAndNotify,
}

impl IngestError {
    /// The §7 policy table: local recovery for transient/rate-limit failures,
    /// admin surfacing when the failure suggests capacity or deployment action.
    pub fn recovery(&self) -> Recovery {
        match self {
            IngestError::Transient(_) => Recovery::Requeue,
            IngestError::RateLimited { seconds } => Recovery::RequeueAfter(*seconds),
            IngestError::NotFound(_) => Recovery::Drop,
            IngestError::Forbidden(_) => Recovery::DropAndNotify,
            IngestError::QuotaExhausted => Recovery::Drop,
            IngestError::AuthLost(_) => Recovery::Drop,
            IngestError::Programmer(_) => Recovery::RequeueAndNotify,
        }
    }

    pub fn transient(e: impl std::fmt::Display) -> Self {
        IngestError::Transient(e.to_string())
    }

    pub fn programmer(e: impl std::fmt::Display) -> Self {
        IngestError::Programmer(e.to_string())
    }
}

impl From<serde_json::Error> for IngestError {
    fn from(e: serde_json::Error) -> Self {
        // A payload we produced but cannot parse back is a bug, not weather.
        IngestError::Programmer(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rate_limit_carries_the_wait() {
        let e = IngestError::RateLimited { seconds: 42 };
        assert_eq!(e.recovery(), Recovery::RequeueAfter(42));
    }

    #[test]
    fn not_found_is_dropped_without_noise() {
        assert_eq!(
            IngestError::NotFound("gone".into()).recovery(),
            Recovery::Drop
        );
    }

    #[test]
    fn programmer_errors_are_requeued_and_surfaced() {
        assert_eq!(
            IngestError::Programmer("bug".into()).recovery(),
            Recovery::RequeueAndNotify
        );
    }
}

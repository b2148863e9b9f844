//! The cooperatively-scheduled worker fabric.
//!
//! A worker class is a value pairing a name with a handler; the fabric
//! derives its queue and status record from the name and runs N long-lived
//! instances over them. Delivery is at-least-once: a payload leaves the queue
//! only after the handler returns cleanly, and goes back on any failure.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use trawler_core::error::{IngestError, Recovery};
use trawler_telegram::Notify as _;
use trawler_core::util::now_ts;

use crate::context::AppContext;

/// Poll pause when the queue is empty.
const IDLE_SLEEP: Duration = Duration::from_millis(10);

#[async_trait::async_trait]
pub trait Worker: Send + Sync + 'static {
    fn name(&self) -> &'static str;

    async fn handle(&self, ctx: &AppContext, payload: String) -> Result<(), IngestError>;
}

/// Spawn `count` instances of one worker class.
pub fn spawn_workers(
    worker: Arc<dyn Worker>,
    ctx: Arc<AppContext>,
    shutdown: watch::Receiver<bool>,
    count: usize,
) -> Vec<JoinHandle<()>> {
    (0..count)
        .map(|_| {
            let worker = Arc::clone(&worker);
            let ctx = Arc::clone(&ctx);
            let shutdown = shutdown.clone();
            tokio::spawn(run_worker(worker, ctx, shutdown))
        })
        .collect()
}

/// One worker instance: pop, handle, record status; never lose a payload.
pub async fn run_worker(
    worker: Arc<dyn Worker>,
    ctx: Arc<AppContext>,
    mut shutdown: watch::Receiver<bool>,
) {
    let name = worker.name();
    let queue = ctx.queue_of(name);
    let status = ctx.status_of(name);
    info!("{name} worker has started");

    loop {
        if *shutdown.borrow() {
            return;
        }

        let payload = match queue.get().await {
            Ok(Some(payload)) => payload,
            Ok(None) => {
                tokio::select! {
                    _ = tokio::time::sleep(IDLE_SLEEP) => {}
                    _ = shutdown.changed() => {}
                }
                continue;
            }
            Err(e) => {
                // Backend hiccup; ease off and retry.
                warn!("{name} worker queue error: {e}");
                tokio::time::sleep(Duration::from_secs(1)).await;
                continue;
            }
        };

        let outcome = tokio::select! {
            result = worker.handle(&ctx, payload.clone()) => result,
            _ = shutdown.changed() => {
                // Cancellation: the in-flight payload cuts back to the head
                // so it is first out after restart.
                if let Err(e) = queue.insert(&payload).await {
                    error!("{name} worker could not restore payload on shutdown: {e}");
                }
                return;
            }
        };

        match outcome {
            Ok(()) => {
                let _ = status.set("last", &now_ts().to_string()).await;
                let size = queue.qsize().await.unwrap_or(0);
                let _ = status.set("size", &size.to_string()).await;
            }
            Err(e) => apply_recovery(name, &queue, &ctx, &payload, e).await,
        }
    }
}

async fn apply_recovery(
    name: &str,
    queue: &trawler_cache::Queue,
    ctx: &AppContext,
    payload: &str,
    e: IngestError,
) {
    match e.recovery() {
        Recovery::Requeue => {
            warn!("{name} worker fails: {e}");
            requeue(name, queue, payload).await;
        }
        Recovery::RequeueAfter(seconds) => {
            warn!("{name} worker rate limited for {seconds}s");
            requeue(name, queue, payload).await;
            tokio::time::sleep(Duration::from_secs(u64::from(seconds))).await;
        }
        Recovery::Drop => {
            debug!("{name} worker dropped payload: {e}");
        }
        Recovery::DropAndNotify => {
            warn!("{name} worker fails: {e}");
            ctx.notifier
                .notify(&format!("{name} worker gave up on a task: {e}"))
                .await;
        }
        Recovery::RequeueAndNotify => {
            error!("{name} worker fails: {e}");
            ctx.notifier
                .notify(&format!("{name} worker failed and will retry: {e}"))
                .await;
            requeue(name, queue, payload).await;
        }
    }
}

async fn requeue(name: &str, queue: &trawler_cache::Queue, payload: &str) {
    if let Err(e) = queue.put(payload).await {
        error!("{name} worker could not re-enqueue payload: {e}");
    }
}

/// `(name, seconds since last success, queue length)` for the /workers view.
pub async fn worker_stat(ctx: &AppContext, name: &str) -> (String, i64, u64) {
    let last = ctx
        .status_of(name)
        .get_i64("last")
        .await
        .ok()
        .flatten()
        .unwrap_or(0);
    let since = if last == 0 { -1 } else { now_ts() - last };
    let size = ctx.queue_of(name).qsize().await.unwrap_or(0);
    (name.to_string(), since, size)
}

pub async fn stat_line(ctx: &AppContext, name: &str) -> String {
    let (name, since, size) = worker_stat(ctx, name).await;
    if since < 0 {
        format!("{name} worker: never succeeded, size {size}\n")
    } else {
        format!("{name} worker: {since} seconds ago, size {size}\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::tests_support::test_context;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct FlakyWorker {
        failures_left: AtomicU32,
    }

    #[async_trait::async_trait]
    impl Worker for FlakyWorker {
        fn name(&self) -> &'static str {
            "flaky"
        }

        async fn handle(&self, _ctx: &AppContext, _payload: String) -> Result<(), IngestError> {
            let left = self.failures_left.load(Ordering::SeqCst);
            if left > 0 {
                self.failures_left.store(left - 1, Ordering::SeqCst);
                return Err(IngestError::Transient("boom".into()));
            }
            Ok(())
        }
    }

    struct CountingWorker {
        handled: AtomicU32,
    }

    #[async_trait::async_trait]
    impl Worker for CountingWorker {
        fn name(&self) -> &'static str {
            "counting"
        }

        async fn handle(&self, _ctx: &AppContext, _payload: String) -> Result<(), IngestError> {
            self.handled.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test]
    async fn failed_payloads_go_back_on_the_queue() {
        let ctx = test_context();
        let queue = ctx.queue_of("direct");
        queue.put("payload").await.unwrap();

        // Drive one iteration by hand: pop, fail, requeue.
        let payload = queue.get().await.unwrap().unwrap();
        apply_recovery(
            "direct",
            &queue,
            &ctx,
            &payload,
            IngestError::Transient("redis blinked".into()),
        )
        .await;
        assert_eq!(queue.qsize().await.unwrap(), 1);
        assert_eq!(queue.get().await.unwrap().as_deref(), Some("payload"));
    }

    #[tokio::test]
    async fn eventually_handled_after_crashes() {
        let ctx = Arc::new(test_context());
        let queue = ctx.queue_of("flaky");
        queue.put("x").await.unwrap();

        let worker = Arc::new(FlakyWorker {
            failures_left: AtomicU32::new(3),
        });
        let (tx, rx) = watch::channel(false);
        let handle = tokio::spawn(run_worker(worker, Arc::clone(&ctx), rx));

        // Give the loop time to fail three times and then succeed.
        for _ in 0..200 {
            tokio::time::sleep(Duration::from_millis(5)).await;
            if queue.qsize().await.unwrap() == 0 {
                break;
            }
        }
        assert_eq!(queue.qsize().await.unwrap(), 0);
        tx.send(true).unwrap();
        let _ = handle.await;
    }

    #[tokio::test]
    async fn status_records_success() {
        let ctx = Arc::new(test_context());
        ctx.queue_of("counting").put("one").await.unwrap();

        let worker = Arc::new(CountingWorker {
            handled: AtomicU32::new(0),
        });
        let (tx, rx) = watch::channel(false);
        let handle = tokio::spawn(run_worker(Arc::clone(&worker) as Arc<dyn Worker>, Arc::clone(&ctx), rx));

        for _ in 0..100 {
            tokio::time::sleep(Duration::from_millis(5)).await;
            if worker.handled.load(Ordering::SeqCst) > 0 {
                break;
            }
        }
        tx.send(true).unwrap();
        let _ = handle.await;

        assert_eq!(worker.handled.load(Ordering::SeqCst), 1);
        let (_, since, size) = worker_stat(&ctx, "counting").await;
        assert!(since >= 0);
        assert_eq!(size, 0);
    }
}

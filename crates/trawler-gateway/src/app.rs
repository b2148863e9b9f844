//! Boot sequence (C12): connect the shared stores, build every account,
//! attach the update pumps, start the worker pools, and wire shutdown.

use std::sync::Arc;

use anyhow::Context as _;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use trawler_cache::{Cache, Statistics};
use trawler_core::config::INGEST_WORKER_COUNT;
use trawler_core::util::now_ts;
use trawler_core::TrawlerConfig;
use trawler_media::{BlobClient, OcrClient};
use trawler_pipeline::context::{AppContext, HttpMedia};
use trawler_pipeline::fabric::{spawn_workers, Worker};
use trawler_pipeline::workers::{
    run_reporter, EntityUpdateWorker, FetchHistoryWorker, FindLinkWorker, InviteWorker,
    JoinGroupWorker, MessageInsertWorker, MessageMarkWorker, OcrWorker,
};
use trawler_pipeline::{ingress, queues};
use trawler_store::MySqlStore;
use trawler_telegram::botapi::TeloxideBot;
use trawler_telegram::mtproto::MtprotoClient;
use trawler_telegram::notify::ChannelNotifier;
use trawler_telegram::{BotApi, BotPool, Senders, UserClient};

pub struct Orchestrator {
    pub ctx: Arc<AppContext>,
    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
    tasks: Vec<JoinHandle<()>>,
}

impl Orchestrator {
    pub async fn boot(config: TrawlerConfig) -> anyhow::Result<Self> {
        let cache = Cache::redis(&config.redis.url)
            .await
            .context("redis connection failed")?;
        let store = MySqlStore::connect(&config.database.dsn, config.database.pool_size)
            .await
            .context("mysql connection failed")?;

        // Seed process counters so /stat always has something to divide.
        let global = trawler_cache::Dict::new(&cache, "global_count");
        global.set("received_message", "0").await.ok();
        global.set("total_used_time_ms", "0").await.ok();
        global.set("start_time", &now_ts().to_string()).await.ok();

        // User accounts; interactive sign-in happens inside connect().
        let mut invoker: Option<Arc<dyn UserClient>> = None;
        let mut users: Vec<Arc<dyn UserClient>> = Vec::new();
        for account in &config.telegram.accounts {
            let client: Arc<dyn UserClient> = Arc::new(
                MtprotoClient::connect(&config.telegram, account)
                    .await
                    .with_context(|| format!("account {} failed to connect", account.session_name))?,
            );
            info!(uid = client.uid(), session = %account.session_name, "account connected");
            if account.session_name == config.telegram.invoker_session {
                invoker = Some(Arc::clone(&client));
            }
            users.push(client);
        }
        let invoker = invoker.context("no account matches the invoker session")?;

        let senders = Arc::new(Senders::new(invoker));
        for client in &users {
            senders.register_user(Arc::clone(client));
        }

        let mut pool_bots: Vec<Arc<dyn BotApi>> = Vec::new();
        for bot in &config.telegram.bots {
            let client: Arc<dyn BotApi> = Arc::new(TeloxideBot::new(&bot.token, bot.uid));
            senders.register_bot(Arc::clone(&client));
            pool_bots.push(client);
        }
        let bots = BotPool::new(&cache, pool_bots);

        let admin_bot: Arc<dyn BotApi> = Arc::new(TeloxideBot::new(
            &config.admin.bot_token,
            bot_uid_from_token(&config.admin.bot_token),
        ));
        let notifier = Arc::new(ChannelNotifier::new(
            Arc::clone(&admin_bot),
            config.admin.channel_id,
        ));

        let media = Arc::new(HttpMedia {
            blob: BlobClient::new(&config.blob),
            ocr: OcrClient::new(&config.ocr),
        });

        let stats = Statistics::new(&cache);
        let ctx = Arc::new(AppContext {
            config,
            cache,
            store: Arc::new(store),
            senders,
            bots,
            notifier,
            media,
            stats,
        });

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let mut orchestrator = Self {
            ctx,
            shutdown_tx,
            shutdown_rx,
            tasks: Vec::new(),
        };
        orchestrator.start_pumps(users);
        orchestrator.start_workers();
        orchestrator.install_debug_hook();
        Ok(orchestrator)
    }

    pub fn shutdown_signal(&self) -> watch::Receiver<bool> {
        self.shutdown_rx.clone()
    }

    fn start_pumps(&mut self, users: Vec<Arc<dyn UserClient>>) {
        for client in users {
            self.tasks.push(tokio::spawn(ingress::pump_user_client(
                Arc::clone(&self.ctx),
                client,
                self.shutdown_rx.clone(),
            )));
        }
    }

    fn start_workers(&mut self) {
        let ingest: [(Arc<dyn Worker>, usize); 3] = [
            (Arc::new(MessageInsertWorker), INGEST_WORKER_COUNT),
            (Arc::new(OcrWorker), INGEST_WORKER_COUNT),
            (Arc::new(FindLinkWorker), INGEST_WORKER_COUNT),
        ];
        let control: [(Arc<dyn Worker>, usize); 5] = [
            (Arc::new(MessageMarkWorker), 1),
            (Arc::new(EntityUpdateWorker), 1),
            (Arc::new(InviteWorker), 1),
            (Arc::new(JoinGroupWorker), 1),
            (Arc::new(FetchHistoryWorker), 1),
        ];
        for (worker, count) in ingest.into_iter().chain(control) {
            self.tasks.extend(spawn_workers(
                worker,
                Arc::clone(&self.ctx),
                self.shutdown_rx.clone(),
                count,
            ));
        }
        self.tasks.push(tokio::spawn(run_reporter(
            Arc::clone(&self.ctx),
            self.shutdown_rx.clone(),
        )));
    }

    /// SIGUSR1 dumps worker and queue state to the log — the cooperative
    /// replacement for dropping into a debugger.
    fn install_debug_hook(&mut self) {
        let ctx = Arc::clone(&self.ctx);
        let mut shutdown = self.shutdown_rx.clone();
        self.tasks.push(tokio::spawn(async move {
            let Ok(mut signal) =
                tokio::signal::unix::signal(tokio::signal::unix::SignalKind::user_defined1())
            else {
                warn!("SIGUSR1 hook unavailable");
                return;
            };
            loop {
                tokio::select! {
                    _ = signal.recv() => {
                        let mut dump = String::from("diagnostic dump:\n");
                        for name in queues::INGEST_CLASSES.iter().chain(&queues::CONTROL_CLASSES) {
                            dump.push_str(&trawler_pipeline::stat_line(&ctx, name).await);
                        }
                        info!("{dump}");
                    }
                    _ = shutdown.changed() => return,
                }
            }
        }));
    }

    /// Flip the shutdown latch and wait for every task to park its work.
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(true);
        for task in self.tasks {
            if let Err(e) = task.await {
                warn!("task ended badly: {e}");
            }
        }
        info!("all workers stopped");
    }
}

/// A bot's numeric uid is the part of its token before the colon.
pub fn bot_uid_from_token(token: &str) -> i64 {
    token
        .split(':')
        .next()
        .and_then(|p| p.parse().ok())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bot_uid_is_the_token_prefix() {
        assert_eq!(bot_uid_from_token("123456:ABC-DEF"), 123_456);
        assert_eq!(bot_uid_from_token("garbage"), 0);
    }
}

//! The one value every worker receives: shared clients, stores and the
//! derived queue/recency handles.

use std::sync::Arc;

use serde::{de::DeserializeOwned, Serialize};

use trawler_cache::{Cache, DailyDict, Dict, ExpiringSet, Queue, Statistics, TypedQueue};
use trawler_core::config::{ENTITY_REFRESH_TTL_SECS, FOUND_LINK_TTL_SECS};
use trawler_core::TrawlerConfig;
use trawler_media::{MediaError, OcrOutcome};
use trawler_store::Store;
use trawler_telegram::{BotPool, Notify, Senders};

use crate::queues;

/// Photo upload + recognition, behind one seam so the OCR worker can be
/// exercised against stubs.
#[async_trait::async_trait]
pub trait MediaOps: Send + Sync {
    async fn upload(&self, key: &str, bytes: Vec<u8>) -> Result<String, MediaError>;
    async fn recognize(&self, key: &str) -> Result<OcrOutcome, MediaError>;
}

/// Production media path: blob PUT then OCR GET.
pub struct HttpMedia {
    pub blob: trawler_media::BlobClient,
    pub ocr: trawler_media::OcrClient,
}

#[async_trait::async_trait]
impl MediaOps for HttpMedia {
    async fn upload(&self, key: &str, bytes: Vec<u8>) -> Result<String, MediaError> {
        self.blob.put(key, bytes).await
    }

    async fn recognize(&self, key: &str) -> Result<OcrOutcome, MediaError> {
        self.ocr.recognize(key).await
    }
}

pub struct AppContext {
    pub config: TrawlerConfig,
    pub cache: Cache,
    pub store: Arc<dyn Store>,
    pub senders: Arc<Senders>,
    pub bots: BotPool,
    pub notifier: Arc<dyn Notify>,
    pub media: Arc<dyn MediaOps>,
    pub stats: Statistics,
}

impl AppContext {
    // --- queues -----------------------------------------------------------

    pub fn queue_of(&self, name: &str) -> Queue {
        Queue::new(&self.cache, format!("{name}_queue"))
    }

    pub fn typed_queue<T: Serialize + DeserializeOwned>(&self, name: &str) -> TypedQueue<T> {
        TypedQueue::new(&self.cache, format!("{name}_queue"))
    }

    pub fn status_of(&self, name: &str) -> Dict {
        Dict::new(&self.cache, format!("{name}_worker_status"))
    }

    pub fn insert_queue(&self) -> TypedQueue<queues::InsertTask> {
        self.typed_queue(queues::INSERT)
    }

    pub fn mark_queue(&self) -> TypedQueue<queues::MarkTask> {
        self.typed_queue(queues::MARK)
    }

    pub fn ocr_queue(&self) -> TypedQueue<queues::OcrTask> {
        self.typed_queue(queues::OCR)
    }

    pub fn find_link_queue(&self) -> TypedQueue<String> {
        self.typed_queue(queues::FIND_LINK)
    }

    pub fn entity_queue(&self) -> TypedQueue<queues::EntityTask> {
        self.typed_queue(queues::ENTITY)
    }

    pub fn invite_queue(&self) -> TypedQueue<queues::InviteTask> {
        self.typed_queue(queues::INVITE)
    }

    pub fn join_queue(&self) -> TypedQueue<queues::JoinTask> {
        self.typed_queue(queues::JOIN)
    }

    pub fn history_queue(&self) -> TypedQueue<queues::HistoryTask> {
        self.typed_queue(queues::HISTORY)
    }

    // --- recency and shared state ----------------------------------------

    pub fn recent_found_links(&self) -> ExpiringSet {
        ExpiringSet::new(&self.cache, "recent_found_links", FOUND_LINK_TTL_SECS)
    }

    pub fn group_last_changed(&self) -> ExpiringSet {
        ExpiringSet::new(&self.cache, "group_last_changed", ENTITY_REFRESH_TTL_SECS)
    }

    pub fn user_last_changed(&self) -> ExpiringSet {
        ExpiringSet::new(&self.cache, "user_last_changed", ENTITY_REFRESH_TTL_SECS)
    }

    pub fn global_count(&self) -> Dict {
        Dict::new(&self.cache, "global_count")
    }

    pub fn ocr_cache(&self) -> DailyDict {
        DailyDict::new(&self.cache, "ocr")
    }
}

/// Scriptable doubles shared by the unit tests in this crate.
#[cfg(test)]
pub mod tests_support {
    use std::collections::{HashMap, VecDeque};
    use std::sync::{Arc, Mutex};

    use trawler_cache::{Cache, Statistics};
    use trawler_core::config::*;
    use trawler_core::types::PhotoLocation;
    use trawler_core::TrawlerConfig;
    use trawler_media::{MediaError, OcrOutcome};
    use trawler_store::MemoryStore;
    use trawler_telegram::notify::RecordingNotifier;
    use trawler_telegram::types::*;
    use trawler_telegram::{BotApi, BotPool, Senders, TgError, UserClient};

    use super::{AppContext, MediaOps};

    pub const INVOKER_UID: i64 = 4242;

    #[derive(Default)]
    pub struct MockUserClient {
        pub uid: i64,
        pub resolve: Mutex<HashMap<String, PeerRef>>,
        pub invite_previews: Mutex<HashMap<String, Option<InvitePreview>>>,
        pub recent: Mutex<Vec<String>>,
        pub pages: Mutex<VecDeque<Vec<HistoryMessage>>>,
        pub join_errors: Mutex<VecDeque<TgError>>,
        pub joined: Mutex<Vec<String>>,
        pub imported: Mutex<Vec<String>>,
        pub photo_bytes: Mutex<Option<Vec<u8>>>,
        pub acks: Mutex<Vec<(i64, i32)>>,
    }

    #[async_trait::async_trait]
    impl UserClient for MockUserClient {
        fn uid(&self) -> i64 {
            self.uid
        }

        fn session_name(&self) -> &str {
            "mock"
        }

        async fn next_event(&self) -> Result<Option<ChatEvent>, TgError> {
            Ok(None)
        }

        async fn resolve_channel(&self, username: &str) -> Result<Option<PeerRef>, TgError> {
            Ok(self.resolve.lock().unwrap().get(username).cloned())
        }

        async fn join_channel(&self, peer: &PeerRef) -> Result<(), TgError> {
            if let Some(e) = self.join_errors.lock().unwrap().pop_front() {
                return Err(e);
            }
            self.joined.lock().unwrap().push(peer.packed.clone());
            Ok(())
        }

        async fn leave_channel(&self, _peer: &PeerRef) -> Result<(), TgError> {
            Ok(())
        }

        async fn import_invite(&self, hash: &str) -> Result<(), TgError> {
            if let Some(e) = self.join_errors.lock().unwrap().pop_front() {
                return Err(e);
            }
            self.imported.lock().unwrap().push(hash.to_string());
            Ok(())
        }

        async fn check_invite(&self, hash: &str) -> Result<Option<InvitePreview>, TgError> {
            self.invite_previews
                .lock()
                .unwrap()
                .get(hash)
                .cloned()
                .ok_or(TgError::InviteInvalid)
        }

        async fn recent_texts(&self, _peer: &PeerRef, limit: i32) -> Result<Vec<String>, TgError> {
            let texts = self.recent.lock().unwrap();
            Ok(texts.iter().take(limit as usize).cloned().collect())
        }

        async fn history_page(
            &self,
            _peer: &PeerRef,
            _before_id: i32,
            _limit: i32,
        ) -> Result<Vec<HistoryMessage>, TgError> {
            Ok(self.pages.lock().unwrap().pop_front().unwrap_or_default())
        }

        async fn download_photo(&self, _location: &PhotoLocation) -> Result<Vec<u8>, TgError> {
            self.photo_bytes
                .lock()
                .unwrap()
                .clone()
                .ok_or(TgError::ChatNotFound)
        }

        async fn read_acknowledge(&self, peer: &PeerRef, max_id: i32) -> Result<(), TgError> {
            self.acks.lock().unwrap().push((peer.marked_id, max_id));
            Ok(())
        }

        async fn dialogs(&self) -> Result<Vec<DialogSummary>, TgError> {
            Ok(Vec::new())
        }
    }

    /// Scripted bot: per-username chat answers and member counts.
    #[derive(Default)]
    pub struct MockBot {
        pub uid: i64,
        pub token: String,
        pub chats: Mutex<HashMap<String, Result<ChatSummary, TgError>>>,
        pub counts: Mutex<HashMap<String, i32>>,
        pub sent: Mutex<Vec<(i64, String)>>,
        pub files: Mutex<HashMap<String, Vec<u8>>>,
    }

    #[async_trait::async_trait]
    impl BotApi for MockBot {
        fn uid(&self) -> i64 {
            self.uid
        }

        fn token(&self) -> &str {
            &self.token
        }

        async fn get_chat(&self, username: &str) -> Result<ChatSummary, TgError> {
            self.chats
                .lock()
                .unwrap()
                .get(username)
                .cloned()
                .unwrap_or(Err(TgError::ChatNotFound))
        }

        async fn member_count(&self, username: &str) -> Result<i32, TgError> {
            Ok(*self.counts.lock().unwrap().get(username).unwrap_or(&0))
        }

        async fn send_html(&self, chat_id: i64, html: &str) -> Result<(), TgError> {
            self.sent.lock().unwrap().push((chat_id, html.to_string()));
            Ok(())
        }

        async fn download_by_file_id(&self, file_id: &str) -> Result<Vec<u8>, TgError> {
            self.files
                .lock()
                .unwrap()
                .get(file_id)
                .cloned()
                .ok_or(TgError::ChatNotFound)
        }
    }

    #[derive(Default)]
    pub struct StubMedia {
        pub uploads: Mutex<Vec<String>>,
        pub outcome: Mutex<OcrOutcome>,
    }

    #[async_trait::async_trait]
    impl MediaOps for StubMedia {
        async fn upload(&self, key: &str, bytes: Vec<u8>) -> Result<String, MediaError> {
            assert!(!bytes.is_empty(), "uploaded empty photo");
            self.uploads.lock().unwrap().push(key.to_string());
            Ok(key.to_string())
        }

        async fn recognize(&self, _key: &str) -> Result<OcrOutcome, MediaError> {
            Ok(self.outcome.lock().unwrap().clone())
        }
    }

    pub struct TestBed {
        pub ctx: Arc<AppContext>,
        pub invoker: Arc<MockUserClient>,
        pub bots: Vec<Arc<MockBot>>,
        pub notifier: Arc<RecordingNotifier>,
        pub store: Arc<MemoryStore>,
        pub media: Arc<StubMedia>,
    }

    pub fn test_config() -> TrawlerConfig {
        TrawlerConfig {
            telegram: TelegramConfig {
                api_id: 1,
                api_hash: "hash".into(),
                invoker_session: "main".into(),
                accounts: Vec::new(),
                bots: Vec::new(),
            },
            redis: RedisConfig {
                url: "redis://unused/".into(),
            },
            database: DatabaseConfig {
                dsn: "mysql://unused/".into(),
                pool_size: 1,
            },
            admin: AdminConfig {
                channel_id: -100_999,
                allow_uids: vec![1],
                bot_token: "1:admin".into(),
                allow_exec: false,
            },
            webhook: WebhookConfig::default(),
            blob: BlobConfig::default(),
            ocr: OcrConfig::default(),
            metrics: MetricsConfig::default(),
            discovery: DiscoveryConfig {
                group_member_join_limit: 100,
                blacklist: vec!["blacklisted".into(), "joinchat".into()],
            },
            presence: PresenceConfig::default(),
        }
    }

    /// A context over in-memory everything, with `bot_count` scripted bots.
    pub fn test_bed_with(bot_count: usize) -> TestBed {
        let cache = Cache::memory();
        let store = Arc::new(MemoryStore::new());
        let invoker = Arc::new(MockUserClient {
            uid: INVOKER_UID,
            ..Default::default()
        });
        let senders = Arc::new(Senders::new(Arc::clone(&invoker) as Arc<dyn UserClient>));
        let notifier = Arc::new(RecordingNotifier::new());
        let media = Arc::new(StubMedia::default());

        let bots: Vec<Arc<MockBot>> = (0..bot_count)
            .map(|i| {
                Arc::new(MockBot {
                    uid: 100 + i as i64,
                    token: format!("token-{i}"),
                    ..Default::default()
                })
            })
            .collect();
        for bot in &bots {
            senders.register_bot(Arc::clone(bot) as Arc<dyn BotApi>);
        }
        let pool = BotPool::new(
            &cache,
            bots.iter()
                .map(|b| Arc::clone(b) as Arc<dyn BotApi>)
                .collect(),
        );

        let stats = Statistics::new(&cache);
        let ctx = Arc::new(AppContext {
            config: test_config(),
            cache,
            store: Arc::clone(&store) as Arc<dyn trawler_store::Store>,
            senders,
            bots: pool,
            notifier: Arc::clone(&notifier) as Arc<dyn trawler_telegram::Notify>,
            media: Arc::clone(&media) as Arc<dyn MediaOps>,
            stats,
        });
        TestBed {
            ctx,
            invoker,
            bots,
            notifier,
            store,
            media,
        }
    }

    pub fn test_context() -> AppContext {
        let bed = test_bed_with(0);
        // Unwrap the Arc for callers that want a bare context.
        Arc::try_unwrap(bed.ctx).unwrap_or_else(|arc| panic!("context still shared: {} refs", Arc::strong_count(&arc)))
    }
}

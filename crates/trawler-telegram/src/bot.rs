//! The Bot API surface plus the penalty-aware bot pool.

use std::sync::Arc;

use async_trait::async_trait;
use rand::seq::SliceRandom;

use trawler_cache::{Cache, Dict};
use trawler_core::config::MIN_USABLE_BOTS;
use trawler_core::util::now_ts;

use crate::error::TgError;
use crate::types::ChatSummary;

/// One bot account.
#[async_trait]
pub trait BotApi: Send + Sync {
    fn uid(&self) -> i64;

    fn token(&self) -> &str;

    /// `getChat("@name")`.
    async fn get_chat(&self, username: &str) -> Result<ChatSummary, TgError>;

    async fn member_count(&self, username: &str) -> Result<i32, TgError>;

    async fn send_html(&self, chat_id: i64, html: &str) -> Result<(), TgError>;

    async fn download_by_file_id(&self, file_id: &str) -> Result<Vec<u8>, TgError>;
}

/// Picks a usable fetch bot, honouring per-token rate-limit penalties.
///
/// The penalty map is eventually consistent: a token penalised by one worker
/// may still be handed out once to a racing worker. Acceptable.
#[derive(Clone)]
pub struct BotPool {
    bots: Vec<Arc<dyn BotApi>>,
    penalties: Dict,
}

impl BotPool {
    pub fn new(cache: &Cache, bots: Vec<Arc<dyn BotApi>>) -> Self {
        Self {
            bots,
            penalties: Dict::new(cache, "bot_info"),
        }
    }

    /// A uniformly random bot among those not under penalty, or `None` when
    /// fewer than [`MIN_USABLE_BOTS`] are usable.
    pub async fn get_available_bot(&self) -> Result<Option<Arc<dyn BotApi>>, TgError> {
        let now = now_ts();
        let mut usable = Vec::new();
        for bot in &self.bots {
            let until = self
                .penalties
                .get_i64(bot.token())
                .await
                .map_err(|e| TgError::Network(e.to_string()))?
                .unwrap_or(0);
            if until <= now {
                usable.push(Arc::clone(bot));
            }
        }
        if usable.len() < MIN_USABLE_BOTS {
            return Ok(None);
        }
        Ok(usable.choose(&mut rand::thread_rng()).cloned())
    }

    /// Bench a token until `now + seconds`.
    pub async fn penalize(&self, token: &str, seconds: u32) -> Result<(), TgError> {
        self.penalties
            .set(token, &(now_ts() + i64::from(seconds)).to_string())
            .await
            .map_err(|e| TgError::Network(e.to_string()))
    }
}

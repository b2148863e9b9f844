//! Admin-channel notifications.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{info, warn};

use crate::bot::BotApi;

/// Sink for operator-facing notices. The production implementation posts to
/// the admin channel via the admin bot; tests collect messages in memory.
#[async_trait]
pub trait Notify: Send + Sync {
    async fn notify(&self, html: &str);
}

pub struct ChannelNotifier {
    bot: Arc<dyn BotApi>,
    channel_id: i64,
}

impl ChannelNotifier {
    pub fn new(bot: Arc<dyn BotApi>, channel_id: i64) -> Self {
        Self { bot, channel_id }
    }
}

#[async_trait]
impl Notify for ChannelNotifier {
    async fn notify(&self, html: &str) {
        info!("notifying administrators: {html}");
        if let Err(e) = self.bot.send_html(self.channel_id, html.trim()).await {
            // A failed notice is logged and forgotten, never retried — the
            // pipeline must not stall on the admin channel.
            warn!(error = %e, "failed to deliver admin notification");
        }
    }
}

/// Collects notifications for assertions.
#[derive(Default)]
pub struct RecordingNotifier {
    messages: std::sync::Mutex<Vec<String>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn messages(&self) -> Vec<String> {
        self.messages.lock().expect("notifier poisoned").clone()
    }
}

#[async_trait]
impl Notify for RecordingNotifier {
    async fn notify(&self, html: &str) {
        self.messages
            .lock()
            .expect("notifier poisoned")
            .push(html.to_string());
    }
}

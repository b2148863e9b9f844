//! The user-account (MTProto) client surface the pipeline consumes.

use async_trait::async_trait;

use crate::error::TgError;
use crate::types::{ChatEvent, DialogSummary, HistoryMessage, InvitePreview, PeerRef};
use trawler_core::types::PhotoLocation;

/// One logged-in user account. The designated *invoker* instance carries all
/// privileged calls: joins, invite probes, history paging.
#[async_trait]
pub trait UserClient: Send + Sync {
    fn uid(&self) -> i64;

    fn session_name(&self) -> &str;

    /// Next update from this account's stream; `None` on graceful disconnect.
    async fn next_event(&self) -> Result<Option<ChatEvent>, TgError>;

    /// Resolve a public username to a channel peer. `Ok(None)` when the name
    /// does not exist or is not a channel.
    async fn resolve_channel(&self, username: &str) -> Result<Option<PeerRef>, TgError>;

    async fn join_channel(&self, peer: &PeerRef) -> Result<(), TgError>;

    async fn leave_channel(&self, peer: &PeerRef) -> Result<(), TgError>;

    async fn import_invite(&self, hash: &str) -> Result<(), TgError>;

    /// Probe a private invite without joining. `Ok(None)` when we are already
    /// a participant.
    async fn check_invite(&self, hash: &str) -> Result<Option<InvitePreview>, TgError>;

    /// Texts of the most recent `limit` messages — the language sampler.
    async fn recent_texts(&self, peer: &PeerRef, limit: i32) -> Result<Vec<String>, TgError>;

    /// One page of history strictly older than `before_id`, newest first.
    async fn history_page(
        &self,
        peer: &PeerRef,
        before_id: i32,
        limit: i32,
    ) -> Result<Vec<HistoryMessage>, TgError>;

    /// Re-fetch a photo by its stored location and download the largest
    /// variant into memory.
    async fn download_photo(&self, location: &PhotoLocation) -> Result<Vec<u8>, TgError>;

    async fn read_acknowledge(&self, peer: &PeerRef, max_id: i32) -> Result<(), TgError>;

    async fn dialogs(&self) -> Result<Vec<DialogSummary>, TgError>;
}

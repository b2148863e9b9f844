use async_trait::async_trait;

use crate::error::Result;
use crate::types::{GroupInviteRecord, GroupRecord, MessageRow, NewMessage, UserRecord};

/// The persistence surface the workers are written against.
///
/// Production is [`crate::MySqlStore`]; tests use [`crate::MemoryStore`].
#[async_trait]
pub trait Store: Send + Sync {
    /// Write a message row, returning its surrogate id.
    async fn insert_message(&self, row: &NewMessage) -> Result<i64>;

    async fn message_by_id(&self, id: i64) -> Result<Option<MessageRow>>;

    async fn message_exists(&self, chat_id: i64, message_id: i32) -> Result<bool>;

    /// OR the deleted bit into `flag` for every row of this logical message.
    /// Returns the number of rows touched.
    async fn mark_deleted(&self, chat_id: i64, message_id: i32) -> Result<u64>;

    /// Rewrite a row's text (OCR enrichment).
    async fn set_message_text(&self, id: i64, text: &str) -> Result<()>;

    /// Earliest stored message id for a chat — the back-fill cursor.
    async fn min_message_id(&self, chat_id: i64) -> Result<Option<i32>>;

    async fn user_by_uid(&self, uid: i64) -> Result<Option<UserRecord>>;

    /// Upsert a user. On the first observed change a `date = 0` snapshot of
    /// the previous state is appended to the history, exactly once; every
    /// change appends a `date = now` history row alongside the mutation.
    async fn apply_user_update(&self, update: &UserRecord, now: i64) -> Result<()>;

    async fn group_by_gid(&self, gid: i64) -> Result<Option<GroupRecord>>;

    async fn insert_group(&self, group: &GroupRecord) -> Result<()>;

    /// Upsert a group with the same history rule as users. A group without a
    /// master adopts the update's `master_uid`.
    async fn apply_group_update(&self, update: &GroupRecord, now: i64) -> Result<()>;

    async fn invite_exists(&self, invite_hash: &str) -> Result<bool>;

    async fn insert_invite(&self, invite: &GroupInviteRecord) -> Result<()>;
}

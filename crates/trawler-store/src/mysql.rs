//! MySQL-backed [`Store`].
//!
//! Schema management is out of scope (a one-shot external utility); queries
//! assume the tables from the data model with their composite indexes.

use async_trait::async_trait;
use sqlx::mysql::{MySqlPool, MySqlPoolOptions};
use sqlx::Row;

use trawler_core::types::flag;

use crate::error::Result;
use crate::store::Store;
use crate::types::{GroupInviteRecord, GroupRecord, MessageRow, NewMessage, UserRecord};

pub struct MySqlStore {
    pool: MySqlPool,
}

impl MySqlStore {
    pub async fn connect(dsn: &str, pool_size: u32) -> Result<Self> {
        let pool = MySqlPoolOptions::new()
            .max_connections(pool_size)
            .connect(dsn)
            .await?;
        Ok(Self { pool })
    }

    fn row_to_message(row: &sqlx::mysql::MySqlRow) -> MessageRow {
        MessageRow {
            id: row.get("id"),
            chat_id: row.get("chat_id"),
            message_id: row.get("message_id"),
            user_id: row.get("user_id"),
            text: row.get("text"),
            date: row.get("date"),
            flag: row.get::<u32, _>("flag"),
        }
    }
}

#[async_trait]
impl Store for MySqlStore {
    async fn insert_message(&self, row: &NewMessage) -> Result<i64> {
        let result = sqlx::query(
            "INSERT INTO chat (chat_id, message_id, user_id, text, date, flag)
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(row.chat_id)
        .bind(row.message_id)
        .bind(row.user_id)
        .bind(&row.text)
        .bind(row.date)
        .bind(row.flag)
        .execute(&self.pool)
        .await?;
        Ok(result.last_insert_id() as i64)
    }

    async fn message_by_id(&self, id: i64) -> Result<Option<MessageRow>> {
        let row = sqlx::query(
            "SELECT id, chat_id, message_id, user_id, text, date, flag
             FROM chat WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.as_ref().map(Self::row_to_message))
    }

    async fn message_exists(&self, chat_id: i64, message_id: i32) -> Result<bool> {
        let row = sqlx::query("SELECT 1 FROM chat WHERE chat_id = ? AND message_id = ? LIMIT 1")
            .bind(chat_id)
            .bind(message_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.is_some())
    }

    async fn mark_deleted(&self, chat_id: i64, message_id: i32) -> Result<u64> {
        let result = sqlx::query(
            "UPDATE chat SET flag = flag | ? WHERE chat_id = ? AND message_id = ?",
        )
        .bind(flag::DELETED)
        .bind(chat_id)
        .bind(message_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn set_message_text(&self, id: i64, text: &str) -> Result<()> {
        sqlx::query("UPDATE chat SET text = ? WHERE id = ?")
            .bind(text)
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn min_message_id(&self, chat_id: i64) -> Result<Option<i32>> {
        let row = sqlx::query("SELECT MIN(message_id) AS first FROM chat WHERE chat_id = ?")
            .bind(chat_id)
            .fetch_one(&self.pool)
            .await?;
        Ok(row.get::<Option<i32>, _>("first"))
    }

    async fn user_by_uid(&self, uid: i64) -> Result<Option<UserRecord>> {
        let row = sqlx::query(
            "SELECT uid, name, firstname, lastname, lang FROM users WHERE uid = ?",
        )
        .bind(uid)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|r| UserRecord {
            uid: r.get("uid"),
            username: r.get("name"),
            first_name: r.get("firstname"),
            last_name: r.get("lastname"),
            lang: r.get("lang"),
        }))
    }

    async fn apply_user_update(&self, update: &UserRecord, now: i64) -> Result<()> {
        let existing = self.user_by_uid(update.uid).await?;

        match existing {
            None => {
                sqlx::query(
                    "INSERT INTO users (uid, name, firstname, lastname, lang)
                     VALUES (?, ?, ?, ?, ?)",
                )
                .bind(update.uid)
                .bind(&update.username)
                .bind(&update.first_name)
                .bind(&update.last_name)
                .bind(&update.lang)
                .execute(&self.pool)
                .await?;
            }
            Some(previous) if !previous.same_identity(update) => {
                let history_rows =
                    sqlx::query("SELECT COUNT(*) AS n FROM user_history WHERE uid = ?")
                        .bind(update.uid)
                        .fetch_one(&self.pool)
                        .await?
                        .get::<i64, _>("n");
                if history_rows == 0 {
                    // Capture the pre-change state once, with the zero date.
                    self.insert_user_history(&previous, 0).await?;
                }
                self.insert_user_history(update, now).await?;
                sqlx::query(
                    "UPDATE users SET name = ?, firstname = ?, lastname = ?, lang = ?
                     WHERE uid = ?",
                )
                .bind(&update.username)
                .bind(&update.first_name)
                .bind(&update.last_name)
                .bind(&update.lang)
                .bind(update.uid)
                .execute(&self.pool)
                .await?;
            }
            Some(_) => {}
        }
        Ok(())
    }

    async fn group_by_gid(&self, gid: i64) -> Result<Option<GroupRecord>> {
        let row = sqlx::query("SELECT id, name, link, master FROM groups WHERE id = ?")
            .bind(gid)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|r| GroupRecord {
            gid: r.get("id"),
            name: r.get("name"),
            link: r.get("link"),
            master_uid: r.get("master"),
        }))
    }

    async fn insert_group(&self, group: &GroupRecord) -> Result<()> {
        sqlx::query("INSERT INTO groups (id, name, link, master) VALUES (?, ?, ?, ?)")
            .bind(group.gid)
            .bind(&group.name)
            .bind(&group.link)
            .bind(group.master_uid)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn apply_group_update(&self, update: &GroupRecord, now: i64) -> Result<()> {
        let existing = self.group_by_gid(update.gid).await?;

        match existing {
            None => self.insert_group(update).await?,
            Some(previous) => {
                if !previous.same_identity(update) {
                    let history_rows =
                        sqlx::query("SELECT COUNT(*) AS n FROM group_history WHERE gid = ?")
                            .bind(update.gid)
                            .fetch_one(&self.pool)
                            .await?
                            .get::<i64, _>("n");
                    if history_rows == 0 {
                        self.insert_group_history(&previous, 0).await?;
                    }
                    self.insert_group_history(update, now).await?;
                    sqlx::query("UPDATE groups SET name = ?, link = ? WHERE id = ?")
                        .bind(&update.name)
                        .bind(&update.link)
                        .bind(update.gid)
                        .execute(&self.pool)
                        .await?;
                }
                if previous.master_uid.is_none() {
                    if let Some(master) = update.master_uid {
                        sqlx::query("UPDATE groups SET master = ? WHERE id = ? AND master IS NULL")
                            .bind(master)
                            .bind(update.gid)
                            .execute(&self.pool)
                            .await?;
                    }
                }
            }
        }
        Ok(())
    }

    async fn invite_exists(&self, invite_hash: &str) -> Result<bool> {
        let row = sqlx::query("SELECT 1 FROM group_invite WHERE invite_hash = ? LIMIT 1")
            .bind(invite_hash)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.is_some())
    }

    async fn insert_invite(&self, invite: &GroupInviteRecord) -> Result<()> {
        sqlx::query(
            "INSERT INTO group_invite (invite_hash, inviter_uid, gid, random_nonce, title)
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&invite.invite_hash)
        .bind(invite.inviter_uid)
        .bind(invite.gid)
        .bind(invite.random_nonce)
        .bind(&invite.title)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

impl MySqlStore {
    async fn insert_user_history(&self, user: &UserRecord, date: i64) -> Result<()> {
        sqlx::query(
            "INSERT INTO user_history (uid, name, firstname, lastname, lang, date)
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(user.uid)
        .bind(&user.username)
        .bind(&user.first_name)
        .bind(&user.last_name)
        .bind(&user.lang)
        .bind(date)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn insert_group_history(&self, group: &GroupRecord, date: i64) -> Result<()> {
        sqlx::query("INSERT INTO group_history (gid, name, link, date) VALUES (?, ?, ?, ?)")
            .bind(group.gid)
            .bind(&group.name)
            .bind(&group.link)
            .bind(date)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

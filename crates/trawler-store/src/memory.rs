//! In-process [`Store`] used by the test suites.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;

use trawler_core::types::flag;

use crate::error::Result;
use crate::store::Store;
use crate::types::{GroupInviteRecord, GroupRecord, MessageRow, NewMessage, UserRecord};

#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

#[derive(Default)]
struct Inner {
    next_id: i64,
    messages: Vec<MessageRow>,
    users: HashMap<i64, UserRecord>,
    user_history: Vec<(UserRecord, i64)>,
    groups: HashMap<i64, GroupRecord>,
    group_history: Vec<(GroupRecord, i64)>,
    invites: Vec<GroupInviteRecord>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Test helpers below peek at state the trait does not expose.
    pub fn messages(&self) -> Vec<MessageRow> {
        self.inner.lock().expect("memory store poisoned").messages.clone()
    }

    pub fn user_history(&self, uid: i64) -> Vec<(UserRecord, i64)> {
        self.inner
            .lock()
            .expect("memory store poisoned")
            .user_history
            .iter()
            .filter(|(u, _)| u.uid == uid)
            .cloned()
            .collect()
    }

    pub fn group_history(&self, gid: i64) -> Vec<(GroupRecord, i64)> {
        self.inner
            .lock()
            .expect("memory store poisoned")
            .group_history
            .iter()
            .filter(|(g, _)| g.gid == gid)
            .cloned()
            .collect()
    }

    pub fn invites(&self) -> Vec<GroupInviteRecord> {
        self.inner.lock().expect("memory store poisoned").invites.clone()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn insert_message(&self, row: &NewMessage) -> Result<i64> {
        let mut inner = self.inner.lock().expect("memory store poisoned");
        inner.next_id += 1;
        let id = inner.next_id;
        inner.messages.push(MessageRow {
            id,
            chat_id: row.chat_id,
            message_id: row.message_id,
            user_id: row.user_id,
            text: row.text.clone(),
            date: row.date,
            flag: row.flag,
        });
        Ok(id)
    }

    async fn message_by_id(&self, id: i64) -> Result<Option<MessageRow>> {
        let inner = self.inner.lock().expect("memory store poisoned");
        Ok(inner.messages.iter().find(|m| m.id == id).cloned())
    }

    async fn message_exists(&self, chat_id: i64, message_id: i32) -> Result<bool> {
        let inner = self.inner.lock().expect("memory store poisoned");
        Ok(inner
            .messages
            .iter()
            .any(|m| m.chat_id == chat_id && m.message_id == message_id))
    }

    async fn mark_deleted(&self, chat_id: i64, message_id: i32) -> Result<u64> {
        let mut inner = self.inner.lock().expect("memory store poisoned");
        let mut touched = 0;
        for m in inner
            .messages
            .iter_mut()
            .filter(|m| m.chat_id == chat_id && m.message_id == message_id)
        {
            m.flag |= flag::DELETED;
            touched += 1;
        }
        Ok(touched)
    }

    async fn set_message_text(&self, id: i64, text: &str) -> Result<()> {
        let mut inner = self.inner.lock().expect("memory store poisoned");
        if let Some(m) = inner.messages.iter_mut().find(|m| m.id == id) {
            m.text = text.to_string();
        }
        Ok(())
    }

    async fn min_message_id(&self, chat_id: i64) -> Result<Option<i32>> {
        let inner = self.inner.lock().expect("memory store poisoned");
        Ok(inner
            .messages
            .iter()
            .filter(|m| m.chat_id == chat_id)
            .map(|m| m.message_id)
            .min())
    }

    async fn user_by_uid(&self, uid: i64) -> Result<Option<UserRecord>> {
        let inner = self.inner.lock().expect("memory store poisoned");
        Ok(inner.users.get(&uid).cloned())
    }

    async fn apply_user_update(&self, update: &UserRecord, now: i64) -> Result<()> {
        let mut inner = self.inner.lock().expect("memory store poisoned");
        match inner.users.get(&update.uid).cloned() {
            None => {
                inner.users.insert(update.uid, update.clone());
            }
            Some(previous) if !previous.same_identity(update) => {
                let seen_before = inner.user_history.iter().any(|(u, _)| u.uid == update.uid);
                if !seen_before {
                    inner.user_history.push((previous, 0));
                }
                inner.user_history.push((update.clone(), now));
                inner.users.insert(update.uid, update.clone());
            }
            Some(_) => {}
        }
        Ok(())
    }

    async fn group_by_gid(&self, gid: i64) -> Result<Option<GroupRecord>> {
        let inner = self.inner.lock().expect("memory store poisoned");
        Ok(inner.groups.get(&gid).cloned())
    }

    async fn insert_group(&self, group: &GroupRecord) -> Result<()> {
        let mut inner = self.inner.lock().expect("memory store poisoned");
        inner.groups.insert(group.gid, group.clone());
        Ok(())
    }

    async fn apply_group_update(&self, update: &GroupRecord, now: i64) -> Result<()> {
        let mut inner = self.inner.lock().expect("memory store poisoned");
        match inner.groups.get(&update.gid).cloned() {
            None => {
                inner.groups.insert(update.gid, update.clone());
            }
            Some(previous) => {
                if !previous.same_identity(update) {
                    let seen_before =
                        inner.group_history.iter().any(|(g, _)| g.gid == update.gid);
                    if !seen_before {
                        inner.group_history.push((previous.clone(), 0));
                    }
                    inner.group_history.push((update.clone(), now));
                    let master = previous.master_uid.or(update.master_uid);
                    inner.groups.insert(
                        update.gid,
                        GroupRecord {
                            master_uid: master,
                            ..update.clone()
                        },
                    );
                } else if previous.master_uid.is_none() && update.master_uid.is_some() {
                    inner.groups.insert(
                        update.gid,
                        GroupRecord {
                            master_uid: update.master_uid,
                            ..previous
                        },
                    );
                }
            }
        }
        Ok(())
    }

    async fn invite_exists(&self, invite_hash: &str) -> Result<bool> {
        let inner = self.inner.lock().expect("memory store poisoned");
        Ok(inner.invites.iter().any(|i| i.invite_hash == invite_hash))
    }

    async fn insert_invite(&self, invite: &GroupInviteRecord) -> Result<()> {
        let mut inner = self.inner.lock().expect("memory store poisoned");
        inner.invites.push(invite.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user(uid: i64, first: &str) -> UserRecord {
        UserRecord {
            uid,
            username: Some("name".into()),
            first_name: Some(first.into()),
            last_name: None,
            lang: None,
        }
    }

    #[tokio::test]
    async fn first_change_snapshots_the_previous_state() {
        let store = MemoryStore::new();
        store.apply_user_update(&user(1, "a"), 100).await.unwrap();
        // No change yet — nothing in the history.
        assert!(store.user_history(1).is_empty());

        store.apply_user_update(&user(1, "b"), 200).await.unwrap();
        let history = store.user_history(1);
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].0.first_name.as_deref(), Some("a"));
        assert_eq!(history[0].1, 0);
        assert_eq!(history[1].0.first_name.as_deref(), Some("b"));
        assert_eq!(history[1].1, 200);

        // Second change appends one row only; the zero snapshot is not repeated.
        store.apply_user_update(&user(1, "c"), 300).await.unwrap();
        assert_eq!(store.user_history(1).len(), 3);
    }

    #[tokio::test]
    async fn unchanged_updates_are_noops() {
        let store = MemoryStore::new();
        store.apply_user_update(&user(1, "a"), 100).await.unwrap();
        store.apply_user_update(&user(1, "a"), 200).await.unwrap();
        assert!(store.user_history(1).is_empty());
    }

    #[tokio::test]
    async fn masterless_group_adopts_the_caller() {
        let store = MemoryStore::new();
        store
            .insert_group(&GroupRecord {
                gid: -100,
                name: Some("g".into()),
                link: None,
                master_uid: None,
            })
            .await
            .unwrap();
        store
            .apply_group_update(
                &GroupRecord {
                    gid: -100,
                    name: Some("g".into()),
                    link: None,
                    master_uid: Some(42),
                },
                100,
            )
            .await
            .unwrap();
        let group = store.group_by_gid(-100).await.unwrap().unwrap();
        assert_eq!(group.master_uid, Some(42));

        // An established master is never overwritten.
        store
            .apply_group_update(
                &GroupRecord {
                    gid: -100,
                    name: Some("g".into()),
                    link: None,
                    master_uid: Some(43),
                },
                200,
            )
            .await
            .unwrap();
        assert_eq!(
            store.group_by_gid(-100).await.unwrap().unwrap().master_uid,
            Some(42)
        );
    }

    #[tokio::test]
    async fn deletion_marks_every_row_of_the_logical_message() {
        let store = MemoryStore::new();
        let base = NewMessage {
            chat_id: -1,
            message_id: 7,
            user_id: Some(1),
            text: "original".into(),
            date: 100,
            flag: flag::NEW,
        };
        store.insert_message(&base).await.unwrap();
        store
            .insert_message(&NewMessage {
                text: "edited".into(),
                flag: flag::EDITED,
                ..base.clone()
            })
            .await
            .unwrap();

        assert_eq!(store.mark_deleted(-1, 7).await.unwrap(), 2);
        // Idempotent: the bit stays set, rows are not duplicated.
        store.mark_deleted(-1, 7).await.unwrap();
        let rows = store.messages();
        assert_eq!(rows.len(), 2);
        assert!(rows.iter().all(|m| m.flag & flag::DELETED != 0));
    }

    #[tokio::test]
    async fn min_message_id_is_the_backfill_cursor() {
        let store = MemoryStore::new();
        for mid in [30, 10, 20] {
            store
                .insert_message(&NewMessage {
                    chat_id: -5,
                    message_id: mid,
                    user_id: None,
                    text: String::new(),
                    date: 0,
                    flag: flag::NEW,
                })
                .await
                .unwrap();
        }
        assert_eq!(store.min_message_id(-5).await.unwrap(), Some(10));
        assert_eq!(store.min_message_id(-6).await.unwrap(), None);
    }
}

use serde::{Deserialize, Serialize};

/// A persisted message. `(chat_id, message_id)` is unique per logical
/// message; edits append rows rather than mutating in place.
#[derive(Debug, Clone, PartialEq)]
pub struct MessageRow {
    pub id: i64,
    pub chat_id: i64,
    pub message_id: i32,
    pub user_id: Option<i64>,
    pub text: String,
    /// Unix seconds, UTC.
    pub date: i64,
    pub flag: u32,
}

/// Insert payload for a message row.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NewMessage {
    pub chat_id: i64,
    pub message_id: i32,
    pub user_id: Option<i64>,
    pub text: String,
    pub date: i64,
    pub flag: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct UserRecord {
    pub uid: i64,
    pub username: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub lang: Option<String>,
}

impl UserRecord {
    /// Name fields only — lang changes alone do not count as a change.
    pub fn same_identity(&self, other: &UserRecord) -> bool {
        self.first_name == other.first_name
            && self.last_name == other.last_name
            && self.username == other.username
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct GroupRecord {
    pub gid: i64,
    pub name: Option<String>,
    pub link: Option<String>,
    /// Uid of the account whose session observes this group.
    pub master_uid: Option<i64>,
}

impl GroupRecord {
    pub fn same_identity(&self, other: &GroupRecord) -> bool {
        self.name == other.name && self.link == other.link
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GroupInviteRecord {
    pub invite_hash: String,
    pub inviter_uid: i64,
    pub gid: i64,
    pub random_nonce: u64,
    pub title: String,
}

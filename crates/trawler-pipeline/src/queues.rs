//! Queue names and the payload each one carries.
//!
//! This is the seam between producers and consumers: discovery talks to "the
//! join queue", never to the worker that drains it.

use serde::{Deserialize, Serialize};

use trawler_store::{GroupInviteRecord, NewMessage, UserRecord};
use trawler_telegram::types::PeerRef;

pub const INSERT: &str = "insert";
pub const MARK: &str = "mark";
pub const OCR: &str = "ocr";
pub const FIND_LINK: &str = "find_link";
pub const ENTITY: &str = "entity";
pub const INVITE: &str = "invite";
pub const JOIN: &str = "join";
pub const HISTORY: &str = "history";
pub const REPORT: &str = "report";

/// Ingest-side worker classes run several instances each.
pub const INGEST_CLASSES: [&str; 3] = [INSERT, OCR, FIND_LINK];
/// Control-side classes run exactly one.
pub const CONTROL_CLASSES: [&str; 6] = [MARK, ENTITY, INVITE, JOIN, HISTORY, REPORT];

/// The FindLink queue is alarming past this depth.
pub const FIND_LINK_ALARM_DEPTH: u64 = 50;

/// Payload of the insert queue: the row to write.
pub type InsertTask = NewMessage;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MarkTask {
    pub chat_id: i64,
    pub message_id: i32,
    #[serde(default)]
    pub tries: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OcrTask {
    /// Surrogate id of the row awaiting enrichment.
    pub id: i64,
    #[serde(default)]
    pub tries: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EntityTask {
    User { user: UserRecord },
    Group { group: trawler_store::GroupRecord },
}

pub type InviteTask = GroupInviteRecord;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum LinkType {
    Public,
    Private,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JoinTask {
    pub link_type: LinkType,
    /// Public username or private invite hash.
    pub link: String,
    /// Pre-resolved peer for public targets.
    pub peer: Option<PeerRef>,
    pub group_type: String,
    pub title: String,
    pub member_count: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HistoryTask {
    pub gid: i64,
}

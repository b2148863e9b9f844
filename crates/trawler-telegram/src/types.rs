//! Normalized event and peer types shared by both adapters.

use serde::{Deserialize, Serialize};

use trawler_core::types::PhotoRef;

/// A chat peer as the pipeline sees it: the packed reference (hex, with
/// access hash when known) plus the bot-marked chat id.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PeerRef {
    pub packed: String,
    pub marked_id: i64,
}

impl PeerRef {
    /// Rebuild a peer from a bot-marked chat id alone. The access hash is
    /// unknown; calls through this peer rely on the session having seen the
    /// chat before.
    pub fn from_marked_gid(gid: i64) -> Self {
        use grammers_session::{PackedChat, PackedType};

        let packed = if gid >= 0 {
            PackedChat {
                ty: PackedType::User,
                id: gid,
                access_hash: None,
            }
        } else {
            let positive = -gid;
            let unmarked = trawler_core::util::unmark_chat_id(gid);
            if unmarked != positive {
                PackedChat {
                    ty: PackedType::Megagroup,
                    id: unmarked,
                    access_hash: None,
                }
            } else {
                PackedChat {
                    ty: PackedType::Chat,
                    id: positive,
                    access_hash: None,
                }
            }
        };
        PeerRef {
            packed: packed.to_hex(),
            marked_id: gid,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChatKind {
    Private,
    Group,
    Supergroup,
    Channel,
}

impl ChatKind {
    pub fn is_group_like(&self) -> bool {
        !matches!(self, ChatKind::Private)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct UserInfo {
    pub uid: i64,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub username: Option<String>,
    pub lang: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GroupInfo {
    pub chat_id: i64,
    pub kind: ChatKind,
    pub title: Option<String>,
    pub username: Option<String>,
}

/// What a probe of a public chat returns.
#[derive(Debug, Clone, PartialEq)]
pub struct ChatSummary {
    pub chat_id: i64,
    pub kind: ChatKind,
    pub title: Option<String>,
    pub description: Option<String>,
    pub username: Option<String>,
}

/// What `CheckChatInvite` reveals about a private invite.
#[derive(Debug, Clone, PartialEq)]
pub struct InvitePreview {
    pub title: String,
    pub member_count: i32,
    pub is_broadcast: bool,
}

/// One message fetched by the history pager.
#[derive(Debug, Clone, Default)]
pub struct HistoryMessage {
    pub message_id: i32,
    pub date: i64,
    pub text: String,
    pub sender: Option<UserInfo>,
    pub forward_sender: Option<UserInfo>,
    pub photo: Option<PhotoHandle>,
    /// Service messages carry no payload worth persisting.
    pub is_service: bool,
}

/// A photo as the observing client can re-fetch it later.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PhotoHandle {
    /// Bot API file id, or the MTProto photo id rendered as text.
    pub file_id: String,
    /// Set for user-account observations: where to re-fetch the message.
    pub location: Option<trawler_core::types::PhotoLocation>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DialogSummary {
    pub chat_id: i64,
    pub title: String,
}

/// Every inbound Telegram event, normalized. Produced by the grammers update
/// pump and the teloxide webhook decoder alike; consumed by ingress.
#[derive(Debug, Clone)]
pub enum ChatEvent {
    Message {
        edited: bool,
        chat: GroupInfo,
        message_id: i32,
        sender: Option<UserInfo>,
        text: String,
        photo: Option<PhotoHandle>,
        /// Unix seconds, UTC.
        date: i64,
        /// Packed peer for the read-acknowledge path, when known.
        peer: Option<PeerRef>,
    },
    Deleted {
        /// Unknown for plain-chat deletions on some transports.
        chat_id: Option<i64>,
        message_ids: Vec<i32>,
    },
    TitleChanged {
        chat_id: i64,
        title: String,
    },
    NameChanged {
        user: UserInfo,
    },
}

impl ChatEvent {
    /// The raw text a message event carries, if any — what link discovery scans.
    pub fn text(&self) -> Option<&str> {
        match self {
            ChatEvent::Message { text, .. } => Some(text),
            _ => None,
        }
    }
}

/// Build the standard media descriptor for a freshly observed photo.
pub fn photo_ref_for(client_uid: i64, handle: &PhotoHandle) -> PhotoRef {
    let now = trawler_core::util::now_ts();
    PhotoRef {
        client: client_uid,
        file_id: handle.location.is_none().then(|| handle.file_id.clone()),
        location: handle.location.clone(),
        path: trawler_core::util::media_path(),
        filename: format!("{now}-{}.jpg", handle.file_id),
    }
}

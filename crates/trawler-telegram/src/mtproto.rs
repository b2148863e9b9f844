//! grammers-backed [`UserClient`] — the MTProto side of the house.
//!
//! High-level client calls where grammers offers them (connect, sign-in,
//! update stream, username resolution); raw TL invocations for the paging,
//! join and download paths so the worker owns every sleep itself.

use std::collections::HashMap;
use std::io::{self, BufRead, Write};

use async_trait::async_trait;
use grammers_client::{Client, Config, SignInError, Update};
use grammers_session::{PackedChat, PackedType, Session};
use grammers_tl_types as tl;
use tracing::{info, warn};

use trawler_core::config::{AccountConfig, TelegramConfig};
use trawler_core::types::PhotoLocation;
use trawler_core::util::mark_channel_id;
use trawler_core::TrawlerError;

use crate::error::TgError;
use crate::types::{
    ChatEvent, ChatKind, DialogSummary, GroupInfo, HistoryMessage, InvitePreview, PeerRef,
    PhotoHandle, UserInfo,
};
use crate::user::UserClient;

const DOWNLOAD_CHUNK: i32 = 512 * 1024;

pub struct MtprotoClient {
    client: Client,
    uid: i64,
    session_name: String,
}

impl MtprotoClient {
    /// Connect one configured account, driving the interactive code+password
    /// sign-in when the stored session is not authorized.
    pub async fn connect(
        telegram: &TelegramConfig,
        account: &AccountConfig,
    ) -> Result<Self, TrawlerError> {
        let session_file = format!("{}.session", account.session_name);
        let client = Client::connect(Config {
            session: Session::load_file_or_create(&session_file)
                .map_err(|e| TrawlerError::Telegram(e.to_string()))?,
            api_id: telegram.api_id,
            api_hash: telegram.api_hash.clone(),
            params: Default::default(),
        })
        .await
        .map_err(|e| TrawlerError::Telegram(e.to_string()))?;

        let authorized = client
            .is_authorized()
            .await
            .map_err(|e| TrawlerError::Telegram(e.to_string()))?;

        if !authorized {
            info!(session = %account.session_name, "session unauthorized, signing in");
            let token = client
                .request_login_code(&account.phone)
                .await
                .map_err(|e| TrawlerError::Telegram(e.to_string()))?;
            let code = prompt(&format!("Enter the code sent to {}: ", account.phone))?;
            match client.sign_in(&token, code.trim()).await {
                Ok(_) => {}
                Err(SignInError::PasswordRequired(password_token)) => {
                    let password = prompt("Two-step verification enabled, enter the password: ")?;
                    client
                        .check_password(password_token, password.trim())
                        .await
                        .map_err(|e| TrawlerError::Telegram(e.to_string()))?;
                }
                Err(e) => return Err(TrawlerError::Telegram(e.to_string())),
            }
            if let Err(e) = client.session().save_to_file(&session_file) {
                warn!(error = %e, "could not save session file");
            }
        }

        Ok(Self {
            client,
            uid: account.uid,
            session_name: account.session_name.clone(),
        })
    }

    fn packed(peer: &PeerRef) -> Result<PackedChat, TgError> {
        PackedChat::from_hex(&peer.packed).map_err(|_| TgError::PeerInvalid)
    }

    fn input_channel(peer: &PeerRef) -> Result<tl::enums::InputChannel, TgError> {
        Self::packed(peer)?
            .try_to_input_channel()
            .ok_or(TgError::PeerInvalid)
    }

    /// Fetch one raw history page. All sleeping is left to the caller.
    async fn get_history(
        &self,
        peer: tl::enums::InputPeer,
        offset_id: i32,
        max_id: i32,
        limit: i32,
    ) -> Result<(Vec<tl::enums::Message>, Vec<tl::enums::User>), TgError> {
        let result = self
            .client
            .invoke(&tl::functions::messages::GetHistory {
                peer,
                offset_id,
                offset_date: 0,
                add_offset: 0,
                limit,
                max_id,
                min_id: 0,
                hash: 0,
            })
            .await?;

        Ok(match result {
            tl::enums::messages::Messages::Messages(m) => (m.messages, m.users),
            tl::enums::messages::Messages::Slice(m) => (m.messages, m.users),
            tl::enums::messages::Messages::ChannelMessages(m) => (m.messages, m.users),
            tl::enums::messages::Messages::NotModified(_) => (Vec::new(), Vec::new()),
        })
    }

    /// Pull a message's photo location back out of Telegram.
    async fn photo_location_of(
        &self,
        location: &PhotoLocation,
    ) -> Result<tl::enums::InputFileLocation, TgError> {
        let packed = PackedChat::from_hex(&location.chat).map_err(|_| TgError::PeerInvalid)?;
        let id = vec![tl::enums::InputMessage::Id(tl::types::InputMessageId {
            id: location.message_id,
        })];

        let result = if packed.is_channel() {
            let channel = packed.try_to_input_channel().ok_or(TgError::PeerInvalid)?;
            self.client
                .invoke(&tl::functions::channels::GetMessages { channel, id })
                .await?
        } else {
            self.client
                .invoke(&tl::functions::messages::GetMessages { id })
                .await?
        };

        let messages = match result {
            tl::enums::messages::Messages::Messages(m) => m.messages,
            tl::enums::messages::Messages::Slice(m) => m.messages,
            tl::enums::messages::Messages::ChannelMessages(m) => m.messages,
            tl::enums::messages::Messages::NotModified(_) => Vec::new(),
        };

        for message in messages {
            if let tl::enums::Message::Message(msg) = message {
                if let Some(location) = raw_photo_location(msg.media.as_ref()) {
                    return Ok(location);
                }
            }
        }
        Err(TgError::ChatNotFound)
    }
}

#[async_trait]
impl UserClient for MtprotoClient {
    fn uid(&self) -> i64 {
        self.uid
    }

    fn session_name(&self) -> &str {
        &self.session_name
    }

    async fn next_event(&self) -> Result<Option<ChatEvent>, TgError> {
        loop {
            let update = match self.client.next_update().await? {
                Some(update) => update,
                None => return Ok(None),
            };
            if let Some(event) = convert_update(update) {
                return Ok(Some(event));
            }
        }
    }

    async fn resolve_channel(&self, username: &str) -> Result<Option<PeerRef>, TgError> {
        let chat = match self.client.resolve_username(username).await {
            Ok(chat) => chat,
            Err(e) => match TgError::from(e) {
                TgError::ChatNotFound => return Ok(None),
                other => return Err(other),
            },
        };
        Ok(chat.and_then(|c| {
            let packed = c.pack();
            packed.is_channel().then(|| peer_ref(&packed))
        }))
    }

    async fn join_channel(&self, peer: &PeerRef) -> Result<(), TgError> {
        let channel = Self::input_channel(peer)?;
        self.client
            .invoke(&tl::functions::channels::JoinChannel { channel })
            .await?;
        Ok(())
    }

    async fn leave_channel(&self, peer: &PeerRef) -> Result<(), TgError> {
        let channel = Self::input_channel(peer)?;
        self.client
            .invoke(&tl::functions::channels::LeaveChannel { channel })
            .await?;
        Ok(())
    }

    async fn import_invite(&self, hash: &str) -> Result<(), TgError> {
        self.client
            .invoke(&tl::functions::messages::ImportChatInvite {
                hash: hash.to_string(),
            })
            .await?;
        Ok(())
    }

    async fn check_invite(&self, hash: &str) -> Result<Option<InvitePreview>, TgError> {
        let result = self
            .client
            .invoke(&tl::functions::messages::CheckChatInvite {
                hash: hash.to_string(),
            })
            .await?;
        Ok(match result {
            tl::enums::ChatInvite::Invite(invite) => Some(InvitePreview {
                title: invite.title,
                member_count: invite.participants_count,
                is_broadcast: invite.broadcast,
            }),
            // Already a participant (or only peeking) — nothing to admit.
            _ => None,
        })
    }

    async fn recent_texts(&self, peer: &PeerRef, limit: i32) -> Result<Vec<String>, TgError> {
        let input = Self::packed(peer)?.to_input_peer();
        let (messages, _) = self.get_history(input, 0, 0, limit).await?;
        Ok(messages
            .into_iter()
            .filter_map(|m| match m {
                tl::enums::Message::Message(msg) => Some(msg.message),
                _ => None,
            })
            .collect())
    }

    async fn history_page(
        &self,
        peer: &PeerRef,
        before_id: i32,
        limit: i32,
    ) -> Result<Vec<HistoryMessage>, TgError> {
        let input = Self::packed(peer)?.to_input_peer();
        let (messages, users) = self.get_history(input, before_id, before_id, limit).await?;
        let directory = user_directory(&users);

        Ok(messages
            .into_iter()
            .filter_map(|m| convert_history_message(m, peer, &directory))
            .collect())
    }

    async fn download_photo(&self, location: &PhotoLocation) -> Result<Vec<u8>, TgError> {
        let input_location = self.photo_location_of(location).await?;
        let mut buffer = Vec::new();
        let mut offset: i64 = 0;
        loop {
            let chunk = self
                .client
                .invoke(&tl::functions::upload::GetFile {
                    precise: false,
                    cdn_supported: false,
                    location: input_location.clone(),
                    offset,
                    limit: DOWNLOAD_CHUNK,
                })
                .await?;
            match chunk {
                tl::enums::upload::File::File(f) => {
                    let done = f.bytes.len() < DOWNLOAD_CHUNK as usize;
                    offset += f.bytes.len() as i64;
                    buffer.extend(f.bytes);
                    if done {
                        break;
                    }
                }
                tl::enums::upload::File::CdnRedirect(_) => {
                    return Err(TgError::Unexpected(
                        "cdn redirect with cdn_supported = false".into(),
                    ));
                }
            }
        }
        Ok(buffer)
    }

    async fn read_acknowledge(&self, peer: &PeerRef, max_id: i32) -> Result<(), TgError> {
        let packed = Self::packed(peer)?;
        if let Some(channel) = packed.try_to_input_channel() {
            self.client
                .invoke(&tl::functions::channels::ReadHistory { channel, max_id })
                .await?;
        } else {
            self.client
                .invoke(&tl::functions::messages::ReadHistory {
                    peer: packed.to_input_peer(),
                    max_id,
                })
                .await?;
        }
        Ok(())
    }

    async fn dialogs(&self) -> Result<Vec<DialogSummary>, TgError> {
        let mut iter = self.client.iter_dialogs();
        let mut out = Vec::new();
        while let Some(dialog) = iter.next().await? {
            let chat = dialog.chat();
            let packed = chat.pack();
            out.push(DialogSummary {
                chat_id: marked_id(&packed),
                title: chat.name().unwrap_or_default().to_string(),
            });
        }
        Ok(out)
    }
}

fn prompt(message: &str) -> Result<String, TrawlerError> {
    let mut stdout = io::stdout().lock();
    stdout.write_all(message.as_bytes())?;
    stdout.flush()?;
    let mut line = String::new();
    io::stdin().lock().read_line(&mut line)?;
    Ok(line)
}

fn marked_id(packed: &PackedChat) -> i64 {
    match packed.ty {
        PackedType::User | PackedType::Bot => packed.id,
        PackedType::Chat => -packed.id,
        PackedType::Megagroup | PackedType::Broadcast | PackedType::Gigagroup => {
            mark_channel_id(packed.id)
        }
    }
}

fn chat_kind(packed: &PackedChat) -> ChatKind {
    match packed.ty {
        PackedType::User | PackedType::Bot => ChatKind::Private,
        PackedType::Chat => ChatKind::Group,
        PackedType::Megagroup | PackedType::Gigagroup => ChatKind::Supergroup,
        PackedType::Broadcast => ChatKind::Channel,
    }
}

fn peer_ref(packed: &PackedChat) -> PeerRef {
    PeerRef {
        packed: packed.to_hex(),
        marked_id: marked_id(packed),
    }
}

fn sender_info(chat: &grammers_client::types::Chat) -> Option<UserInfo> {
    match chat {
        grammers_client::types::Chat::User(user) => Some(UserInfo {
            uid: user.id(),
            first_name: user.first_name().map(str::to_string),
            last_name: user.last_name().map(str::to_string),
            username: user.username().map(str::to_string),
            lang: None,
        }),
        _ => None,
    }
}

fn message_event(message: grammers_client::types::Message, edited: bool) -> Option<ChatEvent> {
    // Title edits ride in as service messages; surface them as their own event.
    if let Some(tl::enums::MessageAction::ChatEditTitle(action)) = message.action() {
        let packed = message.chat().pack();
        return Some(ChatEvent::TitleChanged {
            chat_id: marked_id(&packed),
            title: action.title.clone(),
        });
    }

    let chat = message.chat();
    let packed = chat.pack();
    let peer = peer_ref(&packed);

    let photo = message.media().and_then(|media| match media {
        grammers_client::types::Media::Photo(photo) => Some(PhotoHandle {
            file_id: photo.id().to_string(),
            location: Some(PhotoLocation {
                chat: peer.packed.clone(),
                message_id: message.id(),
            }),
        }),
        _ => None,
    });

    if message.text().is_empty() && photo.is_none() {
        return None;
    }

    Some(ChatEvent::Message {
        edited,
        chat: GroupInfo {
            chat_id: peer.marked_id,
            kind: chat_kind(&packed),
            title: chat.name().map(str::to_string),
            username: chat.username().map(str::to_string),
        },
        message_id: message.id(),
        sender: message.sender().as_ref().and_then(sender_info),
        text: message.text().to_string(),
        photo,
        date: message.date().timestamp(),
        peer: Some(peer),
    })
}

fn convert_update(update: Update) -> Option<ChatEvent> {
    match update {
        Update::NewMessage(message) => message_event(message, false),
        Update::MessageEdited(message) => message_event(message, true),
        Update::MessageDeleted(deletion) => Some(ChatEvent::Deleted {
            chat_id: deletion.channel_id().map(mark_channel_id),
            message_ids: deletion.messages().to_vec(),
        }),
        Update::Raw(tl::enums::Update::UserName(change)) => Some(ChatEvent::NameChanged {
            user: UserInfo {
                uid: change.user_id,
                first_name: Some(change.first_name),
                last_name: Some(change.last_name),
                username: change.usernames.into_iter().next().map(|u| {
                    let tl::enums::Username::Username(u) = u;
                    u.username
                }),
                lang: None,
            },
        }),
        _ => None,
    }
}

fn user_directory(users: &[tl::enums::User]) -> HashMap<i64, UserInfo> {
    users
        .iter()
        .filter_map(|u| match u {
            tl::enums::User::User(user) => Some((
                user.id,
                UserInfo {
                    uid: user.id,
                    first_name: user.first_name.clone(),
                    last_name: user.last_name.clone(),
                    username: user.username.clone(),
                    lang: user.lang_code.clone(),
                },
            )),
            tl::enums::User::Empty(_) => None,
        })
        .collect()
}

fn peer_uid(peer: Option<&tl::enums::Peer>) -> Option<i64> {
    match peer {
        Some(tl::enums::Peer::User(u)) => Some(u.user_id),
        _ => None,
    }
}

fn raw_photo_location(
    media: Option<&tl::enums::MessageMedia>,
) -> Option<tl::enums::InputFileLocation> {
    let photo = match media {
        Some(tl::enums::MessageMedia::Photo(media)) => media.photo.as_ref()?,
        _ => return None,
    };
    let tl::enums::Photo::Photo(photo) = photo else {
        return None;
    };

    // Largest downloadable variant wins.
    let thumb = photo
        .sizes
        .iter()
        .rev()
        .find_map(|size| match size {
            tl::enums::PhotoSize::Size(s) => Some(s.r#type.clone()),
            tl::enums::PhotoSize::Progressive(s) => Some(s.r#type.clone()),
            _ => None,
        })?;

    Some(
        tl::types::InputPhotoFileLocation {
            id: photo.id,
            access_hash: photo.access_hash,
            file_reference: photo.file_reference.clone(),
            thumb_size: thumb,
        }
        .into(),
    )
}

fn raw_photo_id(media: Option<&tl::enums::MessageMedia>) -> Option<i64> {
    match media {
        Some(tl::enums::MessageMedia::Photo(media)) => match media.photo.as_ref()? {
            tl::enums::Photo::Photo(photo) => Some(photo.id),
            _ => None,
        },
        _ => None,
    }
}

fn convert_history_message(
    message: tl::enums::Message,
    peer: &PeerRef,
    directory: &HashMap<i64, UserInfo>,
) -> Option<HistoryMessage> {
    match message {
        tl::enums::Message::Message(msg) => {
            let sender = peer_uid(msg.from_id.as_ref()).map(|uid| {
                directory.get(&uid).cloned().unwrap_or(UserInfo {
                    uid,
                    ..Default::default()
                })
            });
            let forward_sender = msg
                .fwd_from
                .as_ref()
                .and_then(|f| {
                    let tl::enums::MessageFwdHeader::Header(header) = f;
                    peer_uid(header.from_id.as_ref())
                })
                .and_then(|uid| directory.get(&uid).cloned());

            let photo = raw_photo_id(msg.media.as_ref()).map(|photo_id| PhotoHandle {
                file_id: photo_id.to_string(),
                location: Some(PhotoLocation {
                    chat: peer.packed.clone(),
                    message_id: msg.id,
                }),
            });

            Some(HistoryMessage {
                message_id: msg.id,
                date: i64::from(msg.date),
                text: msg.message,
                sender,
                forward_sender,
                photo,
                is_service: false,
            })
        }
        tl::enums::Message::Service(msg) => Some(HistoryMessage {
            message_id: msg.id,
            date: i64::from(msg.date),
            is_service: true,
            ..Default::default()
        }),
        tl::enums::Message::Empty(_) => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn marked_ids_follow_the_bot_convention() {
        let user = PackedChat {
            ty: PackedType::User,
            id: 42,
            access_hash: None,
        };
        let group = PackedChat {
            ty: PackedType::Chat,
            id: 9876,
            access_hash: None,
        };
        let channel = PackedChat {
            ty: PackedType::Broadcast,
            id: 1234567890,
            access_hash: Some(1),
        };
        assert_eq!(marked_id(&user), 42);
        assert_eq!(marked_id(&group), -9876);
        assert_eq!(marked_id(&channel), -1001234567890);
    }

    #[test]
    fn peer_refs_round_trip_through_hex() {
        let packed = PackedChat {
            ty: PackedType::Megagroup,
            id: 777,
            access_hash: Some(12345),
        };
        let peer = peer_ref(&packed);
        let back = PackedChat::from_hex(&peer.packed).unwrap();
        assert_eq!(back.id, 777);
        assert_eq!(back.access_hash, Some(12345));
        assert_eq!(chat_kind(&back), ChatKind::Supergroup);
    }
}

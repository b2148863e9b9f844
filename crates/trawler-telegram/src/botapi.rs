//! teloxide-backed [`BotApi`] plus the webhook update decoder.

use async_trait::async_trait;
use teloxide::net::Download;
use teloxide::prelude::*;
use teloxide::types::{ChatKind as TgChatKind, ParseMode, PublicChatKind, Recipient, UpdateKind};

use crate::bot::BotApi;
use crate::error::TgError;
use crate::types::{ChatEvent, ChatKind, ChatSummary, GroupInfo, PhotoHandle, UserInfo};

pub struct TeloxideBot {
    bot: Bot,
    uid: i64,
    token: String,
}

impl TeloxideBot {
    pub fn new(token: &str, uid: i64) -> Self {
        Self {
            bot: Bot::new(token),
            uid,
            token: token.to_string(),
        }
    }

    fn at(username: &str) -> Recipient {
        let name = username.strip_prefix('@').unwrap_or(username);
        Recipient::ChannelUsername(format!("@{name}"))
    }
}

#[async_trait]
impl BotApi for TeloxideBot {
    fn uid(&self) -> i64 {
        self.uid
    }

    fn token(&self) -> &str {
        &self.token
    }

    async fn get_chat(&self, username: &str) -> Result<ChatSummary, TgError> {
        let chat = self.bot.get_chat(Self::at(username)).await?;
        let kind = match &chat.kind {
            TgChatKind::Private(_) => ChatKind::Private,
            TgChatKind::Public(public) => match &public.kind {
                PublicChatKind::Group(_) => ChatKind::Group,
                PublicChatKind::Supergroup(_) => ChatKind::Supergroup,
                PublicChatKind::Channel(_) => ChatKind::Channel,
            },
        };
        Ok(ChatSummary {
            chat_id: chat.id.0,
            kind,
            title: chat.title().map(str::to_string),
            description: chat.description().map(str::to_string),
            username: chat.username().map(str::to_string),
        })
    }

    async fn member_count(&self, username: &str) -> Result<i32, TgError> {
        let count = self.bot.get_chat_member_count(Self::at(username)).await?;
        Ok(count as i32)
    }

    async fn send_html(&self, chat_id: i64, html: &str) -> Result<(), TgError> {
        self.bot
            .send_message(ChatId(chat_id), html)
            .parse_mode(ParseMode::Html)
            .await?;
        Ok(())
    }

    async fn download_by_file_id(&self, file_id: &str) -> Result<Vec<u8>, TgError> {
        let file = self.bot.get_file(file_id).await?;
        let mut buffer: Vec<u8> = Vec::new();
        self.bot
            .download_file(&file.path, &mut buffer)
            .await
            .map_err(|e| TgError::Network(e.to_string()))?;
        Ok(buffer)
    }
}

/// Decode one webhook update into the normalized event, if it is something
/// the pipeline ingests.
pub fn event_from_update(update: teloxide::types::Update) -> Option<ChatEvent> {
    let (message, edited) = match update.kind {
        UpdateKind::Message(m) | UpdateKind::ChannelPost(m) => (m, false),
        UpdateKind::EditedMessage(m) | UpdateKind::EditedChannelPost(m) => (m, true),
        _ => return None,
    };
    event_from_message(message, edited)
}

fn event_from_message(message: Message, edited: bool) -> Option<ChatEvent> {
    let kind = if message.chat.is_private() {
        ChatKind::Private
    } else if message.chat.is_group() {
        ChatKind::Group
    } else if message.chat.is_supergroup() {
        ChatKind::Supergroup
    } else {
        ChatKind::Channel
    };

    let text = message
        .text()
        .or(message.caption())
        .unwrap_or_default()
        .to_string();

    // Largest photo variant carries the best OCR odds.
    let photo = message
        .photo()
        .and_then(|sizes| sizes.iter().max_by_key(|p| p.file.size))
        .map(|p| PhotoHandle {
            file_id: p.file.id.clone(),
            location: None,
        });

    if text.is_empty() && photo.is_none() {
        return None;
    }

    let sender = message.from.as_ref().map(|u| UserInfo {
        uid: u.id.0 as i64,
        first_name: Some(u.first_name.clone()),
        last_name: u.last_name.clone(),
        username: u.username.clone(),
        lang: u.language_code.clone(),
    });

    Some(ChatEvent::Message {
        edited,
        chat: GroupInfo {
            chat_id: message.chat.id.0,
            kind,
            title: message.chat.title().map(str::to_string),
            username: message.chat.username().map(str::to_string),
        },
        message_id: message.id.0,
        sender,
        text,
        photo,
        date: message.date.timestamp(),
        // Read receipts are a user-account behaviour; bots never ack.
        peer: None,
    })
}

/// Admin commands arrive as ordinary messages; split `/cmd arg...`.
pub fn parse_command(text: &str) -> Option<(&str, &str)> {
    let trimmed = text.trim();
    let rest = trimmed.strip_prefix('/')?;
    let (command, arg) = rest.split_once(char::is_whitespace).unwrap_or((rest, ""));
    // "/cmd@botname arg" form used in groups.
    let command = command.split('@').next().unwrap_or(command);
    (!command.is_empty()).then_some((command, arg.trim()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn commands_split_token_and_argument() {
        assert_eq!(parse_command("/fetch -100123"), Some(("fetch", "-100123")));
        assert_eq!(parse_command("/stats"), Some(("stats", "")));
        assert_eq!(
            parse_command("/joinpub@trawlbot foo_group"),
            Some(("joinpub", "foo_group"))
        );
        assert_eq!(parse_command("hello"), None);
        assert_eq!(parse_command("/"), None);
    }
}

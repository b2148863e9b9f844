//! Message ingress (C6): every inbound event becomes persisted rows and
//! fan-out tasks. Nothing here touches the relational store directly — the
//! hot path only enqueues.

use std::time::Instant;

use tracing::{debug, error, info, warn};

use trawler_core::error::IngestError;
use trawler_core::types::{flag, ocr_pending_text, OCR_PENDING_MARK};
use trawler_store::{GroupRecord, NewMessage, UserRecord};
use trawler_telegram::types::{photo_ref_for, ChatEvent, GroupInfo, UserInfo};
use trawler_telegram::{Notify as _, SenderClient, UserClient};

use crate::context::AppContext;
use crate::queues::{self, MarkTask};

/// Persist one message: enqueue the row write and, unless the text came from
/// the back-fill, hand it to link discovery.
pub async fn insert_message(
    ctx: &AppContext,
    row: NewMessage,
    find_link: bool,
) -> Result<(), IngestError> {
    let text = row.text.clone();
    ctx.insert_queue()
        .put(&row)
        .await
        .map_err(IngestError::transient)?;
    if find_link {
        enqueue_find_link(ctx, &text).await?;
    }
    Ok(())
}

/// Queue raw text for link discovery, alarming when the queue looks stuck.
pub async fn enqueue_find_link(ctx: &AppContext, text: &str) -> Result<(), IngestError> {
    let queue = ctx.find_link_queue();
    let depth = queue.qsize().await.map_err(IngestError::transient)?;
    if depth > queues::FIND_LINK_ALARM_DEPTH {
        warn!(depth, "find link queue is backed up");
        ctx.notifier
            .notify("Find link queue full, worker dead?")
            .await;
    }
    queue
        .put(&text.to_string())
        .await
        .map_err(IngestError::transient)
}

/// Refresh a user record unless it was touched within the recency TTL.
pub async fn update_user(ctx: &AppContext, user: &UserInfo) -> Result<(), IngestError> {
    let recency = ctx.user_last_changed();
    if recency
        .contains(&user.uid.to_string())
        .await
        .map_err(IngestError::transient)?
    {
        return Ok(());
    }
    recency
        .add(&user.uid.to_string())
        .await
        .map_err(IngestError::transient)?;
    ctx.entity_queue()
        .put(&queues::EntityTask::User {
            user: UserRecord {
                uid: user.uid,
                username: user.username.clone(),
                first_name: user.first_name.clone(),
                last_name: user.last_name.clone(),
                lang: user.lang.clone(),
            },
        })
        .await
        .map_err(IngestError::transient)
}

/// Refresh a group record unless recently touched; `observer_uid` becomes the
/// master when the group has none yet.
pub async fn update_group(
    ctx: &AppContext,
    observer_uid: i64,
    group: &GroupInfo,
) -> Result<(), IngestError> {
    let recency = ctx.group_last_changed();
    if recency
        .contains(&group.chat_id.to_string())
        .await
        .map_err(IngestError::transient)?
    {
        return Ok(());
    }
    recency
        .add(&group.chat_id.to_string())
        .await
        .map_err(IngestError::transient)?;
    ctx.entity_queue()
        .put(&queues::EntityTask::Group {
            group: GroupRecord {
                gid: group.chat_id,
                name: group.title.clone(),
                link: group.username.clone(),
                master_uid: Some(observer_uid),
            },
        })
        .await
        .map_err(IngestError::transient)
}

/// The C6 fan-out for one normalized event observed by `client_uid`.
pub async fn handle_event(
    ctx: &AppContext,
    client_uid: i64,
    event: ChatEvent,
) -> Result<(), IngestError> {
    match event {
        ChatEvent::Message {
            edited,
            chat,
            message_id,
            sender,
            text,
            photo,
            date,
            peer,
        } => {
            let message_flag = if edited { flag::EDITED } else { flag::NEW };

            let text = match &photo {
                Some(handle) => {
                    let descriptor = photo_ref_for(client_uid, handle);
                    ocr_pending_text(OCR_PENDING_MARK, &descriptor, &text)
                }
                None => text,
            };

            insert_message(
                ctx,
                NewMessage {
                    chat_id: chat.chat_id,
                    message_id,
                    user_id: sender.as_ref().map(|u| u.uid),
                    text,
                    date,
                    flag: message_flag,
                },
                true,
            )
            .await?;

            if let Some(user) = &sender {
                update_user(ctx, user).await?;
            }
            if chat.kind.is_group_like() {
                update_group(ctx, client_uid, &chat).await?;
            }

            // Occasionally look alive inside the configured window.
            if chat.kind.is_group_like() && !edited {
                if let Some(peer) = peer {
                    if crate::online::need_to_be_online(ctx).await {
                        send_read_ack(ctx, client_uid, &peer, message_id).await;
                    }
                }
            }
            Ok(())
        }
        ChatEvent::Deleted {
            chat_id,
            message_ids,
        } => {
            let Some(chat_id) = chat_id else {
                // No chat attribution on this transport; nothing to mark.
                debug!("deletion without chat id dropped");
                return Ok(());
            };
            let queue = ctx.mark_queue();
            for message_id in message_ids {
                queue
                    .put(&MarkTask {
                        chat_id,
                        message_id,
                        tries: 0,
                    })
                    .await
                    .map_err(IngestError::transient)?;
            }
            Ok(())
        }
        ChatEvent::TitleChanged { chat_id, title } => {
            // Force the refresh through by dropping the recency entry first.
            ctx.group_last_changed()
                .discard(&chat_id.to_string())
                .await
                .map_err(IngestError::transient)?;
            update_group(
                ctx,
                client_uid,
                &GroupInfo {
                    chat_id,
                    kind: trawler_telegram::types::ChatKind::Supergroup,
                    title: Some(title),
                    username: None,
                },
            )
            .await
        }
        ChatEvent::NameChanged { user } => {
            ctx.user_last_changed()
                .discard(&user.uid.to_string())
                .await
                .map_err(IngestError::transient)?;
            update_user(ctx, &user).await
        }
    }
}

async fn send_read_ack(
    ctx: &AppContext,
    client_uid: i64,
    peer: &trawler_telegram::types::PeerRef,
    max_id: i32,
) {
    let client: Option<std::sync::Arc<dyn UserClient>> = match ctx.senders.get(client_uid) {
        Some(SenderClient::User(client)) => Some(client),
        _ => None,
    };
    if let Some(client) = client {
        if let Err(e) = client.read_acknowledge(peer, max_id).await {
            warn!(error = %e, "read acknowledge failed");
        }
    }
}

/// Drive one user client's update stream into the fan-out until it ends or
/// shutdown is signalled. Failures are reported and never fatal.
pub async fn pump_user_client(
    ctx: std::sync::Arc<AppContext>,
    client: std::sync::Arc<dyn UserClient>,
    mut shutdown: tokio::sync::watch::Receiver<bool>,
) {
    let uid = client.uid();
    info!(uid, "update pump started");
    loop {
        let event = tokio::select! {
            event = client.next_event() => event,
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    return;
                }
                continue;
            }
        };

        match event {
            Ok(Some(event)) => {
                let started = Instant::now();
                if let Err(e) = handle_event(&ctx, uid, event).await {
                    error!(uid, error = %e, "event fan-out failed");
                    ctx.notifier
                        .notify(&format!("update handler failed on client {uid}: {e}"))
                        .await;
                }
                let global = ctx.global_count();
                let _ = global.incrby("received_message", 1).await;
                let _ = global
                    .incrby("total_used_time_ms", started.elapsed().as_millis() as i64)
                    .await;
            }
            Ok(None) => {
                warn!(uid, "update stream ended");
                return;
            }
            Err(e) => {
                warn!(uid, error = %e, "update stream error");
                tokio::time::sleep(std::time::Duration::from_secs(1)).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::tests_support::{test_bed_with, INVOKER_UID};
    use trawler_telegram::types::{ChatKind, PhotoHandle};

    fn group_message(text: &str, photo: Option<PhotoHandle>) -> ChatEvent {
        ChatEvent::Message {
            edited: false,
            chat: GroupInfo {
                chat_id: -100_555,
                kind: ChatKind::Supergroup,
                title: Some("observed group".into()),
                username: None,
            },
            message_id: 42,
            sender: Some(UserInfo {
                uid: 7,
                first_name: Some("A".into()),
                ..Default::default()
            }),
            text: text.to_string(),
            photo,
            date: 1_700_000_000,
            peer: None,
        }
    }

    #[tokio::test]
    async fn message_fans_out_to_insert_link_and_entities() {
        let bed = test_bed_with(0);
        handle_event(&bed.ctx, INVOKER_UID, group_message("hello", None))
            .await
            .unwrap();

        let insert = bed.ctx.insert_queue().get().await.unwrap().unwrap();
        assert_eq!(insert.chat_id, -100_555);
        assert_eq!(insert.flag, flag::NEW);
        assert_eq!(insert.text, "hello");

        let scanned = bed.ctx.find_link_queue().get().await.unwrap().unwrap();
        assert_eq!(scanned, "hello");

        // One user and one group entity refresh.
        let mut kinds = Vec::new();
        while let Some(task) = bed.ctx.entity_queue().get().await.unwrap() {
            kinds.push(match task {
                queues::EntityTask::User { .. } => "user",
                queues::EntityTask::Group { group } => {
                    assert_eq!(group.master_uid, Some(INVOKER_UID));
                    "group"
                }
            });
        }
        kinds.sort();
        assert_eq!(kinds, vec!["group", "user"]);
    }

    #[tokio::test]
    async fn photo_messages_get_the_sentinel() {
        let bed = test_bed_with(0);
        let photo = PhotoHandle {
            file_id: "AgAD".into(),
            location: None,
        };
        handle_event(&bed.ctx, INVOKER_UID, group_message("abc", Some(photo)))
            .await
            .unwrap();

        let insert = bed.ctx.insert_queue().get().await.unwrap().unwrap();
        assert!(insert.text.starts_with(OCR_PENDING_MARK));
        let (descriptor, caption) =
            trawler_core::types::parse_ocr_pending(&insert.text).unwrap();
        assert_eq!(caption, "abc");
        assert_eq!(descriptor.client, INVOKER_UID);
        assert_eq!(descriptor.file_id.as_deref(), Some("AgAD"));
    }

    #[tokio::test]
    async fn recency_suppresses_repeat_entity_refreshes() {
        let bed = test_bed_with(0);
        for _ in 0..3 {
            handle_event(&bed.ctx, INVOKER_UID, group_message("hi", None))
                .await
                .unwrap();
        }
        let mut entity_tasks = 0;
        while bed.ctx.entity_queue().get().await.unwrap().is_some() {
            entity_tasks += 1;
        }
        assert_eq!(entity_tasks, 2);
    }

    #[tokio::test]
    async fn deletions_enqueue_one_mark_per_id() {
        let bed = test_bed_with(0);
        handle_event(
            &bed.ctx,
            INVOKER_UID,
            ChatEvent::Deleted {
                chat_id: Some(-100),
                message_ids: vec![1, 2, 3],
            },
        )
        .await
        .unwrap();
        let mut marks = Vec::new();
        while let Some(task) = bed.ctx.mark_queue().get().await.unwrap() {
            marks.push(task.message_id);
        }
        assert_eq!(marks, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn title_change_bypasses_recency() {
        let bed = test_bed_with(0);
        handle_event(&bed.ctx, INVOKER_UID, group_message("hi", None))
            .await
            .unwrap();
        while bed.ctx.entity_queue().get().await.unwrap().is_some() {}

        handle_event(
            &bed.ctx,
            INVOKER_UID,
            ChatEvent::TitleChanged {
                chat_id: -100_555,
                title: "renamed".into(),
            },
        )
        .await
        .unwrap();

        let task = bed.ctx.entity_queue().get().await.unwrap().unwrap();
        match task {
            queues::EntityTask::Group { group } => {
                assert_eq!(group.name.as_deref(), Some("renamed"))
            }
            other => panic!("unexpected task: {other:?}"),
        }
    }
}

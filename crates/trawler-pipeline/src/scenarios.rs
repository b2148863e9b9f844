//! End-to-end scenarios over in-memory backends: ingress through discovery,
//! admission, OCR and deletion marking, driven worker-by-worker.

use trawler_core::types::{flag, OCR_PENDING_MARK};
use trawler_core::util::now_ts;
use trawler_media::OcrOutcome;
use trawler_store::{NewMessage, Store as _};
use trawler_telegram::types::{
    ChatEvent, ChatKind, ChatSummary, GroupInfo, InvitePreview, PhotoHandle, UserInfo,
};

use crate::context::tests_support::{test_bed_with, TestBed, INVOKER_UID};
use crate::fabric::Worker;
use crate::ingress;
use crate::workers::{InviteWorker, MessageInsertWorker, MessageMarkWorker, OcrWorker};

fn group_event(text: &str, photo: Option<PhotoHandle>, observer: i64) -> (i64, ChatEvent) {
    (
        observer,
        ChatEvent::Message {
            edited: false,
            chat: GroupInfo {
                chat_id: -100_777,
                kind: ChatKind::Supergroup,
                title: Some("watched".into()),
                username: None,
            },
            message_id: 64,
            sender: Some(UserInfo {
                uid: 3,
                first_name: Some("S".into()),
                ..Default::default()
            }),
            text: text.into(),
            photo,
            date: 1_700_000_100,
            peer: None,
        },
    )
}

/// Run every queued FindLink payload to completion.
async fn drain_find_link(bed: &TestBed) {
    let worker = crate::workers::FindLinkWorker;
    while let Some(text) = bed.ctx.find_link_queue().get().await.unwrap() {
        worker
            .handle(&bed.ctx, serde_json::to_string(&text).unwrap())
            .await
            .unwrap();
    }
}

#[tokio::test]
async fn s1_public_link_discovered_but_too_small_to_join() {
    let bed = test_bed_with(3);
    for bot in &bed.bots {
        bot.chats.lock().unwrap().insert(
            "foo_group".into(),
            Ok(ChatSummary {
                chat_id: -1_001_111,
                kind: ChatKind::Supergroup,
                title: Some("foo".into()),
                description: None,
                username: Some("foo_group".into()),
            }),
        );
        // Member count defaults to 0 — below every limit.
    }

    let (observer, event) = group_event("hello https://t.me/foo_group world", None, INVOKER_UID);
    ingress::handle_event(&bed.ctx, observer, event).await.unwrap();
    drain_find_link(&bed).await;

    assert!(bed
        .ctx
        .recent_found_links()
        .contains("foo_group")
        .await
        .unwrap());
    assert!(bed.ctx.join_queue().get().await.unwrap().is_none());

    let group = bed.store.group_by_gid(-1_001_111).await.unwrap().unwrap();
    assert_eq!(group.master_uid, None);
    assert_eq!(group.link.as_deref(), Some("foo_group"));

    // Seen again within the TTL: no second probe reaches the store.
    let (observer, event) = group_event("again t.me/foo_group", None, INVOKER_UID);
    ingress::handle_event(&bed.ctx, observer, event).await.unwrap();
    drain_find_link(&bed).await;
    assert!(bed.store.group_by_gid(-1_001_111).await.unwrap().is_some());
}

#[tokio::test]
async fn s2_private_invite_recorded_and_suggested_to_admins() {
    let bed = test_bed_with(3);
    let hash = "AAAAAAAAAAAAAAAAAAAAAA";
    bed.invoker.invite_previews.lock().unwrap().insert(
        hash.into(),
        Some(InvitePreview {
            title: "hidden door".into(),
            member_count: 150,
            is_broadcast: false,
        }),
    );

    let (observer, event) = group_event(&format!("t.me/joinchat/{hash}"), None, INVOKER_UID);
    ingress::handle_event(&bed.ctx, observer, event).await.unwrap();
    drain_find_link(&bed).await;

    // The invite tuple reached its worker and then the store.
    let invite = bed.ctx.invite_queue().get().await.unwrap().unwrap();
    InviteWorker
        .handle(&bed.ctx, serde_json::to_string(&invite).unwrap())
        .await
        .unwrap();
    let stored = bed.store.invites();
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].invite_hash, hash);
    assert_eq!(stored[0].inviter_uid, 0);
    assert_eq!(stored[0].gid, 0);

    // No join queued; exactly one manual-join suggestion.
    assert!(bed.ctx.join_queue().get().await.unwrap().is_none());
    let notices = bed.notifier.messages();
    assert_eq!(notices.len(), 1);
    assert!(notices[0].contains("/joinprv"));
}

#[tokio::test]
async fn s3_photo_ingestion_flows_into_ocr() {
    let bed = test_bed_with(1);
    let observer = bed.bots[0].uid;
    bed.bots[0]
        .files
        .lock()
        .unwrap()
        .insert("AgAD".into(), vec![0xFF, 0xD8]);
    *bed.media.outcome.lock().unwrap() = OcrOutcome {
        ocr: Some("XYZ".into()),
        barcode: None,
    };

    let (observer, event) = group_event(
        "abc",
        Some(PhotoHandle {
            file_id: "AgAD".into(),
            location: None,
        }),
        observer,
    );
    ingress::handle_event(&bed.ctx, observer, event).await.unwrap();

    // The persisted text carries sentinel, descriptor, caption.
    let row_task = bed.ctx.insert_queue().get().await.unwrap().unwrap();
    assert!(row_task.text.starts_with(OCR_PENDING_MARK));
    MessageInsertWorker
        .handle(&bed.ctx, serde_json::to_string(&row_task).unwrap())
        .await
        .unwrap();

    // The OCR queue holds the surrogate id; running the worker rewrites the row.
    let ocr_task = bed.ctx.ocr_queue().get().await.unwrap().unwrap();
    let id = ocr_task.id;
    assert_eq!(id, bed.store.messages()[0].id);
    OcrWorker
        .handle(&bed.ctx, serde_json::to_string(&ocr_task).unwrap())
        .await
        .unwrap();

    let row = bed.store.message_by_id(id).await.unwrap().unwrap();
    assert_eq!(row.text, "XYZ\nabc");
}

#[tokio::test]
async fn s4_deletion_racing_the_insert() {
    let bed = test_bed_with(0);

    // The deletion arrives first.
    ingress::handle_event(
        &bed.ctx,
        INVOKER_UID,
        ChatEvent::Deleted {
            chat_id: Some(-100),
            message_ids: vec![42],
        },
    )
    .await
    .unwrap();

    let mark = bed.ctx.mark_queue().get().await.unwrap().unwrap();
    MessageMarkWorker
        .handle(&bed.ctx, serde_json::to_string(&mark).unwrap())
        .await
        .unwrap();

    // Row still missing: the task rescheduled itself.
    let retry = bed.ctx.mark_queue().get().await.unwrap().unwrap();
    assert_eq!(retry.tries, 1);

    // Now the insert lands, then the rescheduled mark runs.
    MessageInsertWorker
        .handle(
            &bed.ctx,
            serde_json::to_string(&NewMessage {
                chat_id: -100,
                message_id: 42,
                user_id: Some(1),
                text: "late row".into(),
                date: 1,
                flag: flag::NEW,
            })
            .unwrap(),
        )
        .await
        .unwrap();
    MessageMarkWorker
        .handle(&bed.ctx, serde_json::to_string(&retry).unwrap())
        .await
        .unwrap();

    let rows = bed.store.messages();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].flag & flag::DELETED, flag::DELETED);
}

#[tokio::test]
async fn s6_rate_limited_bot_sits_out_the_penalty() {
    let bed = test_bed_with(3);
    for bot in &bed.bots {
        bot.chats.lock().unwrap().insert(
            "ratelimited".into(),
            Err(trawler_telegram::TgError::RetryAfter(60)),
        );
    }

    let (gid, joined) =
        crate::discover::test_and_join_public_channel(&bed.ctx, "ratelimited", false)
            .await
            .unwrap();
    assert_eq!(gid, None);
    assert!(!joined);

    // Exactly one token took the penalty, stamped ~now+60.
    let penalties = trawler_cache::Dict::new(&bed.ctx.cache, "bot_info");
    let entries = penalties.items().await.unwrap();
    assert_eq!(entries.len(), 1);
    let until: i64 = entries[0].1.parse().unwrap();
    assert!((until - now_ts() - 60).abs() <= 2);

    // Two usable bots is below the floor: probing is suspended entirely.
    assert!(bed.ctx.bots.get_available_bot().await.unwrap().is_none());
}

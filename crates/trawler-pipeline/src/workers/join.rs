//! Join worker: executes queued joins one at a time, honouring flood waits
//! and the channels-quota latch.

use std::time::Duration;

use tracing::warn;

use trawler_core::error::IngestError;
use trawler_core::util::tg_html_entity;
use trawler_telegram::{Notify as _, TgError, UserClient as _};

use crate::context::AppContext;
use crate::fabric::Worker;
use crate::queues::{self, JoinTask, LinkType};

pub struct JoinGroupWorker;

#[async_trait::async_trait]
impl Worker for JoinGroupWorker {
    fn name(&self) -> &'static str {
        queues::JOIN
    }

    async fn handle(&self, ctx: &AppContext, payload: String) -> Result<(), IngestError> {
        let task: JoinTask = serde_json::from_str(&payload)?;
        let invoker = ctx.senders.invoker();

        let (result, full_link) = match task.link_type {
            LinkType::Public => {
                let peer = match &task.peer {
                    Some(peer) => Some(peer.clone()),
                    None => match invoker.resolve_channel(&task.link).await {
                        Ok(peer) => peer,
                        Err(TgError::FloodWait(_)) => {
                            // Resolution flooded; put the task back and let
                            // the fabric pace us.
                            warn!(link = %task.link, "get group via username flooded");
                            ctx.join_queue()
                                .put(&task)
                                .await
                                .map_err(IngestError::transient)?;
                            return Ok(());
                        }
                        Err(e) => return Err(e.into()),
                    },
                };
                let Some(peer) = peer else {
                    return Err(IngestError::NotFound(task.link.clone()));
                };
                (
                    invoker.join_channel(&peer).await,
                    format!("@{}", task.link),
                )
            }
            LinkType::Private => (
                invoker.import_invite(&task.link).await,
                format!("t.me/joinchat/{}", task.link),
            ),
        };

        let global = ctx.global_count();
        match result {
            Ok(()) => {
                ctx.stats
                    .record(
                        "bot",
                        &[
                            ("type", "join"),
                            (
                                "group_type",
                                match task.link_type {
                                    LinkType::Public => "public",
                                    LinkType::Private => "private",
                                },
                            ),
                        ],
                        "count",
                        1,
                    )
                    .await
                    .map_err(IngestError::transient)?;
                ctx.notifier
                    .notify(&format!(
                        "joined {} {}\n{} ({full_link})\nmembers: {}",
                        match task.link_type {
                            LinkType::Public => "public",
                            LinkType::Private => "private",
                        },
                        task.group_type,
                        tg_html_entity(&task.title),
                        task.member_count,
                    ))
                    .await;
                global
                    .set("full", "0")
                    .await
                    .map_err(IngestError::transient)?;
                Ok(())
            }
            Err(TgError::ChannelsTooMuch) => {
                // Latch: the operator hears about a full account exactly once
                // per 0 -> 1 transition.
                let was = global
                    .get("full")
                    .await
                    .map_err(IngestError::transient)?
                    .unwrap_or_else(|| "0".to_string());
                global
                    .set("full", "1")
                    .await
                    .map_err(IngestError::transient)?;
                if was != "1" {
                    ctx.notifier
                        .notify("Too many groups! It's time to sign up for a new account")
                        .await;
                }
                Ok(())
            }
            Err(TgError::FloodWait(seconds)) => {
                ctx.join_queue()
                    .put(&task)
                    .await
                    .map_err(IngestError::transient)?;
                ctx.notifier
                    .notify(&format!(
                        "Join group triggered flood, sleeping for {seconds} seconds."
                    ))
                    .await;
                tokio::time::sleep(Duration::from_secs(u64::from(seconds))).await;
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::tests_support::test_bed_with;
    use trawler_telegram::types::PeerRef;

    fn public_task() -> String {
        serde_json::to_string(&JoinTask {
            link_type: LinkType::Public,
            link: "foo_group".into(),
            peer: Some(PeerRef {
                packed: "feed".into(),
                marked_id: -100_1,
            }),
            group_type: "supergroup".into(),
            title: "Foo <Group>".into(),
            member_count: 12_000,
        })
        .unwrap()
    }

    #[tokio::test]
    async fn successful_joins_notify_and_reset_the_latch() {
        let bed = test_bed_with(0);
        JoinGroupWorker
            .handle(&bed.ctx, public_task())
            .await
            .unwrap();

        assert_eq!(bed.invoker.joined.lock().unwrap().len(), 1);
        let notices = bed.notifier.messages();
        assert_eq!(notices.len(), 1);
        assert!(notices[0].contains("joined public supergroup"));
        // HTML escaped title.
        assert!(notices[0].contains("Foo &lt;Group&gt;"));
        assert_eq!(
            bed.ctx.global_count().get("full").await.unwrap().as_deref(),
            Some("0")
        );
    }

    #[tokio::test]
    async fn quota_latch_notifies_exactly_once() {
        let bed = test_bed_with(0);
        bed.invoker
            .join_errors
            .lock()
            .unwrap()
            .extend([TgError::ChannelsTooMuch, TgError::ChannelsTooMuch]);

        JoinGroupWorker
            .handle(&bed.ctx, public_task())
            .await
            .unwrap();
        JoinGroupWorker
            .handle(&bed.ctx, public_task())
            .await
            .unwrap();

        assert_eq!(bed.notifier.messages().len(), 1);
        assert_eq!(
            bed.ctx.global_count().get("full").await.unwrap().as_deref(),
            Some("1")
        );
        // Neither attempt is retried.
        assert!(bed.ctx.join_queue().get().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn private_joins_import_the_invite() {
        let bed = test_bed_with(0);
        let task = serde_json::to_string(&JoinTask {
            link_type: LinkType::Private,
            link: "AAAAAAAAAAAAAAAAAAAAAA".into(),
            peer: None,
            group_type: "group".into(),
            title: "secret".into(),
            member_count: 5,
        })
        .unwrap();
        JoinGroupWorker.handle(&bed.ctx, task).await.unwrap();
        assert_eq!(
            bed.invoker.imported.lock().unwrap().as_slice(),
            ["AAAAAAAAAAAAAAAAAAAAAA"]
        );
    }
}

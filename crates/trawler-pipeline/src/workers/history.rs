//! History back-fill (C10): page a joined group backward from its earliest
//! stored message, persisting as we go, until a pass finds nothing new.

use std::time::Duration;

use tracing::{info, warn};

use trawler_core::error::IngestError;
use trawler_core::types::{flag, ocr_pending_text, OCR_HISTORY_MARK};
use trawler_core::util::now_ts;
use trawler_store::NewMessage;
use trawler_telegram::types::{photo_ref_for, PeerRef};
use trawler_store::Store as _;
use trawler_telegram::{Notify as _, SenderClient, TgError, UserClient};

use crate::context::AppContext;
use crate::fabric::Worker;
use crate::ingress;
use crate::queues::{self, HistoryTask};

const PAGE_SIZE: i32 = 100;
/// Pacing between persisted messages, matching the iterator's disabled wait.
const SAVE_PACE: Duration = Duration::from_millis(10);

pub struct FetchHistoryWorker;

#[async_trait::async_trait]
impl Worker for FetchHistoryWorker {
    fn name(&self) -> &'static str {
        queues::HISTORY
    }

    async fn handle(&self, ctx: &AppContext, payload: String) -> Result<(), IngestError> {
        let task: HistoryTask = serde_json::from_str(&payload)?;
        let gid = task.gid;

        let group = ctx
            .store
            .group_by_gid(gid)
            .await
            .map_err(|e| IngestError::Transient(e.to_string()))?;
        let first = ctx
            .store
            .min_message_id(gid)
            .await
            .map_err(|e| IngestError::Transient(e.to_string()))?;

        let (Some(group), Some(mut first)) = (group, first) else {
            ctx.notifier
                .notify(&format!(
                    "fetch: No message id detected or group not joined ever before for group {gid}"
                ))
                .await;
            return Ok(());
        };

        let master = group.master_uid.unwrap_or_default();
        let client: std::sync::Arc<dyn UserClient> = match ctx.senders.get(master) {
            Some(SenderClient::User(client)) => client,
            Some(SenderClient::Bot(_)) => {
                ctx.notifier
                    .notify(&format!(
                        "Group {}(@{}) is managed by a bot ({master}), cannot fetch information",
                        group.name.as_deref().unwrap_or("?"),
                        group.link.as_deref().unwrap_or("?"),
                    ))
                    .await;
                return Ok(());
            }
            None => {
                ctx.notifier
                    .notify(&format!("fetch: no client for master {master} of group {gid}"))
                    .await;
                return Ok(());
            }
        };

        let peer = PeerRef::from_marked_gid(gid);
        let status = ctx.status_of(self.name());

        loop {
            let prev = first;
            match self.fetch_pass(ctx, &client, &peer, gid, &mut first).await {
                Ok(()) => {
                    if prev == first {
                        // A full pass with no movement: everything is in.
                        status
                            .delete(&gid.to_string())
                            .await
                            .map_err(IngestError::transient)?;
                        ctx.notifier
                            .notify(&format!(
                                "Group {}(@{}) all fetched by {master}, last message id is {prev}",
                                group.name.as_deref().unwrap_or("?"),
                                group.link.as_deref().unwrap_or("?"),
                            ))
                            .await;
                        return Ok(());
                    }
                }
                Err(TgError::FloodWait(seconds)) => {
                    info!(gid, seconds, "history paging flooded");
                    tokio::time::sleep(Duration::from_secs(u64::from(seconds) + 1)).await;
                }
                Err(TgError::ChannelPrivate) => {
                    ctx.notifier
                        .notify(&format!(
                            "fetch worker failed: group {gid} (managed by {master}) kicked us"
                        ))
                        .await;
                    return Ok(());
                }
                Err(TgError::RpcFail) => continue,
                Err(e) => {
                    warn!(gid, error = %e, "history paging error");
                    ctx.notifier
                        .notify(&format!("fetch worker unknown exception: {e}"))
                        .await;
                }
            }
        }
    }
}

impl FetchHistoryWorker {
    /// One backward sweep: page from `first` toward the beginning, persisting
    /// every message and advancing the cursor.
    async fn fetch_pass(
        &self,
        ctx: &AppContext,
        client: &std::sync::Arc<dyn UserClient>,
        peer: &PeerRef,
        gid: i64,
        first: &mut i32,
    ) -> Result<(), TgError> {
        loop {
            let page = client.history_page(peer, *first, PAGE_SIZE).await?;
            if page.is_empty() {
                return Ok(());
            }
            for message in page {
                *first = message.message_id;
                if message.is_service {
                    continue;
                }
                self.save(ctx, client.uid(), gid, &message)
                    .await
                    .map_err(|e| TgError::Unexpected(e.to_string()))?;
                tokio::time::sleep(SAVE_PACE).await;
            }
        }
    }

    async fn save(
        &self,
        ctx: &AppContext,
        master: i64,
        gid: i64,
        message: &trawler_telegram::types::HistoryMessage,
    ) -> Result<(), IngestError> {
        let text = match &message.photo {
            Some(handle) => {
                // History photos are never OCR'd inline; the OCR worker picks
                // the sentinel up once the insert lands.
                let descriptor = photo_ref_for(master, handle);
                ocr_pending_text(OCR_HISTORY_MARK, &descriptor, &message.text)
            }
            None => message.text.clone(),
        };

        ctx.stats
            .record(
                "bot",
                &[("master", &master.to_string()), ("type", "history")],
                "count",
                1,
            )
            .await
            .map_err(IngestError::transient)?;

        // No link discovery on back-fill: rows would feed the pipeline that
        // triggered this fetch.
        ingress::insert_message(
            ctx,
            NewMessage {
                chat_id: gid,
                message_id: message.message_id,
                user_id: message.sender.as_ref().map(|u| u.uid),
                text,
                date: message.date,
                flag: flag::NEW,
            },
            false,
        )
        .await?;

        if let Some(sender) = &message.sender {
            ingress::update_user(ctx, sender).await?;
        }
        if let Some(forwarded) = &message.forward_sender {
            ingress::update_user(ctx, forwarded).await?;
        }

        let status = ctx.status_of(queues::HISTORY);
        status
            .set("last", &now_ts().to_string())
            .await
            .map_err(IngestError::transient)?;
        status
            .set(&gid.to_string(), &message.message_id.to_string())
            .await
            .map_err(IngestError::transient)?;
        Ok(())
    }
}

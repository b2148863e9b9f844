//! Invite worker: persists probed private invites.

use trawler_core::error::IngestError;
use trawler_store::Store as _;

use crate::context::AppContext;
use crate::fabric::Worker;
use crate::queues::{self, InviteTask};

pub struct InviteWorker;

#[async_trait::async_trait]
impl Worker for InviteWorker {
    fn name(&self) -> &'static str {
        queues::INVITE
    }

    async fn handle(&self, ctx: &AppContext, payload: String) -> Result<(), IngestError> {
        let invite: InviteTask = serde_json::from_str(&payload)?;
        ctx.stats
            .record("bot", &[("type", "invite")], "count", 1)
            .await
            .map_err(IngestError::transient)?;
        ctx.store
            .insert_invite(&invite)
            .await
            .map_err(|e| IngestError::Transient(e.to_string()))
    }
}

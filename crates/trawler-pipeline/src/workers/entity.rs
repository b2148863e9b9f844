//! Entity worker: applies user and group upserts with their history rules,
//! keeping the relational store off the hot ingress path.

use trawler_core::error::IngestError;
use trawler_core::util::now_ts;
use trawler_store::Store as _;

use crate::context::AppContext;
use crate::fabric::Worker;
use crate::queues::{self, EntityTask};

pub struct EntityUpdateWorker;

#[async_trait::async_trait]
impl Worker for EntityUpdateWorker {
    fn name(&self) -> &'static str {
        queues::ENTITY
    }

    async fn handle(&self, ctx: &AppContext, payload: String) -> Result<(), IngestError> {
        let task: EntityTask = serde_json::from_str(&payload)?;
        let now = now_ts();
        match task {
            EntityTask::User { user } => ctx
                .store
                .apply_user_update(&user, now)
                .await
                .map_err(|e| IngestError::Transient(e.to_string())),
            EntityTask::Group { group } => ctx
                .store
                .apply_group_update(&group, now)
                .await
                .map_err(|e| IngestError::Transient(e.to_string())),
        }
    }
}

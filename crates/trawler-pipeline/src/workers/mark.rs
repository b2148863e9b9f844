//! Mark worker: ORs the deleted bit into existing rows; a deletion racing its
//! insert is retried a couple of times, then given up.

use tracing::debug;

use trawler_core::error::IngestError;
use trawler_store::Store as _;

use crate::context::AppContext;
use crate::fabric::Worker;
use crate::queues::{self, MarkTask};

/// Total attempts before a mark for a row we never saw is abandoned.
const MAX_TRIES: u32 = 2;

pub struct MessageMarkWorker;

#[async_trait::async_trait]
impl Worker for MessageMarkWorker {
    fn name(&self) -> &'static str {
        queues::MARK
    }

    async fn handle(&self, ctx: &AppContext, payload: String) -> Result<(), IngestError> {
        let mut task: MarkTask = serde_json::from_str(&payload)?;

        let exists = ctx
            .store
            .message_exists(task.chat_id, task.message_id)
            .await
            .map_err(|e| IngestError::Transient(e.to_string()))?;

        if !exists {
            task.tries += 1;
            if task.tries < MAX_TRIES {
                ctx.mark_queue()
                    .put(&task)
                    .await
                    .map_err(IngestError::transient)?;
            } else {
                debug!(
                    chat_id = task.chat_id,
                    message_id = task.message_id,
                    "row never arrived, mark abandoned"
                );
            }
            return Ok(());
        }

        ctx.store
            .mark_deleted(task.chat_id, task.message_id)
            .await
            .map_err(|e| IngestError::Transient(e.to_string()))?;
        Ok(())
    }
}

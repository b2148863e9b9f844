//! FindLink worker: runs link discovery over queued raw texts.

use trawler_core::error::IngestError;

use crate::context::AppContext;
use crate::discover::find_link_to_join;
use crate::fabric::Worker;
use crate::queues;

pub struct FindLinkWorker;

#[async_trait::async_trait]
impl Worker for FindLinkWorker {
    fn name(&self) -> &'static str {
        queues::FIND_LINK
    }

    async fn handle(&self, ctx: &AppContext, payload: String) -> Result<(), IngestError> {
        // The queue carries JSON-encoded raw text.
        let text: String = serde_json::from_str(&payload)?;
        find_link_to_join(ctx, &text).await
    }
}

//! Insert worker: writes message rows and hands sentinel-bearing ones to the
//! OCR queue once their surrogate id is known.

use trawler_core::error::IngestError;
use trawler_core::types::has_ocr_mark;
use trawler_store::Store as _;

use crate::context::AppContext;
use crate::fabric::Worker;
use crate::queues::{self, InsertTask, OcrTask};

pub struct MessageInsertWorker;

#[async_trait::async_trait]
impl Worker for MessageInsertWorker {
    fn name(&self) -> &'static str {
        queues::INSERT
    }

    async fn handle(&self, ctx: &AppContext, payload: String) -> Result<(), IngestError> {
        let task: InsertTask = serde_json::from_str(&payload)?;
        let id = ctx
            .store
            .insert_message(&task)
            .await
            .map_err(|e| IngestError::Transient(e.to_string()))?;

        if has_ocr_mark(&task.text) {
            ctx.ocr_queue()
                .put(&OcrTask { id, tries: 0 })
                .await
                .map_err(IngestError::transient)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::tests_support::test_bed_with;
    use trawler_core::types::{flag, ocr_pending_text, PhotoRef, OCR_PENDING_MARK};
    use trawler_store::NewMessage;

    fn row(text: String) -> String {
        serde_json::to_string(&NewMessage {
            chat_id: -100,
            message_id: 1,
            user_id: Some(5),
            text,
            date: 1_700_000_000,
            flag: flag::NEW,
        })
        .unwrap()
    }

    #[tokio::test]
    async fn plain_rows_do_not_reach_the_ocr_queue() {
        let bed = test_bed_with(0);
        MessageInsertWorker
            .handle(&bed.ctx, row("plain text".into()))
            .await
            .unwrap();
        assert_eq!(bed.store.messages().len(), 1);
        assert!(bed.ctx.ocr_queue().get().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn sentinel_rows_enqueue_their_surrogate_id() {
        let bed = test_bed_with(0);
        let photo = PhotoRef {
            client: 1,
            file_id: Some("f".into()),
            location: None,
            path: "2026/08".into(),
            filename: "1-f.jpg".into(),
        };
        MessageInsertWorker
            .handle(&bed.ctx, row(ocr_pending_text(OCR_PENDING_MARK, &photo, "cap")))
            .await
            .unwrap();

        let task = bed.ctx.ocr_queue().get().await.unwrap().unwrap();
        assert_eq!(task.id, bed.store.messages()[0].id);
    }
}

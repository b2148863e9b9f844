//! OCR coordinator (C9): single-flight image enrichment over the daily cache.
//!
//! The message row is re-read (it may not be durable yet), the photo is
//! downloaded by whichever account observed it, uploaded to blob storage, run
//! through the OCR service, and the row's text rewritten in place. The daily
//! cache keeps concurrent workers and repeated retries from doing the
//! expensive part twice.

use std::time::Duration;

use tracing::{debug, info, warn};

use trawler_core::error::IngestError;
use trawler_core::types::{
    file_id_from_filename, parse_ocr_pending, PhotoRef, OCR_FAILED_MARK, OCR_PROCESSING,
};
use trawler_store::Store as _;
use trawler_telegram::{BotApi as _, SenderClient, TgError, UserClient as _};

use crate::context::AppContext;
use crate::fabric::Worker;
use crate::queues::{self, OcrTask};

/// How often a missing row is rescheduled before we give up on it.
const ROW_RETRIES: u32 = 1000;
/// How long we wait behind another worker's PROCESSING marker.
const PROCESSING_RETRIES: u32 = 100;
const PROCESSING_PAUSE: Duration = Duration::from_millis(100);

pub struct OcrWorker;

#[async_trait::async_trait]
impl Worker for OcrWorker {
    fn name(&self) -> &'static str {
        queues::OCR
    }

    async fn handle(&self, ctx: &AppContext, payload: String) -> Result<(), IngestError> {
        let mut task: OcrTask = serde_json::from_str(&payload)?;

        // The insert might not be flushed yet; reschedule with a wide bound.
        let Some(row) = ctx
            .store
            .message_by_id(task.id)
            .await
            .map_err(|e| IngestError::Transient(e.to_string()))?
        else {
            task.tries += 1;
            if task.tries < ROW_RETRIES {
                warn!(id = task.id, tries = task.tries, "ocr row not found yet");
                ctx.ocr_queue()
                    .put(&task)
                    .await
                    .map_err(IngestError::transient)?;
                tokio::time::sleep(PROCESSING_PAUSE).await;
            }
            return Ok(());
        };

        let Some((photo, caption)) = parse_ocr_pending(&row.text) else {
            // Already enriched, or never a pending row; nothing to do.
            debug!(id = task.id, "row carries no ocr sentinel, skip");
            return Ok(());
        };
        let caption = caption.to_string();

        let file_id = file_id_from_filename(&photo.filename)
            .map(str::to_string)
            .or_else(|| photo.file_id.clone())
            .ok_or_else(|| IngestError::programmer("ocr descriptor without file id"))?;

        info!(id = task.id, file_id, "ocr started");
        let cache = ctx.ocr_cache();

        let result = match cache
            .get(&file_id)
            .await
            .map_err(IngestError::transient)?
        {
            Some(state) if state == OCR_PROCESSING => {
                // Someone else is on it; wait our turn, then take over the
                // lead if they never finish.
                task.tries += 1;
                if task.tries < PROCESSING_RETRIES {
                    tokio::time::sleep(PROCESSING_PAUSE).await;
                } else {
                    task.tries = 0;
                    cache
                        .delete(&file_id)
                        .await
                        .map_err(IngestError::transient)?;
                }
                ctx.ocr_queue()
                    .put(&task)
                    .await
                    .map_err(IngestError::transient)?;
                return Ok(());
            }
            Some(cached) => {
                info!(id = task.id, "ocr cached");
                cached
            }
            None => {
                cache
                    .set(&file_id, OCR_PROCESSING)
                    .await
                    .map_err(IngestError::transient)?;
                let result = match self.run_ocr(ctx, &photo).await {
                    Ok(text) => text,
                    Err(OcrFailure::Retryable(e)) => {
                        // Downloads blocked by flood waits or lost auth: the
                        // task retries later and PROCESSING stays in place so
                        // nobody else burns the same download.
                        warn!(id = task.id, error = %e, "ocr download deferred");
                        ctx.ocr_queue()
                            .put(&task)
                            .await
                            .map_err(IngestError::transient)?;
                        return Ok(());
                    }
                    Err(OcrFailure::Fatal(e)) => {
                        warn!(id = task.id, error = %e, "ocr failed for good");
                        let descriptor = serde_json::to_string(&photo)?;
                        format!("{OCR_FAILED_MARK}\n{descriptor}")
                    }
                };
                cache
                    .set(&file_id, &result)
                    .await
                    .map_err(IngestError::transient)?;
                info!(id = task.id, "ocr complete");
                result
            }
        };

        ctx.store
            .set_message_text(task.id, &format!("{result}\n{caption}"))
            .await
            .map_err(|e| IngestError::Transient(e.to_string()))?;
        Ok(())
    }
}

enum OcrFailure {
    /// Try the whole task again later; the marker stays.
    Retryable(String),
    /// Record the failure sentinel instead of a result.
    Fatal(String),
}

impl OcrWorker {
    /// Download, upload, recognize. The expensive path — runs at most once
    /// per file id per day.
    async fn run_ocr(&self, ctx: &AppContext, photo: &PhotoRef) -> Result<String, OcrFailure> {
        let bytes = match ctx.senders.get(photo.client) {
            Some(SenderClient::User(client)) => {
                let location = photo
                    .location
                    .as_ref()
                    .ok_or_else(|| OcrFailure::Fatal("descriptor without location".into()))?;
                match client.download_photo(location).await {
                    Ok(bytes) => bytes,
                    Err(e @ (TgError::FloodWait(_) | TgError::AuthKeyUnregistered)) => {
                        return Err(OcrFailure::Retryable(e.to_string()))
                    }
                    Err(e) => return Err(OcrFailure::Fatal(e.to_string())),
                }
            }
            Some(SenderClient::Bot(bot)) => {
                let file_id = photo
                    .file_id
                    .as_ref()
                    .ok_or_else(|| OcrFailure::Fatal("descriptor without file id".into()))?;
                match bot.download_by_file_id(file_id).await {
                    Ok(bytes) => bytes,
                    Err(e @ TgError::RetryAfter(_)) => {
                        return Err(OcrFailure::Retryable(e.to_string()))
                    }
                    Err(e) => return Err(OcrFailure::Fatal(e.to_string())),
                }
            }
            None => {
                return Err(OcrFailure::Fatal(format!(
                    "no client {} for download",
                    photo.client
                )))
            }
        };

        let key = photo.object_key();
        ctx.media
            .upload(&key, bytes)
            .await
            .map_err(|e| OcrFailure::Retryable(e.to_string()))?;

        ctx.stats
            .record(
                "bot",
                &[("master", &photo.client.to_string()), ("type", "ocr")],
                "count",
                1,
            )
            .await
            .map_err(|e| OcrFailure::Retryable(e.to_string()))?;

        let outcome = ctx
            .media
            .recognize(&key)
            .await
            .map_err(|e| OcrFailure::Fatal(e.to_string()))?;
        outcome
            .combined()
            .ok_or_else(|| OcrFailure::Fatal("service recognized nothing".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use trawler_store::Store;
    use crate::context::tests_support::test_bed_with;
    use trawler_core::types::{flag, ocr_pending_text, OCR_PENDING_MARK};
    use trawler_media::OcrOutcome;
    use trawler_store::NewMessage;
    use trawler_telegram::types::PhotoHandle;

    async fn pending_row(bed: &crate::context::tests_support::TestBed, caption: &str) -> i64 {
        let photo = trawler_telegram::types::photo_ref_for(
            bed.bots[0].uid,
            &PhotoHandle {
                file_id: "AgADfile".into(),
                location: None,
            },
        );
        bed.store
            .insert_message(&NewMessage {
                chat_id: -100,
                message_id: 9,
                user_id: Some(1),
                text: ocr_pending_text(OCR_PENDING_MARK, &photo, caption),
                date: 0,
                flag: flag::NEW,
            })
            .await
            .unwrap()
    }

    fn task(id: i64) -> String {
        serde_json::to_string(&OcrTask { id, tries: 0 }).unwrap()
    }

    #[tokio::test]
    async fn enriches_the_row_and_caches_the_result() {
        let bed = test_bed_with(1);
        bed.bots[0]
            .files
            .lock()
            .unwrap()
            .insert("AgADfile".into(), vec![1, 2, 3]);
        *bed.media.outcome.lock().unwrap() = OcrOutcome {
            ocr: Some("XYZ".into()),
            barcode: None,
        };

        let id = pending_row(&bed, "abc").await;
        OcrWorker.handle(&bed.ctx, task(id)).await.unwrap();

        let row = bed.store.message_by_id(id).await.unwrap().unwrap();
        assert_eq!(row.text, "XYZ\nabc");
        assert_eq!(bed.media.uploads.lock().unwrap().len(), 1);
        assert_eq!(
            bed.ctx.ocr_cache().get("AgADfile").await.unwrap().as_deref(),
            Some("XYZ")
        );
    }

    #[tokio::test]
    async fn second_row_with_same_photo_skips_the_expensive_path() {
        let bed = test_bed_with(1);
        bed.bots[0]
            .files
            .lock()
            .unwrap()
            .insert("AgADfile".into(), vec![1]);
        *bed.media.outcome.lock().unwrap() = OcrOutcome {
            ocr: Some("XYZ".into()),
            barcode: None,
        };

        let first = pending_row(&bed, "one").await;
        let second = pending_row(&bed, "two").await;
        OcrWorker.handle(&bed.ctx, task(first)).await.unwrap();
        OcrWorker.handle(&bed.ctx, task(second)).await.unwrap();

        // One download+upload total; both rows enriched.
        assert_eq!(bed.media.uploads.lock().unwrap().len(), 1);
        assert_eq!(
            bed.store.message_by_id(second).await.unwrap().unwrap().text,
            "XYZ\ntwo"
        );
    }

    #[tokio::test]
    async fn processing_marker_defers_the_task() {
        let bed = test_bed_with(1);
        let id = pending_row(&bed, "abc").await;
        bed.ctx
            .ocr_cache()
            .set("AgADfile", OCR_PROCESSING)
            .await
            .unwrap();

        OcrWorker.handle(&bed.ctx, task(id)).await.unwrap();

        // Task went back with a bumped retry counter; row untouched.
        let requeued = bed.ctx.ocr_queue().get().await.unwrap().unwrap();
        assert_eq!(requeued.tries, 1);
        let row = bed.store.message_by_id(id).await.unwrap().unwrap();
        assert!(row.text.starts_with(OCR_PENDING_MARK));
    }

    #[tokio::test]
    async fn missing_rows_reschedule() {
        let bed = test_bed_with(0);
        OcrWorker.handle(&bed.ctx, task(777)).await.unwrap();
        let requeued = bed.ctx.ocr_queue().get().await.unwrap().unwrap();
        assert_eq!(requeued.id, 777);
        assert_eq!(requeued.tries, 1);
    }
}

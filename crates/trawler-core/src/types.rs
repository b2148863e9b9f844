use serde::{Deserialize, Serialize};

/// Message row flag bits. A row is created as `NEW` or `EDITED`; deletion ORs
/// `DELETED` in later (edits never mutate rows in place).
pub mod flag {
    pub const NEW: u32 = 0;
    pub const EDITED: u32 = 1;
    pub const DELETED: u32 = 2;
}

/// First line of a persisted message still awaiting OCR enrichment.
pub const OCR_PENDING_MARK: &str = "[[OCR-PENDING]]";
/// Same, for rows written by the history back-fill (never OCR'd inline).
pub const OCR_HISTORY_MARK: &str = "[[OCR-HISTORY]]";
/// Written in place of a result when the OCR service gave up on an image.
pub const OCR_FAILED_MARK: &str = "[[OCR-FAILED]]";
/// Cache cell value while some worker is downloading/uploading the image.
pub const OCR_PROCESSING: &str = "PROCESSING";

/// Returns true when `text` starts with any OCR sentinel line.
pub fn has_ocr_mark(text: &str) -> bool {
    text.starts_with(OCR_PENDING_MARK) || text.starts_with(OCR_HISTORY_MARK)
}

/// Where to find a photo once its message has been persisted.
///
/// Serialised as the descriptor line between the sentinel and the caption.
/// `file_id` is set for bot-observed photos, `location` for user-account ones.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PhotoRef {
    /// Uid of the account that observed the photo (it does the download).
    pub client: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<PhotoLocation>,
    /// Blob path, `YYYY/MM`.
    pub path: String,
    /// `<unix-ts>-<file_id>.jpg`; the OCR cache key is derived from this.
    pub filename: String,
}

/// MTProto photo address: the chat the message lives in (packed, hex) plus
/// the message id, enough to re-fetch the media and download it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PhotoLocation {
    pub chat: String,
    pub message_id: i32,
}

impl PhotoRef {
    /// Blob object key, `path/filename`.
    pub fn object_key(&self) -> String {
        format!("{}/{}", self.path, self.filename)
    }
}

/// The cache key of a photo: everything after the first hyphen of the
/// filename, extension stripped.
pub fn file_id_from_filename(filename: &str) -> Option<&str> {
    let stem = filename.strip_suffix(".jpg").unwrap_or(filename);
    stem.split_once('-').map(|(_, id)| id)
}

/// Compose the text of a row that awaits OCR: sentinel, descriptor, caption.
pub fn ocr_pending_text(mark: &str, photo: &PhotoRef, caption: &str) -> String {
    let descriptor = serde_json::to_string(photo).expect("photo descriptor serialises");
    format!("{mark}\n{descriptor}\n{caption}")
}

/// Split an OCR-pending row back into descriptor and caption.
pub fn parse_ocr_pending(text: &str) -> Option<(PhotoRef, &str)> {
    let rest = text
        .strip_prefix(OCR_PENDING_MARK)
        .or_else(|| text.strip_prefix(OCR_HISTORY_MARK))?
        .strip_prefix('\n')?;
    let (descriptor, caption) = rest.split_once('\n').unwrap_or((rest, ""));
    let photo: PhotoRef = serde_json::from_str(descriptor).ok()?;
    Some((photo, caption))
}

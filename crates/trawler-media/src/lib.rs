//! Photo plumbing: blob-storage upload and the OCR microservice client.

pub mod blob;
pub mod ocr;

pub use blob::BlobClient;
pub use ocr::{OcrClient, OcrOutcome};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum MediaError {
    #[error("blob upload failed: {0}")]
    Upload(String),

    #[error("ocr service failed: {0}")]
    Ocr(String),
}

pub type Result<T> = std::result::Result<T, MediaError>;

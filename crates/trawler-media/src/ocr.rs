//! OCR microservice client: `GET {url}/{path}/{filename}` with bounded
//! retries on timeout.

use std::time::Duration;

use serde::Deserialize;
use tracing::{info, warn};

use trawler_core::config::{HTTP_TIMEOUT_SECS, OcrConfig};

use crate::{MediaError, Result};

const MAX_RETRIES: usize = 5;

#[derive(Debug, Clone, Deserialize, Default, PartialEq)]
pub struct OcrOutcome {
    #[serde(default)]
    pub ocr: Option<String>,
    #[serde(default)]
    pub barcode: Option<String>,
}

impl OcrOutcome {
    /// The text written back into the message row: OCR body plus barcode
    /// payload when either is present.
    pub fn combined(&self) -> Option<String> {
        match (&self.ocr, &self.barcode) {
            (Some(ocr), Some(code)) => Some(format!("{ocr}\n{code}")),
            (Some(ocr), None) => Some(ocr.clone()),
            (None, Some(code)) => Some(code.clone()),
            (None, None) => None,
        }
    }
}

pub struct OcrClient {
    http: reqwest::Client,
    base_url: String,
}

impl OcrClient {
    pub fn new(config: &OcrConfig) -> Self {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(HTTP_TIMEOUT_SECS))
            .build()
            .unwrap_or_default();
        Self {
            http,
            base_url: config.url.trim_end_matches('/').to_string(),
        }
    }

    /// Run the service against an already-uploaded object key.
    pub async fn recognize(&self, key: &str) -> Result<OcrOutcome> {
        let url = format!("{}/{}", self.base_url, key);

        let mut last_error = String::new();
        for attempt in 0..MAX_RETRIES {
            match self.http.get(&url).send().await {
                Ok(response) if response.status().is_success() => {
                    let outcome: OcrOutcome = response
                        .json()
                        .await
                        .map_err(|e| MediaError::Ocr(e.to_string()))?;
                    info!(key, "ocr complete");
                    return Ok(outcome);
                }
                Ok(response) => {
                    return Err(MediaError::Ocr(format!(
                        "{url} returned {}",
                        response.status()
                    )));
                }
                Err(e) if e.is_timeout() => {
                    warn!(key, attempt, "ocr request timed out, retrying");
                    last_error = e.to_string();
                }
                Err(e) => return Err(MediaError::Ocr(e.to_string())),
            }
        }
        Err(MediaError::Ocr(format!("timed out after {MAX_RETRIES} tries: {last_error}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn combined_joins_ocr_and_barcode() {
        let outcome = OcrOutcome {
            ocr: Some("XYZ".into()),
            barcode: Some("https://example".into()),
        };
        assert_eq!(outcome.combined().as_deref(), Some("XYZ\nhttps://example"));
    }

    #[test]
    fn combined_is_none_when_nothing_recognized() {
        assert_eq!(OcrOutcome::default().combined(), None);
    }

    #[test]
    fn outcome_parses_partial_payloads() {
        let outcome: OcrOutcome = serde_json::from_str(r#"{"ocr":"XYZ"}"#).unwrap();
        assert_eq!(outcome.combined().as_deref(), Some("XYZ"));
    }
}

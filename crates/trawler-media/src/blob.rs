//! Object-storage uploads: one `PUT {base}/{bucket}/{key}` per photo.

use std::time::Duration;

use tracing::info;

use trawler_core::config::{BlobConfig, HTTP_TIMEOUT_SECS};

use crate::{MediaError, Result};

pub struct BlobClient {
    http: reqwest::Client,
    base_url: String,
    bucket: String,
    access_key: String,
    secret_key: String,
}

impl BlobClient {
    pub fn new(config: &BlobConfig) -> Self {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(HTTP_TIMEOUT_SECS))
            .build()
            .unwrap_or_default();
        Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            bucket: config.bucket.clone(),
            access_key: config.access_key.clone(),
            secret_key: config.secret_key.clone(),
        }
    }

    /// Upload `bytes` under `key` (`path/filename`); returns the object key.
    pub async fn put(&self, key: &str, bytes: Vec<u8>) -> Result<String> {
        let url = format!("{}/{}/{}", self.base_url, self.bucket, key);
        let length = bytes.len();

        let response = self
            .http
            .put(&url)
            .basic_auth(&self.access_key, Some(&self.secret_key))
            .header(reqwest::header::CONTENT_LENGTH, length)
            .body(bytes)
            .send()
            .await
            .map_err(|e| MediaError::Upload(e.to_string()))?;

        if !response.status().is_success() {
            return Err(MediaError::Upload(format!(
                "{url} returned {}",
                response.status()
            )));
        }
        info!(key, length, "photo uploaded");
        Ok(key.to_string())
    }
}

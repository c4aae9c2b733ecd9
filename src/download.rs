//! Streaming model downloads with on-disk caching
//!
//! Files are downloaded in 8KB chunks, checked against an optional SHA-256,
//! and written to the cache through a temporary file so an interrupted
//! download never leaves a truncated model behind.

use crate::cache::ModelCache;
use crate::error::{BgRemovalError, Result};
use futures_util::stream::TryStreamExt;
use reqwest::Client;
use sha2::{Digest, Sha256};
use std::path::Path;
use tokio::io::AsyncReadExt;
use tokio_util::io::StreamReader;

/// Downloads model files and keeps them in a [`ModelCache`]
#[derive(Debug, Clone)]
pub struct ModelDownloader {
    client: Client,
    cache: Option<ModelCache>,
}

/// Lowercase hex SHA-256 of `bytes`
#[must_use]
pub fn sha256_hex(bytes: &[u8]) -> String {
    format!("{:x}", Sha256::digest(bytes))
}

/// Check bytes against an expected SHA-256. `None` always passes.
#[must_use]
pub fn verify_bytes(bytes: &[u8], expected_hash: Option<&str>) -> bool {
    expected_hash.map_or(true, |expected| sha256_hex(bytes).eq_ignore_ascii_case(expected))
}

/// Verify the integrity of a file on disk using SHA-256
///
/// # Errors
/// - Failed to read the file
pub fn verify_file_integrity(file_path: &Path, expected_hash: Option<&str>) -> Result<bool> {
    let Some(expected) = expected_hash else {
        return Ok(true);
    };
    let contents = std::fs::read(file_path)
        .map_err(|e| BgRemovalError::file_io_error("read file for verification", file_path, &e))?;

    let actual = sha256_hex(&contents);
    if actual.eq_ignore_ascii_case(expected) {
        Ok(true)
    } else {
        log::warn!(
            "File integrity check failed for {}: expected {}, got {}",
            file_path.display(),
            expected,
            actual
        );
        Ok(false)
    }
}

impl ModelDownloader {
    /// Create a downloader. `cache: None` disables caching.
    ///
    /// # Errors
    /// - Failed to create HTTP client
    pub fn new(cache: Option<ModelCache>) -> Result<Self> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(300))
            .build()
            .map_err(|e| BgRemovalError::network_error("Failed to create HTTP client", e))?;
        Ok(Self { client, cache })
    }

    #[must_use]
    pub fn cache(&self) -> Option<&ModelCache> {
        self.cache.as_ref()
    }

    /// Fetch a model, serving it from the cache when possible
    ///
    /// # Errors
    /// - `ApiError` for network failures and non-success HTTP status
    /// - `ModelLoadFailed` when the downloaded bytes fail the checksum
    pub async fn fetch(&self, url: &str, expected_sha256: Option<&str>) -> Result<Vec<u8>> {
        if let Some(cache) = &self.cache {
            if cache.is_cached(url) {
                let path = cache.cached_path(url);
                let bytes = tokio::fs::read(&path)
                    .await
                    .map_err(|e| BgRemovalError::file_io_error("read cached model", &path, &e))?;
                if verify_bytes(&bytes, expected_sha256) {
                    log::debug!("Using cached model {}", path.display());
                    return Ok(bytes);
                }
                log::warn!(
                    "Cached model {} failed integrity check, downloading again",
                    path.display()
                );
            }
        }

        let bytes = self.download(url).await?;
        if !verify_bytes(&bytes, expected_sha256) {
            return Err(BgRemovalError::model_load(format!(
                "Checksum mismatch for {url}: got {}",
                sha256_hex(&bytes)
            )));
        }

        if let Some(cache) = &self.cache {
            if let Err(e) = Self::store(cache, url, &bytes).await {
                // The model is usable even when it cannot be cached
                log::warn!("Failed to cache model from {url}: {e}");
            }
        }
        Ok(bytes)
    }

    async fn download(&self, url: &str) -> Result<Vec<u8>> {
        log::info!("Downloading model from {url}");

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| BgRemovalError::network_error(format!("Failed to download {url}"), e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(BgRemovalError::api(
                Some(status.as_u16()),
                format!("HTTP error {status} for {url}"),
            ));
        }

        let total_size = response.content_length();
        let capacity = total_size
            .and_then(|size| usize::try_from(size).ok())
            .unwrap_or(0);
        let mut bytes = Vec::with_capacity(capacity);

        let mut stream = StreamReader::new(
            response
                .bytes_stream()
                .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e)),
        );
        let mut buffer = vec![0; 8192];
        loop {
            let bytes_read = stream
                .read(&mut buffer)
                .await
                .map_err(|e| BgRemovalError::network_error("Failed to read download stream", e))?;
            if bytes_read == 0 {
                break;
            }
            bytes.extend_from_slice(buffer.get(..bytes_read).unwrap_or(&[]));
        }

        if bytes.is_empty() {
            return Err(BgRemovalError::api(None, format!("Empty response body from {url}")));
        }
        log::debug!(
            "Downloaded {} bytes from {url} (expected {total_size:?})",
            bytes.len()
        );
        Ok(bytes)
    }

    async fn store(cache: &ModelCache, url: &str, bytes: &[u8]) -> Result<()> {
        let path = cache.cached_path(url);
        let partial = path.with_extension("part");
        tokio::fs::write(&partial, bytes)
            .await
            .map_err(|e| BgRemovalError::file_io_error("write cached model", &partial, &e))?;
        tokio::fs::rename(&partial, &path)
            .await
            .map_err(|e| BgRemovalError::file_io_error("move cached model into place", &path, &e))?;
        log::debug!("Cached model at {}", path.display());
        Ok(())
    }
}

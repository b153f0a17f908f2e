//! Size-bounded media downloads.
//!
//! A [`MediaFile`] removes its backing file when dropped, so every exit path
//! (sent, rejected as too large, failed to send) leaves nothing behind.

use super::guard::redirect_policy;
use futures_util::StreamExt;
use reqwest::{Client as HttpClient, Url};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

/// Longest file extension copied from the source URL.
const MAX_EXTENSION_LEN: usize = 5;

/// Why a download failed.
#[derive(Error, Debug)]
pub enum FetchError {
    /// Declared or written size exceeds the limit.
    #[error("media is too large ({size} bytes, limit {limit} bytes)")]
    TooLarge {
        /// Declared or observed size.
        size: u64,
        /// Configured limit.
        limit: u64,
    },
    /// Media host answered with a non-success status.
    #[error("media host returned {0}")]
    Status(u16),
    /// Connection or stream failure.
    #[error("network error: {0}")]
    Network(String),
    /// Download did not finish in time.
    #[error("download did not finish within {} s", .0.as_secs())]
    Timeout(Duration),
    /// Local filesystem failure.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// A downloaded file that is deleted when dropped.
#[derive(Debug)]
pub struct MediaFile {
    path: PathBuf,
    size_bytes: u64,
}

impl MediaFile {
    /// Local path of the file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Size on disk.
    #[must_use]
    pub const fn size_bytes(&self) -> u64 {
        self.size_bytes
    }
}

impl Drop for MediaFile {
    fn drop(&mut self) {
        match std::fs::remove_file(&self.path) {
            Ok(()) => debug!(path = %self.path.display(), "Removed temporary media file"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(path = %self.path.display(), error = %e, "Failed to remove temporary media file"),
        }
    }
}

/// Streams remote media into a local directory.
#[derive(Clone, Debug)]
pub struct MediaFetcher {
    client: HttpClient,
    dir: PathBuf,
    timeout: Duration,
}

impl MediaFetcher {
    /// Creates a fetcher writing into `dir`.
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>, timeout: Duration) -> Self {
        let client = HttpClient::builder()
            .timeout(timeout)
            .redirect(redirect_policy())
            .build()
            .unwrap_or_else(|_| HttpClient::new());
        Self {
            client,
            dir: dir.into(),
            timeout,
        }
    }

    /// Downloads `url`, refusing anything larger than `max_bytes`.
    ///
    /// # Errors
    ///
    /// Returns [`FetchError::TooLarge`] if the declared or written size exceeds
    /// `max_bytes`; no partial file is left behind in that case.
    pub async fn fetch(&self, url: &Url, max_bytes: u64) -> Result<MediaFile, FetchError> {
        let response = self
            .client
            .get(url.clone())
            .send()
            .await
            .map_err(|e| self.classify(&e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status(status.as_u16()));
        }

        if let Some(declared) = response.content_length() {
            if declared > max_bytes {
                info!(%url, declared, max_bytes, "Declared media size exceeds limit");
                return Err(FetchError::TooLarge {
                    size: declared,
                    limit: max_bytes,
                });
            }
        }

        tokio::fs::create_dir_all(&self.dir).await?;
        let path = self
            .dir
            .join(format!("{}.{}", uuid::Uuid::new_v4(), extension_for(url)));
        // From here on the guard owns the path and cleans up on every early return.
        let mut media = MediaFile {
            path,
            size_bytes: 0,
        };

        let mut file = tokio::fs::File::create(&media.path).await?;
        let mut written: u64 = 0;
        let mut stream = response.bytes_stream();

        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| self.classify(&e))?;
            written += chunk.len() as u64;
            if written > max_bytes {
                info!(%url, written, max_bytes, "Media stream exceeded limit");
                return Err(FetchError::TooLarge {
                    size: written,
                    limit: max_bytes,
                });
            }
            file.write_all(&chunk).await?;
        }
        file.flush().await?;
        drop(file);

        // Content-Length is not trusted; check what actually landed on disk.
        let actual = tokio::fs::metadata(&media.path).await?.len();
        if actual > max_bytes {
            return Err(FetchError::TooLarge {
                size: actual,
                limit: max_bytes,
            });
        }

        media.size_bytes = actual;
        debug!(%url, path = %media.path.display(), size = actual, "Media downloaded");
        Ok(media)
    }

    fn classify(&self, err: &reqwest::Error) -> FetchError {
        if err.is_timeout() {
            FetchError::Timeout(self.timeout)
        } else {
            FetchError::Network(err.to_string())
        }
    }
}

/// File extension derived from the URL path, `bin` if none is usable.
fn extension_for(url: &Url) -> String {
    url.path_segments()
        .and_then(|mut segments| segments.next_back())
        .and_then(|name| name.rsplit_once('.'))
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .filter(|ext| {
            !ext.is_empty()
                && ext.len() <= MAX_EXTENSION_LEN
                && ext.chars().all(|c| c.is_ascii_alphanumeric())
        })
        .unwrap_or_else(|| "bin".to_string())
}

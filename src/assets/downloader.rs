//! Idempotent asset downloads
//!
//! Existence of the target file is the only cache key: a present file is
//! never re-fetched, hashed or compared.

use async_trait::async_trait;
use bytes::Bytes;
use futures::future::join_all;
use futures::stream::{BoxStream, StreamExt};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::Semaphore;
use tracing::{debug, info};

use super::PendingDownload;
use crate::error::{IngestionError, Result};
use crate::http_client::ThrottledHttpClient;
use crate::metrics;

/// Streamed response body
pub type ByteStream = BoxStream<'static, Result<Bytes>>;

/// Filesystem operations the downloader relies on
#[async_trait]
pub trait AssetFs: Send + Sync {
    async fn exists(&self, path: &Path) -> bool;

    async fn create_dir_all(&self, path: &Path) -> Result<()>;

    /// Writes the whole stream to `path`, returning the byte count
    async fn write_stream(&self, path: &Path, body: ByteStream) -> Result<u64>;
}

/// Source of asset bytes
#[async_trait]
pub trait AssetFetcher: Send + Sync {
    async fn http_get(&self, url: &str) -> Result<ByteStream>;
}

/// Local filesystem via tokio
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioFs;

#[async_trait]
impl AssetFs for TokioFs {
    async fn exists(&self, path: &Path) -> bool {
        fs::try_exists(path).await.unwrap_or(false)
    }

    async fn create_dir_all(&self, path: &Path) -> Result<()> {
        fs::create_dir_all(path).await?;
        Ok(())
    }

    /// Streams into `{path}.part` and renames on success, so an interrupted
    /// download never leaves a file that would be mistaken for a finished one
    async fn write_stream(&self, path: &Path, mut body: ByteStream) -> Result<u64> {
        let mut partial = path.as_os_str().to_owned();
        partial.push(".part");
        let partial = std::path::PathBuf::from(partial);

        let written = async {
            let mut file = fs::File::create(&partial).await?;
            let mut written = 0u64;
            while let Some(chunk) = body.next().await {
                let chunk = chunk?;
                file.write_all(&chunk).await?;
                written += chunk.len() as u64;
            }
            file.flush().await?;
            Ok::<u64, IngestionError>(written)
        }
        .await;

        match written {
            Ok(written) => {
                fs::rename(&partial, path).await?;
                Ok(written)
            }
            Err(e) => {
                let _ = fs::remove_file(&partial).await;
                Err(e)
            }
        }
    }
}

/// Fetches assets over the shared throttled client
pub struct HttpAssetFetcher {
    client: Arc<ThrottledHttpClient>,
}

impl HttpAssetFetcher {
    pub fn new(client: Arc<ThrottledHttpClient>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl AssetFetcher for HttpAssetFetcher {
    async fn http_get(&self, url: &str) -> Result<ByteStream> {
        let response = self.client.get(url).await?;
        Ok(response
            .bytes_stream()
            .map(|chunk| chunk.map_err(IngestionError::from))
            .boxed())
    }
}

/// Result of one download attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DownloadOutcome {
    Downloaded { bytes: u64 },
    Skipped,
}

/// Aggregate of a batch of downloads
#[derive(Debug, Default)]
pub struct DownloadSummary {
    pub downloaded: usize,
    pub skipped: usize,
    /// Source URL and error of each failed download
    pub failures: Vec<(String, IngestionError)>,
}

/// Skip-if-present downloader with bounded concurrency
pub struct AssetDownloader {
    fs: Arc<dyn AssetFs>,
    fetcher: Arc<dyn AssetFetcher>,
    semaphore: Arc<Semaphore>,
}

impl AssetDownloader {
    pub fn new(fs: Arc<dyn AssetFs>, fetcher: Arc<dyn AssetFetcher>, max_concurrent: usize) -> Self {
        Self {
            fs,
            fetcher,
            semaphore: Arc::new(Semaphore::new(max_concurrent.max(1))),
        }
    }

    /// Downloads one asset unless its target already exists
    pub async fn download(&self, pending: &PendingDownload) -> Result<DownloadOutcome> {
        let _permit = self
            .semaphore
            .acquire()
            .await
            .map_err(|_| IngestionError::ConnectionLost("Semaphore closed".to_string()))?;

        let filename = &pending.descriptor.filename;
        if self.fs.exists(&pending.target).await {
            debug!(filename = %filename, "Asset already downloaded");
            metrics::record_asset(metrics::ASSET_SKIPPED);
            return Ok(DownloadOutcome::Skipped);
        }

        if let Some(parent) = pending.target.parent() {
            self.fs.create_dir_all(parent).await?;
        }

        info!(url = %pending.source_url, "Downloading asset");
        let body = self.fetcher.http_get(&pending.source_url).await?;
        let bytes = self.fs.write_stream(&pending.target, body).await?;

        info!(filename = %filename, bytes, "Download finished");
        metrics::record_asset(metrics::ASSET_DOWNLOADED);
        Ok(DownloadOutcome::Downloaded { bytes })
    }

    /// Runs every download of one record and waits for all of them
    ///
    /// Each target is fetched at most once; further references to the same
    /// target count as skipped once it is on disk. A failure never cancels
    /// its siblings.
    pub async fn download_all(&self, pending: &[PendingDownload]) -> DownloadSummary {
        let mut repeats: HashMap<&Path, usize> = HashMap::new();
        let mut unique: Vec<&PendingDownload> = Vec::new();
        for item in pending {
            match repeats.get_mut(item.target.as_path()) {
                Some(count) => *count += 1,
                None => {
                    repeats.insert(item.target.as_path(), 0);
                    unique.push(item);
                }
            }
        }

        let results = join_all(unique.iter().map(|p| self.download(p))).await;

        let mut summary = DownloadSummary::default();
        for (item, result) in unique.into_iter().zip(results) {
            let extra = repeats.get(item.target.as_path()).copied().unwrap_or(0);
            match result {
                Ok(outcome) => {
                    if matches!(outcome, DownloadOutcome::Downloaded { .. }) {
                        summary.downloaded += 1;
                    } else {
                        summary.skipped += 1;
                    }
                    summary.skipped += extra;
                    for _ in 0..extra {
                        metrics::record_asset(metrics::ASSET_SKIPPED);
                    }
                }
                Err(e) => {
                    metrics::record_asset(metrics::ASSET_FAILED);
                    summary.failures.push((item.source_url.clone(), e));
                }
            }
        }
        summary
    }
}

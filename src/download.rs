#![forbid(unsafe_code)]

//! The download lifecycle: allocate a slot, run the extractor into it and
//! finalize the result. Metadata and format lookups share the same URL checks
//! and logging but never touch the store.

use std::{io, sync::Arc, time::Instant};

use thiserror::Error;

use crate::extractor::{ExtractionFailed, ExtractionResult, MediaExtractor};
use crate::identifier::DownloadId;
use crate::monitoring::Metrics;
use crate::store::{DownloadRecord, DownloadSlot, DownloadStore, StoreError};

#[derive(Debug, Error)]
pub enum DownloadError {
    #[error("{0}")]
    InvalidInput(String),
    #[error(transparent)]
    Extraction(#[from] ExtractionFailed),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("failed to prepare download directory: {0}")]
    Prepare(#[source] io::Error),
}

/// Failure of one download, carrying the slot id when one was allocated so
/// callers can point at the directory left behind.
#[derive(Debug, Error)]
#[error("{source}")]
pub struct FailedDownload {
    pub id: Option<DownloadId>,
    #[source]
    pub source: DownloadError,
}

impl FailedDownload {
    fn new(id: Option<DownloadId>, source: impl Into<DownloadError>) -> Self {
        Self {
            id,
            source: source.into(),
        }
    }
}

/// Trims the caller's URL and rejects blank input.
pub fn validate_url(raw: &str) -> Result<&str, DownloadError> {
    let url = raw.trim();
    if url.is_empty() {
        return Err(DownloadError::InvalidInput("Invalid URL provided".into()));
    }
    Ok(url)
}

#[derive(Clone)]
pub struct Downloader {
    store: DownloadStore,
    extractor: Arc<dyn MediaExtractor>,
    metrics: Arc<Metrics>,
}

impl Downloader {
    pub fn new(
        store: DownloadStore,
        extractor: Arc<dyn MediaExtractor>,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            store,
            extractor,
            metrics,
        }
    }

    pub fn store(&self) -> &DownloadStore {
        &self.store
    }

    pub fn extractor(&self) -> &Arc<dyn MediaExtractor> {
        &self.extractor
    }

    /// Runs one complete download. A failed download keeps its directory on
    /// disk; only explicit cleanup removes it.
    pub async fn download(&self, url: &str) -> Result<DownloadRecord, FailedDownload> {
        let url = validate_url(url).map_err(|err| FailedDownload::new(None, err))?;
        let started = Instant::now();
        self.metrics.download_started();

        let store = self.store.clone();
        let allocated = tokio::task::spawn_blocking(move || store.begin_download())
            .await
            .map_err(io::Error::other)
            .and_then(|slot| slot);
        let slot = match allocated {
            Ok(slot) => slot,
            Err(err) => {
                self.metrics.download_failed();
                tracing::error!(url, error = %err, "could not allocate download directory");
                return Err(FailedDownload::new(None, DownloadError::Prepare(err)));
            }
        };
        tracing::info!(download_id = %slot.id, url, "download started");

        let outcome = match self.extractor.fetch_and_download(url, &slot.dir).await {
            Ok(result) => self.finalize(&slot, result).await.map_err(DownloadError::from),
            Err(err) => Err(DownloadError::from(err)),
        };
        let duration_ms = started.elapsed().as_millis() as u64;

        match outcome {
            Ok(record) => {
                self.metrics.download_succeeded(record.file_size);
                tracing::info!(
                    download_id = %record.id,
                    filename = %record.filename,
                    file_size_bytes = record.file_size,
                    duration_ms,
                    "download finished"
                );
                Ok(record)
            }
            Err(err) => {
                self.metrics.download_failed();
                tracing::error!(
                    download_id = %slot.id,
                    url,
                    error = %err,
                    duration_ms,
                    "download failed"
                );
                Err(FailedDownload::new(Some(slot.id), err))
            }
        }
    }

    /// Locates and sizes the written file off the async workers.
    async fn finalize(
        &self,
        slot: &DownloadSlot,
        result: ExtractionResult,
    ) -> Result<DownloadRecord, StoreError> {
        let store = self.store.clone();
        let slot = slot.clone();
        tokio::task::spawn_blocking(move || store.finalize(&slot, &result))
            .await
            .map_err(|err| StoreError::Io(io::Error::other(err)))?
    }

    pub async fn metadata(&self, url: &str) -> Result<ExtractionResult, DownloadError> {
        let url = validate_url(url)?;
        let started = Instant::now();
        let result = self.extractor.fetch_metadata(url).await;
        log_lookup("metadata", url, started, &result);
        Ok(result?)
    }

    pub async fn formats(&self, url: &str) -> Result<ExtractionResult, DownloadError> {
        let url = validate_url(url)?;
        let started = Instant::now();
        let result = self.extractor.list_formats(url).await;
        log_lookup("formats", url, started, &result);
        Ok(result?)
    }
}

fn log_lookup(
    kind: &str,
    url: &str,
    started: Instant,
    result: &Result<ExtractionResult, ExtractionFailed>,
) {
    let duration_ms = started.elapsed().as_millis() as u64;
    match result {
        Ok(_) => tracing::info!(kind, url, duration_ms, "lookup finished"),
        Err(err) => tracing::warn!(kind, url, duration_ms, error = %err, "lookup failed"),
    }
}

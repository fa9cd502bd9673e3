#![forbid(unsafe_code)]

//! Boundary to the external media extractor.
//!
//! The rest of the crate only talks to [`MediaExtractor`]; the yt-dlp backed
//! implementation lives in [`ytdlp`] and tests substitute their own doubles.

mod model;
pub mod ytdlp;

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use crate::config::ServiceConfig;

pub use model::{
    BestFormat, DetailedMetadata, ExtractionResult, FormatInfo, MetadataSummary,
    RequestedDownload,
};
pub use ytdlp::YtDlpExtractor;

/// The single failure shape of the extraction boundary. The reason is the
/// extractor's own message, passed through untouched.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{reason}")]
pub struct ExtractionFailed {
    pub reason: String,
}

impl ExtractionFailed {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

/// Result of asking the extractor to drop its cache.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheClear {
    /// Cache removed; carries the extractor's stdout.
    Cleared(String),
    /// The extractor ran but exited non-zero; carries its stderr.
    Refused(String),
}

#[async_trait]
pub trait MediaExtractor: Send + Sync {
    /// Metadata only; nothing is written to disk.
    async fn fetch_metadata(&self, url: &str) -> Result<ExtractionResult, ExtractionFailed>;

    /// Downloads the media into `output_dir` as `<title>.<ext>` and reports
    /// what was resolved.
    async fn fetch_and_download(
        &self,
        url: &str,
        output_dir: &Path,
    ) -> Result<ExtractionResult, ExtractionFailed>;

    /// Metadata plus the full list of candidate formats.
    async fn list_formats(&self, url: &str) -> Result<ExtractionResult, ExtractionFailed>;

    /// Drops the extractor's on-disk cache. `Err` means the extractor could
    /// not be run at all (missing binary, timeout).
    async fn clear_cache(&self) -> Result<CacheClear, ExtractionFailed> {
        Err(ExtractionFailed::new(
            "cache clearing is not supported by this extractor",
        ))
    }
}

/// Capped exponential backoff: `initial * factor^attempt`, never above
/// `ceiling`. `attempt` is 0-based.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    pub initial: Duration,
    pub factor: u32,
    pub ceiling: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            initial: Duration::from_secs(1),
            factor: 4,
            ceiling: Duration::from_secs(60),
        }
    }
}

impl BackoffPolicy {
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let multiplier = self.factor.checked_pow(attempt).unwrap_or(u32::MAX);
        self.initial.saturating_mul(multiplier).min(self.ceiling)
    }

    /// Longest total sleep across `retries` retries.
    pub fn worst_case_stall(&self, retries: u32) -> Duration {
        (0..retries).map(|attempt| self.delay_for(attempt)).sum()
    }

    /// Renders the policy in the extractor's `--retry-sleep` expression syntax
    /// (`exp=START:END:BASE`, seconds).
    pub fn as_retry_sleep_expr(&self) -> String {
        format!(
            "exp={}:{}:{}",
            self.initial.as_secs_f64(),
            self.ceiling.as_secs_f64(),
            self.factor
        )
    }
}

/// Fixed configuration handed to every extractor call.
#[derive(Debug, Clone)]
pub struct ExtractorPolicy {
    /// Sent with every request; the platform rejects bare HTTP clients.
    pub http_headers: Vec<(String, String)>,
    pub retries: u32,
    pub extractor_retries: u32,
    pub fragment_retries: u32,
    pub backoff: BackoffPolicy,
    pub format_selector: String,
    pub output_template: String,
    pub timeout: Duration,
}

pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

pub fn browser_headers() -> Vec<(String, String)> {
    [
        ("User-Agent", DEFAULT_USER_AGENT),
        ("Referer", "https://www.tiktok.com/"),
        (
            "Accept",
            "text/html,application/xhtml+xml,application/xml;q=0.9,image/webp,*/*;q=0.8",
        ),
        ("Accept-Language", "en-US,en;q=0.5"),
        ("Accept-Encoding", "gzip, deflate"),
        ("Connection", "keep-alive"),
        ("Upgrade-Insecure-Requests", "1"),
    ]
    .into_iter()
    .map(|(name, value)| (name.to_string(), value.to_string()))
    .collect()
}

impl Default for ExtractorPolicy {
    fn default() -> Self {
        Self {
            http_headers: browser_headers(),
            retries: 3,
            extractor_retries: 3,
            fragment_retries: 3,
            backoff: BackoffPolicy::default(),
            format_selector: "best/mp4".to_string(),
            output_template: "%(title)s.%(ext)s".to_string(),
            timeout: Duration::from_secs(crate::config::DEFAULT_EXTRACTION_TIMEOUT_SECS),
        }
    }
}

impl ExtractorPolicy {
    pub fn from_config(config: &ServiceConfig) -> Self {
        Self {
            retries: config.extractor_retries,
            extractor_retries: config.extractor_retries,
            fragment_retries: config.extractor_retries,
            timeout: config.extraction_timeout,
            ..Self::default()
        }
    }
}

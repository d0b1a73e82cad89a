use std::time::Duration;

use crate::chuck::retry::RetryPolicy;

pub const DEFAULT_ENDPOINT: &str = "https://v2.shdwdrive.com";

/// 5 MiB, the slice size for multipart parts.
pub const CHUNK_SIZE: usize = 5 * 1024 * 1024;
pub const MAX_UPLOAD_CONCURRENCY: usize = 5;
pub const CACHE_DURATION: Duration = Duration::from_secs(60);
pub const READ_RETENTION: Duration = Duration::from_secs(10 * 60);

/// Runtime settings for one mounted bucket.
#[derive(Debug, Clone)]
pub struct MountConfig {
    pub bucket: String,
    pub endpoint: String,
    /// Buffered bytes beyond this size are sliced into a multipart part.
    pub chunk_size: usize,
    pub max_concurrency: usize,
    /// How long a bucket listing is served without refetching.
    pub cache_duration: Duration,
    /// Background re-list period; `None` disables the refresher.
    pub refresh_interval: Option<Duration>,
    /// How long a finished download stays buffered for repeated reads.
    pub read_retention: Duration,
    pub part_retry: RetryPolicy,
    pub complete_retry: RetryPolicy,
    pub allow_other: bool,
}

impl MountConfig {
    pub fn new(bucket: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            ..Default::default()
        }
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }
}

impl Default for MountConfig {
    fn default() -> Self {
        Self {
            bucket: String::new(),
            endpoint: DEFAULT_ENDPOINT.to_string(),
            chunk_size: CHUNK_SIZE,
            max_concurrency: MAX_UPLOAD_CONCURRENCY,
            cache_duration: CACHE_DURATION,
            refresh_interval: Some(CACHE_DURATION),
            read_retention: READ_RETENTION,
            part_retry: RetryPolicy::part_upload(),
            complete_retry: RetryPolicy::completion(),
            allow_other: false,
        }
    }
}

//! Time-bounded cache of the bucket listing.
//!
//! The whole listing is fetched in one call and replaced atomically. A listing
//! younger than the cache duration is served as-is; mutations call
//! [`DirectoryCache::invalidate`] so the next metadata read refetches.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use tokio::time::Instant;
use tracing::{debug, warn};

use super::FileEntry;
use crate::cadapter::client::ObjectBackend;
use crate::error::{FsError, FsResult, StoreError};

#[derive(Default)]
struct CacheState {
    entries: Arc<Vec<FileEntry>>,
    last_updated: Option<Instant>,
    /// Bumped by every invalidation; a refresh that straddles one is not
    /// considered fresh.
    epoch: u64,
}

pub struct DirectoryCache<B: ObjectBackend> {
    backend: Arc<B>,
    ttl: Duration,
    state: Mutex<CacheState>,
    refresh: tokio::sync::Mutex<()>,
}

impl<B: ObjectBackend> DirectoryCache<B> {
    pub fn new(backend: Arc<B>, ttl: Duration) -> Self {
        Self {
            backend,
            ttl,
            state: Mutex::new(CacheState::default()),
            refresh: tokio::sync::Mutex::new(()),
        }
    }

    fn fresh(&self) -> Option<Arc<Vec<FileEntry>>> {
        let state = self.state.lock().unwrap();
        match state.last_updated {
            Some(at) if at.elapsed() < self.ttl => Some(state.entries.clone()),
            _ => None,
        }
    }

    /// Current listing, refetched when stale. Concurrent callers share one fetch.
    pub async fn list(&self) -> Result<Arc<Vec<FileEntry>>, StoreError> {
        if let Some(entries) = self.fresh() {
            return Ok(entries);
        }
        let _guard = self.refresh.lock().await;
        if let Some(entries) = self.fresh() {
            return Ok(entries);
        }

        let epoch = self.state.lock().unwrap().epoch;
        let started = Instant::now();
        let objects = self.backend.list_files().await?;
        let entries: Arc<Vec<FileEntry>> =
            Arc::new(objects.into_iter().map(FileEntry::from_object).collect());
        debug!(count = entries.len(), "bucket listing refreshed");

        let mut state = self.state.lock().unwrap();
        state.entries = entries.clone();
        state.last_updated = (state.epoch == epoch).then_some(started);
        Ok(entries)
    }

    /// Expire the listing so the next read goes to the remote.
    pub fn invalidate(&self) {
        let mut state = self.state.lock().unwrap();
        state.last_updated = None;
        state.epoch = state.epoch.wrapping_add(1);
    }

    /// Attributes for `path`. The root is synthesized from the bucket usage;
    /// any other path is the first listing entry with that exact path.
    pub async fn get_attributes(&self, path: &str) -> FsResult<FileEntry> {
        if path == "/" {
            let usage = self.backend.bucket_usage().await.map_err(|e| {
                warn!(error = %e, "bucket usage unavailable");
                FsError::NotFound(path.to_string())
            })?;
            return Ok(FileEntry {
                key: String::new(),
                path: "/".to_string(),
                size: usage.storage_used,
                last_modified: Utc::now(),
                folder: true,
            });
        }

        let entries = self.list().await.map_err(|e| {
            warn!(%path, error = %e, "listing failed during lookup");
            FsError::NotFound(path.to_string())
        })?;
        entries
            .iter()
            .find(|e| e.path == path)
            .cloned()
            .ok_or_else(|| FsError::NotFound(path.to_string()))
    }

    /// Entries whose parent directory is `dir`, in listing order.
    pub async fn children(&self, dir: &str) -> FsResult<Vec<FileEntry>> {
        let entries = self.list().await?;
        Ok(entries
            .iter()
            .filter(|e| e.path != "/" && e.parent() == dir)
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cadapter::memory::{CallStats, MemoryBackend};

    fn cache_with(backend: &Arc<MemoryBackend>) -> DirectoryCache<MemoryBackend> {
        DirectoryCache::new(backend.clone(), Duration::from_secs(60))
    }

    #[tokio::test(start_paused = true)]
    async fn listing_is_reused_within_cache_duration() {
        let backend = Arc::new(MemoryBackend::new());
        backend.insert("a.txt", "hello");
        let cache = cache_with(&backend);

        cache.get_attributes("/a.txt").await.unwrap();
        tokio::time::advance(Duration::from_secs(59)).await;
        cache.get_attributes("/a.txt").await.unwrap();
        assert_eq!(CallStats::get(&backend.stats.list), 1);

        tokio::time::advance(Duration::from_secs(2)).await;
        cache.get_attributes("/a.txt").await.unwrap();
        assert_eq!(CallStats::get(&backend.stats.list), 2);
    }

    #[tokio::test]
    async fn invalidate_forces_refetch() {
        let backend = Arc::new(MemoryBackend::new());
        let cache = cache_with(&backend);

        assert!(cache.get_attributes("/new.txt").await.is_err());
        backend.insert("new.txt", "x");
        // Still served from the stale listing.
        assert!(cache.get_attributes("/new.txt").await.is_err());

        cache.invalidate();
        let entry = cache.get_attributes("/new.txt").await.unwrap();
        assert_eq!(entry.size, 1);
        assert_eq!(CallStats::get(&backend.stats.list), 2);
    }

    #[tokio::test]
    async fn root_reports_bucket_usage() {
        let backend = Arc::new(MemoryBackend::new());
        backend.insert("a.bin", vec![0u8; 300]);
        backend.insert("b.bin", vec![0u8; 200]);
        let cache = cache_with(&backend);

        let root = cache.get_attributes("/").await.unwrap();
        assert!(root.folder);
        assert_eq!(root.size, 500);
        assert_eq!(CallStats::get(&backend.stats.list), 0);
    }

    #[tokio::test]
    async fn listing_failure_reads_as_not_found() {
        let backend = Arc::new(MemoryBackend::new());
        backend.insert("a.txt", "x");
        backend.fail_listing(true);
        let cache = cache_with(&backend);
        assert!(matches!(
            cache.get_attributes("/a.txt").await,
            Err(FsError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn first_matching_entry_wins() {
        let backend = Arc::new(MemoryBackend::new());
        backend.insert_folder("dup");
        backend.insert("dup", "file");
        let cache = cache_with(&backend);
        // BTreeMap ordering lists "dup" before "dup/".
        let entry = cache.get_attributes("/dup").await.unwrap();
        assert_eq!(entry.key, "dup");
        assert!(!entry.folder);
    }

    #[tokio::test]
    async fn children_of_directory() {
        let backend = Arc::new(MemoryBackend::new());
        backend.insert_folder("docs");
        backend.insert("docs/a.txt", "a");
        backend.insert("docs/sub/b.txt", "b");
        backend.insert("top.txt", "t");
        let cache = cache_with(&backend);

        let mut root: Vec<String> = cache
            .children("/")
            .await
            .unwrap()
            .iter()
            .map(|e| e.name().to_string())
            .collect();
        root.sort();
        assert_eq!(root, vec!["docs", "top.txt"]);

        let docs: Vec<String> = cache
            .children("/docs")
            .await
            .unwrap()
            .iter()
            .map(|e| e.name().to_string())
            .collect();
        assert_eq!(docs, vec!["a.txt"]);
    }
}

//! Path-based filesystem operations over one bucket.
//!
//! Paths are absolute and normalized (`/docs/a.txt`). Every mutation that the
//! remote sees expires the listing cache so the next metadata read refetches.

use std::sync::Arc;

use bytes::Bytes;
use chrono::Utc;
use tracing::{debug, warn};

use crate::cadapter::client::ObjectBackend;
use crate::cadapter::signer::RequestSigner;
use crate::chuck::{FlushSummary, ReadBuffers, UploadPipeline};
use crate::config::MountConfig;
use crate::error::{FsError, FsResult};
use crate::meta::{DirectoryCache, FileEntry, remote_directory, remote_key, split_path};
use crate::vfs::handles::OpenFileTable;

pub const BLOCK_SIZE: u64 = 1024;
pub const TOTAL_BLOCKS: u64 = 5_000_000;
pub const NAME_MAX: u32 = 255;

/// Capacity figures reported by `statfs`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FsStat {
    pub bsize: u64,
    pub blocks: u64,
    pub bfree: u64,
    pub namelen: u32,
}

pub struct BucketFs<B: ObjectBackend> {
    config: MountConfig,
    backend: Arc<B>,
    cache: Arc<DirectoryCache<B>>,
    uploads: UploadPipeline<B>,
    reads: ReadBuffers<B>,
    handles: OpenFileTable,
}

impl<B: ObjectBackend> BucketFs<B> {
    pub fn new(backend: Arc<B>, signer: Arc<dyn RequestSigner>, config: MountConfig) -> Self {
        Self {
            cache: Arc::new(DirectoryCache::new(backend.clone(), config.cache_duration)),
            uploads: UploadPipeline::new(backend.clone(), signer, &config),
            reads: ReadBuffers::new(backend.clone(), config.read_retention),
            handles: OpenFileTable::new(),
            backend,
            config,
        }
    }

    pub fn config(&self) -> &MountConfig {
        &self.config
    }

    /// Shared handle on the listing cache, for the background refresher.
    pub fn cache(&self) -> Arc<DirectoryCache<B>> {
        self.cache.clone()
    }

    pub fn handles(&self) -> &OpenFileTable {
        &self.handles
    }

    pub fn uploads(&self) -> &UploadPipeline<B> {
        &self.uploads
    }

    fn mutated(&self, path: &str) {
        self.cache.invalidate();
        self.reads.forget(path);
    }

    /// Create an empty file. A one-byte placeholder is uploaded right away so
    /// the path shows up in listings before the first flush.
    pub async fn create(&self, path: &str) -> FsResult<(u64, FileEntry)> {
        let (_, name) = split_path(path);
        self.backend
            .upload_file(remote_directory(path), name, Bytes::from_static(&[1]))
            .await?;
        self.mutated(path);
        let fh = self.handles.open(path);
        debug!(%path, fh, "created");
        Ok((fh, new_entry(path, 1, false)))
    }

    pub async fn mkdir(&self, path: &str) -> FsResult<FileEntry> {
        self.backend.create_folder(remote_key(path)).await?;
        self.cache.invalidate();
        Ok(new_entry(path, 0, true))
    }

    /// Delete the object at `path`. The cache is expired whatever the remote
    /// answers; a missing key comes back as `NotFound`.
    pub async fn unlink(&self, path: &str) -> FsResult<()> {
        self.uploads.discard(path).await;
        let res = self.backend.delete_file(remote_key(path)).await;
        self.mutated(path);
        res.inspect_err(|e| warn!(%path, error = %e, "delete failed"))?;
        Ok(())
    }

    pub async fn rmdir(&self, path: &str) -> FsResult<()> {
        self.backend.delete_folder(remote_key(path)).await?;
        self.cache.invalidate();
        Ok(())
    }

    /// Replace the object with `size` zero bytes (at least one).
    pub async fn truncate(&self, path: &str, size: u64) -> FsResult<()> {
        let (_, name) = split_path(path);
        let len = usize::try_from(size.max(1))
            .map_err(|_| FsError::InvalidPath(format!("{path}: size {size} too large")))?;
        self.backend
            .upload_file(remote_directory(path), name, Bytes::from(vec![0u8; len]))
            .await?;
        self.mutated(path);
        Ok(())
    }

    pub async fn write(&self, path: &str, offset: u64, data: &[u8]) -> FsResult<usize> {
        self.uploads.write(path, offset, data).await
    }

    pub async fn flush(&self, path: &str) -> FsResult<Option<FlushSummary>> {
        let summary = self.uploads.flush(path).await?;
        if summary.is_some() {
            self.mutated(path);
        }
        Ok(summary)
    }

    pub async fn getattr(&self, path: &str) -> FsResult<FileEntry> {
        self.cache.get_attributes(path).await
    }

    pub async fn readdir(&self, path: &str) -> FsResult<Vec<FileEntry>> {
        self.cache.children(path).await
    }

    pub fn open(&self, path: &str) -> u64 {
        self.handles.open(path)
    }

    pub async fn read(&self, path: &str, offset: u64, size: u32) -> FsResult<Bytes> {
        self.reads.read(path, offset, size).await
    }

    pub fn release(&self, fh: u64) -> FsResult<String> {
        self.handles.release(fh).ok_or(FsError::BadHandle(fh))
    }

    pub async fn statfs(&self) -> FsResult<FsStat> {
        let usage = self.backend.bucket_usage().await?;
        let used_blocks = usage.storage_used / BLOCK_SIZE;
        Ok(FsStat {
            bsize: BLOCK_SIZE,
            blocks: TOTAL_BLOCKS,
            bfree: TOTAL_BLOCKS.saturating_sub(used_blocks),
            namelen: NAME_MAX,
        })
    }

    // The bucket has no attribute model; xattr calls succeed and store nothing.

    pub fn setxattr(&self, path: &str, name: &str) -> FsResult<()> {
        debug!(%path, %name, "setxattr ignored");
        Ok(())
    }

    pub fn getxattr(&self, _path: &str, _name: &str) -> FsResult<Bytes> {
        Ok(Bytes::new())
    }

    pub fn listxattr(&self, _path: &str) -> FsResult<Bytes> {
        Ok(Bytes::new())
    }

    pub fn removexattr(&self, path: &str, name: &str) -> FsResult<()> {
        debug!(%path, %name, "removexattr ignored");
        Ok(())
    }
}

fn new_entry(path: &str, size: u64, folder: bool) -> FileEntry {
    let key = remote_key(path).to_string();
    FileEntry {
        key: if folder { format!("{key}/") } else { key },
        path: path.to_string(),
        size,
        last_modified: Utc::now(),
        folder,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cadapter::memory::{CallStats, MemoryBackend};
    use crate::cadapter::signer::StaticSigner;
    use crate::error::StoreError;

    fn mount(backend: &Arc<MemoryBackend>) -> BucketFs<MemoryBackend> {
        BucketFs::new(
            backend.clone(),
            Arc::new(StaticSigner::new("me")),
            MountConfig {
                chunk_size: 64,
                ..MountConfig::new("bucket")
            },
        )
    }

    #[tokio::test]
    async fn create_uploads_placeholder_and_invalidates() {
        let backend = Arc::new(MemoryBackend::new());
        let fs = mount(&backend);
        assert!(fs.getattr("/n.txt").await.is_err());

        let (fh, entry) = fs.create("/n.txt").await.unwrap();
        assert!(!entry.folder);
        assert_eq!(entry.size, 1);
        assert_eq!(fs.handles().path(fh).as_deref(), Some("/n.txt"));
        assert_eq!(backend.object("n.txt").unwrap(), Bytes::from_static(&[1]));
        assert_eq!(fs.getattr("/n.txt").await.unwrap().size, 1);
        assert_eq!(CallStats::get(&backend.stats.list), 2);
    }

    #[tokio::test]
    async fn write_flush_then_read_back() {
        let backend = Arc::new(MemoryBackend::new());
        let fs = mount(&backend);
        let (fh, _) = fs.create("/docs/r.bin").await.unwrap();
        let data: Vec<u8> = (0..200u8).collect();
        fs.write("/docs/r.bin", 0, &data[..100]).await.unwrap();
        fs.write("/docs/r.bin", 100, &data[100..]).await.unwrap();
        let summary = fs.flush("/docs/r.bin").await.unwrap().unwrap();
        assert_eq!(summary.parts, 4);
        fs.release(fh).unwrap();

        assert_eq!(fs.getattr("/docs/r.bin").await.unwrap().size, 200);
        let got = fs.read("/docs/r.bin", 50, 100).await.unwrap();
        assert_eq!(&got[..], &data[50..150]);
    }

    #[tokio::test]
    async fn flush_replaces_stale_read_buffer() {
        let backend = Arc::new(MemoryBackend::new());
        backend.insert("f.txt", "old");
        let fs = mount(&backend);
        assert_eq!(&fs.read("/f.txt", 0, 10).await.unwrap()[..], b"old");

        fs.write("/f.txt", 0, b"brand new").await.unwrap();
        fs.flush("/f.txt").await.unwrap();
        assert_eq!(&fs.read("/f.txt", 0, 10).await.unwrap()[..], b"brand new");
    }

    #[tokio::test]
    async fn mkdir_and_rmdir() {
        let backend = Arc::new(MemoryBackend::new());
        let fs = mount(&backend);
        fs.mkdir("/photos").await.unwrap();
        let root = fs.readdir("/").await.unwrap();
        assert!(root.iter().any(|e| e.name() == "photos" && e.folder));

        fs.rmdir("/photos").await.unwrap();
        assert!(fs.readdir("/").await.unwrap().is_empty());
        assert!(matches!(
            fs.rmdir("/photos").await,
            Err(FsError::Store(StoreError::Api { status: 404, .. }))
        ));
    }

    #[tokio::test]
    async fn unlink_missing_is_not_found_and_invalidates() {
        let backend = Arc::new(MemoryBackend::new());
        let fs = mount(&backend);
        fs.readdir("/").await.unwrap();

        let err = fs.unlink("/foo.txt").await.unwrap_err();
        assert_eq!(err.errno(), libc::ENOENT);
        fs.readdir("/").await.unwrap();
        assert_eq!(CallStats::get(&backend.stats.list), 2);
    }

    #[tokio::test]
    async fn rejected_delete_is_io_error_and_invalidates() {
        let backend = Arc::new(MemoryBackend::new());
        backend.insert("keep.txt", "x");
        backend.fail_deletes(true);
        let fs = mount(&backend);
        fs.readdir("/").await.unwrap();

        let err = fs.unlink("/keep.txt").await.unwrap_err();
        assert_eq!(err.errno(), libc::EIO);
        fs.readdir("/").await.unwrap();
        assert_eq!(CallStats::get(&backend.stats.list), 2);
        assert!(backend.object("keep.txt").is_some());
    }

    #[tokio::test]
    async fn root_is_not_found_without_usage() {
        let backend = Arc::new(MemoryBackend::new());
        backend.fail_usage(true);
        let fs = mount(&backend);
        let err = fs.getattr("/").await.unwrap_err();
        assert!(matches!(err, FsError::NotFound(ref p) if p == "/"));
        assert_eq!(err.errno(), libc::ENOENT);
    }

    #[tokio::test]
    async fn truncate_uploads_zeroes() {
        let backend = Arc::new(MemoryBackend::new());
        backend.insert("t.bin", "abcdef");
        let fs = mount(&backend);
        fs.truncate("/t.bin", 3).await.unwrap();
        assert_eq!(backend.object("t.bin").unwrap(), Bytes::from_static(&[0, 0, 0]));
        fs.truncate("/t.bin", 0).await.unwrap();
        assert_eq!(backend.object("t.bin").unwrap().len(), 1);
    }

    #[tokio::test]
    async fn statfs_from_usage() {
        let backend = Arc::new(MemoryBackend::new());
        backend.insert("big", vec![0u8; 10 * 1024]);
        let fs = mount(&backend);
        let stat = fs.statfs().await.unwrap();
        assert_eq!(stat.bsize, 1024);
        assert_eq!(stat.blocks, 5_000_000);
        assert_eq!(stat.bfree, 5_000_000 - 10);
    }

    #[tokio::test]
    async fn release_unknown_handle() {
        let backend = Arc::new(MemoryBackend::new());
        let fs = mount(&backend);
        assert!(matches!(fs.release(42), Err(FsError::BadHandle(42))));
    }
}

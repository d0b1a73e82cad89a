//! FUSE binding
//!
//! Implements `rfuse3::raw::Filesystem` on top of the path-level [`BucketFs`].
//! Inodes are resolved to bucket paths through an [`InodeTable`]; every
//! failure is turned into an errno with `FsError::errno`.
//!
//! Submodules:
//! - `inode`: path/inode mapping
//! - `mount`: mount helpers over the rfuse3 session API
pub mod inode;
pub mod mount;

use std::ffi::{OsStr, OsString};
use std::num::NonZeroU32;
use std::pin::Pin;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use bytes::Bytes;
use futures_util::stream::{self, Stream};
use rfuse3::Result as FuseResult;
use rfuse3::raw::Filesystem;
use rfuse3::raw::Request;
use rfuse3::raw::reply::{
    DirectoryEntry, DirectoryEntryPlus, FileAttr, ReplyAttr, ReplyCreated, ReplyData,
    ReplyDirectory, ReplyDirectoryPlus, ReplyEntry, ReplyInit, ReplyOpen, ReplyStatFs, ReplyWrite,
    ReplyXAttr,
};
use rfuse3::{FileType, SetAttr, Timestamp};
use tracing::{debug, info, warn};

use crate::cadapter::client::ObjectBackend;
use crate::meta::{FileEntry, split_path};
use crate::vfs::BucketFs;
use inode::InodeTable;

const TTL: Duration = Duration::from_secs(1);
const MAX_WRITE: u32 = 1024 * 1024;

pub struct BucketFuse<B: ObjectBackend> {
    fs: Arc<BucketFs<B>>,
    inodes: InodeTable,
}

impl<B: ObjectBackend> BucketFuse<B> {
    pub fn new(fs: Arc<BucketFs<B>>) -> Self {
        Self {
            fs,
            inodes: InodeTable::new(),
        }
    }

    fn path_of(&self, ino: u64) -> FuseResult<String> {
        self.inodes.path(ino).ok_or_else(|| libc::ENOENT.into())
    }

    fn child_of(&self, parent: u64, name: &OsStr) -> FuseResult<String> {
        self.inodes
            .child_path(parent, &name.to_string_lossy())
            .ok_or_else(|| libc::ENOENT.into())
    }

    /// Path an open handle refers to, falling back to the inode's path.
    fn handle_path(&self, ino: u64, fh: u64) -> FuseResult<String> {
        match self.fs.handles().path(fh) {
            Some(path) => Ok(path),
            None => self.path_of(ino),
        }
    }

    fn attr_for(&self, entry: &FileEntry, req: &Request) -> FileAttr {
        let ino = self.inodes.assign(&entry.path);
        entry_to_attr(ino, entry, req)
    }

    async fn flush_path(&self, path: &str) -> FuseResult<()> {
        if let Some(summary) = self.fs.flush(path).await? {
            info!(
                %path,
                bytes = summary.bytes,
                parts = summary.parts,
                seconds = summary.elapsed.as_secs_f64(),
                "flushed"
            );
        }
        Ok(())
    }

    async fn listing(&self, ino: u64) -> FuseResult<(String, Vec<FileEntry>)> {
        let path = self.path_of(ino)?;
        let entries = self.fs.readdir(&path).await?;
        Ok((path, entries))
    }
}

impl<B: ObjectBackend> Filesystem for BucketFuse<B> {
    type DirEntryStream<'a>
        = Pin<Box<dyn Stream<Item = FuseResult<DirectoryEntry>> + Send + 'a>>
    where
        Self: 'a;

    type DirEntryPlusStream<'a>
        = Pin<Box<dyn Stream<Item = FuseResult<DirectoryEntryPlus>> + Send + 'a>>
    where
        Self: 'a;

    async fn init(&self, _req: Request) -> FuseResult<ReplyInit> {
        let max_write = NonZeroU32::new(MAX_WRITE).ok_or(libc::EINVAL)?;
        info!(bucket = %self.fs.config().bucket, "filesystem initialized");
        Ok(ReplyInit { max_write })
    }

    async fn destroy(&self, _req: Request) {
        debug!("filesystem destroyed");
    }

    async fn lookup(&self, req: Request, parent: u64, name: &OsStr) -> FuseResult<ReplyEntry> {
        let path = self.child_of(parent, name)?;
        let entry = self.fs.getattr(&path).await?;
        Ok(ReplyEntry {
            ttl: TTL,
            attr: self.attr_for(&entry, &req),
            generation: 0,
        })
    }

    async fn forget(&self, _req: Request, _inode: u64, _nlookup: u64) {}

    async fn batch_forget(&self, _req: Request, _inodes: &[(u64, u64)]) {}

    async fn getattr(
        &self,
        req: Request,
        ino: u64,
        _fh: Option<u64>,
        _flags: u32,
    ) -> FuseResult<ReplyAttr> {
        let path = self.path_of(ino)?;
        let entry = self.fs.getattr(&path).await?;
        Ok(ReplyAttr {
            ttl: TTL,
            attr: entry_to_attr(ino, &entry, &req),
        })
    }

    // Only size changes are honoured (truncate).
    async fn setattr(
        &self,
        req: Request,
        ino: u64,
        _fh: Option<u64>,
        set_attr: SetAttr,
    ) -> FuseResult<ReplyAttr> {
        let path = self.path_of(ino)?;
        if let Some(size) = set_attr.size {
            self.fs.truncate(&path, size).await?;
        }
        let entry = self.fs.getattr(&path).await?;
        Ok(ReplyAttr {
            ttl: TTL,
            attr: entry_to_attr(ino, &entry, &req),
        })
    }

    async fn open(&self, _req: Request, ino: u64, _flags: u32) -> FuseResult<ReplyOpen> {
        let path = self.path_of(ino)?;
        let fh = self.fs.open(&path);
        debug!(%path, fh, "opened");
        Ok(ReplyOpen { fh, flags: 0 })
    }

    async fn read(
        &self,
        _req: Request,
        ino: u64,
        fh: u64,
        offset: u64,
        size: u32,
    ) -> FuseResult<ReplyData> {
        let path = self.handle_path(ino, fh)?;
        let data = self.fs.read(&path, offset, size).await?;
        Ok(ReplyData { data })
    }

    async fn write(
        &self,
        _req: Request,
        ino: u64,
        fh: u64,
        offset: u64,
        data: &[u8],
        _write_flags: u32,
        _flags: u32,
    ) -> FuseResult<ReplyWrite> {
        let path = self.handle_path(ino, fh)?;
        let written = self.fs.write(&path, offset, data).await?;
        Ok(ReplyWrite {
            written: written as u32,
        })
    }

    async fn statfs(&self, _req: Request, _ino: u64) -> FuseResult<ReplyStatFs> {
        let stat = self.fs.statfs().await?;
        Ok(ReplyStatFs {
            blocks: stat.blocks,
            bfree: stat.bfree,
            bavail: stat.bfree,
            files: 0,
            ffree: u64::MAX,
            bsize: stat.bsize as u32,
            namelen: stat.namelen,
            frsize: stat.bsize as u32,
        })
    }

    async fn release(
        &self,
        _req: Request,
        _inode: u64,
        fh: u64,
        _flags: u32,
        _lock_owner: u64,
        _flush: bool,
    ) -> FuseResult<()> {
        if let Err(e) = self.fs.release(fh) {
            warn!(fh, error = %e, "release of unknown handle");
        }
        Ok(())
    }

    async fn fsync(&self, _req: Request, inode: u64, fh: u64, _datasync: bool) -> FuseResult<()> {
        let path = self.handle_path(inode, fh)?;
        self.flush_path(&path).await
    }

    async fn setxattr(
        &self,
        _req: Request,
        inode: u64,
        name: &OsStr,
        _value: &[u8],
        _flags: u32,
        _position: u32,
    ) -> FuseResult<()> {
        let path = self.path_of(inode)?;
        Ok(self.fs.setxattr(&path, &name.to_string_lossy())?)
    }

    async fn getxattr(
        &self,
        _req: Request,
        inode: u64,
        name: &OsStr,
        size: u32,
    ) -> FuseResult<ReplyXAttr> {
        let path = self.path_of(inode)?;
        let value = self.fs.getxattr(&path, &name.to_string_lossy())?;
        Ok(xattr_reply(value, size))
    }

    async fn listxattr(&self, _req: Request, inode: u64, size: u32) -> FuseResult<ReplyXAttr> {
        let path = self.path_of(inode)?;
        let names = self.fs.listxattr(&path)?;
        Ok(xattr_reply(names, size))
    }

    async fn removexattr(&self, _req: Request, inode: u64, name: &OsStr) -> FuseResult<()> {
        let path = self.path_of(inode)?;
        Ok(self.fs.removexattr(&path, &name.to_string_lossy())?)
    }

    async fn flush(&self, _req: Request, inode: u64, fh: u64, _lock_owner: u64) -> FuseResult<()> {
        let path = self.handle_path(inode, fh)?;
        self.flush_path(&path).await
    }

    async fn opendir(&self, _req: Request, ino: u64, _flags: u32) -> FuseResult<ReplyOpen> {
        self.path_of(ino)?;
        Ok(ReplyOpen { fh: 0, flags: 0 })
    }

    async fn readdir<'a>(
        &'a self,
        _req: Request,
        ino: u64,
        _fh: u64,
        offset: i64,
    ) -> FuseResult<ReplyDirectory<Self::DirEntryStream<'a>>> {
        let (path, entries) = self.listing(ino).await?;
        let parent_ino = self.inodes.assign(split_path(&path).0);

        let mut all = Vec::with_capacity(entries.len() + 2);
        all.push(DirectoryEntry {
            inode: ino,
            kind: FileType::Directory,
            name: OsString::from("."),
            offset: 1,
        });
        all.push(DirectoryEntry {
            inode: parent_ino,
            kind: FileType::Directory,
            name: OsString::from(".."),
            offset: 2,
        });
        for (i, e) in entries.iter().enumerate() {
            all.push(DirectoryEntry {
                inode: self.inodes.assign(&e.path),
                kind: kind_of(e),
                name: OsString::from(e.name()),
                offset: i as i64 + 3,
            });
        }

        let start = offset.max(0) as usize;
        let rest: Vec<_> = all.into_iter().skip(start).map(Ok).collect();
        let entries: Self::DirEntryStream<'a> = Box::pin(stream::iter(rest));
        Ok(ReplyDirectory { entries })
    }

    async fn releasedir(
        &self,
        _req: Request,
        _inode: u64,
        _fh: u64,
        _flags: u32,
    ) -> FuseResult<()> {
        Ok(())
    }

    async fn mkdir(
        &self,
        req: Request,
        parent: u64,
        name: &OsStr,
        _mode: u32,
        _umask: u32,
    ) -> FuseResult<ReplyEntry> {
        let path = self.child_of(parent, name)?;
        let entry = self.fs.mkdir(&path).await?;
        Ok(ReplyEntry {
            ttl: TTL,
            attr: self.attr_for(&entry, &req),
            generation: 0,
        })
    }

    async fn unlink(&self, _req: Request, parent: u64, name: &OsStr) -> FuseResult<()> {
        let path = self.child_of(parent, name)?;
        self.fs.unlink(&path).await?;
        self.inodes.remove(&path);
        Ok(())
    }

    async fn rmdir(&self, _req: Request, parent: u64, name: &OsStr) -> FuseResult<()> {
        let path = self.child_of(parent, name)?;
        self.fs.rmdir(&path).await?;
        self.inodes.remove(&path);
        Ok(())
    }

    async fn create(
        &self,
        req: Request,
        parent: u64,
        name: &OsStr,
        _mode: u32,
        _flags: u32,
    ) -> FuseResult<ReplyCreated> {
        let path = self.child_of(parent, name)?;
        let (fh, entry) = self.fs.create(&path).await?;
        Ok(ReplyCreated {
            ttl: TTL,
            attr: self.attr_for(&entry, &req),
            generation: 0,
            fh,
            flags: 0,
        })
    }

    async fn interrupt(&self, _req: Request, _unique: u64) -> FuseResult<()> {
        Ok(())
    }

    async fn readdirplus<'a>(
        &'a self,
        req: Request,
        ino: u64,
        _fh: u64,
        offset: u64,
        _lock_owner: u64,
    ) -> FuseResult<ReplyDirectoryPlus<Self::DirEntryPlusStream<'a>>> {
        let (path, entries) = self.listing(ino).await?;
        let dir = self.fs.getattr(&path).await?;
        let (parent_path, _) = split_path(&path);
        let parent_ino = self.inodes.assign(parent_path);
        let parent = match self.fs.getattr(parent_path).await {
            Ok(entry) => entry,
            Err(_) => dir.clone(),
        };

        let plus = |inode: u64, entry: &FileEntry, name: OsString, offset: i64| {
            DirectoryEntryPlus {
                inode,
                generation: 0,
                kind: kind_of(entry),
                name,
                offset,
                attr: entry_to_attr(inode, entry, &req),
                entry_ttl: TTL,
                attr_ttl: TTL,
            }
        };

        let mut all = Vec::with_capacity(entries.len() + 2);
        all.push(plus(ino, &dir, OsString::from("."), 1));
        all.push(plus(parent_ino, &parent, OsString::from(".."), 2));
        for (i, e) in entries.iter().enumerate() {
            let child_ino = self.inodes.assign(&e.path);
            all.push(plus(child_ino, e, OsString::from(e.name()), i as i64 + 3));
        }

        let rest: Vec<_> = all.into_iter().skip(offset as usize).map(Ok).collect();
        let entries: Self::DirEntryPlusStream<'a> = Box::pin(stream::iter(rest));
        Ok(ReplyDirectoryPlus { entries })
    }
}

fn kind_of(entry: &FileEntry) -> FileType {
    if entry.folder {
        FileType::Directory
    } else {
        FileType::RegularFile
    }
}

fn xattr_reply(value: Bytes, size: u32) -> ReplyXAttr {
    if size == 0 {
        ReplyXAttr::Size(value.len() as u32)
    } else {
        ReplyXAttr::Data(value)
    }
}

fn entry_to_attr(ino: u64, entry: &FileEntry, req: &Request) -> FileAttr {
    let mtime = Timestamp::from(SystemTime::from(entry.last_modified));
    let perm = if entry.folder { 0o755 } else { 0o644 };
    FileAttr {
        ino,
        size: entry.size,
        blocks: entry.size.div_ceil(512),
        atime: mtime,
        mtime,
        ctime: mtime,
        #[cfg(target_os = "macos")]
        crtime: mtime,
        kind: kind_of(entry),
        perm,
        nlink: if entry.folder { 2 } else { 1 },
        uid: req.uid,
        gid: req.gid,
        rdev: 0,
        #[cfg(target_os = "macos")]
        flags: 0,
        blksize: 4096,
    }
}

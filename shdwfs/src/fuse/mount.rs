//! Mount helpers for starting/stopping FUSE
//!
//! Notes:
//! - Only supported on Unix-like systems. On Linux we mount unprivileged via fusermount3.
//! - These helpers are thin wrappers over rfuse3 raw Session APIs.

use std::path::Path;

use rfuse3::MountOptions;

use super::BucketFuse;
use crate::cadapter::client::ObjectBackend;

pub const FS_NAME: &str = "shdw-drive";

fn mount_options(allow_other: bool) -> MountOptions {
    let mut mo = MountOptions::default();
    mo.fs_name(FS_NAME);
    if allow_other {
        mo.allow_other(true);
    }
    mo
}

/// Mount `fs` on an empty directory. The returned handle unmounts on request.
#[cfg(target_os = "linux")]
pub async fn mount_bucket<B: ObjectBackend>(
    fs: BucketFuse<B>,
    mount_point: impl AsRef<Path>,
    allow_other: bool,
) -> std::io::Result<rfuse3::raw::MountHandle> {
    let session = rfuse3::raw::Session::new(mount_options(allow_other));
    session.mount_with_unprivileged(fs, mount_point).await
}

/// Fallback stub for non-Linux targets.
#[cfg(not(target_os = "linux"))]
pub async fn mount_bucket<B: ObjectBackend>(
    _fs: BucketFuse<B>,
    _mount_point: impl AsRef<Path>,
    _allow_other: bool,
) -> std::io::Result<rfuse3::raw::MountHandle> {
    Err(std::io::Error::new(
        std::io::ErrorKind::Unsupported,
        "FUSE mount is only supported on Linux in this build",
    ))
}

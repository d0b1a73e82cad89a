//! Bucket metadata: listing entries, path normalization and the listing cache.
//!
//! Remote keys are flat (`docs/a.txt`, folder markers end in `/`); the
//! filesystem sees them as absolute paths (`/docs/a.txt`, `/docs`).
pub mod cache;

use chrono::{DateTime, Utc};

use crate::cadapter::client::ObjectInfo;

pub use cache::DirectoryCache;

/// One listing row reshaped for path lookup. Rebuilt on every refresh.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileEntry {
    pub key: String,
    pub path: String,
    pub size: u64,
    pub last_modified: DateTime<Utc>,
    pub folder: bool,
}

impl FileEntry {
    pub fn from_object(info: ObjectInfo) -> Self {
        let path = key_to_path(&info.key);
        Self {
            key: info.key,
            path,
            size: info.size,
            last_modified: info.last_modified,
            folder: info.folder,
        }
    }

    pub fn name(&self) -> &str {
        split_path(&self.path).1
    }

    pub fn parent(&self) -> &str {
        split_path(&self.path).0
    }
}

/// `docs/sub/` -> `/docs/sub`, `a.txt` -> `/a.txt`.
pub fn key_to_path(key: &str) -> String {
    let trimmed = key.strip_suffix('/').unwrap_or(key);
    format!("/{trimmed}")
}

/// Split an absolute path into (parent, name). The root's parent is itself.
pub fn split_path(path: &str) -> (&str, &str) {
    match path.rfind('/') {
        Some(0) => ("/", &path[1..]),
        Some(n) => (&path[..n], &path[n + 1..]),
        None => ("/", path),
    }
}

/// Directory of `path` as the remote expects it: no leading slash, empty for root.
pub fn remote_directory(path: &str) -> &str {
    split_path(path).0.trim_start_matches('/')
}

/// Remote key for `path`: the path without its leading slash.
pub fn remote_key(path: &str) -> &str {
    path.trim_start_matches('/')
}

pub fn join_path(parent: &str, name: &str) -> String {
    if parent == "/" {
        format!("/{name}")
    } else {
        format!("{parent}/{name}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_become_absolute_paths() {
        assert_eq!(key_to_path("a.txt"), "/a.txt");
        assert_eq!(key_to_path("docs/"), "/docs");
        assert_eq!(key_to_path("docs/sub/b.bin"), "/docs/sub/b.bin");
    }

    #[test]
    fn split_and_join() {
        assert_eq!(split_path("/a.txt"), ("/", "a.txt"));
        assert_eq!(split_path("/data/big.bin"), ("/data", "big.bin"));
        assert_eq!(join_path("/", "x"), "/x");
        assert_eq!(join_path("/data", "x"), "/data/x");
        assert_eq!(remote_directory("/data/sub/big.bin"), "data/sub");
        assert_eq!(remote_directory("/big.bin"), "");
        assert_eq!(remote_key("/data/big.bin"), "data/big.bin");
    }

    #[test]
    fn entry_name_and_parent() {
        let entry = FileEntry::from_object(ObjectInfo {
            key: "docs/sub/".into(),
            size: 0,
            last_modified: Utc::now(),
            folder: true,
        });
        assert_eq!(entry.path, "/docs/sub");
        assert_eq!(entry.name(), "sub");
        assert_eq!(entry.parent(), "/docs");
    }
}

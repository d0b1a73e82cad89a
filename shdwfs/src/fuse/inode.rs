//! Path <-> inode mapping. The kernel speaks inodes, the bucket speaks paths.

use std::collections::HashMap;
use std::sync::Mutex;

use crate::meta::join_path;

pub const ROOT_INO: u64 = 1;

struct Inner {
    by_path: HashMap<String, u64>,
    by_ino: HashMap<u64, String>,
    next: u64,
}

pub struct InodeTable {
    inner: Mutex<Inner>,
}

impl Default for InodeTable {
    fn default() -> Self {
        Self::new()
    }
}

impl InodeTable {
    pub fn new() -> Self {
        let mut by_path = HashMap::new();
        let mut by_ino = HashMap::new();
        by_path.insert("/".to_string(), ROOT_INO);
        by_ino.insert(ROOT_INO, "/".to_string());
        Self {
            inner: Mutex::new(Inner {
                by_path,
                by_ino,
                next: ROOT_INO + 1,
            }),
        }
    }

    pub fn path(&self, ino: u64) -> Option<String> {
        self.inner.lock().unwrap().by_ino.get(&ino).cloned()
    }

    pub fn child_path(&self, parent: u64, name: &str) -> Option<String> {
        self.path(parent).map(|p| join_path(&p, name))
    }

    /// Inode for `path`, allocating one on first sight.
    pub fn assign(&self, path: &str) -> u64 {
        let mut inner = self.inner.lock().unwrap();
        if let Some(&ino) = inner.by_path.get(path) {
            return ino;
        }
        let ino = inner.next;
        inner.next += 1;
        inner.by_path.insert(path.to_string(), ino);
        inner.by_ino.insert(ino, path.to_string());
        ino
    }

    /// Forget `path`. The root is never removed.
    pub fn remove(&self, path: &str) {
        if path == "/" {
            return;
        }
        let mut inner = self.inner.lock().unwrap();
        if let Some(ino) = inner.by_path.remove(path) {
            inner.by_ino.remove(&ino);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn root_is_preassigned() {
        let table = InodeTable::new();
        assert_eq!(table.path(ROOT_INO).as_deref(), Some("/"));
        assert_eq!(table.assign("/"), ROOT_INO);
    }

    #[test]
    fn assign_is_stable_until_removed() {
        let table = InodeTable::new();
        let a = table.assign("/docs/a.txt");
        assert_eq!(table.assign("/docs/a.txt"), a);
        let docs = table.assign("/docs");
        assert_eq!(table.child_path(docs, "a.txt").as_deref(), Some("/docs/a.txt"));
        assert_eq!(table.child_path(ROOT_INO, "x").as_deref(), Some("/x"));

        table.remove("/docs/a.txt");
        assert_eq!(table.path(a), None);
        assert_ne!(table.assign("/docs/a.txt"), a);

        table.remove("/");
        assert_eq!(table.path(ROOT_INO).as_deref(), Some("/"));
    }
}

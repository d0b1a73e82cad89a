//! Open-file table: integer handles mapped to the path they were opened on.

use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

pub struct OpenFileTable {
    next_fh: AtomicU64,
    open: Mutex<HashMap<u64, String>>,
}

impl Default for OpenFileTable {
    fn default() -> Self {
        Self::new()
    }
}

impl OpenFileTable {
    pub fn new() -> Self {
        Self {
            next_fh: AtomicU64::new(1),
            open: Mutex::new(HashMap::new()),
        }
    }

    /// Allocate a new handle for `path`. Handles are never reused.
    pub fn open(&self, path: &str) -> u64 {
        let fh = self.next_fh.fetch_add(1, Ordering::Relaxed);
        self.open.lock().unwrap().insert(fh, path.to_string());
        fh
    }

    pub fn path(&self, fh: u64) -> Option<String> {
        self.open.lock().unwrap().get(&fh).cloned()
    }

    pub fn release(&self, fh: u64) -> Option<String> {
        self.open.lock().unwrap().remove(&fh)
    }

    pub fn len(&self) -> usize {
        self.open.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handles_are_monotonic_and_released() {
        let table = OpenFileTable::new();
        let a = table.open("/a.txt");
        let b = table.open("/a.txt");
        assert!(b > a);
        assert_eq!(table.path(a).as_deref(), Some("/a.txt"));
        assert_eq!(table.len(), 2);

        assert_eq!(table.release(a).as_deref(), Some("/a.txt"));
        assert_eq!(table.path(a), None);
        assert_eq!(table.release(a), None);

        let c = table.open("/b.txt");
        assert!(c > b);
    }
}

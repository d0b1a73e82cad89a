//! VFS layer
//!
//! Path-level filesystem operations over the bucket. `BucketFs` is the
//! composition root: it owns the listing cache, the upload pipeline, the read
//! buffers and the open-file table, and maps each operation onto them.
//!
//! Submodules:
//! - `fs`: the path-level operations
//! - `handles`: open-file handle table
pub mod fs;
pub mod handles;

pub use fs::{BucketFs, FsStat};

//! shdwfs: a Shadow Drive bucket mounted as a FUSE filesystem.
//!
//! Layers, bottom up: `cadapter` talks to the remote, `chuck` buffers uploads
//! and downloads, `meta` caches the bucket listing, `vfs` exposes path-level
//! operations and `fuse` binds them to the kernel.

pub mod cadapter;
pub mod chuck;
pub mod cli;
pub mod config;
pub mod daemon;
pub mod error;
pub mod fuse;
pub mod meta;
pub mod vfs;

//! Error types shared by the remote adapter and the filesystem layer.
//!
//! Remote failures are carried as [`StoreError`]; the filesystem handlers wrap
//! them in [`FsError`], which collapses everything into the handful of errno
//! values the kernel protocol can transport.

use std::io;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("connection reset by remote: {0}")]
    ConnectionReset(String),

    #[error("http transport error: {0}")]
    Transport(#[source] reqwest::Error),

    #[error("remote api rejected request ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("object not found: {0}")]
    NotFound(String),

    #[error("invalid response: {0}")]
    InvalidResponse(String),

    #[error("signing failed: {0}")]
    Signing(String),

    #[error("{operation} failed after {attempts} attempts: {source}")]
    RetriesExhausted {
        operation: &'static str,
        attempts: u32,
        #[source]
        source: Box<StoreError>,
    },

    #[error("upload task failed: {0}")]
    TaskFailed(String),
}

impl StoreError {
    /// True when the failure is a connection reset somewhere in the source chain.
    pub fn is_connection_reset(&self) -> bool {
        match self {
            Self::ConnectionReset(_) => true,
            Self::Transport(e) => source_chain_has_reset(e),
            Self::RetriesExhausted { source, .. } => source.is_connection_reset(),
            _ => false,
        }
    }

    pub fn is_not_found(&self) -> bool {
        match self {
            Self::NotFound(_) => true,
            Self::Api { status, .. } => *status == 404,
            Self::RetriesExhausted { source, .. } => source.is_not_found(),
            _ => false,
        }
    }
}

impl From<reqwest::Error> for StoreError {
    fn from(e: reqwest::Error) -> Self {
        if source_chain_has_reset(&e) {
            return Self::ConnectionReset(e.to_string());
        }
        Self::Transport(e)
    }
}

fn source_chain_has_reset(e: &(dyn std::error::Error + 'static)) -> bool {
    let mut cur: Option<&(dyn std::error::Error + 'static)> = Some(e);
    while let Some(err) = cur {
        if let Some(io_err) = err.downcast_ref::<io::Error>() {
            if io_err.kind() == io::ErrorKind::ConnectionReset {
                return true;
            }
        }
        cur = err.source();
    }
    false
}

#[derive(Error, Debug)]
pub enum FsError {
    #[error("no such entry: {0}")]
    NotFound(String),

    #[error("invalid path: {0}")]
    InvalidPath(String),

    #[error("unknown file handle {0}")]
    BadHandle(u64),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl FsError {
    /// Errno reported to the kernel. Only "no entry" and "I/O error" are used.
    pub fn errno(&self) -> i32 {
        match self {
            Self::NotFound(_) => libc::ENOENT,
            Self::Store(e) if e.is_not_found() => libc::ENOENT,
            Self::InvalidPath(_) => libc::ENOENT,
            Self::BadHandle(_) => libc::EBADF,
            _ => libc::EIO,
        }
    }
}

impl From<FsError> for rfuse3::Errno {
    fn from(e: FsError) -> Self {
        e.errno().into()
    }
}

pub type FsResult<T> = Result<T, FsError>;

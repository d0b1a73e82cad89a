//! Read stream buffer: one streaming download per path, shared by all readers.
//!
//! The first read of a path starts a background fetch of the whole object.
//! Bytes are appended to the session buffer as they arrive and every append
//! publishes the new length on a `watch` channel. A read returns once its
//! range is buffered or the stream has ended. Finished sessions stay around
//! for the retention period so repeated reads skip the network.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use futures::StreamExt;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::util::transfer_rate;
use crate::cadapter::client::ObjectBackend;
use crate::error::{FsResult, StoreError};

#[derive(Debug, Clone, Default)]
struct StreamStatus {
    received: usize,
    finished: bool,
    failed: Option<String>,
    /// Set when the session is dropped from the map; ends the retention wait.
    forgotten: bool,
}

struct ReadSession {
    buffer: Mutex<BytesMut>,
    status: watch::Sender<StreamStatus>,
    started: Instant,
}

impl ReadSession {
    fn new() -> Self {
        let (status, _) = watch::channel(StreamStatus::default());
        Self {
            buffer: Mutex::new(BytesMut::new()),
            status,
            started: Instant::now(),
        }
    }

    fn copy_range(&self, offset: usize, end: usize) -> Bytes {
        let buffer = self.buffer.lock().unwrap();
        let start = offset.min(buffer.len());
        let stop = end.min(buffer.len());
        Bytes::copy_from_slice(&buffer[start..stop])
    }
}

type SessionMap = Arc<Mutex<HashMap<String, Arc<ReadSession>>>>;

pub struct ReadBuffers<B: ObjectBackend> {
    backend: Arc<B>,
    retention: Duration,
    sessions: SessionMap,
}

impl<B: ObjectBackend> ReadBuffers<B> {
    pub fn new(backend: Arc<B>, retention: Duration) -> Self {
        Self {
            backend,
            retention,
            sessions: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn is_buffered(&self, path: &str) -> bool {
        self.sessions.lock().unwrap().contains_key(path)
    }

    /// Drop the session for `path`; the next read fetches again. A fetch still
    /// running finishes into the detached session, which is then released
    /// without waiting out the retention period.
    pub fn forget(&self, path: &str) {
        let removed = self.sessions.lock().unwrap().remove(path);
        if let Some(session) = removed {
            session.status.send_modify(|s| s.forgotten = true);
            debug!(%path, "read buffer dropped");
        }
    }

    fn session_for(&self, path: &str) -> Arc<ReadSession> {
        let mut sessions = self.sessions.lock().unwrap();
        if let Some(session) = sessions.get(path) {
            return session.clone();
        }
        let session = Arc::new(ReadSession::new());
        sessions.insert(path.to_string(), session.clone());
        debug!(%path, "starting streaming fetch");
        tokio::spawn(fetch(
            self.backend.clone(),
            path.to_string(),
            session.clone(),
            self.sessions.clone(),
            self.retention,
        ));
        session
    }

    /// Read `size` bytes at `offset`. Short only when the object ends first.
    pub async fn read(&self, path: &str, offset: u64, size: u32) -> FsResult<Bytes> {
        let session = self.session_for(path);
        let offset = offset as usize;
        let end = offset.saturating_add(size as usize);

        let mut rx = session.status.subscribe();
        let status = rx
            .wait_for(|s| s.received >= end || s.finished || s.failed.is_some())
            .await
            .map_err(|e| StoreError::TaskFailed(e.to_string()))?
            .clone();
        if let Some(message) = status.failed {
            return Err(StoreError::TaskFailed(format!("download of {path} failed: {message}")).into());
        }
        Ok(session.copy_range(offset, end))
    }
}

fn remove_if_current(sessions: &SessionMap, path: &str, session: &Arc<ReadSession>) -> bool {
    let mut sessions = sessions.lock().unwrap();
    if sessions.get(path).is_some_and(|s| Arc::ptr_eq(s, session)) {
        sessions.remove(path);
        return true;
    }
    false
}

async fn fetch<B: ObjectBackend>(
    backend: Arc<B>,
    path: String,
    session: Arc<ReadSession>,
    sessions: SessionMap,
    retention: Duration,
) {
    let outcome = async {
        let mut stream = backend.open_stream(&path).await?;
        while let Some(item) = stream.next().await {
            let bytes = item?;
            let received = {
                let mut buffer = session.buffer.lock().unwrap();
                buffer.extend_from_slice(&bytes);
                buffer.len()
            };
            session.status.send_modify(|s| s.received = received);
        }
        Ok::<usize, StoreError>(session.status.borrow().received)
    }
    .await;

    match outcome {
        Ok(total) => {
            session.status.send_modify(|s| s.finished = true);
            let elapsed = session.started.elapsed();
            info!(
                %path,
                bytes = total,
                seconds = elapsed.as_secs_f64(),
                rate_mib_s = transfer_rate(total as u64, elapsed),
                "download finished"
            );
            let mut rx = session.status.subscribe();
            tokio::select! {
                _ = tokio::time::sleep(retention) => {
                    if remove_if_current(&sessions, &path, &session) {
                        debug!(%path, "read buffer expired");
                    }
                }
                _ = rx.wait_for(|s| s.forgotten) => {
                    debug!(%path, "forgotten read buffer released");
                }
            }
        }
        Err(e) => {
            warn!(%path, error = %e, "download failed");
            remove_if_current(&sessions, &path, &session);
            session
                .status
                .send_modify(|s| s.failed = Some(e.to_string()));
        }
    }
}

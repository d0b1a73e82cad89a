//! Upload pipeline: per-path write buffering and chunked multipart upload.
//!
//! Writes append to a per-path buffer. Once the buffer grows past the chunk
//! size a multipart session is opened (first chunk only) and every full chunk
//! is handed to a spawned part-upload task gated by the [`UploadLimiter`].
//! `flush` either uploads the buffer in one shot (never escalated) or sends the
//! tail as the last part, joins every part task in dispatch order and
//! completes the multipart session.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use super::limiter::UploadLimiter;
use super::retry::{RetryPolicy, execute_with_retry};
use super::util::transfer_rate;
use crate::cadapter::client::{
    CompleteMultipartRequest, CreateMultipartRequest, MultipartSession, ObjectBackend, UploadPart,
    UploadPartRequest,
};
use crate::cadapter::signer::{RequestSigner, multipart_init_message};
use crate::config::MountConfig;
use crate::error::{FsResult, StoreError};
use crate::meta::{remote_directory, split_path};

type PartTask = JoinHandle<Result<UploadPart, StoreError>>;

struct MultipartState {
    session: MultipartSession,
    /// Parts dispatched so far; also the number of the last part.
    chunks_dispatched: u32,
    /// Part tasks in dispatch order.
    parts: Vec<PartTask>,
}

enum UploadMode {
    /// Nothing sliced off yet; flush uploads the buffer in one request.
    Single,
    Multipart(MultipartState),
}

struct WriteSession {
    buffer: BytesMut,
    mode: UploadMode,
    bytes_written: u64,
    started: Instant,
}

impl Default for WriteSession {
    fn default() -> Self {
        Self {
            buffer: BytesMut::new(),
            mode: UploadMode::Single,
            bytes_written: 0,
            started: Instant::now(),
        }
    }
}

/// What a successful flush uploaded.
#[derive(Debug, Clone, PartialEq)]
pub struct FlushSummary {
    pub bytes: u64,
    /// Zero for a single-shot upload.
    pub parts: u32,
    pub elapsed: Duration,
}

pub struct UploadPipeline<B: ObjectBackend> {
    backend: Arc<B>,
    signer: Arc<dyn RequestSigner>,
    limiter: UploadLimiter,
    bucket: String,
    chunk_size: usize,
    part_retry: RetryPolicy,
    complete_retry: RetryPolicy,
    sessions: RwLock<HashMap<String, Arc<Mutex<WriteSession>>>>,
}

impl<B: ObjectBackend> UploadPipeline<B> {
    pub fn new(backend: Arc<B>, signer: Arc<dyn RequestSigner>, config: &MountConfig) -> Self {
        Self {
            backend,
            signer,
            limiter: UploadLimiter::new(config.max_concurrency),
            bucket: config.bucket.clone(),
            chunk_size: config.chunk_size.max(1),
            part_retry: config.part_retry,
            complete_retry: config.complete_retry,
            sessions: RwLock::new(HashMap::new()),
        }
    }

    pub fn limiter(&self) -> &UploadLimiter {
        &self.limiter
    }

    async fn session_slot(&self, path: &str) -> Arc<Mutex<WriteSession>> {
        if let Some(slot) = self.sessions.read().await.get(path) {
            return slot.clone();
        }
        self.sessions
            .write()
            .await
            .entry(path.to_string())
            .or_insert_with(|| {
                debug!(%path, "write session opened");
                Arc::new(Mutex::new(WriteSession::default()))
            })
            .clone()
    }

    /// Lock the live session for `path`. A slot that a concurrent flush or
    /// discard took out of the map while we waited is skipped.
    async fn lock_current(
        &self,
        path: &str,
    ) -> (Arc<Mutex<WriteSession>>, OwnedMutexGuard<WriteSession>) {
        loop {
            let slot = self.session_slot(path).await;
            let session = slot.clone().lock_owned().await;
            let current = self
                .sessions
                .read()
                .await
                .get(path)
                .is_some_and(|s| Arc::ptr_eq(s, &slot));
            if current {
                return (slot, session);
            }
            debug!(%path, "write session replaced while waiting, retrying");
        }
    }

    async fn drop_slot(&self, path: &str, slot: &Arc<Mutex<WriteSession>>) {
        let mut sessions = self.sessions.write().await;
        if sessions.get(path).is_some_and(|s| Arc::ptr_eq(s, slot)) {
            sessions.remove(path);
        }
    }

    pub async fn has_session(&self, path: &str) -> bool {
        self.sessions.read().await.contains_key(path)
    }

    /// Number of parts dispatched for `path`, `None` without a session.
    pub async fn dispatched_parts(&self, path: &str) -> Option<u32> {
        let slot = self.sessions.read().await.get(path).cloned()?;
        let session = slot.lock().await;
        Some(match &session.mode {
            UploadMode::Single => 0,
            UploadMode::Multipart(state) => state.chunks_dispatched,
        })
    }

    /// Append `data` to the session for `path`, slicing off full chunks.
    ///
    /// Returns once the chunks are scheduled; part uploads run in the
    /// background and are joined by [`UploadPipeline::flush`]. A failed
    /// multipart create discards the session.
    pub async fn write(&self, path: &str, offset: u64, data: &[u8]) -> FsResult<usize> {
        let (slot, mut session) = self.lock_current(path).await;
        if offset != session.bytes_written {
            warn!(
                %path,
                offset,
                expected = session.bytes_written,
                "non-sequential write appended at end of buffer"
            );
        }
        session.buffer.extend_from_slice(data);
        session.bytes_written += data.len() as u64;

        while session.buffer.len() > self.chunk_size {
            if matches!(session.mode, UploadMode::Single) {
                let created = match self.create_large_file(path, session.bytes_written).await {
                    Ok(created) => created,
                    Err(e) => {
                        error!(%path, error = %e, "multipart create failed");
                        drop(session);
                        self.drop_slot(path, &slot).await;
                        return Err(e.into());
                    }
                };
                info!(%path, upload_id = %created.upload_id, "multipart upload started");
                session.mode = UploadMode::Multipart(MultipartState {
                    session: created,
                    chunks_dispatched: 0,
                    parts: Vec::new(),
                });
            }
            let chunk = session.buffer.split_to(self.chunk_size).freeze();
            if let UploadMode::Multipart(state) = &mut session.mode {
                self.dispatch_chunk(path, state, chunk);
            }
        }
        Ok(data.len())
    }

    async fn create_large_file(&self, path: &str, size: u64) -> Result<MultipartSession, StoreError> {
        let name = split_path(path).1;
        let dir = remote_directory(path);
        let directory = if dir.is_empty() {
            String::new()
        } else {
            format!("{dir}/")
        };
        let message = multipart_init_message(&self.bucket, name, size);
        let signature = self.signer.sign(&message)?;
        let file_type = name
            .rsplit_once('.')
            .map(|(_, ext)| ext.to_string())
            .unwrap_or_default();
        self.backend
            .create_multipart(CreateMultipartRequest {
                filename: name.to_string(),
                message: signature,
                signer: self.signer.signer(),
                size,
                file_type,
                full_path: format!("{directory}{name}"),
                directory,
            })
            .await
    }

    fn dispatch_chunk(&self, path: &str, state: &mut MultipartState, chunk: Bytes) {
        state.chunks_dispatched += 1;
        let part_number = state.chunks_dispatched;
        debug!(%path, part_number, len = chunk.len(), "chunk dispatched");
        let req = UploadPartRequest {
            session: state.session.clone(),
            part_number,
            file_name: split_path(path).1.to_string(),
            signer: self.signer.signer(),
            chunk,
        };
        state.parts.push(tokio::spawn(upload_chunk_task(
            self.backend.clone(),
            self.limiter.clone(),
            self.part_retry,
            req,
        )));
    }

    /// Finish the session for `path`. `Ok(None)` when nothing was written.
    /// The session is gone afterwards whether or not the upload succeeded.
    pub async fn flush(&self, path: &str) -> FsResult<Option<FlushSummary>> {
        let Some(slot) = self.sessions.write().await.remove(path) else {
            return Ok(None);
        };
        let session = std::mem::take(&mut *slot.lock().await);
        let WriteSession {
            buffer,
            mode,
            bytes_written,
            started,
        } = session;

        let mut state = match mode {
            UploadMode::Single => {
                let (_, name) = split_path(path);
                self.backend
                    .upload_file(remote_directory(path), name, buffer.freeze())
                    .await
                    .inspect_err(|e| error!(%path, error = %e, "upload failed"))?;
                debug!(%path, bytes = bytes_written, "single upload finished");
                return Ok(Some(FlushSummary {
                    bytes: bytes_written,
                    parts: 0,
                    elapsed: started.elapsed(),
                }));
            }
            UploadMode::Multipart(state) => state,
        };

        if !buffer.is_empty() {
            debug!(%path, "uploading last chunk");
            self.dispatch_chunk(path, &mut state, buffer.freeze());
        }

        let parts = join_parts(std::mem::take(&mut state.parts))
            .await
            .inspect_err(|e| error!(%path, error = %e, "part upload failed"))?;
        let elapsed = started.elapsed();
        info!(
            %path,
            parts = parts.len(),
            seconds = elapsed.as_secs_f64(),
            rate_mib_s = transfer_rate(bytes_written, elapsed),
            "all parts uploaded"
        );

        let req = CompleteMultipartRequest {
            session: state.session,
            parts,
            signer: self.signer.signer(),
        };
        let response = execute_with_retry(&self.complete_retry, "complete_multipart", || {
            self.backend.complete_multipart(req.clone())
        })
        .await
        .inspect_err(|e| error!(%path, error = %e, "multipart completion failed"))?;
        debug!(%path, %response, "multipart upload completed");

        Ok(Some(FlushSummary {
            bytes: bytes_written,
            parts: state.chunks_dispatched,
            elapsed,
        }))
    }

    /// Drop any buffered data for `path` without uploading it. Parts already
    /// dispatched keep running to completion.
    pub async fn discard(&self, path: &str) {
        let removed = self.sessions.write().await.remove(path);
        if let Some(slot) = removed {
            let session = slot.lock().await;
            if let UploadMode::Multipart(state) = &session.mode {
                warn!(%path, parts = state.parts.len(), "discarding multipart session");
            }
        }
    }
}

async fn upload_chunk_task<B: ObjectBackend>(
    backend: Arc<B>,
    limiter: UploadLimiter,
    policy: RetryPolicy,
    req: UploadPartRequest,
) -> Result<UploadPart, StoreError> {
    let part_number = req.part_number;
    debug!(part_number, "pending chunk");
    let _permit = limiter.acquire().await;
    debug!(part_number, "uploading chunk");
    execute_with_retry(&policy, "upload_part", || backend.upload_part(req.clone())).await
}

/// Await every part task, in dispatch order. All tasks are joined even after a
/// failure; the first failure is returned. Parts come back sorted by number.
async fn join_parts(tasks: Vec<PartTask>) -> Result<Vec<UploadPart>, StoreError> {
    let mut parts = Vec::with_capacity(tasks.len());
    let mut first_err: Option<StoreError> = None;
    for task in tasks {
        let outcome = match task.await {
            Ok(res) => res,
            Err(e) => Err(StoreError::TaskFailed(e.to_string())),
        };
        match outcome {
            Ok(part) => parts.push(part),
            Err(e) => {
                if first_err.is_none() {
                    first_err = Some(e);
                }
            }
        }
    }
    if let Some(e) = first_err {
        return Err(e);
    }
    parts.sort_by_key(|p| p.part_number);
    Ok(parts)
}

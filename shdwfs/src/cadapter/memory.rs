//! In-memory backend: keeps objects in a map and records every remote call.
//!
//! Used by the unit and integration tests; faults (connection resets on part
//! upload or mid-download, failing create/upload/completion/listing/delete/usage)
//! and latency can be injected.

use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use futures::stream;

use super::client::{
    BucketUsage, ByteStream, CompleteMultipartRequest, CreateMultipartRequest, MultipartSession,
    ObjectBackend, ObjectInfo, UploadPart, UploadPartRequest,
};
use crate::error::StoreError;

/// Counters for remote calls, one field per endpoint.
#[derive(Debug, Default)]
pub struct CallStats {
    pub list: AtomicUsize,
    pub usage: AtomicUsize,
    pub upload: AtomicUsize,
    pub delete: AtomicUsize,
    pub create_folder: AtomicUsize,
    pub delete_folder: AtomicUsize,
    pub create_multipart: AtomicUsize,
    pub upload_part: AtomicUsize,
    pub complete: AtomicUsize,
    pub stream: AtomicUsize,
    parts_in_flight: AtomicUsize,
    pub peak_parts_in_flight: AtomicUsize,
}

impl CallStats {
    pub fn get(counter: &AtomicUsize) -> usize {
        counter.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Default)]
struct Faults {
    /// Remaining part uploads that fail with a connection reset.
    part_resets: usize,
    /// Part numbers that fail with a non-retryable api error.
    part_rejects: Vec<u32>,
    complete_failures: usize,
    create_failures: usize,
    upload_failures: usize,
    /// Next download yields this many items, then a connection reset.
    stream_reset_after: Option<usize>,
    fail_listing: bool,
    fail_delete: bool,
    fail_usage: bool,
}

#[derive(Debug, Default)]
struct PendingUpload {
    key: String,
    parts: BTreeMap<u32, Bytes>,
}

#[derive(Default)]
pub struct MemoryBackend {
    objects: Mutex<BTreeMap<String, (Bytes, bool)>>,
    uploads: Mutex<HashMap<String, PendingUpload>>,
    /// Parts submitted to each completion call, in submission order.
    completions: Mutex<Vec<Vec<UploadPart>>>,
    creates: Mutex<Vec<CreateMultipartRequest>>,
    faults: Mutex<Faults>,
    part_latency: Mutex<Option<Duration>>,
    stream_chunk: Mutex<Option<usize>>,
    next_upload: AtomicUsize,
    pub stats: CallStats,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store an object directly, bypassing the call counters.
    pub fn insert(&self, key: &str, data: impl Into<Bytes>) {
        self.objects
            .lock()
            .unwrap()
            .insert(key.to_string(), (data.into(), false));
    }

    pub fn insert_folder(&self, key: &str) {
        let key = format!("{}/", key.trim_end_matches('/'));
        self.objects
            .lock()
            .unwrap()
            .insert(key, (Bytes::new(), true));
    }

    pub fn object(&self, key: &str) -> Option<Bytes> {
        self.objects
            .lock()
            .unwrap()
            .get(key)
            .map(|(data, _)| data.clone())
    }

    pub fn completions(&self) -> Vec<Vec<UploadPart>> {
        self.completions.lock().unwrap().clone()
    }

    pub fn multipart_creates(&self) -> Vec<CreateMultipartRequest> {
        self.creates.lock().unwrap().clone()
    }

    pub fn fail_next_part_uploads_with_reset(&self, n: usize) {
        self.faults.lock().unwrap().part_resets = n;
    }

    pub fn reject_part(&self, part_number: u32) {
        self.faults.lock().unwrap().part_rejects.push(part_number);
    }

    pub fn fail_next_completions(&self, n: usize) {
        self.faults.lock().unwrap().complete_failures = n;
    }

    pub fn fail_next_multipart_creates(&self, n: usize) {
        self.faults.lock().unwrap().create_failures = n;
    }

    pub fn fail_next_uploads(&self, n: usize) {
        self.faults.lock().unwrap().upload_failures = n;
    }

    pub fn reset_next_stream_after(&self, items: usize) {
        self.faults.lock().unwrap().stream_reset_after = Some(items);
    }

    pub fn fail_usage(&self, fail: bool) {
        self.faults.lock().unwrap().fail_usage = fail;
    }

    pub fn fail_listing(&self, fail: bool) {
        self.faults.lock().unwrap().fail_listing = fail;
    }

    pub fn fail_deletes(&self, fail: bool) {
        self.faults.lock().unwrap().fail_delete = fail;
    }

    pub fn set_part_latency(&self, latency: Duration) {
        *self.part_latency.lock().unwrap() = Some(latency);
    }

    /// Size of each item yielded by `open_stream`.
    pub fn set_stream_chunk(&self, size: usize) {
        *self.stream_chunk.lock().unwrap() = Some(size);
    }

    fn used_bytes(&self) -> u64 {
        self.objects
            .lock()
            .unwrap()
            .values()
            .map(|(data, _)| data.len() as u64)
            .sum()
    }
}

fn bump(counter: &AtomicUsize) {
    counter.fetch_add(1, Ordering::SeqCst);
}

#[async_trait]
impl ObjectBackend for MemoryBackend {
    async fn list_files(&self) -> Result<Vec<ObjectInfo>, StoreError> {
        bump(&self.stats.list);
        if self.faults.lock().unwrap().fail_listing {
            return Err(StoreError::Api {
                status: 503,
                message: "listing unavailable".into(),
            });
        }
        let now = Utc::now();
        Ok(self
            .objects
            .lock()
            .unwrap()
            .iter()
            .map(|(key, (data, folder))| ObjectInfo {
                key: key.clone(),
                size: data.len() as u64,
                last_modified: now,
                folder: *folder,
            })
            .collect())
    }

    async fn bucket_usage(&self) -> Result<BucketUsage, StoreError> {
        bump(&self.stats.usage);
        if self.faults.lock().unwrap().fail_usage {
            return Err(StoreError::Api {
                status: 503,
                message: "usage unavailable".into(),
            });
        }
        Ok(BucketUsage {
            storage_used: self.used_bytes(),
        })
    }

    async fn upload_file(
        &self,
        directory: &str,
        name: &str,
        data: Bytes,
    ) -> Result<(), StoreError> {
        bump(&self.stats.upload);
        {
            let mut faults = self.faults.lock().unwrap();
            if faults.upload_failures > 0 {
                faults.upload_failures -= 1;
                return Err(StoreError::Api {
                    status: 500,
                    message: format!("upload of {name} failed"),
                });
            }
        }
        let key = if directory.is_empty() {
            name.to_string()
        } else {
            format!("{directory}/{name}")
        };
        self.objects.lock().unwrap().insert(key, (data, false));
        Ok(())
    }

    async fn delete_file(&self, key: &str) -> Result<(), StoreError> {
        bump(&self.stats.delete);
        if self.faults.lock().unwrap().fail_delete {
            return Err(StoreError::Api {
                status: 500,
                message: "delete failed".into(),
            });
        }
        match self.objects.lock().unwrap().remove(key) {
            Some(_) => Ok(()),
            None => Err(StoreError::Api {
                status: 404,
                message: format!("{key} does not exist"),
            }),
        }
    }

    async fn create_folder(&self, key: &str) -> Result<(), StoreError> {
        bump(&self.stats.create_folder);
        self.insert_folder(key);
        Ok(())
    }

    async fn delete_folder(&self, key: &str) -> Result<(), StoreError> {
        bump(&self.stats.delete_folder);
        let prefix = format!("{}/", key.trim_end_matches('/'));
        let mut objects = self.objects.lock().unwrap();
        let before = objects.len();
        objects.retain(|k, _| !k.starts_with(&prefix));
        if objects.len() == before {
            return Err(StoreError::Api {
                status: 404,
                message: format!("{key} does not exist"),
            });
        }
        Ok(())
    }

    async fn create_multipart(
        &self,
        req: CreateMultipartRequest,
    ) -> Result<MultipartSession, StoreError> {
        bump(&self.stats.create_multipart);
        {
            let mut faults = self.faults.lock().unwrap();
            if faults.create_failures > 0 {
                faults.create_failures -= 1;
                return Err(StoreError::Api {
                    status: 500,
                    message: "multipart create failed".into(),
                });
            }
        }
        let id = self.next_upload.fetch_add(1, Ordering::SeqCst);
        let session = MultipartSession {
            upload_id: format!("upload-{id}"),
            key: req.full_path.clone(),
        };
        self.uploads.lock().unwrap().insert(
            session.upload_id.clone(),
            PendingUpload {
                key: session.key.clone(),
                ..Default::default()
            },
        );
        self.creates.lock().unwrap().push(req);
        Ok(session)
    }

    async fn upload_part(&self, req: UploadPartRequest) -> Result<UploadPart, StoreError> {
        bump(&self.stats.upload_part);
        let in_flight = self.stats.parts_in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.stats
            .peak_parts_in_flight
            .fetch_max(in_flight, Ordering::SeqCst);

        let latency = *self.part_latency.lock().unwrap();
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }

        let outcome = {
            let mut faults = self.faults.lock().unwrap();
            if faults.part_resets > 0 {
                faults.part_resets -= 1;
                Err(StoreError::ConnectionReset(format!(
                    "part {} reset",
                    req.part_number
                )))
            } else if faults.part_rejects.contains(&req.part_number) {
                Err(StoreError::Api {
                    status: 400,
                    message: format!("part {} rejected", req.part_number),
                })
            } else {
                Ok(())
            }
        };

        let result = outcome.and_then(|()| {
            let mut uploads = self.uploads.lock().unwrap();
            let pending = uploads
                .get_mut(&req.session.upload_id)
                .ok_or_else(|| StoreError::NotFound(req.session.upload_id.clone()))?;
            pending.parts.insert(req.part_number, req.chunk.clone());
            Ok(UploadPart {
                etag: format!("etag-{}-{}", req.session.upload_id, req.part_number),
                part_number: req.part_number,
            })
        });

        self.stats.parts_in_flight.fetch_sub(1, Ordering::SeqCst);
        result
    }

    async fn complete_multipart(
        &self,
        req: CompleteMultipartRequest,
    ) -> Result<serde_json::Value, StoreError> {
        bump(&self.stats.complete);
        {
            let mut faults = self.faults.lock().unwrap();
            if faults.complete_failures > 0 {
                faults.complete_failures -= 1;
                return Err(StoreError::Api {
                    status: 502,
                    message: "completion failed".into(),
                });
            }
        }
        self.completions.lock().unwrap().push(req.parts.clone());

        let pending = self
            .uploads
            .lock()
            .unwrap()
            .remove(&req.session.upload_id)
            .ok_or_else(|| StoreError::NotFound(req.session.upload_id.clone()))?;
        let mut data = Vec::new();
        for part in &req.parts {
            let chunk = pending.parts.get(&part.part_number).ok_or_else(|| {
                StoreError::InvalidResponse(format!("part {} never uploaded", part.part_number))
            })?;
            data.extend_from_slice(chunk);
        }
        let size = data.len();
        self.objects
            .lock()
            .unwrap()
            .insert(pending.key.clone(), (Bytes::from(data), false));
        Ok(serde_json::json!({ "key": pending.key, "size": size }))
    }

    async fn open_stream(&self, path: &str) -> Result<ByteStream, StoreError> {
        bump(&self.stats.stream);
        let key = path.trim_start_matches('/');
        let data = self
            .object(key)
            .ok_or_else(|| StoreError::NotFound(path.to_string()))?;
        let step = self.stream_chunk.lock().unwrap().unwrap_or(64 * 1024).max(1);
        let mut items: Vec<Result<Bytes, StoreError>> = (0..data.len())
            .step_by(step)
            .map(|start| Ok(data.slice(start..(start + step).min(data.len()))))
            .collect();
        if let Some(after) = self.faults.lock().unwrap().stream_reset_after.take() {
            items.truncate(after);
            items.push(Err(StoreError::ConnectionReset(format!(
                "download of {path} reset"
            ))));
        }
        Ok(Box::pin(stream::iter(items)))
    }
}

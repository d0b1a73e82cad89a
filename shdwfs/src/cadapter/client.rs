//! Backend contract used by the cache, the upload pipeline and the read buffer.
//!
//! Everything the mount needs from the remote bucket goes through
//! [`ObjectBackend`]: the plain SDK calls (listing, usage, whole-object upload,
//! delete and folder management), the three multipart endpoints and a streaming
//! download.

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};

use crate::error::StoreError;

pub type ByteStream = BoxStream<'static, Result<Bytes, StoreError>>;

/// One row of the bucket listing as returned by the remote.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectInfo {
    pub key: String,
    #[serde(default)]
    pub size: u64,
    pub last_modified: DateTime<Utc>,
    #[serde(default)]
    pub folder: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BucketUsage {
    pub storage_used: u64,
}

/// Body of `POST /v1/object/multipart/create` minus the bucket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateMultipartRequest {
    pub filename: String,
    /// Signature over the multipart init message.
    pub message: String,
    pub signer: String,
    pub size: u64,
    pub file_type: String,
    pub directory: String,
    pub full_path: String,
}

/// Identifiers of a multipart session returned by the create call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MultipartSession {
    pub upload_id: String,
    pub key: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadPartRequest {
    pub session: MultipartSession,
    pub part_number: u32,
    pub file_name: String,
    pub signer: String,
    pub chunk: Bytes,
}

/// Result of one part upload, echoed back to the completion call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadPart {
    #[serde(rename = "ETag")]
    pub etag: String,
    #[serde(rename = "PartNumber")]
    pub part_number: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompleteMultipartRequest {
    pub session: MultipartSession,
    pub parts: Vec<UploadPart>,
    pub signer: String,
}

#[async_trait]
pub trait ObjectBackend: Send + Sync + 'static {
    async fn list_files(&self) -> Result<Vec<ObjectInfo>, StoreError>;

    async fn bucket_usage(&self) -> Result<BucketUsage, StoreError>;

    /// Single-shot upload of a whole object into `directory` (no leading slash).
    async fn upload_file(&self, directory: &str, name: &str, data: Bytes)
    -> Result<(), StoreError>;

    async fn delete_file(&self, key: &str) -> Result<(), StoreError>;

    async fn create_folder(&self, key: &str) -> Result<(), StoreError>;

    async fn delete_folder(&self, key: &str) -> Result<(), StoreError>;

    async fn create_multipart(
        &self,
        req: CreateMultipartRequest,
    ) -> Result<MultipartSession, StoreError>;

    async fn upload_part(&self, req: UploadPartRequest) -> Result<UploadPart, StoreError>;

    async fn complete_multipart(
        &self,
        req: CompleteMultipartRequest,
    ) -> Result<serde_json::Value, StoreError>;

    /// Streaming download of the whole object stored at `path` (leading slash).
    async fn open_stream(&self, path: &str) -> Result<ByteStream, StoreError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn listing_row_accepts_sdk_shape() {
        let raw = r#"{"key":"docs/a.txt","size":12,"lastModified":"2024-05-01T10:00:00Z","folder":false}"#;
        let info: ObjectInfo = serde_json::from_str(raw).unwrap();
        assert_eq!(info.key, "docs/a.txt");
        assert_eq!(info.size, 12);
        assert!(!info.folder);

        let folder = r#"{"key":"docs/","lastModified":"2024-05-01T10:00:00Z","folder":true}"#;
        let info: ObjectInfo = serde_json::from_str(folder).unwrap();
        assert!(info.folder);
        assert_eq!(info.size, 0);
    }

    #[test]
    fn part_uses_server_field_names() {
        let part = UploadPart {
            etag: "\"abc\"".into(),
            part_number: 2,
        };
        let v = serde_json::to_value(&part).unwrap();
        assert_eq!(v["ETag"], "\"abc\"");
        assert_eq!(v["PartNumber"], 2);
    }
}

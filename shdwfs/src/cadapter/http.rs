//! HTTP backend talking to the Shadow Drive v2 API with `reqwest`.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use futures::TryStreamExt;
use reqwest::multipart::{Form, Part};
use reqwest::{Client, Response};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::json;
use tracing::debug;

use super::client::{
    BucketUsage, ByteStream, CompleteMultipartRequest, CreateMultipartRequest, MultipartSession,
    ObjectBackend, ObjectInfo, UploadPart, UploadPartRequest,
};
use super::signer::RequestSigner;
use crate::error::StoreError;

const LIST_PATH: &str = "/v1/object/list";
const USAGE_PATH: &str = "/v1/bucket/storage";
const UPLOAD_PATH: &str = "/v1/object/upload";
const DELETE_PATH: &str = "/v1/object/delete";
const FOLDER_CREATE_PATH: &str = "/v1/folder/create";
const FOLDER_DELETE_PATH: &str = "/v1/folder/delete";
const MULTIPART_CREATE_PATH: &str = "/v1/object/multipart/create";
const MULTIPART_PART_PATH: &str = "/v1/object/multipart/upload-part";
const MULTIPART_COMPLETE_PATH: &str = "/v1/object/multipart/complete";

#[derive(Deserialize)]
struct ApiErrorBody {
    error: Option<String>,
}

pub struct HttpBackend {
    client: Client,
    endpoint: String,
    bucket: String,
    signer: Arc<dyn RequestSigner>,
}

impl HttpBackend {
    pub fn new(
        endpoint: impl Into<String>,
        bucket: impl Into<String>,
        signer: Arc<dyn RequestSigner>,
    ) -> Result<Self, StoreError> {
        let client = Client::builder()
            .user_agent(concat!("shdwfs/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            client,
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            bucket: bucket.into(),
            signer,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.endpoint, path)
    }

    /// Signature over a one-line description of a mutating SDK call.
    fn sign_action(&self, action: &str, target: &str) -> Result<String, StoreError> {
        let message = format!(
            "Shadow Drive Signed Message:\n{action}\nBucket: {}\nTarget: {target}",
            self.bucket
        );
        self.signer.sign(&message)
    }

    async fn post_json<T: DeserializeOwned>(
        &self,
        path: &str,
        body: serde_json::Value,
    ) -> Result<T, StoreError> {
        let resp = self.client.post(self.url(path)).json(&body).send().await?;
        let resp = check_status(resp).await?;
        resp.json::<T>()
            .await
            .map_err(|e| StoreError::InvalidResponse(format!("{path}: {e}")))
    }

    async fn post_json_unit(&self, path: &str, body: serde_json::Value) -> Result<(), StoreError> {
        let resp = self.client.post(self.url(path)).json(&body).send().await?;
        check_status(resp).await?;
        Ok(())
    }
}

/// Turn non-success statuses into `StoreError::Api`, keeping the JSON `error` text.
async fn check_status(resp: Response) -> Result<Response, StoreError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let fallback = status
        .canonical_reason()
        .unwrap_or("request failed")
        .to_string();
    let message = match resp.json::<ApiErrorBody>().await {
        Ok(ApiErrorBody { error: Some(msg) }) => msg,
        _ => fallback,
    };
    Err(StoreError::Api {
        status: status.as_u16(),
        message,
    })
}

#[async_trait]
impl ObjectBackend for HttpBackend {
    async fn list_files(&self) -> Result<Vec<ObjectInfo>, StoreError> {
        self.post_json(LIST_PATH, json!({ "bucket": self.bucket }))
            .await
    }

    async fn bucket_usage(&self) -> Result<BucketUsage, StoreError> {
        let resp = self
            .client
            .get(self.url(USAGE_PATH))
            .query(&[("bucket", self.bucket.as_str())])
            .send()
            .await?;
        let resp = check_status(resp).await?;
        resp.json::<BucketUsage>()
            .await
            .map_err(|e| StoreError::InvalidResponse(format!("{USAGE_PATH}: {e}")))
    }

    async fn upload_file(
        &self,
        directory: &str,
        name: &str,
        data: Bytes,
    ) -> Result<(), StoreError> {
        let target = if directory.is_empty() {
            name.to_string()
        } else {
            format!("{directory}/{name}")
        };
        let message = self.sign_action("Upload file", &target)?;
        let size = data.len();
        let file = Part::stream_with_length(data, size as u64)
            .file_name(name.to_string())
            .mime_str("application/octet-stream")?;
        let form = Form::new()
            .part("file", file)
            .text("bucket", self.bucket.clone())
            .text("directory", directory.to_string())
            .text("message", message)
            .text("signer", self.signer.signer());
        debug!(%target, size, "http.upload_file");
        let resp = self
            .client
            .post(self.url(UPLOAD_PATH))
            .multipart(form)
            .send()
            .await?;
        check_status(resp).await?;
        Ok(())
    }

    async fn delete_file(&self, key: &str) -> Result<(), StoreError> {
        let message = self.sign_action("Delete file", key)?;
        self.post_json_unit(
            DELETE_PATH,
            json!({
                "bucket": self.bucket,
                "key": key,
                "message": message,
                "signer": self.signer.signer(),
            }),
        )
        .await
    }

    async fn create_folder(&self, key: &str) -> Result<(), StoreError> {
        let message = self.sign_action("Create folder", key)?;
        self.post_json_unit(
            FOLDER_CREATE_PATH,
            json!({
                "bucket": self.bucket,
                "folder_name": key,
                "message": message,
                "signer": self.signer.signer(),
            }),
        )
        .await
    }

    async fn delete_folder(&self, key: &str) -> Result<(), StoreError> {
        let message = self.sign_action("Delete folder", key)?;
        self.post_json_unit(
            FOLDER_DELETE_PATH,
            json!({
                "bucket": self.bucket,
                "folder_path": key,
                "message": message,
                "signer": self.signer.signer(),
            }),
        )
        .await
    }

    async fn create_multipart(
        &self,
        req: CreateMultipartRequest,
    ) -> Result<MultipartSession, StoreError> {
        self.post_json(
            MULTIPART_CREATE_PATH,
            json!({
                "bucket": self.bucket,
                "filename": req.filename,
                "message": req.message,
                "signer": req.signer,
                "size": req.size,
                "file_type": req.file_type,
                "directory": req.directory,
                "name": req.filename,
                "full_path": req.full_path,
            }),
        )
        .await
    }

    async fn upload_part(&self, req: UploadPartRequest) -> Result<UploadPart, StoreError> {
        let size = req.chunk.len() as u64;
        let file = Part::stream_with_length(req.chunk, size).file_name(req.file_name);
        let form = Form::new()
            .part("file", file)
            .text("bucket", self.bucket.clone())
            .text("uploadId", req.session.upload_id)
            .text("partNumber", req.part_number.to_string())
            .text("key", req.session.key)
            .text("signer", req.signer);
        let resp = self
            .client
            .post(self.url(MULTIPART_PART_PATH))
            .multipart(form)
            .send()
            .await?;
        let resp = check_status(resp).await?;
        resp.json::<UploadPart>()
            .await
            .map_err(|e| StoreError::InvalidResponse(format!("{MULTIPART_PART_PATH}: {e}")))
    }

    async fn complete_multipart(
        &self,
        req: CompleteMultipartRequest,
    ) -> Result<serde_json::Value, StoreError> {
        self.post_json(
            MULTIPART_COMPLETE_PATH,
            json!({
                "bucket": self.bucket,
                "uploadId": req.session.upload_id,
                "key": req.session.key,
                "parts": req.parts,
                "signer": req.signer,
            }),
        )
        .await
    }

    async fn open_stream(&self, path: &str) -> Result<ByteStream, StoreError> {
        let url = format!("{}/{}{}", self.endpoint, self.bucket, path);
        let resp = self.client.get(url).send().await?;
        let resp = check_status(resp).await?;
        Ok(Box::pin(resp.bytes_stream().map_err(StoreError::from)))
    }
}

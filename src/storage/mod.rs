//! Object-storage abstraction used by the upload and delivery pipeline.
//!
//! The service never stores payloads itself. Clients upload parts directly to
//! the provider through pre-signed URLs; this layer only opens, completes,
//! aborts, signs, lists, reads and deletes.

pub mod limits;
pub mod s3;

use async_trait::async_trait;
use std::{io, pin::Pin, time::Duration};
use thiserror::Error;
use tokio::io::AsyncRead;

/// Streaming object body.
pub type ObjectReader = Pin<Box<dyn AsyncRead + Send>>;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("object `{0}` not found")]
    NotFound(String),
    #[error("storage provider error during {operation}: {message}")]
    Provider {
        operation: &'static str,
        message: String,
    },
    #[error("storage provider returned an incomplete {0} response")]
    MalformedResponse(&'static str),
    #[error("invalid presigning configuration: {0}")]
    Presign(String),
    #[error(transparent)]
    Io(#[from] io::Error),
}

impl StorageError {
    pub fn provider(operation: &'static str, message: impl Into<String>) -> Self {
        Self::Provider {
            operation,
            message: message.into(),
        }
    }
}

pub type StorageResult<T> = Result<T, StorageError>;

/// A part the client uploaded directly to the provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadedPart {
    pub part_number: i32,
    pub etag: String,
}

/// Metadata of a stored object.
#[derive(Debug, Clone, Default)]
pub struct ObjectHead {
    pub size: i64,
    pub content_type: Option<String>,
    pub etag: Option<String>,
}

/// One page of a prefix listing.
#[derive(Debug, Clone, Default)]
pub struct ObjectPage {
    pub keys: Vec<String>,
    pub next_continuation_token: Option<String>,
}

#[async_trait]
pub trait ObjectStorage: Send + Sync {
    /// Open a multipart upload and return its upload id.
    async fn create_multipart_upload(&self, key: &str, content_type: &str)
    -> StorageResult<String>;

    /// Pre-sign a PUT for one part of an open multipart upload.
    async fn presign_upload_part(
        &self,
        key: &str,
        upload_id: &str,
        part_number: i32,
        expires_in: Duration,
    ) -> StorageResult<String>;

    /// Finalize a multipart upload. `parts` must already be sorted by part number.
    async fn complete_multipart_upload(
        &self,
        key: &str,
        upload_id: &str,
        parts: &[UploadedPart],
    ) -> StorageResult<Option<String>>;

    async fn abort_multipart_upload(&self, key: &str, upload_id: &str) -> StorageResult<()>;

    async fn head_object(&self, key: &str) -> StorageResult<ObjectHead>;

    /// Pre-sign a GET, optionally forcing an attachment filename.
    async fn presign_get(
        &self,
        key: &str,
        download_name: Option<&str>,
        expires_in: Duration,
    ) -> StorageResult<String>;

    async fn get_object(&self, key: &str) -> StorageResult<ObjectReader>;

    /// List one page of keys under `prefix`.
    async fn list_objects(
        &self,
        prefix: &str,
        continuation_token: Option<String>,
    ) -> StorageResult<ObjectPage>;

    /// Bulk delete. Callers keep `keys.len()` within `limits::MAX_KEYS_PER_DELETE`.
    async fn delete_objects(&self, keys: &[String]) -> StorageResult<()>;

    /// Cheap reachability check used by readiness probes.
    async fn probe(&self) -> StorageResult<()>;
}

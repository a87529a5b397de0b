//! S3 (and S3-compatible) implementation of `ObjectStorage`.

use super::{
    ObjectHead, ObjectPage, ObjectReader, ObjectStorage, StorageError, StorageResult,
    UploadedPart, limits::MAX_KEYS_PER_PAGE,
};
use async_trait::async_trait;
use aws_config::{BehaviorVersion, Region, retry::RetryConfig};
use aws_sdk_s3::{
    Client,
    error::DisplayErrorContext,
    operation::{get_object::GetObjectError, head_object::HeadObjectError},
    presigning::PresigningConfig,
    types::{CompletedMultipartUpload, CompletedPart, Delete, ObjectIdentifier},
};
use std::time::{Duration, Instant};
use tracing::{debug, error, info};

/// Connection settings for the object store.
///
/// The region is passed in explicitly and kept for the client's lifetime.
#[derive(Debug, Clone)]
pub struct S3Settings {
    pub bucket: String,
    pub region: String,
    pub endpoint_url: Option<String>,
}

#[derive(Clone)]
pub struct S3Storage {
    client: Client,
    bucket: String,
}

impl S3Storage {
    /// Build a client from the default credential chain plus `settings`.
    ///
    /// SDK-level retries are disabled: retry decisions belong to the caller.
    pub async fn connect(settings: &S3Settings) -> Self {
        let shared = aws_config::defaults(BehaviorVersion::latest())
            .region(Region::new(settings.region.clone()))
            .retry_config(RetryConfig::disabled())
            .load()
            .await;

        let mut builder = aws_sdk_s3::config::Builder::from(&shared);
        if let Some(endpoint) = settings.endpoint_url.as_deref() {
            // MinIO and friends need path-style addressing.
            builder = builder.endpoint_url(endpoint).force_path_style(true);
        }

        Self::from_client(Client::from_conf(builder.build()), settings.bucket.clone())
    }

    pub fn from_client(client: Client, bucket: impl Into<String>) -> Self {
        Self {
            client,
            bucket: bucket.into(),
        }
    }

    fn presigning(expires_in: Duration) -> StorageResult<PresigningConfig> {
        PresigningConfig::expires_in(expires_in).map_err(|e| StorageError::Presign(e.to_string()))
    }
}

fn provider_error<E>(operation: &'static str, err: E) -> StorageError
where
    E: std::error::Error,
{
    StorageError::provider(operation, DisplayErrorContext(&err).to_string())
}

#[async_trait]
impl ObjectStorage for S3Storage {
    async fn create_multipart_upload(
        &self,
        key: &str,
        content_type: &str,
    ) -> StorageResult<String> {
        let output = self
            .client
            .create_multipart_upload()
            .bucket(&self.bucket)
            .key(key)
            .content_type(content_type)
            .send()
            .await
            .map_err(|e| {
                error!(error = %DisplayErrorContext(&e), bucket = %self.bucket, key = %key, "create_multipart_upload failed");
                provider_error("create_multipart_upload", e)
            })?;

        let upload_id = output
            .upload_id()
            .map(str::to_string)
            .ok_or(StorageError::MalformedResponse("create_multipart_upload"))?;

        debug!(bucket = %self.bucket, key = %key, upload_id = %upload_id, "multipart upload opened");
        Ok(upload_id)
    }

    async fn presign_upload_part(
        &self,
        key: &str,
        upload_id: &str,
        part_number: i32,
        expires_in: Duration,
    ) -> StorageResult<String> {
        let request = self
            .client
            .upload_part()
            .bucket(&self.bucket)
            .key(key)
            .upload_id(upload_id)
            .part_number(part_number)
            .presigned(Self::presigning(expires_in)?)
            .await
            .map_err(|e| provider_error("presign upload_part", e))?;

        Ok(request.uri().to_string())
    }

    async fn complete_multipart_upload(
        &self,
        key: &str,
        upload_id: &str,
        parts: &[UploadedPart],
    ) -> StorageResult<Option<String>> {
        let start = Instant::now();
        let completed = CompletedMultipartUpload::builder()
            .set_parts(Some(
                parts
                    .iter()
                    .map(|part| {
                        CompletedPart::builder()
                            .part_number(part.part_number)
                            .e_tag(&part.etag)
                            .build()
                    })
                    .collect(),
            ))
            .build();

        let output = self
            .client
            .complete_multipart_upload()
            .bucket(&self.bucket)
            .key(key)
            .upload_id(upload_id)
            .multipart_upload(completed)
            .send()
            .await
            .map_err(|e| {
                error!(
                    error = %DisplayErrorContext(&e),
                    bucket = %self.bucket,
                    key = %key,
                    parts = parts.len(),
                    "complete_multipart_upload failed"
                );
                provider_error("complete_multipart_upload", e)
            })?;

        info!(
            bucket = %self.bucket,
            key = %key,
            parts = parts.len(),
            duration_ms = start.elapsed().as_secs_f64() * 1000.0,
            "multipart upload completed"
        );
        Ok(output.e_tag().map(str::to_string))
    }

    async fn abort_multipart_upload(&self, key: &str, upload_id: &str) -> StorageResult<()> {
        self.client
            .abort_multipart_upload()
            .bucket(&self.bucket)
            .key(key)
            .upload_id(upload_id)
            .send()
            .await
            .map_err(|e| provider_error("abort_multipart_upload", e))?;
        Ok(())
    }

    async fn head_object(&self, key: &str) -> StorageResult<ObjectHead> {
        let output = self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| match e.as_service_error() {
                Some(HeadObjectError::NotFound(_)) => StorageError::NotFound(key.to_string()),
                _ => provider_error("head_object", e),
            })?;

        Ok(ObjectHead {
            size: output.content_length().unwrap_or_default(),
            content_type: output.content_type().map(str::to_string),
            etag: output.e_tag().map(str::to_string),
        })
    }

    async fn presign_get(
        &self,
        key: &str,
        download_name: Option<&str>,
        expires_in: Duration,
    ) -> StorageResult<String> {
        let mut builder = self.client.get_object().bucket(&self.bucket).key(key);
        if let Some(name) = download_name {
            builder = builder
                .response_content_disposition(format!("attachment; filename=\"{}\"", name));
        }

        let request = builder
            .presigned(Self::presigning(expires_in)?)
            .await
            .map_err(|e| provider_error("presign get_object", e))?;

        Ok(request.uri().to_string())
    }

    async fn get_object(&self, key: &str) -> StorageResult<ObjectReader> {
        let output = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| match e.as_service_error() {
                Some(GetObjectError::NoSuchKey(_)) => StorageError::NotFound(key.to_string()),
                _ => provider_error("get_object", e),
            })?;

        Ok(Box::pin(output.body.into_async_read()))
    }

    async fn list_objects(
        &self,
        prefix: &str,
        continuation_token: Option<String>,
    ) -> StorageResult<ObjectPage> {
        let output = self
            .client
            .list_objects_v2()
            .bucket(&self.bucket)
            .prefix(prefix)
            .max_keys(MAX_KEYS_PER_PAGE)
            .set_continuation_token(continuation_token)
            .send()
            .await
            .map_err(|e| provider_error("list_objects_v2", e))?;

        let keys = output
            .contents()
            .iter()
            .filter_map(|object| object.key().map(str::to_string))
            .collect();

        let next_continuation_token = if output.is_truncated().unwrap_or(false) {
            output.next_continuation_token().map(str::to_string)
        } else {
            None
        };

        Ok(ObjectPage {
            keys,
            next_continuation_token,
        })
    }

    async fn delete_objects(&self, keys: &[String]) -> StorageResult<()> {
        if keys.is_empty() {
            return Ok(());
        }

        let objects = keys
            .iter()
            .map(|key| {
                ObjectIdentifier::builder()
                    .key(key)
                    .build()
                    .map_err(|e| provider_error("delete_objects", e))
            })
            .collect::<StorageResult<Vec<_>>>()?;

        let delete = Delete::builder()
            .set_objects(Some(objects))
            .quiet(true)
            .build()
            .map_err(|e| provider_error("delete_objects", e))?;

        let output = self
            .client
            .delete_objects()
            .bucket(&self.bucket)
            .delete(delete)
            .send()
            .await
            .map_err(|e| provider_error("delete_objects", e))?;

        let failures = output.errors();
        if let Some(first) = failures.first() {
            return Err(StorageError::provider(
                "delete_objects",
                format!(
                    "{} of {} keys were not deleted; first `{}`: {}",
                    failures.len(),
                    keys.len(),
                    first.key().unwrap_or_default(),
                    first.message().unwrap_or("unknown error")
                ),
            ));
        }

        debug!(bucket = %self.bucket, count = keys.len(), "deleted objects");
        Ok(())
    }

    async fn probe(&self) -> StorageResult<()> {
        self.client
            .head_bucket()
            .bucket(&self.bucket)
            .send()
            .await
            .map_err(|e| provider_error("head_bucket", e))?;
        Ok(())
    }
}

//! Batch retrieval (signed URLs, zip) and cleanup of client batches.

use crate::{
    models::{
        batch::UploadBatch,
        reference::{BatchTag, ReferenceType, Role},
    },
    services::{
        ServiceError, ServiceResult,
        archive::{self, ArchiveEntry},
        batch_store::BatchStore,
        keys,
        reference_service::ReferenceService,
    },
    storage::{ObjectStorage, limits::MAX_KEYS_PER_DELETE},
};
use bytes::Bytes;
use futures::Stream;
use serde::Serialize;
use std::{io, sync::Arc, time::Duration};
use tracing::{debug, info};
use uuid::Uuid;

/// Which batch of a reference to resolve.
#[derive(Debug, Clone)]
pub struct BatchSelector {
    pub reference_type: ReferenceType,
    pub reference_id: String,
    pub role: Role,
    /// `None` means the latest batch for the role.
    pub tag: Option<BatchTag>,
}

/// A file with a short-lived download URL.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SignedFile {
    pub key: String,
    pub filename: String,
    pub size: i64,
    pub content_type: Option<String>,
    pub url: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchListing {
    pub batch: UploadBatch,
    pub files: Vec<SignedFile>,
}

/// How a resolved batch should be delivered.
pub enum Delivery {
    /// Exactly one file: redirect here.
    Redirect(String),
    /// Several files: stream this archive.
    Zip {
        filename: String,
        entries: Vec<ArchiveEntry>,
    },
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CleanupReport {
    pub ok: bool,
    pub deleted_objects: usize,
}

#[derive(Clone)]
pub struct DeliveryService {
    storage: Arc<dyn ObjectStorage>,
    batches: BatchStore,
    references: ReferenceService,
    download_url_ttl: Duration,
}

impl DeliveryService {
    pub fn new(
        storage: Arc<dyn ObjectStorage>,
        batches: BatchStore,
        references: ReferenceService,
        download_url_ttl: Duration,
    ) -> Self {
        Self {
            storage,
            batches,
            references,
            download_url_ttl,
        }
    }

    /// Find the batch named by `selector`. Batches without files count as
    /// missing.
    pub async fn resolve(&self, selector: &BatchSelector) -> ServiceResult<UploadBatch> {
        if let Some(tag) = selector.tag {
            if tag.role() != selector.role {
                return Err(ServiceError::validation(match selector.role {
                    Role::Client => "client batches are selected by batchId",
                    Role::Admin => "admin batches are selected by revision",
                }));
            }
        }

        let found = match selector.tag {
            Some(tag) => {
                self.batches
                    .find(selector.reference_type, &selector.reference_id, tag)
                    .await?
            }
            None => {
                self.batches
                    .latest(selector.reference_type, &selector.reference_id, selector.role)
                    .await?
            }
        };

        match found {
            Some(batch) if !batch.files.is_empty() => Ok(batch),
            _ => Err(ServiceError::not_found(format!(
                "no {} batch found for {} `{}`",
                selector.role, selector.reference_type, selector.reference_id
            ))),
        }
    }

    /// Decide between a single signed redirect and a zip stream.
    pub async fn delivery(&self, selector: &BatchSelector) -> ServiceResult<Delivery> {
        let batch = self.resolve(selector).await?;

        if let [file] = batch.files.as_slice() {
            let url = self
                .storage
                .presign_get(&file.key, Some(file.display_name()), self.download_url_ttl)
                .await?;
            debug!(key = %file.key, "single-file batch, redirecting");
            return Ok(Delivery::Redirect(url));
        }

        Ok(Delivery::Zip {
            filename: archive_filename(&batch),
            entries: archive::entries_for(&batch.files),
        })
    }

    /// JSON listing with a signed URL per file.
    pub async fn listing(&self, selector: &BatchSelector) -> ServiceResult<BatchListing> {
        let batch = self.resolve(selector).await?;
        let mut files = Vec::with_capacity(batch.files.len());
        for file in batch.files.iter() {
            let url = self
                .storage
                .presign_get(&file.key, Some(file.display_name()), self.download_url_ttl)
                .await?;
            files.push(SignedFile {
                key: file.key.clone(),
                filename: file.display_name().to_string(),
                size: file.size,
                content_type: file.content_type.clone(),
                url,
            });
        }
        Ok(BatchListing { batch, files })
    }

    pub fn zip_stream(
        &self,
        entries: Vec<ArchiveEntry>,
    ) -> impl Stream<Item = io::Result<Bytes>> + Send + 'static + use<> {
        archive::stream_zip(self.storage.clone(), entries)
    }

    /// Every batch recorded for a reference, newest first.
    pub async fn list_batches(
        &self,
        reference_type: ReferenceType,
        reference_id: &str,
    ) -> ServiceResult<Vec<UploadBatch>> {
        self.references.get(reference_type, reference_id).await?;
        Ok(self.batches.list(reference_type, reference_id).await?)
    }

    /// Delete every object under a client batch's prefix, then the record.
    ///
    /// The record goes last: if this fails halfway, the record still points
    /// at objects that exist.
    pub async fn delete_client_batch(
        &self,
        reference_type: ReferenceType,
        reference_id: &str,
        batch_id: Uuid,
    ) -> ServiceResult<CleanupReport> {
        let tag = BatchTag::BatchId(batch_id);
        let batch = self
            .batches
            .find(reference_type, reference_id, tag)
            .await?
            .ok_or_else(|| {
                ServiceError::not_found(format!(
                    "batch {} not found for {} `{}`",
                    batch_id, reference_type, reference_id
                ))
            })?;

        if !batch.deletable {
            return Err(ServiceError::validation("batch is not deletable"));
        }
        // Never let a malformed record widen the delete beyond its batch.
        let expected = keys::batch_prefix(reference_type, reference_id, Role::Client, tag);
        if batch.prefix != expected {
            return Err(ServiceError::Conflict(format!(
                "batch prefix `{}` does not match `{}`",
                batch.prefix, expected
            )));
        }

        let keys = self.list_all_keys(&batch.prefix).await?;
        for chunk in keys.chunks(MAX_KEYS_PER_DELETE) {
            self.storage.delete_objects(chunk).await?;
            debug!(prefix = %batch.prefix, count = chunk.len(), "deleted chunk");
        }

        self.batches.delete(batch.id).await?;

        let replacement = self
            .batches
            .latest(reference_type, reference_id, Role::Client)
            .await?;
        self.references
            .unlink_batch(&batch, replacement.as_ref())
            .await?;

        info!(
            reference_type = %reference_type,
            reference_id = %reference_id,
            batch = %batch_id,
            objects = keys.len(),
            "client batch deleted"
        );

        Ok(CleanupReport {
            ok: true,
            deleted_objects: keys.len(),
        })
    }

    async fn list_all_keys(&self, prefix: &str) -> ServiceResult<Vec<String>> {
        let mut keys = Vec::new();
        let mut token = None;
        loop {
            let page = self.storage.list_objects(prefix, token).await?;
            keys.extend(page.keys);
            match page.next_continuation_token {
                Some(next) => token = Some(next),
                None => break,
            }
        }
        Ok(keys)
    }
}

/// Download name for a batch archive, e.g. `order-A17-rev-2.zip`.
fn archive_filename(batch: &UploadBatch) -> String {
    let tag = batch
        .tag()
        .map(|t| t.to_string())
        .unwrap_or_else(|| batch.id.to_string());
    format!(
        "{}-{}-{}.zip",
        batch.reference_type,
        keys::sanitize_segment(&batch.reference_id, "reference"),
        tag
    )
}

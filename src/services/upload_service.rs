//! Multipart upload orchestration: initiate, sign, complete, abort.
//!
//! The browser uploads parts straight to the object store. This service opens
//! one multipart upload per file, hands out pre-signed part URLs, and once the
//! browser reports the part tags, completes every upload and writes a single
//! batch record.

use crate::{
    models::{
        batch::FileDescriptor,
        multipart::{
            AbortUploadRequest, CompleteObjectInput, CompleteUploadRequest, CompleteUploadResponse,
            InitiateUploadRequest, InitiateUploadResponse, InitiatedObject, PartUrl,
            SignPartRequest,
        },
        reference::{BatchTag, Role},
    },
    services::{
        ServiceError, ServiceResult,
        batch_store::{BatchStore, NewBatch},
        keys, parts,
        reference_service::ReferenceService,
    },
    storage::{
        ObjectStorage,
        limits::{MAX_OBJECT_SIZE_BYTES, MAX_PARTS_PER_UPLOAD},
    },
};
use chrono::Utc;
use std::{collections::HashSet, sync::Arc, time::Duration};
use tracing::{info, warn};
use uuid::Uuid;

const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

#[derive(Clone)]
pub struct UploadService {
    storage: Arc<dyn ObjectStorage>,
    batches: BatchStore,
    references: ReferenceService,
    upload_url_ttl: Duration,
}

impl UploadService {
    pub fn new(
        storage: Arc<dyn ObjectStorage>,
        batches: BatchStore,
        references: ReferenceService,
        upload_url_ttl: Duration,
    ) -> Self {
        Self {
            storage,
            batches,
            references,
            upload_url_ttl,
        }
    }

    /// Open one multipart upload per file and sign every part.
    ///
    /// Admin deliveries reserve their revision number here; completion reuses
    /// it instead of recomputing.
    pub async fn initiate(&self, req: InitiateUploadRequest) -> ServiceResult<InitiateUploadResponse> {
        if req.files.is_empty() {
            return Err(ServiceError::validation("at least one file is required"));
        }
        for file in &req.files {
            if file.filename.trim().is_empty() {
                return Err(ServiceError::validation("every file needs a filename"));
            }
            if file.size > MAX_OBJECT_SIZE_BYTES {
                return Err(ServiceError::validation(format!(
                    "`{}` is larger than the {} byte object limit",
                    file.filename, MAX_OBJECT_SIZE_BYTES
                )));
            }
        }

        // 404 early rather than opening uploads for nothing.
        self.references
            .get(req.reference_type, &req.reference_id)
            .await?;

        let tag = match req.role {
            Role::Client => BatchTag::BatchId(Uuid::new_v4()),
            Role::Admin => BatchTag::Revision(
                self.batches
                    .next_revision(req.reference_type, &req.reference_id)
                    .await?,
            ),
        };

        let prefix = keys::batch_prefix(req.reference_type, &req.reference_id, req.role, tag);
        let today = Utc::now().date_naive();
        let mut taken = HashSet::new();
        let mut objects = Vec::with_capacity(req.files.len());

        for file in &req.files {
            let stored_name =
                keys::dedupe_segment(&keys::sanitize_segment(&file.filename, "file"), &mut taken);
            let key = keys::object_key(&prefix, today, &stored_name);
            let content_type = file
                .content_type
                .as_deref()
                .filter(|ct| !ct.trim().is_empty())
                .unwrap_or(DEFAULT_CONTENT_TYPE);

            match self.open_object(key, &file.filename, content_type, file.size).await {
                Ok(object) => objects.push(object),
                Err(err) => {
                    warn!(
                        error = %err,
                        opened = objects.len(),
                        "initiation failed, aborting opened uploads"
                    );
                    self.abort_quietly(
                        objects
                            .iter()
                            .map(initiated_key_and_upload_id),
                    )
                    .await;
                    return Err(err);
                }
            }
        }

        info!(
            reference_type = %req.reference_type,
            reference_id = %req.reference_id,
            role = %req.role,
            batch = %tag,
            files = objects.len(),
            "multipart uploads initiated"
        );

        let (batch_id, revision) = match tag {
            BatchTag::BatchId(id) => (Some(id), None),
            BatchTag::Revision(rev) => (None, Some(rev)),
        };
        Ok(InitiateUploadResponse {
            batch_id,
            revision,
            base_prefix: prefix,
            objects,
        })
    }

    /// Re-sign a single part, e.g. after the original URL expired.
    pub async fn sign_part(&self, req: SignPartRequest) -> ServiceResult<String> {
        ensure_managed_key(&req.key)?;
        if req.part_number < 1 || req.part_number as u64 > MAX_PARTS_PER_UPLOAD {
            return Err(ServiceError::validation(format!(
                "partNumber must be within 1..={}",
                MAX_PARTS_PER_UPLOAD
            )));
        }
        if req.upload_id.trim().is_empty() {
            return Err(ServiceError::validation("uploadId is required"));
        }

        Ok(self
            .storage
            .presign_upload_part(&req.key, &req.upload_id, req.part_number, self.upload_url_ttl)
            .await?)
    }

    /// Complete every file's multipart upload, then record the batch and
    /// update the reference's link.
    ///
    /// Calling this again for a batch that already has a record returns that
    /// record without contacting the provider.
    pub async fn complete(&self, req: CompleteUploadRequest) -> ServiceResult<CompleteUploadResponse> {
        let tag = self.resolve_tag(&req).await?;
        let reference = self
            .references
            .get(req.reference_type, &req.reference_id)
            .await?;

        if let Some(existing) = self
            .batches
            .find(req.reference_type, &req.reference_id, tag)
            .await?
        {
            info!(batch = %tag, reference_id = %req.reference_id, "batch already recorded");
            // Replays must not move the link back to an older batch.
            let link = ReferenceService::link_for(&existing)?;
            return Ok(CompleteUploadResponse {
                ok: true,
                link,
                batch: existing,
            });
        }

        if req.objects.is_empty() {
            return Err(ServiceError::validation("at least one object is required"));
        }

        let prefix = keys::batch_prefix(req.reference_type, &req.reference_id, req.role, tag);
        let mut seen = HashSet::new();
        let mut sorted = Vec::with_capacity(req.objects.len());
        for object in &req.objects {
            if !object.key.starts_with(&prefix) || object.key.contains("..") {
                return Err(ServiceError::validation(format!(
                    "key `{}` does not belong to batch {}",
                    object.key, tag
                )));
            }
            if !seen.insert(object.key.as_str()) {
                return Err(ServiceError::validation(format!(
                    "key `{}` listed twice",
                    object.key
                )));
            }
            sorted.push(parts::sorted_parts(&object.parts)?);
        }

        let mut files = Vec::with_capacity(req.objects.len());
        for (idx, (object, object_parts)) in req.objects.iter().zip(&sorted).enumerate() {
            let completed = self
                .storage
                .complete_multipart_upload(&object.key, &object.upload_id, object_parts)
                .await;

            let remaining = || {
                req.objects[idx + 1..]
                    .iter()
                    .map(complete_key_and_upload_id)
            };
            let (etag, head) = match completed {
                Ok(etag) => match self.storage.head_object(&object.key).await {
                    Ok(head) => (etag, head),
                    Err(err) => {
                        warn!(
                            error = %err,
                            key = %object.key,
                            "completed object not visible, aborting remaining uploads"
                        );
                        self.abort_quietly(remaining().collect::<Vec<_>>()).await;
                        return Err(err.into());
                    }
                },
                Err(err) => match self.storage.head_object(&object.key).await {
                    // An earlier attempt completed this file before failing
                    // on a later one.
                    Ok(head) => {
                        warn!(error = %err, key = %object.key, "upload was already completed");
                        (None, head)
                    }
                    Err(_) => {
                        warn!(
                            error = %err,
                            key = %object.key,
                            "completion failed, aborting remaining uploads"
                        );
                        self.abort_quietly(
                            std::iter::once((object.key.as_str(), object.upload_id.as_str()))
                                .chain(remaining())
                                .collect::<Vec<_>>(),
                        )
                        .await;
                        return Err(err.into());
                    }
                },
            };

            let filename = object
                .filename
                .clone()
                .filter(|name| !name.trim().is_empty())
                .unwrap_or_else(|| key_tail(&object.key).to_string());

            files.push(FileDescriptor {
                key: object.key.clone(),
                filename,
                size: head.size,
                etag: etag.or(head.etag),
                content_type: object.content_type.clone().or(head.content_type),
            });
        }

        let inserted = self
            .batches
            .insert(NewBatch {
                reference_type: req.reference_type,
                reference_id: req.reference_id.clone(),
                owner_user_id: reference.owner_user_id.clone(),
                tag,
                prefix,
                files,
            })
            .await?;

        let batch = match inserted {
            Some(batch) => batch,
            // Lost a race with a concurrent completion of the same batch.
            None => self
                .batches
                .find(req.reference_type, &req.reference_id, tag)
                .await?
                .ok_or_else(|| ServiceError::Conflict(format!("batch {} vanished", tag)))?,
        };

        let link = self.references.link_batch(&batch).await?;

        info!(
            reference_type = %batch.reference_type,
            reference_id = %batch.reference_id,
            batch = %tag,
            files = batch.files.len(),
            "upload batch recorded"
        );

        Ok(CompleteUploadResponse {
            ok: true,
            link,
            batch,
        })
    }

    /// Best-effort abort of open uploads. Returns how many were aborted.
    pub async fn abort(&self, req: AbortUploadRequest) -> ServiceResult<usize> {
        let mut aborted = 0;
        for upload in &req.objects {
            ensure_managed_key(&upload.key)?;
            match self
                .storage
                .abort_multipart_upload(&upload.key, &upload.upload_id)
                .await
            {
                Ok(()) => aborted += 1,
                Err(err) => warn!(error = %err, key = %upload.key, "abort failed"),
            }
        }
        Ok(aborted)
    }

    /// Open the multipart upload for one file and sign all of its parts.
    /// A signing failure aborts the upload it just opened.
    async fn open_object(
        &self,
        key: String,
        filename: &str,
        content_type: &str,
        size: u64,
    ) -> ServiceResult<InitiatedObject> {
        let upload_id = self
            .storage
            .create_multipart_upload(&key, content_type)
            .await?;

        let part_size = parts::recommended_part_size(size);
        let part_count = parts::part_count(size, part_size);
        let mut part_urls = Vec::with_capacity(part_count as usize);
        for part_number in 1..=part_count as i32 {
            match self
                .storage
                .presign_upload_part(&key, &upload_id, part_number, self.upload_url_ttl)
                .await
            {
                Ok(url) => part_urls.push(PartUrl { part_number, url }),
                Err(err) => {
                    self.abort_quietly(std::iter::once((key.as_str(), upload_id.as_str())))
                        .await;
                    return Err(err.into());
                }
            }
        }

        Ok(InitiatedObject {
            key,
            filename: filename.to_string(),
            upload_id,
            recommended_part_size: part_size,
            part_count,
            parts: part_urls,
        })
    }

    /// Abort `(key, upload_id)` pairs, logging rather than returning failures.
    async fn abort_quietly<'a, I>(&self, uploads: I)
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
        I::IntoIter: Send,
    {
        for (key, upload_id) in uploads {
            if let Err(err) = self.storage.abort_multipart_upload(key, upload_id).await {
                warn!(error = %err, key, "abort failed");
            }
        }
    }

    async fn resolve_tag(&self, req: &CompleteUploadRequest) -> ServiceResult<BatchTag> {
        match req.role {
            Role::Client => req
                .batch_id
                .map(BatchTag::BatchId)
                .ok_or_else(|| ServiceError::validation("batchId is required for client uploads")),
            Role::Admin => {
                let revision = req.revision.ok_or_else(|| {
                    ServiceError::validation("revision is required for admin uploads")
                })?;
                let reserved = self
                    .batches
                    .reserved_revision(req.reference_type, &req.reference_id)
                    .await?
                    .unwrap_or(0);
                if revision < 1 || revision > reserved {
                    return Err(ServiceError::validation(format!(
                        "revision {} was never issued for this reference",
                        revision
                    )));
                }
                Ok(BatchTag::Revision(revision))
            }
        }
    }
}

fn ensure_managed_key(key: &str) -> ServiceResult<()> {
    if !key.starts_with("uploads/") || key.contains("..") {
        return Err(ServiceError::validation(format!(
            "key `{}` is not managed by the portal",
            key
        )));
    }
    Ok(())
}

fn key_tail(key: &str) -> &str {
    key.rsplit('/').find(|s| !s.is_empty()).unwrap_or(key)
}

fn initiated_key_and_upload_id(o: &InitiatedObject) -> (&str, &str) {
    (o.key.as_str(), o.upload_id.as_str())
}

fn complete_key_and_upload_id(o: &CompleteObjectInput) -> (&str, &str) {
    (o.key.as_str(), o.upload_id.as_str())
}

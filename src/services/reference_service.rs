//! Orders and quotes, and the link fields uploads keep up to date.

use crate::{
    models::{
        batch::UploadBatch,
        reference::{BatchTag, DeliveryLink, Reference, ReferenceType, Role},
    },
    services::{ServiceError, ServiceResult, is_unique_violation, keys},
};
use chrono::Utc;
use serde::Deserialize;
use sqlx::{SqlitePool, types::Json};
use std::sync::Arc;
use tracing::info;
use url::Url;
use uuid::Uuid;

const REFERENCE_COLUMNS: &str = "reference_type, id, owner_user_id, title, download_link, \
     delivery_link, created_at, updated_at";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewReference {
    pub reference_type: ReferenceType,
    pub id: Option<String>,
    pub owner_user_id: String,
    pub title: String,
}

#[derive(Clone)]
pub struct ReferenceService {
    db: Arc<SqlitePool>,
}

impl ReferenceService {
    pub fn new(db: Arc<SqlitePool>) -> Self {
        Self { db }
    }

    pub async fn create(&self, new: NewReference) -> ServiceResult<Reference> {
        let owner = new.owner_user_id.trim();
        if owner.is_empty() {
            return Err(ServiceError::validation("ownerUserId is required"));
        }
        let title = new.title.trim();
        if title.is_empty() {
            return Err(ServiceError::validation("title is required"));
        }
        let id = match new.id.as_deref().map(str::trim) {
            Some("") => return Err(ServiceError::validation("id must not be blank")),
            Some(id) => id.to_string(),
            None => Uuid::new_v4().to_string(),
        };
        // The id is used verbatim as a storage key segment.
        if !keys::is_canonical_segment(&id) {
            return Err(ServiceError::validation(format!(
                "id `{}` must be at most 128 ASCII letters, digits, `.`, `-` or `_`, \
                 without leading `.`/`_` or repeated `.`/`_`",
                id
            )));
        }

        let now = Utc::now();
        let sql = format!(
            "INSERT INTO reference_objects ({REFERENCE_COLUMNS})
             VALUES (?, ?, ?, ?, NULL, NULL, ?, ?)
             RETURNING {REFERENCE_COLUMNS}"
        );
        let created = sqlx::query_as::<_, Reference>(&sql)
            .bind(new.reference_type)
            .bind(&id)
            .bind(owner)
            .bind(title)
            .bind(now)
            .bind(now)
            .fetch_one(&*self.db)
            .await
            .map_err(|err| {
                if is_unique_violation(&err) {
                    ServiceError::Conflict(format!(
                        "{} `{}` already exists",
                        new.reference_type, id
                    ))
                } else {
                    ServiceError::Sqlx(err)
                }
            })?;

        info!(reference_type = %created.reference_type, id = %created.id, "reference created");
        Ok(created)
    }

    pub async fn get(&self, reference_type: ReferenceType, id: &str) -> ServiceResult<Reference> {
        let sql = format!(
            "SELECT {REFERENCE_COLUMNS} FROM reference_objects
             WHERE reference_type = ? AND id = ?"
        );
        sqlx::query_as::<_, Reference>(&sql)
            .bind(reference_type)
            .bind(id)
            .fetch_optional(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::not_found(format!("{} `{}` not found", reference_type, id)))
    }

    /// Point the delivery link at a location outside the portal.
    pub async fn set_external_delivery_link(
        &self,
        reference_type: ReferenceType,
        id: &str,
        url: &str,
    ) -> ServiceResult<Reference> {
        let url = parse_external_url(url)?;

        self.write_link(
            reference_type,
            id,
            Role::Admin,
            Some(DeliveryLink::ExternalLink { url }),
        )
        .await?;
        self.get(reference_type, id).await
    }

    /// Link value describing `batch`.
    pub fn link_for(batch: &UploadBatch) -> ServiceResult<DeliveryLink> {
        let tag = batch
            .tag()
            .ok_or_else(|| ServiceError::validation("batch has neither batchId nor revision"))?;
        Ok(DeliveryLink::Uploaded {
            batch: tag,
            prefix: batch.prefix.clone(),
            url: batch_url(batch.reference_type, &batch.reference_id, tag),
        })
    }

    /// Point the role's link field at `batch`.
    pub async fn link_batch(&self, batch: &UploadBatch) -> ServiceResult<DeliveryLink> {
        let link = Self::link_for(batch)?;
        self.write_link(
            batch.reference_type,
            &batch.reference_id,
            batch.uploaded_by,
            Some(link.clone()),
        )
        .await?;
        Ok(link)
    }

    /// Clear (or repoint at `replacement`) the client download link if it
    /// currently names `removed`.
    pub async fn unlink_batch(
        &self,
        removed: &UploadBatch,
        replacement: Option<&UploadBatch>,
    ) -> ServiceResult<()> {
        let reference = self.get(removed.reference_type, &removed.reference_id).await?;
        let points_at_removed = matches!(
            reference.download_link.as_deref(),
            Some(DeliveryLink::Uploaded { batch, .. }) if Some(*batch) == removed.tag()
        );
        if !points_at_removed {
            return Ok(());
        }

        match replacement {
            Some(batch) => {
                self.link_batch(batch).await?;
            }
            None => {
                self.write_link(
                    removed.reference_type,
                    &removed.reference_id,
                    Role::Client,
                    None,
                )
                .await?;
            }
        }
        Ok(())
    }

    async fn write_link(
        &self,
        reference_type: ReferenceType,
        id: &str,
        role: Role,
        link: Option<DeliveryLink>,
    ) -> ServiceResult<()> {
        let column = match role {
            Role::Client => "download_link",
            Role::Admin => "delivery_link",
        };
        let sql = format!(
            "UPDATE reference_objects SET {column} = ?, updated_at = ?
             WHERE reference_type = ? AND id = ?"
        );
        let result = sqlx::query(&sql)
            .bind(link.map(Json))
            .bind(Utc::now())
            .bind(reference_type)
            .bind(id)
            .execute(&*self.db)
            .await?;

        if result.rows_affected() == 0 {
            return Err(ServiceError::not_found(format!(
                "{} `{}` not found",
                reference_type, id
            )));
        }
        Ok(())
    }
}

/// Portal path that resolves a batch (redirect or zip).
pub fn batch_url(reference_type: ReferenceType, reference_id: &str, tag: BatchTag) -> String {
    let selector = match tag {
        BatchTag::BatchId(id) => format!("role=client&batchId={}", id),
        BatchTag::Revision(rev) => format!("role=admin&revision={}", rev),
    };
    format!(
        "/api/uploads/batch?referenceType={}&referenceId={}&{}",
        reference_type,
        urlencoding::encode(reference_id),
        selector
    )
}

fn parse_external_url(raw: &str) -> ServiceResult<String> {
    let invalid = || ServiceError::validation("url must be an absolute http(s) URL with a host");
    let parsed = Url::parse(raw.trim()).map_err(|_| invalid())?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(invalid());
    }
    match parsed.host_str() {
        Some(host) if !host.is_empty() => Ok(parsed.to_string()),
        _ => Err(invalid()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_batch_url_encodes_reference_id() {
        assert_eq!(
            batch_url(ReferenceType::Quote, "Q 1/2", BatchTag::Revision(4)),
            "/api/uploads/batch?referenceType=quote&referenceId=Q%201%2F2&role=admin&revision=4"
        );
    }

    #[test]
    fn test_external_url_needs_http_scheme_and_host() {
        assert_eq!(
            parse_external_url(" https://drive.example.com/x?y=1 ").unwrap(),
            "https://drive.example.com/x?y=1"
        );
        for bad in [
            "https://%%",
            "http://[",
            "ftp://files.example.com/a",
            "https://",
            "drive.example.com/x",
            "mailto:a@b.c",
        ] {
            assert!(
                matches!(parse_external_url(bad), Err(ServiceError::Validation(_))),
                "{} should be rejected",
                bad
            );
        }
    }
}

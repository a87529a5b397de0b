//! Upload batches: one record per completed client submission or admin revision.

use super::reference::{BatchTag, ReferenceType, Role};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, types::Json};
use uuid::Uuid;

/// A stored file inside a batch. Not addressable on its own.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct FileDescriptor {
    /// Object key in the bucket.
    pub key: String,

    /// Name the uploader gave the file.
    pub filename: String,

    /// Size in bytes.
    pub size: i64,

    /// Provider entity tag of the completed object.
    pub etag: Option<String>,

    pub content_type: Option<String>,
}

impl FileDescriptor {
    /// Name to present on download: the recorded filename, else the key's tail.
    pub fn display_name(&self) -> &str {
        if !self.filename.trim().is_empty() {
            return &self.filename;
        }
        self.key
            .rsplit('/')
            .find(|segment| !segment.is_empty())
            .unwrap_or(&self.key)
    }
}

/// Immutable record written once every file of a submission is completed.
#[derive(Serialize, Deserialize, Clone, FromRow, Debug)]
#[serde(rename_all = "camelCase")]
pub struct UploadBatch {
    pub id: Uuid,
    pub reference_type: ReferenceType,
    pub reference_id: String,
    pub owner_user_id: String,
    pub uploaded_by: Role,

    /// Set for client submissions.
    pub batch_id: Option<Uuid>,

    /// Set for admin deliveries.
    pub revision: Option<i64>,

    /// Common key prefix of every file in the batch.
    pub prefix: String,

    pub files: Json<Vec<FileDescriptor>>,

    /// Client batches can be cleaned up, admin revisions cannot.
    pub deletable: bool,

    pub created_at: DateTime<Utc>,
}

impl UploadBatch {
    pub fn tag(&self) -> Option<BatchTag> {
        match (self.batch_id, self.revision) {
            (Some(id), _) => Some(BatchTag::BatchId(id)),
            (None, Some(rev)) => Some(BatchTag::Revision(rev)),
            (None, None) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn descriptor(key: &str, filename: &str) -> FileDescriptor {
        FileDescriptor {
            key: key.into(),
            filename: filename.into(),
            size: 1,
            etag: None,
            content_type: None,
        }
    }

    #[test]
    fn test_display_name_prefers_filename() {
        let file = descriptor("uploads/order/1/client/x/2026-01-01/a.pdf", "Quote.pdf");
        assert_eq!(file.display_name(), "Quote.pdf");
    }

    #[test]
    fn test_display_name_falls_back_to_key_tail() {
        let file = descriptor("uploads/order/1/client/x/2026-01-01/a.pdf", "  ");
        assert_eq!(file.display_name(), "a.pdf");
    }
}

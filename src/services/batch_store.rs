//! SQLite access for upload batches and revision counters.

use crate::models::{
    batch::{FileDescriptor, UploadBatch},
    reference::{BatchTag, ReferenceType, Role},
};
use chrono::Utc;
use sqlx::{SqlitePool, types::Json};
use std::sync::Arc;
use uuid::Uuid;

const BATCH_COLUMNS: &str = "id, reference_type, reference_id, owner_user_id, uploaded_by, \
     batch_id, revision, prefix, files, deletable, created_at";

/// Fields of a batch about to be written.
#[derive(Debug, Clone)]
pub struct NewBatch {
    pub reference_type: ReferenceType,
    pub reference_id: String,
    pub owner_user_id: String,
    pub tag: BatchTag,
    pub prefix: String,
    pub files: Vec<FileDescriptor>,
}

#[derive(Clone)]
pub struct BatchStore {
    db: Arc<SqlitePool>,
}

impl BatchStore {
    pub fn new(db: Arc<SqlitePool>) -> Self {
        Self { db }
    }

    /// Reserve the next admin revision for a reference.
    ///
    /// A single upsert-and-return statement, so concurrent callers always get
    /// distinct, increasing numbers. Reserved numbers are never handed out
    /// again, even if the upload is abandoned.
    pub async fn next_revision(
        &self,
        reference_type: ReferenceType,
        reference_id: &str,
    ) -> Result<i64, sqlx::Error> {
        sqlx::query_scalar::<_, i64>(
            r#"
            INSERT INTO revision_counters (reference_type, reference_id, last_revision)
            VALUES (?, ?, 1)
            ON CONFLICT(reference_type, reference_id)
                DO UPDATE SET last_revision = last_revision + 1
            RETURNING last_revision
            "#,
        )
        .bind(reference_type)
        .bind(reference_id)
        .fetch_one(&*self.db)
        .await
    }

    /// Highest revision ever reserved for a reference, if any.
    pub async fn reserved_revision(
        &self,
        reference_type: ReferenceType,
        reference_id: &str,
    ) -> Result<Option<i64>, sqlx::Error> {
        sqlx::query_scalar::<_, i64>(
            "SELECT last_revision FROM revision_counters
             WHERE reference_type = ? AND reference_id = ?",
        )
        .bind(reference_type)
        .bind(reference_id)
        .fetch_optional(&*self.db)
        .await
    }

    /// Insert a batch. Returns `None` when a batch with the same tag already
    /// exists for the reference.
    pub async fn insert(&self, batch: NewBatch) -> Result<Option<UploadBatch>, sqlx::Error> {
        let (batch_id, revision) = match batch.tag {
            BatchTag::BatchId(id) => (Some(id), None),
            BatchTag::Revision(rev) => (None, Some(rev)),
        };
        let role = batch.tag.role();

        let sql = format!(
            "INSERT INTO upload_batches ({BATCH_COLUMNS})
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT DO NOTHING
             RETURNING {BATCH_COLUMNS}"
        );

        sqlx::query_as::<_, UploadBatch>(&sql)
            .bind(Uuid::new_v4())
            .bind(batch.reference_type)
            .bind(&batch.reference_id)
            .bind(&batch.owner_user_id)
            .bind(role)
            .bind(batch_id)
            .bind(revision)
            .bind(&batch.prefix)
            .bind(Json(&batch.files))
            .bind(role == Role::Client)
            .bind(Utc::now())
            .fetch_optional(&*self.db)
            .await
    }

    /// Exact lookup by tag.
    pub async fn find(
        &self,
        reference_type: ReferenceType,
        reference_id: &str,
        tag: BatchTag,
    ) -> Result<Option<UploadBatch>, sqlx::Error> {
        let column = match tag {
            BatchTag::BatchId(_) => "batch_id",
            BatchTag::Revision(_) => "revision",
        };
        let sql = format!(
            "SELECT {BATCH_COLUMNS} FROM upload_batches
             WHERE reference_type = ? AND reference_id = ? AND {column} = ?
             ORDER BY created_at DESC, rowid DESC LIMIT 1"
        );
        let query = sqlx::query_as::<_, UploadBatch>(&sql)
            .bind(reference_type)
            .bind(reference_id);
        let query = match tag {
            BatchTag::BatchId(id) => query.bind(id),
            BatchTag::Revision(rev) => query.bind(rev),
        };
        query.fetch_optional(&*self.db).await
    }

    /// Newest batch of `role` for a reference: highest revision for admin
    /// deliveries, most recently created for client submissions.
    pub async fn latest(
        &self,
        reference_type: ReferenceType,
        reference_id: &str,
        role: Role,
    ) -> Result<Option<UploadBatch>, sqlx::Error> {
        let order = match role {
            Role::Admin => "revision DESC, created_at DESC, rowid DESC",
            Role::Client => "created_at DESC, rowid DESC",
        };
        let sql = format!(
            "SELECT {BATCH_COLUMNS} FROM upload_batches
             WHERE reference_type = ? AND reference_id = ? AND uploaded_by = ?
             ORDER BY {order} LIMIT 1"
        );
        sqlx::query_as::<_, UploadBatch>(&sql)
            .bind(reference_type)
            .bind(reference_id)
            .bind(role)
            .fetch_optional(&*self.db)
            .await
    }

    /// Every batch of a reference, newest first.
    pub async fn list(
        &self,
        reference_type: ReferenceType,
        reference_id: &str,
    ) -> Result<Vec<UploadBatch>, sqlx::Error> {
        let sql = format!(
            "SELECT {BATCH_COLUMNS} FROM upload_batches
             WHERE reference_type = ? AND reference_id = ?
             ORDER BY created_at DESC, rowid DESC"
        );
        sqlx::query_as::<_, UploadBatch>(&sql)
            .bind(reference_type)
            .bind(reference_id)
            .fetch_all(&*self.db)
            .await
    }

    pub async fn delete(&self, id: Uuid) -> Result<bool, sqlx::Error> {
        let result = sqlx::query("DELETE FROM upload_batches WHERE id = ?")
            .bind(id)
            .execute(&*self.db)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}

#![allow(dead_code)]

use async_trait::async_trait;
use axum::Router;
use client_portal::{
    db,
    models::reference::{Reference, ReferenceType},
    services::reference_service::NewReference,
    state::AppState,
    storage::{
        ObjectHead, ObjectPage, ObjectReader, ObjectStorage, StorageError, StorageResult,
        UploadedPart,
    },
};
use sqlx::{
    SqlitePool,
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
};
use std::{
    collections::{BTreeMap, HashMap, HashSet},
    io::Cursor,
    str::FromStr,
    sync::{
        Arc, Mutex,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

pub const DOWNLOAD_TTL: Duration = Duration::from_secs(900);
pub const UPLOAD_TTL: Duration = Duration::from_secs(3600);

#[derive(Clone, Debug)]
pub struct StoredObject {
    pub data: Vec<u8>,
    pub content_type: String,
    pub etag: String,
}

struct OpenUpload {
    key: String,
    content_type: String,
    parts: BTreeMap<i32, (String, Vec<u8>)>,
}

/// In-memory stand-in for the S3 bucket.
pub struct MemoryStorage {
    objects: Mutex<BTreeMap<String, StoredObject>>,
    uploads: Mutex<HashMap<String, OpenUpload>>,
    failing_completions: Mutex<HashSet<String>>,
    failing_creates: Mutex<HashSet<String>>,
    failing_heads: Mutex<HashSet<String>>,
    pub aborted: Mutex<Vec<String>>,
    pub delete_calls: Mutex<Vec<usize>>,
    pub complete_calls: AtomicUsize,
    page_size: usize,
    next_id: AtomicUsize,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::with_page_size(1000)
    }

    pub fn with_page_size(page_size: usize) -> Self {
        Self {
            objects: Mutex::new(BTreeMap::new()),
            uploads: Mutex::new(HashMap::new()),
            failing_completions: Mutex::new(HashSet::new()),
            failing_creates: Mutex::new(HashSet::new()),
            failing_heads: Mutex::new(HashSet::new()),
            aborted: Mutex::new(Vec::new()),
            delete_calls: Mutex::new(Vec::new()),
            complete_calls: AtomicUsize::new(0),
            page_size,
            next_id: AtomicUsize::new(1),
        }
    }

    /// What the browser does with a signed part URL.
    pub fn put_part(&self, upload_id: &str, part_number: i32, data: &[u8]) -> String {
        let etag = format!("{:x}", md5::compute(data));
        let mut uploads = self.uploads.lock().unwrap();
        let upload = uploads.get_mut(upload_id).expect("unknown upload id");
        upload
            .parts
            .insert(part_number, (etag.clone(), data.to_vec()));
        etag
    }

    pub fn put_object(&self, key: &str, data: &[u8]) {
        self.objects.lock().unwrap().insert(
            key.to_string(),
            StoredObject {
                data: data.to_vec(),
                content_type: "application/octet-stream".into(),
                etag: format!("{:x}", md5::compute(data)),
            },
        );
    }

    pub fn fail_completion_of(&self, key: &str) {
        self.failing_completions
            .lock()
            .unwrap()
            .insert(key.to_string());
    }

    /// Refuse to open uploads whose key ends with `filename`.
    pub fn fail_create_of(&self, filename: &str) {
        self.failing_creates
            .lock()
            .unwrap()
            .insert(filename.to_string());
    }

    /// HEAD on `key` errors even when the object exists.
    pub fn fail_head_of(&self, key: &str) {
        self.failing_heads.lock().unwrap().insert(key.to_string());
    }

    pub fn remove_object(&self, key: &str) -> bool {
        self.objects.lock().unwrap().remove(key).is_some()
    }

    pub fn object(&self, key: &str) -> Option<StoredObject> {
        self.objects.lock().unwrap().get(key).cloned()
    }

    pub fn object_count(&self) -> usize {
        self.objects.lock().unwrap().len()
    }

    pub fn open_uploads(&self) -> usize {
        self.uploads.lock().unwrap().len()
    }
}

#[async_trait]
impl ObjectStorage for MemoryStorage {
    async fn create_multipart_upload(
        &self,
        key: &str,
        content_type: &str,
    ) -> StorageResult<String> {
        let refused = self
            .failing_creates
            .lock()
            .unwrap()
            .iter()
            .any(|name| key.ends_with(name.as_str()));
        if refused {
            return Err(StorageError::provider(
                "create_multipart_upload",
                "SlowDown: Please reduce your request rate",
            ));
        }
        let id = format!("upload-{}", self.next_id.fetch_add(1, Ordering::SeqCst));
        self.uploads.lock().unwrap().insert(
            id.clone(),
            OpenUpload {
                key: key.to_string(),
                content_type: content_type.to_string(),
                parts: BTreeMap::new(),
            },
        );
        Ok(id)
    }

    async fn presign_upload_part(
        &self,
        key: &str,
        upload_id: &str,
        part_number: i32,
        expires_in: Duration,
    ) -> StorageResult<String> {
        Ok(format!(
            "https://storage.test/{}?uploadId={}&partNumber={}&expires={}",
            key,
            upload_id,
            part_number,
            expires_in.as_secs()
        ))
    }

    async fn complete_multipart_upload(
        &self,
        key: &str,
        upload_id: &str,
        parts: &[UploadedPart],
    ) -> StorageResult<Option<String>> {
        self.complete_calls.fetch_add(1, Ordering::SeqCst);
        if self.failing_completions.lock().unwrap().contains(key) {
            return Err(StorageError::provider(
                "complete_multipart_upload",
                "InvalidPart: One or more of the specified parts could not be found",
            ));
        }

        let mut uploads = self.uploads.lock().unwrap();
        let upload = uploads.get(upload_id).ok_or_else(|| {
            StorageError::provider("complete_multipart_upload", "NoSuchUpload")
        })?;
        if upload.key != key {
            return Err(StorageError::provider("complete_multipart_upload", "NoSuchUpload"));
        }

        let mut data = Vec::new();
        for part in parts {
            match upload.parts.get(&part.part_number) {
                Some((etag, bytes)) if *etag == part.etag => data.extend_from_slice(bytes),
                _ => {
                    return Err(StorageError::provider(
                        "complete_multipart_upload",
                        format!("InvalidPart: {}", part.part_number),
                    ));
                }
            }
        }

        let etag = format!("{:x}-{}", md5::compute(&data), parts.len());
        let content_type = upload.content_type.clone();
        uploads.remove(upload_id);
        self.objects.lock().unwrap().insert(
            key.to_string(),
            StoredObject {
                data,
                content_type,
                etag: etag.clone(),
            },
        );
        Ok(Some(etag))
    }

    async fn abort_multipart_upload(&self, key: &str, upload_id: &str) -> StorageResult<()> {
        self.aborted.lock().unwrap().push(key.to_string());
        match self.uploads.lock().unwrap().remove(upload_id) {
            Some(_) => Ok(()),
            None => Err(StorageError::provider("abort_multipart_upload", "NoSuchUpload")),
        }
    }

    async fn head_object(&self, key: &str) -> StorageResult<ObjectHead> {
        if self.failing_heads.lock().unwrap().contains(key) {
            return Err(StorageError::provider("head_object", "InternalError"));
        }
        let objects = self.objects.lock().unwrap();
        let object = objects
            .get(key)
            .ok_or_else(|| StorageError::NotFound(key.to_string()))?;
        Ok(ObjectHead {
            size: object.data.len() as i64,
            content_type: Some(object.content_type.clone()),
            etag: Some(object.etag.clone()),
        })
    }

    async fn presign_get(
        &self,
        key: &str,
        download_name: Option<&str>,
        expires_in: Duration,
    ) -> StorageResult<String> {
        Ok(format!(
            "https://storage.test/{}?download={}&expires={}",
            key,
            download_name.unwrap_or_default().replace(' ', "+"),
            expires_in.as_secs()
        ))
    }

    async fn get_object(&self, key: &str) -> StorageResult<ObjectReader> {
        let data = self
            .objects
            .lock()
            .unwrap()
            .get(key)
            .map(|o| o.data.clone())
            .ok_or_else(|| StorageError::NotFound(key.to_string()))?;
        Ok(Box::pin(Cursor::new(data)))
    }

    async fn list_objects(
        &self,
        prefix: &str,
        continuation_token: Option<String>,
    ) -> StorageResult<ObjectPage> {
        let objects = self.objects.lock().unwrap();
        let mut keys: Vec<String> = objects
            .keys()
            .filter(|k| k.starts_with(prefix))
            .filter(|k| continuation_token.as_deref().is_none_or(|after| k.as_str() > after))
            .take(self.page_size + 1)
            .cloned()
            .collect();

        let next_continuation_token = if keys.len() > self.page_size {
            keys.truncate(self.page_size);
            keys.last().cloned()
        } else {
            None
        };
        Ok(ObjectPage {
            keys,
            next_continuation_token,
        })
    }

    async fn delete_objects(&self, keys: &[String]) -> StorageResult<()> {
        assert!(keys.len() <= 1000, "delete batch too large");
        self.delete_calls.lock().unwrap().push(keys.len());
        let mut objects = self.objects.lock().unwrap();
        for key in keys {
            objects.remove(key);
        }
        Ok(())
    }

    async fn probe(&self) -> StorageResult<()> {
        Ok(())
    }
}

pub struct TestApp {
    pub db: Arc<SqlitePool>,
    pub storage: Arc<MemoryStorage>,
    pub state: AppState,
}

impl TestApp {
    pub async fn new() -> Self {
        Self::with_storage(MemoryStorage::new()).await
    }

    pub async fn with_storage(storage: MemoryStorage) -> Self {
        let db = memory_db().await;
        let storage = Arc::new(storage);
        let state = AppState::new(
            db.clone(),
            storage.clone() as Arc<dyn ObjectStorage>,
            DOWNLOAD_TTL,
            UPLOAD_TTL,
        );
        Self { db, storage, state }
    }

    pub fn router(&self) -> Router {
        client_portal::app(self.state.clone())
    }

    pub async fn reference(&self, reference_type: ReferenceType, id: &str) -> Reference {
        self.state
            .references
            .create(NewReference {
                reference_type,
                id: Some(id.to_string()),
                owner_user_id: "owner-1".into(),
                title: format!("{} {}", reference_type, id),
            })
            .await
            .unwrap()
    }
}

/// Single-connection in-memory database; every pooled connection would
/// otherwise see its own empty database.
pub async fn memory_db() -> Arc<SqlitePool> {
    let options = SqliteConnectOptions::from_str("sqlite::memory:")
        .unwrap()
        .foreign_keys(true);
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect_with(options)
        .await
        .unwrap();
    db::run_migrations(&pool).await.unwrap();
    Arc::new(pool)
}

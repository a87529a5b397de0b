//! Shared state handed to every handler.

use crate::{
    services::{
        batch_store::BatchStore, conversation_service::ConversationService,
        delivery_service::DeliveryService, reference_service::ReferenceService,
        relay::MessageHub, upload_service::UploadService,
    },
    storage::ObjectStorage,
};
use sqlx::SqlitePool;
use std::{sync::Arc, time::Duration};

#[derive(Clone)]
pub struct AppState {
    pub db: Arc<SqlitePool>,
    pub storage: Arc<dyn ObjectStorage>,
    pub references: ReferenceService,
    pub uploads: UploadService,
    pub delivery: DeliveryService,
    pub conversations: ConversationService,
}

impl AppState {
    pub fn new(
        db: Arc<SqlitePool>,
        storage: Arc<dyn ObjectStorage>,
        download_url_ttl: Duration,
        upload_url_ttl: Duration,
    ) -> Self {
        let batches = BatchStore::new(db.clone());
        let references = ReferenceService::new(db.clone());
        let uploads = UploadService::new(
            storage.clone(),
            batches.clone(),
            references.clone(),
            upload_url_ttl,
        );
        let delivery = DeliveryService::new(
            storage.clone(),
            batches,
            references.clone(),
            download_url_ttl,
        );
        let conversations = ConversationService::new(db.clone(), MessageHub::new());

        Self {
            db,
            storage,
            references,
            uploads,
            delivery,
            conversations,
        }
    }
}

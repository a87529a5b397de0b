mod common;

use axum::{
    body::{Body, to_bytes},
    http::{Request, StatusCode, header},
};
use client_portal::{
    models::{
        multipart::{
            CompleteObjectInput, CompleteUploadRequest, CompleteUploadResponse,
            CompletedPartInput, FileToUpload, InitiateUploadRequest,
        },
        reference::{BatchTag, DeliveryLink, ReferenceType, Role},
    },
    services::ServiceError,
};
use common::{MemoryStorage, TestApp};
use tower::ServiceExt;
use uuid::Uuid;

async fn client_batch(app: &TestApp, reference_id: &str, names: &[&str]) -> CompleteUploadResponse {
    let init = app
        .state
        .uploads
        .initiate(InitiateUploadRequest {
            reference_type: ReferenceType::Quote,
            reference_id: reference_id.into(),
            role: Role::Client,
            files: names
                .iter()
                .map(|n| FileToUpload {
                    filename: n.to_string(),
                    content_type: None,
                    size: 4,
                })
                .collect(),
        })
        .await
        .unwrap();

    let objects = init
        .objects
        .iter()
        .map(|o| CompleteObjectInput {
            key: o.key.clone(),
            upload_id: o.upload_id.clone(),
            filename: Some(o.filename.clone()),
            content_type: None,
            parts: vec![CompletedPartInput {
                part_number: 1,
                tag: app.storage.put_part(&o.upload_id, 1, b"data"),
            }],
        })
        .collect();

    app.state
        .uploads
        .complete(CompleteUploadRequest {
            reference_type: ReferenceType::Quote,
            reference_id: reference_id.into(),
            role: Role::Client,
            batch_id: init.batch_id,
            revision: None,
            objects,
        })
        .await
        .unwrap()
}

#[tokio::test]
async fn test_cleanup_pages_through_listing_and_removes_record() {
    let app = TestApp::with_storage(MemoryStorage::with_page_size(2)).await;
    app.reference(ReferenceType::Quote, "Q7").await;

    let names = ["a.pdf", "b.pdf", "c.pdf", "d.pdf", "e.pdf"];
    let done = client_batch(&app, "Q7", &names).await;
    let batch_id = done.batch.batch_id.unwrap();
    // A stray object under the same prefix that no record mentions.
    app.storage
        .put_object(&format!("{}2026-01-01/orphan.bin", done.batch.prefix), b"x");
    assert_eq!(app.storage.object_count(), 6);

    let report = app
        .state
        .delivery
        .delete_client_batch(ReferenceType::Quote, "Q7", batch_id)
        .await
        .unwrap();
    assert!(report.ok);
    assert_eq!(report.deleted_objects, 6);
    assert_eq!(app.storage.object_count(), 0);
    assert_eq!(app.storage.delete_calls.lock().unwrap().iter().sum::<usize>(), 6);

    let response = app
        .router()
        .oneshot(
            Request::get(format!(
                "/api/uploads/batch?referenceType=quote&referenceId=Q7&role=client&batchId={}",
                batch_id
            ))
            .body(Body::empty())
            .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let reference = app.state.references.get(ReferenceType::Quote, "Q7").await.unwrap();
    assert!(reference.download_link.is_none());
}

#[tokio::test]
async fn test_cleanup_deletes_in_chunks_of_at_most_1000_keys() {
    let app = TestApp::new().await;
    app.reference(ReferenceType::Quote, "Q11").await;

    let done = client_batch(&app, "Q11", &["a.pdf"]).await;
    for n in 0..1000 {
        app.storage.put_object(
            &format!("{}2026-01-01/part-{:04}.bin", done.batch.prefix, n),
            b"x",
        );
    }
    assert_eq!(app.storage.object_count(), 1001);

    let report = app
        .state
        .delivery
        .delete_client_batch(ReferenceType::Quote, "Q11", done.batch.batch_id.unwrap())
        .await
        .unwrap();
    assert_eq!(report.deleted_objects, 1001);
    assert_eq!(*app.storage.delete_calls.lock().unwrap(), vec![1000, 1]);
    assert_eq!(app.storage.object_count(), 0);
}

#[tokio::test]
async fn test_cleanup_leaves_other_batches_alone_and_repoints_link() {
    let app = TestApp::new().await;
    app.reference(ReferenceType::Quote, "Q8").await;

    let older = client_batch(&app, "Q8", &["old.pdf"]).await;
    let newer = client_batch(&app, "Q8", &["new.pdf"]).await;
    let newer_id = newer.batch.batch_id.unwrap();

    let report = app
        .state
        .delivery
        .delete_client_batch(ReferenceType::Quote, "Q8", newer_id)
        .await
        .unwrap();
    assert_eq!(report.deleted_objects, 1);

    let old_key = &older.batch.files[0].key;
    assert!(app.storage.object(old_key).is_some());

    let reference = app.state.references.get(ReferenceType::Quote, "Q8").await.unwrap();
    assert!(matches!(
        reference.download_link.as_deref(),
        Some(DeliveryLink::Uploaded { batch: BatchTag::BatchId(id), .. })
            if Some(*id) == older.batch.batch_id
    ));
}

#[tokio::test]
async fn test_cleanup_of_unknown_batch_is_404() {
    let app = TestApp::new().await;
    app.reference(ReferenceType::Quote, "Q9").await;

    let err = app
        .state
        .delivery
        .delete_client_batch(ReferenceType::Quote, "Q9", Uuid::new_v4())
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::NotFound(_)));
}

#[tokio::test]
async fn test_delete_endpoint_reports_count() {
    let app = TestApp::new().await;
    app.reference(ReferenceType::Quote, "Q10").await;
    let done = client_batch(&app, "Q10", &["a.pdf", "b.pdf"]).await;

    let body = serde_json::json!({
        "referenceType": "quote",
        "referenceId": "Q10",
        "batchId": done.batch.batch_id.unwrap(),
    });
    let response = app
        .router()
        .oneshot(
            Request::post("/api/uploads/delete")
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let json: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(json["ok"], true);
    assert_eq!(json["deletedObjects"], 2);
}

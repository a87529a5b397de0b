//! HTTP handlers for the upload pipeline: initiate, sign, complete, abort,
//! retrieve, list and delete batches.

use crate::{
    errors::AppError,
    models::{
        batch::UploadBatch,
        multipart::{
            AbortUploadRequest, CompleteUploadRequest, CompleteUploadResponse,
            InitiateUploadRequest, InitiateUploadResponse, SignPartRequest,
        },
        reference::{BatchTag, ReferenceType, Role},
    },
    services::delivery_service::{BatchSelector, CleanupReport, Delivery},
    state::AppState,
};
use axum::{
    Json,
    body::Body,
    extract::{Query, State},
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use uuid::Uuid;

#[derive(Debug, Deserialize, Default, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryMode {
    #[default]
    Auto,
    List,
}

/// Query for `GET /api/uploads/batch`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchQuery {
    pub reference_type: ReferenceType,
    pub reference_id: String,
    pub role: Role,
    pub batch_id: Option<Uuid>,
    pub revision: Option<i64>,
    #[serde(default)]
    pub mode: DeliveryMode,
}

impl BatchQuery {
    fn selector(self) -> Result<BatchSelector, AppError> {
        let tag = match (self.batch_id, self.revision) {
            (Some(_), Some(_)) => {
                return Err(AppError::bad_request(
                    "pass either batchId or revision, not both",
                ));
            }
            (Some(id), None) => Some(BatchTag::BatchId(id)),
            (None, Some(rev)) => Some(BatchTag::Revision(rev)),
            (None, None) => None,
        };
        Ok(BatchSelector {
            reference_type: self.reference_type,
            reference_id: self.reference_id,
            role: self.role,
            tag,
        })
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReferenceQuery {
    pub reference_type: ReferenceType,
    pub reference_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteBatchRequest {
    pub reference_type: ReferenceType,
    pub reference_id: String,
    pub batch_id: Uuid,
}

#[derive(Serialize)]
pub struct SignedUrl {
    pub url: String,
}

/// `POST /api/uploads/initiate`
pub async fn initiate_upload(
    State(state): State<AppState>,
    Json(req): Json<InitiateUploadRequest>,
) -> Result<Json<InitiateUploadResponse>, AppError> {
    Ok(Json(state.uploads.initiate(req).await?))
}

/// `POST /api/uploads/sign-part`
pub async fn sign_part(
    State(state): State<AppState>,
    Json(req): Json<SignPartRequest>,
) -> Result<Json<SignedUrl>, AppError> {
    let url = state.uploads.sign_part(req).await?;
    Ok(Json(SignedUrl { url }))
}

/// `POST /api/uploads/complete`
pub async fn complete_upload(
    State(state): State<AppState>,
    Json(req): Json<CompleteUploadRequest>,
) -> Result<Json<CompleteUploadResponse>, AppError> {
    Ok(Json(state.uploads.complete(req).await?))
}

/// `POST /api/uploads/abort`
pub async fn abort_upload(
    State(state): State<AppState>,
    Json(req): Json<AbortUploadRequest>,
) -> Result<impl IntoResponse, AppError> {
    let aborted = state.uploads.abort(req).await?;
    Ok(Json(json!({ "ok": true, "aborted": aborted })))
}

/// `GET /api/uploads/batch`
///
/// `mode=auto` redirects to a single file or streams a zip; `mode=list`
/// returns signed URLs as JSON.
pub async fn get_batch(
    State(state): State<AppState>,
    Query(query): Query<BatchQuery>,
) -> Result<Response, AppError> {
    let mode = query.mode;
    let selector = query.selector()?;

    if mode == DeliveryMode::List {
        let listing = state.delivery.listing(&selector).await?;
        return Ok(Json(listing).into_response());
    }

    match state.delivery.delivery(&selector).await? {
        Delivery::Redirect(url) => {
            let location = HeaderValue::from_str(&url)
                .map_err(|e| AppError::internal(format!("unusable signed url: {}", e)))?;
            let mut response = Response::new(Body::empty());
            *response.status_mut() = StatusCode::FOUND;
            response.headers_mut().insert(header::LOCATION, location);
            Ok(response)
        }
        Delivery::Zip { filename, entries } => {
            let disposition = HeaderValue::from_str(&format!(
                "attachment; filename=\"{}\"",
                filename.replace('"', "")
            ))
            .map_err(|e| AppError::internal(format!("unusable archive name: {}", e)))?;

            let body = Body::from_stream(state.delivery.zip_stream(entries));
            let mut response = Response::new(body);
            *response.status_mut() = StatusCode::OK;
            let headers = response.headers_mut();
            headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("application/zip"));
            headers.insert(header::CONTENT_DISPOSITION, disposition);
            Ok(response)
        }
    }
}

/// `GET /api/uploads/batches`
pub async fn list_batches(
    State(state): State<AppState>,
    Query(query): Query<ReferenceQuery>,
) -> Result<Json<Vec<UploadBatch>>, AppError> {
    let batches = state
        .delivery
        .list_batches(query.reference_type, &query.reference_id)
        .await?;
    Ok(Json(batches))
}

/// `POST /api/uploads/delete`
pub async fn delete_batch(
    State(state): State<AppState>,
    Json(req): Json<DeleteBatchRequest>,
) -> Result<Json<CleanupReport>, AppError> {
    let report = state
        .delivery
        .delete_client_batch(req.reference_type, &req.reference_id, req.batch_id)
        .await?;
    Ok(Json(report))
}

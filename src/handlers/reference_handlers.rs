use crate::{
    errors::AppError,
    models::reference::{Reference, ReferenceType},
    services::reference_service::NewReference,
    state::AppState,
};
use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
};
use serde::Deserialize;

#[derive(Debug, Deserialize)]
pub struct ExternalLinkRequest {
    pub url: String,
}

fn parse_type(raw: &str) -> Result<ReferenceType, AppError> {
    raw.parse().map_err(AppError::bad_request)
}

/// `POST /api/references`
pub async fn create_reference(
    State(state): State<AppState>,
    Json(req): Json<NewReference>,
) -> Result<(StatusCode, Json<Reference>), AppError> {
    let created = state.references.create(req).await?;
    Ok((StatusCode::CREATED, Json(created)))
}

/// `GET /api/references/{type}/{id}`
pub async fn get_reference(
    State(state): State<AppState>,
    Path((reference_type, id)): Path<(String, String)>,
) -> Result<Json<Reference>, AppError> {
    let reference_type = parse_type(&reference_type)?;
    Ok(Json(state.references.get(reference_type, &id).await?))
}

/// `PUT /api/references/{type}/{id}/delivery-link`
pub async fn set_delivery_link(
    State(state): State<AppState>,
    Path((reference_type, id)): Path<(String, String)>,
    Json(req): Json<ExternalLinkRequest>,
) -> Result<Json<Reference>, AppError> {
    let reference_type = parse_type(&reference_type)?;
    let updated = state
        .references
        .set_external_delivery_link(reference_type, &id, &req.url)
        .await?;
    Ok(Json(updated))
}

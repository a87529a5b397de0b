//! Wire types for the direct-to-storage multipart upload flow.

use super::{
    batch::UploadBatch,
    reference::{DeliveryLink, ReferenceType, Role},
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A file the browser is about to upload.
#[derive(Deserialize, Clone, Debug)]
#[serde(rename_all = "camelCase")]
pub struct FileToUpload {
    pub filename: String,
    pub content_type: Option<String>,
    pub size: u64,
}

#[derive(Deserialize, Clone, Debug)]
#[serde(rename_all = "camelCase")]
pub struct InitiateUploadRequest {
    pub reference_type: ReferenceType,
    pub reference_id: String,
    pub role: Role,
    pub files: Vec<FileToUpload>,
}

/// Pre-signed PUT for one part.
#[derive(Serialize, Deserialize, Clone, Debug)]
#[serde(rename_all = "camelCase")]
pub struct PartUrl {
    pub part_number: i32,
    pub url: String,
}

/// An opened multipart upload for one file.
#[derive(Serialize, Deserialize, Clone, Debug)]
#[serde(rename_all = "camelCase")]
pub struct InitiatedObject {
    pub key: String,
    pub filename: String,
    pub upload_id: String,
    pub recommended_part_size: u64,
    pub part_count: u64,
    pub parts: Vec<PartUrl>,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
#[serde(rename_all = "camelCase")]
pub struct InitiateUploadResponse {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub batch_id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub revision: Option<i64>,
    pub base_prefix: String,
    pub objects: Vec<InitiatedObject>,
}

/// Part number plus the entity tag the provider returned for the part PUT.
#[derive(Deserialize, Clone, Debug)]
#[serde(rename_all = "camelCase")]
pub struct CompletedPartInput {
    pub part_number: i32,
    pub tag: String,
}

#[derive(Deserialize, Clone, Debug)]
#[serde(rename_all = "camelCase")]
pub struct CompleteObjectInput {
    pub key: String,
    pub upload_id: String,
    pub filename: Option<String>,
    pub content_type: Option<String>,
    pub parts: Vec<CompletedPartInput>,
}

#[derive(Deserialize, Clone, Debug)]
#[serde(rename_all = "camelCase")]
pub struct CompleteUploadRequest {
    pub reference_type: ReferenceType,
    pub reference_id: String,
    pub role: Role,
    pub batch_id: Option<Uuid>,
    pub revision: Option<i64>,
    pub objects: Vec<CompleteObjectInput>,
}

#[derive(Serialize, Clone, Debug)]
#[serde(rename_all = "camelCase")]
pub struct CompleteUploadResponse {
    pub ok: bool,
    pub link: DeliveryLink,
    pub batch: UploadBatch,
}

#[derive(Deserialize, Clone, Debug)]
#[serde(rename_all = "camelCase")]
pub struct SignPartRequest {
    pub key: String,
    pub upload_id: String,
    pub part_number: i32,
}

#[derive(Deserialize, Clone, Debug)]
#[serde(rename_all = "camelCase")]
pub struct OpenUpload {
    pub key: String,
    pub upload_id: String,
}

#[derive(Deserialize, Clone, Debug)]
#[serde(rename_all = "camelCase")]
pub struct AbortUploadRequest {
    pub objects: Vec<OpenUpload>,
}

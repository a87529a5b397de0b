//! Defines routes for the portal API.
//!
//! ## Structure
//! - **Health**: `GET /healthz`, `GET /readyz`
//! - **References**
//!   - `POST /api/references` create an order or quote
//!   - `GET  /api/references/{type}/{id}` fetch with link fields
//!   - `PUT  /api/references/{type}/{id}/delivery-link` set an external delivery link
//! - **Uploads**
//!   - `POST /api/uploads/initiate` open multipart uploads, sign parts
//!   - `POST /api/uploads/sign-part` re-sign one part
//!   - `POST /api/uploads/complete` complete uploads, record the batch
//!   - `POST /api/uploads/abort` abort open uploads
//!   - `GET  /api/uploads/batch` redirect, zip, or JSON listing
//!   - `GET  /api/uploads/batches` every batch of a reference
//!   - `POST /api/uploads/delete` delete a client batch
//! - **Conversations**
//!   - `POST|GET /api/conversations`
//!   - `POST|GET /api/conversations/{id}/messages`
//!   - `POST /api/conversations/{id}/read`
//!   - `GET  /api/conversations/{id}/events` (SSE)

use crate::{
    handlers::{
        conversation_handlers::{
            conversation_events, create_conversation, list_conversations, list_messages,
            mark_read, post_message,
        },
        health_handlers::{healthz, readyz},
        reference_handlers::{create_reference, get_reference, set_delivery_link},
        upload_handlers::{
            abort_upload, complete_upload, delete_batch, get_batch, initiate_upload,
            list_batches, sign_part,
        },
    },
    state::AppState,
};
use axum::{
    Router,
    routing::{get, post, put},
};

/// Build the router. State is attached by the caller.
pub fn routes() -> Router<AppState> {
    Router::new()
        // health endpoints (mounted at root)
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        // references
        .route("/api/references", post(create_reference))
        .route("/api/references/{type}/{id}", get(get_reference))
        .route(
            "/api/references/{type}/{id}/delivery-link",
            put(set_delivery_link),
        )
        // uploads
        .route("/api/uploads/initiate", post(initiate_upload))
        .route("/api/uploads/sign-part", post(sign_part))
        .route("/api/uploads/complete", post(complete_upload))
        .route("/api/uploads/abort", post(abort_upload))
        .route("/api/uploads/batch", get(get_batch))
        .route("/api/uploads/batches", get(list_batches))
        .route("/api/uploads/delete", post(delete_batch))
        // conversations
        .route(
            "/api/conversations",
            post(create_conversation).get(list_conversations),
        )
        .route(
            "/api/conversations/{id}/messages",
            post(post_message).get(list_messages),
        )
        .route("/api/conversations/{id}/read", post(mark_read))
        .route("/api/conversations/{id}/events", get(conversation_events))
}

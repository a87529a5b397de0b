//! Conversation and message endpoints, plus the live event stream.

use crate::{
    errors::AppError,
    models::conversation::{ConversationView, Message, Participant},
    services::conversation_service::{MessagePage, NewConversation, NewMessage},
    state::AppState,
};
use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::sse::{Event, KeepAlive, Sse},
};
use futures::{Stream, StreamExt};
use serde::Deserialize;
use std::convert::Infallible;
use tracing::warn;
use uuid::Uuid;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserQuery {
    pub user_id: String,
}

#[derive(Debug, Deserialize)]
pub struct PageQuery {
    pub before: Option<String>,
    pub limit: Option<i64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarkReadRequest {
    pub user_id: String,
}

/// `POST /api/conversations`
pub async fn create_conversation(
    State(state): State<AppState>,
    Json(req): Json<NewConversation>,
) -> Result<(StatusCode, Json<ConversationView>), AppError> {
    let view = state.conversations.create(req).await?;
    Ok((StatusCode::CREATED, Json(view)))
}

/// `GET /api/conversations?userId=`
pub async fn list_conversations(
    State(state): State<AppState>,
    Query(query): Query<UserQuery>,
) -> Result<Json<Vec<ConversationView>>, AppError> {
    Ok(Json(state.conversations.list_for_user(&query.user_id).await?))
}

/// `POST /api/conversations/{id}/messages`
pub async fn post_message(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(req): Json<NewMessage>,
) -> Result<(StatusCode, Json<Message>), AppError> {
    let message = state.conversations.post_message(id, req).await?;
    Ok((StatusCode::CREATED, Json(message)))
}

/// `GET /api/conversations/{id}/messages?before=&limit=`
pub async fn list_messages(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Query(page): Query<PageQuery>,
) -> Result<Json<MessagePage>, AppError> {
    let page = state
        .conversations
        .list_messages(id, page.before.as_deref(), page.limit)
        .await?;
    Ok(Json(page))
}

/// `POST /api/conversations/{id}/read`
pub async fn mark_read(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(req): Json<MarkReadRequest>,
) -> Result<Json<Participant>, AppError> {
    Ok(Json(state.conversations.mark_read(id, &req.user_id).await?))
}

/// `GET /api/conversations/{id}/events`
///
/// Server-sent `message` events for messages posted after connecting.
pub async fn conversation_events(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, AppError> {
    // 404 up front instead of an empty stream that never ends.
    state.conversations.view(id, None).await?;

    let events = state
        .conversations
        .hub()
        .subscribe(id)
        .filter_map(|message| async move {
            match Event::default().event("message").json_data(&message) {
                Ok(event) => Some(Ok(event)),
                Err(err) => {
                    warn!(error = %err, message = %message.id, "dropping unencodable event");
                    None
                }
            }
        });

    Ok(Sse::new(events).keep_alive(KeepAlive::default()))
}

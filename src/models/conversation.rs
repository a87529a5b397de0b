//! Client/admin conversations and their messages.

use super::reference::Role;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, types::Json};
use uuid::Uuid;

/// Copy of the sender's profile taken when the message was written, so later
/// profile edits do not rewrite history.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SenderSnapshot {
    pub user_id: String,
    pub display_name: String,
    pub role: Role,
}

/// Denormalized preview of a conversation's newest message.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct LastMessage {
    pub message_id: Uuid,
    pub sender: SenderSnapshot,
    pub preview: String,
    pub sent_at: DateTime<Utc>,
}

#[derive(Serialize, Deserialize, Clone, FromRow, Debug)]
#[serde(rename_all = "camelCase")]
pub struct Conversation {
    pub id: Uuid,
    pub title: Option<String>,
    pub last_message: Option<Json<LastMessage>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Serialize, Deserialize, Clone, FromRow, Debug)]
#[serde(rename_all = "camelCase")]
pub struct Participant {
    pub conversation_id: Uuid,
    pub user_id: String,
    pub role: Role,
    pub unread_count: i64,
    pub last_read_at: Option<DateTime<Utc>>,
}

#[derive(Serialize, Deserialize, Clone, FromRow, Debug)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: Uuid,
    pub conversation_id: Uuid,
    pub sender: Json<SenderSnapshot>,
    pub body: String,
    pub created_at: DateTime<Utc>,
}

/// A conversation as seen by one participant.
#[derive(Serialize, Clone, Debug)]
#[serde(rename_all = "camelCase")]
pub struct ConversationView {
    #[serde(flatten)]
    pub conversation: Conversation,
    pub participants: Vec<Participant>,
    pub unread_count: i64,
}

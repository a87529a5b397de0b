//! Conversations between clients and staff.
//!
//! Messages are create-only. Posting one bumps every other participant's
//! unread counter and refreshes the conversation's last-message preview in
//! the same transaction, then hands the message to the relay.

use crate::{
    models::{
        conversation::{
            Conversation, ConversationView, LastMessage, Message, Participant, SenderSnapshot,
        },
        reference::Role,
    },
    services::{ServiceError, ServiceResult, relay::MessageHub},
};
use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, SqlitePool, types::Json};
use std::{collections::HashSet, sync::Arc};
use tracing::{debug, info};
use uuid::Uuid;

pub const MAX_BODY_CHARS: usize = 10_000;
pub const DEFAULT_PAGE_SIZE: i64 = 50;
pub const MAX_PAGE_SIZE: i64 = 200;
const PREVIEW_CHARS: usize = 140;

const CONVERSATION_COLUMNS: &str = "id, title, last_message, created_at, updated_at";
const PARTICIPANT_COLUMNS: &str = "conversation_id, user_id, role, unread_count, last_read_at";

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParticipantInput {
    pub user_id: String,
    pub role: Role,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewConversation {
    pub title: Option<String>,
    pub participants: Vec<ParticipantInput>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewMessage {
    pub sender: SenderSnapshot,
    pub body: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MessagePage {
    pub messages: Vec<Message>,
    /// Pass back as `before` to fetch the next older page.
    pub next_cursor: Option<String>,
}

#[derive(FromRow)]
struct MessageRow {
    seq: i64,
    #[sqlx(flatten)]
    message: Message,
}

#[derive(Clone)]
pub struct ConversationService {
    db: Arc<SqlitePool>,
    hub: MessageHub,
}

impl ConversationService {
    pub fn new(db: Arc<SqlitePool>, hub: MessageHub) -> Self {
        Self { db, hub }
    }

    pub fn hub(&self) -> &MessageHub {
        &self.hub
    }

    pub async fn create(&self, new: NewConversation) -> ServiceResult<ConversationView> {
        let mut seen = HashSet::new();
        let mut participants = Vec::with_capacity(new.participants.len());
        for p in new.participants {
            let user_id = p.user_id.trim().to_string();
            if user_id.is_empty() {
                return Err(ServiceError::validation("participant userId is required"));
            }
            if seen.insert(user_id.clone()) {
                participants.push(ParticipantInput { user_id, role: p.role });
            }
        }
        if participants.len() < 2 {
            return Err(ServiceError::validation(
                "a conversation needs at least two distinct participants",
            ));
        }

        let title = new
            .title
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty());
        let id = Uuid::new_v4();
        let now = Utc::now();

        let mut tx = self.db.begin().await?;
        sqlx::query(
            "INSERT INTO conversations (id, title, last_message, created_at, updated_at)
             VALUES (?, ?, NULL, ?, ?)",
        )
        .bind(id)
        .bind(&title)
        .bind(now)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        for p in &participants {
            sqlx::query(
                "INSERT INTO conversation_participants
                 (conversation_id, user_id, role, unread_count, last_read_at)
                 VALUES (?, ?, ?, 0, NULL)",
            )
            .bind(id)
            .bind(&p.user_id)
            .bind(p.role)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;

        info!(conversation = %id, participants = participants.len(), "conversation created");
        self.view(id, None).await
    }

    /// Conversations `user_id` takes part in, most recently active first.
    pub async fn list_for_user(&self, user_id: &str) -> ServiceResult<Vec<ConversationView>> {
        let conversations = sqlx::query_as::<_, Conversation>(
            "SELECT c.id, c.title, c.last_message, c.created_at, c.updated_at
             FROM conversations c
             JOIN conversation_participants p ON p.conversation_id = c.id
             WHERE p.user_id = ?
             ORDER BY c.updated_at DESC",
        )
        .bind(user_id)
        .fetch_all(&*self.db)
        .await?;

        let mut views = Vec::with_capacity(conversations.len());
        for conversation in conversations {
            views.push(self.with_participants(conversation, Some(user_id)).await?);
        }
        Ok(views)
    }

    /// A single conversation. With `viewer`, `unread_count` is theirs.
    pub async fn view(&self, id: Uuid, viewer: Option<&str>) -> ServiceResult<ConversationView> {
        let conversation = self.fetch(id).await?;
        self.with_participants(conversation, viewer).await
    }

    pub async fn post_message(&self, conversation_id: Uuid, new: NewMessage) -> ServiceResult<Message> {
        let body = new.body.trim();
        if body.is_empty() {
            return Err(ServiceError::validation("message body must not be empty"));
        }
        if body.chars().count() > MAX_BODY_CHARS {
            return Err(ServiceError::validation(format!(
                "message body exceeds {} characters",
                MAX_BODY_CHARS
            )));
        }

        self.fetch(conversation_id).await?;
        let participant = self
            .participant(conversation_id, &new.sender.user_id)
            .await?
            .ok_or_else(|| {
                ServiceError::validation(format!(
                    "`{}` is not a participant of this conversation",
                    new.sender.user_id
                ))
            })?;

        // The stored role is authoritative over whatever the caller claims.
        let sender = SenderSnapshot {
            role: participant.role,
            ..new.sender
        };
        let message = Message {
            id: Uuid::new_v4(),
            conversation_id,
            sender: Json(sender.clone()),
            body: body.to_string(),
            created_at: Utc::now(),
        };
        let last = LastMessage {
            message_id: message.id,
            sender,
            preview: body.chars().take(PREVIEW_CHARS).collect(),
            sent_at: message.created_at,
        };

        let mut tx = self.db.begin().await?;
        sqlx::query(
            "INSERT INTO messages (id, conversation_id, sender, body, created_at)
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(message.id)
        .bind(conversation_id)
        .bind(&message.sender)
        .bind(&message.body)
        .bind(message.created_at)
        .execute(&mut *tx)
        .await?;

        sqlx::query("UPDATE conversations SET last_message = ?, updated_at = ? WHERE id = ?")
            .bind(Json(&last))
            .bind(message.created_at)
            .bind(conversation_id)
            .execute(&mut *tx)
            .await?;

        sqlx::query(
            "UPDATE conversation_participants SET unread_count = unread_count + 1
             WHERE conversation_id = ? AND user_id <> ?",
        )
        .bind(conversation_id)
        .bind(&participant.user_id)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;

        let listeners = self.hub.publish(message.clone());
        debug!(conversation = %conversation_id, message = %message.id, listeners, "message posted");
        Ok(message)
    }

    /// Newest-first page of messages older than `before`.
    pub async fn list_messages(
        &self,
        conversation_id: Uuid,
        before: Option<&str>,
        limit: Option<i64>,
    ) -> ServiceResult<MessagePage> {
        self.fetch(conversation_id).await?;

        let limit = limit.unwrap_or(DEFAULT_PAGE_SIZE).clamp(1, MAX_PAGE_SIZE);
        let before_seq = match before.filter(|c| !c.is_empty()) {
            Some(cursor) => decode_cursor(cursor)?,
            None => i64::MAX,
        };

        let rows = sqlx::query_as::<_, MessageRow>(
            "SELECT rowid AS seq, id, conversation_id, sender, body, created_at
             FROM messages
             WHERE conversation_id = ? AND rowid < ?
             ORDER BY rowid DESC
             LIMIT ?",
        )
        .bind(conversation_id)
        .bind(before_seq)
        .bind(limit)
        .fetch_all(&*self.db)
        .await?;

        let next_cursor = match rows.last() {
            Some(last) if rows.len() as i64 == limit => Some(encode_cursor(last.seq)),
            _ => None,
        };
        Ok(MessagePage {
            messages: rows.into_iter().map(|r| r.message).collect(),
            next_cursor,
        })
    }

    /// Reset `user_id`'s unread counter.
    pub async fn mark_read(&self, conversation_id: Uuid, user_id: &str) -> ServiceResult<Participant> {
        let sql = format!(
            "UPDATE conversation_participants SET unread_count = 0, last_read_at = ?
             WHERE conversation_id = ? AND user_id = ?
             RETURNING {PARTICIPANT_COLUMNS}"
        );
        sqlx::query_as::<_, Participant>(&sql)
            .bind(Utc::now())
            .bind(conversation_id)
            .bind(user_id)
            .fetch_optional(&*self.db)
            .await?
            .ok_or_else(|| {
                ServiceError::not_found(format!(
                    "`{}` is not a participant of conversation {}",
                    user_id, conversation_id
                ))
            })
    }

    async fn fetch(&self, id: Uuid) -> ServiceResult<Conversation> {
        let sql = format!("SELECT {CONVERSATION_COLUMNS} FROM conversations WHERE id = ?");
        sqlx::query_as::<_, Conversation>(&sql)
            .bind(id)
            .fetch_optional(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::not_found(format!("conversation {} not found", id)))
    }

    async fn participant(&self, conversation_id: Uuid, user_id: &str) -> ServiceResult<Option<Participant>> {
        let sql = format!(
            "SELECT {PARTICIPANT_COLUMNS} FROM conversation_participants
             WHERE conversation_id = ? AND user_id = ?"
        );
        Ok(sqlx::query_as::<_, Participant>(&sql)
            .bind(conversation_id)
            .bind(user_id)
            .fetch_optional(&*self.db)
            .await?)
    }

    async fn with_participants(
        &self,
        conversation: Conversation,
        viewer: Option<&str>,
    ) -> ServiceResult<ConversationView> {
        let sql = format!(
            "SELECT {PARTICIPANT_COLUMNS} FROM conversation_participants
             WHERE conversation_id = ? ORDER BY user_id"
        );
        let participants = sqlx::query_as::<_, Participant>(&sql)
            .bind(conversation.id)
            .fetch_all(&*self.db)
            .await?;

        let unread_count = viewer
            .and_then(|v| participants.iter().find(|p| p.user_id == v))
            .map(|p| p.unread_count)
            .unwrap_or(0);

        Ok(ConversationView {
            conversation,
            participants,
            unread_count,
        })
    }
}

fn encode_cursor(seq: i64) -> String {
    URL_SAFE_NO_PAD.encode(seq.to_string())
}

fn decode_cursor(cursor: &str) -> ServiceResult<i64> {
    URL_SAFE_NO_PAD
        .decode(cursor)
        .ok()
        .and_then(|raw| String::from_utf8(raw).ok())
        .and_then(|s| s.parse::<i64>().ok())
        .ok_or_else(|| ServiceError::validation("invalid cursor"))
}

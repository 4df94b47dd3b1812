//! Direct messages between users.
//!
//! Any signed-in user may send; a conversation is only readable by its
//! two participants. Fetching a conversation marks the caller's unread
//! messages in it as read.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use std::sync::Arc;
use uuid::Uuid;

use crate::db::{Message, SendMessageRequest};
use crate::AppState;

use super::auth::Identity;
use super::error::ApiError;
use super::policy::{can_access, Action, Ownership, ResourceKind};
use super::validation::validate_uuid;

/// Send a message to another user.
pub async fn send_message(
    State(state): State<Arc<AppState>>,
    identity: Identity,
    Json(req): Json<SendMessageRequest>,
) -> Result<(StatusCode, Json<Message>), ApiError> {
    if !can_access(
        identity.role_enum(),
        ResourceKind::Message,
        Action::Create,
        Ownership::default(),
    )
    .is_allowed()
    {
        return Err(ApiError::forbidden("Access denied"));
    }

    validate_uuid(&req.recipient_id, "recipient_id")
        .map_err(|e| ApiError::validation_field("recipient_id", e))?;
    if req.body.trim().is_empty() {
        return Err(ApiError::validation_field("body", "Message body is required"));
    }
    if req.body.len() > 10_000 {
        return Err(ApiError::validation_field(
            "body",
            "Message is too long (max 10000 characters)",
        ));
    }
    if req.recipient_id == identity.user_id {
        return Err(ApiError::invalid_request("Cannot message yourself"));
    }

    let recipient: Option<(String,)> = sqlx::query_as("SELECT id FROM users WHERE id = ?")
        .bind(&req.recipient_id)
        .fetch_optional(&state.db)
        .await?;
    if recipient.is_none() {
        return Err(ApiError::not_found("Recipient not found"));
    }

    let id = Uuid::new_v4().to_string();
    sqlx::query("INSERT INTO messages (id, sender_id, recipient_id, body) VALUES (?, ?, ?, ?)")
        .bind(&id)
        .bind(&identity.user_id)
        .bind(&req.recipient_id)
        .bind(&req.body)
        .execute(&state.db)
        .await?;

    let message: Message = sqlx::query_as("SELECT * FROM messages WHERE id = ?")
        .bind(&id)
        .fetch_one(&state.db)
        .await?;

    Ok((StatusCode::CREATED, Json(message)))
}

// One row per peer, picked by rowid rather than created_at: timestamps
// have second resolution and collide within a conversation.
const LATEST_PER_CONVERSATION_SQL: &str = "SELECT m.* FROM messages m \
     WHERE m.rowid IN ( \
         SELECT MAX(m2.rowid) FROM messages m2 \
         WHERE m2.sender_id = ?1 OR m2.recipient_id = ?1 \
         GROUP BY CASE WHEN m2.sender_id = ?1 THEN m2.recipient_id ELSE m2.sender_id END \
     ) \
     ORDER BY m.created_at DESC, m.rowid DESC";

/// The most recent message of each conversation the caller is part of.
pub async fn list_conversations(
    State(state): State<Arc<AppState>>,
    identity: Identity,
) -> Result<Json<Vec<Message>>, ApiError> {
    let messages: Vec<Message> = sqlx::query_as(LATEST_PER_CONVERSATION_SQL)
        .bind(&identity.user_id)
        .fetch_all(&state.db)
        .await?;

    Ok(Json(messages))
}

/// The full conversation with one peer, oldest first. Marks messages the
/// peer sent to the caller as read.
pub async fn get_conversation(
    State(state): State<Arc<AppState>>,
    identity: Identity,
    Path(peer_id): Path<String>,
) -> Result<Json<Vec<Message>>, ApiError> {
    validate_uuid(&peer_id, "user_id").map_err(|e| ApiError::validation_field("user_id", e))?;

    // The caller is by construction a participant of every row fetched
    // below; the policy check is on the participant relationship itself.
    if !can_access(
        identity.role_enum(),
        ResourceKind::Message,
        Action::Read,
        Ownership {
            owns: false,
            assigned: true,
        },
    )
    .is_allowed()
    {
        return Err(ApiError::forbidden("Access denied"));
    }

    let messages: Vec<Message> = sqlx::query_as(
        "SELECT * FROM messages \
         WHERE (sender_id = ? AND recipient_id = ?) \
            OR (sender_id = ? AND recipient_id = ?) \
         ORDER BY created_at ASC",
    )
    .bind(&identity.user_id)
    .bind(&peer_id)
    .bind(&peer_id)
    .bind(&identity.user_id)
    .fetch_all(&state.db)
    .await?;

    sqlx::query(
        "UPDATE messages SET read_at = datetime('now') \
         WHERE sender_id = ? AND recipient_id = ? AND read_at IS NULL",
    )
    .bind(&peer_id)
    .bind(&identity.user_id)
    .execute(&state.db)
    .await?;

    Ok(Json(messages))
}

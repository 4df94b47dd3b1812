//! File attachments: multipart upload, download, delete.
//!
//! Bytes go to the object store under a generated key; the database row
//! carries ownership and an optional coursework link that widens read
//! access to whoever can read that coursework.

use axum::{
    extract::{Multipart, Path, State},
    http::{header, StatusCode},
    response::IntoResponse,
    Json,
};
use std::sync::Arc;
use uuid::Uuid;

use crate::db::{Attachment, Coursework, DbPool, Role, Submission};
use crate::storage::StorageError;
use crate::AppState;

use super::auth::Identity;
use super::error::ApiError;
use super::guard::Guard;
use super::policy::Action;
use super::validation::validate_uuid;

const MAX_UPLOAD_BYTES: usize = 25 * 1024 * 1024;

impl From<StorageError> for ApiError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::Unconfigured => {
                ApiError::upstream("File storage is not configured")
            }
            StorageError::NotFound(_) => ApiError::not_found("File not found"),
            StorageError::Request(msg) => {
                tracing::error!("Object storage request failed: {}", msg);
                ApiError::upstream("File storage is unavailable")
            }
        }
    }
}

async fn load_attachment(state: &AppState, id: &str) -> Result<Attachment, ApiError> {
    validate_uuid(id, "attachment_id")
        .map_err(|e| ApiError::validation_field("attachment_id", e))?;
    let attachment: Option<Attachment> = sqlx::query_as("SELECT * FROM attachments WHERE id = ?")
        .bind(id)
        .fetch_optional(&state.db)
        .await?;
    attachment.ok_or_else(|| ApiError::not_found("Attachment not found"))
}

/// Whether the caller may read this attachment: the owner and admins
/// always; read access to a linked coursework carries over; a
/// submission-linked file is visible to whoever may grade the parent
/// coursework.
async fn can_read(
    pool: &DbPool,
    identity: &Identity,
    attachment: &Attachment,
) -> Result<bool, ApiError> {
    if attachment.owner_id == identity.user_id || identity.role_enum() == Some(Role::Admin) {
        return Ok(true);
    }
    if let Some(ref coursework_id) = attachment.coursework_id {
        let coursework: Option<Coursework> =
            sqlx::query_as("SELECT * FROM coursework WHERE id = ?")
                .bind(coursework_id)
                .fetch_optional(pool)
                .await?;
        if let Some(coursework) = coursework {
            if Guard::new(pool, identity)
                .coursework(&coursework, Action::Read)
                .await
                .is_ok()
            {
                return Ok(true);
            }
        }
    }
    if let Some(ref submission_id) = attachment.submission_id {
        let coursework: Option<Coursework> = sqlx::query_as(
            "SELECT cw.* FROM coursework cw \
             INNER JOIN submissions s ON s.coursework_id = cw.id \
             WHERE s.id = ?",
        )
        .bind(submission_id)
        .fetch_optional(pool)
        .await?;
        if let Some(coursework) = coursework {
            return Ok(Guard::new(pool, identity)
                .coursework(&coursework, Action::Grade)
                .await
                .is_ok());
        }
    }
    Ok(false)
}

/// Upload a file. Multipart fields: `file` (required), `coursework_id`
/// (optional link, caller must be able to read the target), and
/// `submission_id` (optional link, the submission must be the caller's
/// own).
pub async fn upload(
    State(state): State<Arc<AppState>>,
    identity: Identity,
    mut multipart: Multipart,
) -> Result<(StatusCode, Json<Attachment>), ApiError> {
    let mut file_name = None;
    let mut content_type = "application/octet-stream".to_string();
    let mut data: Option<bytes::Bytes> = None;
    let mut coursework_id: Option<String> = None;
    let mut submission_id: Option<String> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::invalid_request(format!("Malformed upload: {}", e)))?
    {
        match field.name() {
            Some("file") => {
                file_name = field.file_name().map(|s| s.to_string());
                if let Some(ct) = field.content_type() {
                    content_type = ct.to_string();
                }
                let bytes = field
                    .bytes()
                    .await
                    .map_err(|e| ApiError::invalid_request(format!("Malformed upload: {}", e)))?;
                if bytes.len() > MAX_UPLOAD_BYTES {
                    return Err(ApiError::invalid_request("File is too large (max 25 MB)"));
                }
                data = Some(bytes);
            }
            Some("coursework_id") => {
                let value = field
                    .text()
                    .await
                    .map_err(|e| ApiError::invalid_request(format!("Malformed upload: {}", e)))?;
                validate_uuid(&value, "coursework_id")
                    .map_err(|e| ApiError::validation_field("coursework_id", e))?;
                coursework_id = Some(value);
            }
            Some("submission_id") => {
                let value = field
                    .text()
                    .await
                    .map_err(|e| ApiError::invalid_request(format!("Malformed upload: {}", e)))?;
                validate_uuid(&value, "submission_id")
                    .map_err(|e| ApiError::validation_field("submission_id", e))?;
                submission_id = Some(value);
            }
            _ => {}
        }
    }

    let data = data.ok_or_else(|| ApiError::invalid_request("Missing file field"))?;
    let file_name = file_name.unwrap_or_else(|| "upload.bin".to_string());

    if let Some(ref coursework_id) = coursework_id {
        let coursework: Option<Coursework> =
            sqlx::query_as("SELECT * FROM coursework WHERE id = ?")
                .bind(coursework_id)
                .fetch_optional(&state.db)
                .await?;
        let coursework =
            coursework.ok_or_else(|| ApiError::not_found("Assignment not found"))?;
        Guard::new(&state.db, &identity)
            .coursework(&coursework, Action::Read)
            .await?;
    }

    if let Some(ref submission_id) = submission_id {
        let submission: Option<Submission> =
            sqlx::query_as("SELECT * FROM submissions WHERE id = ?")
                .bind(submission_id)
                .fetch_optional(&state.db)
                .await?;
        let submission =
            submission.ok_or_else(|| ApiError::not_found("Submission not found"))?;
        let profile = Guard::new(&state.db, &identity)
            .require_student_profile()
            .await?;
        if submission.student_id != profile.id {
            return Err(ApiError::forbidden(
                "You can only attach files to your own submission",
            ));
        }
    }

    let id = Uuid::new_v4().to_string();
    let object_key = format!("attachments/{}/{}", identity.user_id, id);
    let size = data.len() as i64;

    state.storage.put(&object_key, data, &content_type).await?;

    sqlx::query(
        "INSERT INTO attachments \
         (id, owner_id, coursework_id, submission_id, file_name, content_type, size_bytes, object_key) \
         VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(&id)
    .bind(&identity.user_id)
    .bind(&coursework_id)
    .bind(&submission_id)
    .bind(&file_name)
    .bind(&content_type)
    .bind(size)
    .bind(&object_key)
    .execute(&state.db)
    .await?;

    let attachment: Attachment = sqlx::query_as("SELECT * FROM attachments WHERE id = ?")
        .bind(&id)
        .fetch_one(&state.db)
        .await?;

    tracing::info!(file = %attachment.file_name, size, by = %identity.email, "Attachment uploaded");

    Ok((StatusCode::CREATED, Json(attachment)))
}

pub async fn download(
    State(state): State<Arc<AppState>>,
    identity: Identity,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let attachment = load_attachment(&state, &id).await?;
    if !can_read(&state.db, &identity, &attachment).await? {
        return Err(ApiError::not_found("Attachment not found"));
    }

    let body = state.storage.get(&attachment.object_key).await?;

    Ok((
        [
            (header::CONTENT_TYPE, attachment.content_type.clone()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{}\"", attachment.file_name),
            ),
        ],
        body,
    ))
}

/// Delete an attachment (owner or admin). The database row goes first;
/// a failed object delete is logged and left for later cleanup.
pub async fn delete(
    State(state): State<Arc<AppState>>,
    identity: Identity,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    let attachment = load_attachment(&state, &id).await?;
    if attachment.owner_id != identity.user_id && identity.role_enum() != Some(Role::Admin) {
        return Err(ApiError::forbidden("You can only delete your own files"));
    }

    sqlx::query("DELETE FROM attachments WHERE id = ?")
        .bind(&attachment.id)
        .execute(&state.db)
        .await?;

    if let Err(err) = state.storage.delete(&attachment.object_key).await {
        tracing::warn!(key = %attachment.object_key, "Failed to delete stored object: {}", err);
    }

    Ok(StatusCode::NO_CONTENT)
}

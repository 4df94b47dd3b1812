//! File attachment metadata. Object bytes live in the configured
//! S3-compatible store; rows here only track ownership and linkage.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Attachment {
    pub id: String,
    pub owner_id: String,
    pub coursework_id: Option<String>,
    pub submission_id: Option<String>,
    pub file_name: String,
    pub content_type: String,
    pub size_bytes: i64,
    pub object_key: String,
    pub created_at: String,
}

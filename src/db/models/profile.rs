//! Teacher and student profile models (1:1 extensions of a user).

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct TeacherProfile {
    pub id: String,
    pub user_id: String,
    pub qualification: Option<String>,
    pub joined_on: Option<String>,
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct StudentProfile {
    pub id: String,
    pub user_id: String,
    pub student_no: Option<String>,
    pub gender: Option<String>,
    pub fees_paid: i64,
    pub created_at: String,
}

/// Directory row joining a profile with its user record.
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct TeacherWithUser {
    pub id: String,
    pub user_id: String,
    pub qualification: Option<String>,
    pub joined_on: Option<String>,
    pub name: String,
    pub email: String,
    pub phone: Option<String>,
}

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct StudentWithUser {
    pub id: String,
    pub user_id: String,
    pub student_no: Option<String>,
    pub gender: Option<String>,
    pub fees_paid: i64,
    pub name: String,
    pub email: String,
    pub phone: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CreateTeacherRequest {
    pub email: String,
    pub password: String,
    pub name: String,
    pub phone: Option<String>,
    pub qualification: Option<String>,
    pub joined_on: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CreateStudentRequest {
    pub email: String,
    pub password: String,
    pub name: String,
    pub phone: Option<String>,
    pub student_no: Option<String>,
    pub gender: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateTeacherRequest {
    pub name: Option<String>,
    pub phone: Option<String>,
    pub qualification: Option<String>,
    pub joined_on: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateStudentRequest {
    pub name: Option<String>,
    pub phone: Option<String>,
    pub student_no: Option<String>,
    pub gender: Option<String>,
    pub fees_paid: Option<bool>,
}

//! Course and enrollment models.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Course {
    pub id: String,
    pub title: String,
    pub description: Option<String>,
    /// Owning teacher profile; NULL means unassigned.
    pub teacher_id: Option<String>,
    pub tenure_start: Option<String>,
    pub tenure_end: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Enrollment {
    pub id: String,
    pub course_id: String,
    pub student_id: String,
    pub created_at: String,
}

#[derive(Debug, Deserialize)]
pub struct CreateCourseRequest {
    pub title: String,
    pub description: Option<String>,
    /// Ignored for teachers: a teacher always becomes the owner of a
    /// course they create.
    pub teacher_id: Option<String>,
    pub tenure_start: Option<String>,
    pub tenure_end: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateCourseRequest {
    pub title: Option<String>,
    pub description: Option<String>,
    pub teacher_id: Option<String>,
    pub tenure_start: Option<String>,
    pub tenure_end: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct EnrollRequest {
    pub student_id: String,
}

#[derive(Debug, Serialize)]
pub struct CourseDetail {
    #[serde(flatten)]
    pub course: Course,
    pub enrolled_count: i64,
}

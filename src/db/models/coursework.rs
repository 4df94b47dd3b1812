//! Assignment and quiz models.
//!
//! Assignments and quizzes share one table, distinguished by `kind`; they
//! have identical authoring, assignment, submission, and grading flows.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CourseworkKind {
    Assignment,
    Quiz,
}

impl CourseworkKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            CourseworkKind::Assignment => "assignment",
            CourseworkKind::Quiz => "quiz",
        }
    }
}

impl FromStr for CourseworkKind {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "assignment" => Ok(CourseworkKind::Assignment),
            "quiz" => Ok(CourseworkKind::Quiz),
            _ => Err(()),
        }
    }
}

impl fmt::Display for CourseworkKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Coursework {
    pub id: String,
    pub course_id: String,
    pub teacher_id: String,
    pub kind: String,
    pub title: String,
    /// Opaque rich-text payload, stored and forwarded verbatim.
    pub content: Option<String>,
    pub due_at: Option<String>,
    pub total_points: i64,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Submission {
    pub id: String,
    pub coursework_id: String,
    pub student_id: String,
    pub content: Option<String>,
    pub submitted_at: String,
    pub grade: Option<i64>,
    pub feedback: Option<String>,
    pub graded_at: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CreateCourseworkRequest {
    pub course_id: String,
    pub kind: String,
    pub title: String,
    pub content: Option<serde_json::Value>,
    pub due_at: Option<String>,
    pub total_points: Option<i64>,
    #[serde(default)]
    pub student_ids: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateCourseworkRequest {
    pub title: Option<String>,
    pub content: Option<serde_json::Value>,
    pub due_at: Option<String>,
    pub total_points: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct SubmitRequest {
    pub content: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
pub struct GradeRequest {
    pub student_id: String,
    pub grade: i64,
    pub feedback: Option<String>,
}

//! Assignment and quiz endpoints: authoring, student assignment,
//! submission, grading.
//!
//! Submissions are unique per (coursework, student); a re-submission
//! upserts over the previous one, so at most one row exists per pair.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use chrono::Utc;
use std::sync::Arc;
use uuid::Uuid;

use crate::db::{
    AssignStudentRequest, Course, Coursework, CourseworkKind, CreateCourseworkRequest,
    GradeRequest, Role, SubmitRequest, Submission, UpdateCourseworkRequest,
};
use crate::AppState;

use super::auth::Identity;
use super::error::{ApiError, ValidationErrorBuilder};
use super::guard::Guard;
use super::policy::Action;
use super::validation::{validate_points, validate_timestamp, validate_title, validate_uuid};

async fn load_coursework(state: &AppState, id: &str) -> Result<Coursework, ApiError> {
    validate_uuid(id, "coursework_id")
        .map_err(|e| ApiError::validation_field("coursework_id", e))?;
    let coursework: Option<Coursework> = sqlx::query_as("SELECT * FROM coursework WHERE id = ?")
        .bind(id)
        .fetch_optional(&state.db)
        .await?;
    coursework.ok_or_else(|| ApiError::not_found("Assignment not found"))
}

/// List the coursework of a course, scoped by role: students only see
/// items they are assigned to.
pub async fn list_for_course(
    State(state): State<Arc<AppState>>,
    identity: Identity,
    Path(course_id): Path<String>,
) -> Result<Json<Vec<Coursework>>, ApiError> {
    validate_uuid(&course_id, "course_id")
        .map_err(|e| ApiError::validation_field("course_id", e))?;
    let course: Option<Course> = sqlx::query_as("SELECT * FROM courses WHERE id = ?")
        .bind(&course_id)
        .fetch_optional(&state.db)
        .await?;
    let course = course.ok_or_else(|| ApiError::not_found("Course not found"))?;

    let guard = Guard::new(&state.db, &identity);
    guard.course(&course, Action::Read).await?;

    let items = match identity.role_enum() {
        Some(Role::Student) => {
            let profile = guard.require_student_profile().await?;
            sqlx::query_as(
                "SELECT cw.* FROM coursework cw \
                 INNER JOIN coursework_students cs ON cw.id = cs.coursework_id \
                 WHERE cw.course_id = ? AND cs.student_id = ? \
                 ORDER BY cw.due_at ASC",
            )
            .bind(&course.id)
            .bind(&profile.id)
            .fetch_all(&state.db)
            .await?
        }
        _ => {
            sqlx::query_as("SELECT * FROM coursework WHERE course_id = ? ORDER BY due_at ASC")
                .bind(&course.id)
                .fetch_all(&state.db)
                .await?
        }
    };

    Ok(Json(items))
}

pub async fn get_coursework(
    State(state): State<Arc<AppState>>,
    identity: Identity,
    Path(id): Path<String>,
) -> Result<Json<Coursework>, ApiError> {
    let coursework = load_coursework(&state, &id).await?;
    Guard::new(&state.db, &identity)
        .coursework(&coursework, Action::Read)
        .await?;
    Ok(Json(coursework))
}

/// Author an assignment or quiz for a course.
///
/// The authoring teacher is the course owner; an admin may author on the
/// owner's behalf. The rich-text content payload is schema-checked for
/// shape only and stored verbatim.
pub async fn create_coursework(
    State(state): State<Arc<AppState>>,
    identity: Identity,
    Json(req): Json<CreateCourseworkRequest>,
) -> Result<(StatusCode, Json<Coursework>), ApiError> {
    let mut errors = ValidationErrorBuilder::new();
    if let Err(e) = validate_title(&req.title) {
        errors.add("title", e);
    }
    if let Err(e) = validate_uuid(&req.course_id, "course_id") {
        errors.add("course_id", e);
    }
    if req.kind.parse::<CourseworkKind>().is_err() {
        errors.add("kind", "Kind must be one of: assignment, quiz");
    }
    if let Some(ref due_at) = req.due_at {
        if let Err(e) = validate_timestamp(due_at, "due_at") {
            errors.add("due_at", e);
        }
    }
    if let Some(points) = req.total_points {
        if let Err(e) = validate_points(points) {
            errors.add("total_points", e);
        }
    }
    errors.finish()?;

    let course: Option<Course> = sqlx::query_as("SELECT * FROM courses WHERE id = ?")
        .bind(&req.course_id)
        .fetch_optional(&state.db)
        .await?;
    let course = course.ok_or_else(|| ApiError::not_found("Course not found"))?;

    let guard = Guard::new(&state.db, &identity);
    let teacher_id = match guard.coursework_create(&course).await? {
        Some(profile) => profile.id,
        None => course.teacher_id.clone().ok_or_else(|| {
            ApiError::invalid_request("Course has no assigned teacher to author for")
        })?,
    };

    let id = Uuid::new_v4().to_string();
    let content = req.content.map(|v| v.to_string());
    sqlx::query(
        "INSERT INTO coursework \
         (id, course_id, teacher_id, kind, title, content, due_at, total_points) \
         VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(&id)
    .bind(&course.id)
    .bind(&teacher_id)
    .bind(&req.kind)
    .bind(&req.title)
    .bind(&content)
    .bind(&req.due_at)
    .bind(req.total_points.unwrap_or(100))
    .execute(&state.db)
    .await?;

    for student_id in &req.student_ids {
        sqlx::query(
            "INSERT OR IGNORE INTO coursework_students (id, coursework_id, student_id) \
             VALUES (?, ?, ?)",
        )
        .bind(Uuid::new_v4().to_string())
        .bind(&id)
        .bind(student_id)
        .execute(&state.db)
        .await?;
    }

    let coursework: Coursework = sqlx::query_as("SELECT * FROM coursework WHERE id = ?")
        .bind(&id)
        .fetch_one(&state.db)
        .await?;

    tracing::info!(kind = %coursework.kind, title = %coursework.title, by = %identity.email, "Coursework created");

    Ok((StatusCode::CREATED, Json(coursework)))
}

pub async fn update_coursework(
    State(state): State<Arc<AppState>>,
    identity: Identity,
    Path(id): Path<String>,
    Json(req): Json<UpdateCourseworkRequest>,
) -> Result<Json<Coursework>, ApiError> {
    let coursework = load_coursework(&state, &id).await?;
    Guard::new(&state.db, &identity)
        .coursework(&coursework, Action::Update)
        .await?;

    if let Some(ref title) = req.title {
        validate_title(title).map_err(|e| ApiError::validation_field("title", e))?;
    }
    if let Some(points) = req.total_points {
        validate_points(points).map_err(|e| ApiError::validation_field("total_points", e))?;
    }

    let content = req.content.map(|v| v.to_string());
    sqlx::query(
        "UPDATE coursework SET \
         title = COALESCE(?, title), \
         content = COALESCE(?, content), \
         due_at = COALESCE(?, due_at), \
         total_points = COALESCE(?, total_points), \
         updated_at = datetime('now') \
         WHERE id = ?",
    )
    .bind(&req.title)
    .bind(&content)
    .bind(&req.due_at)
    .bind(req.total_points)
    .bind(&id)
    .execute(&state.db)
    .await?;

    let coursework: Coursework = sqlx::query_as("SELECT * FROM coursework WHERE id = ?")
        .bind(&id)
        .fetch_one(&state.db)
        .await?;

    Ok(Json(coursework))
}

pub async fn delete_coursework(
    State(state): State<Arc<AppState>>,
    identity: Identity,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    let coursework = load_coursework(&state, &id).await?;
    Guard::new(&state.db, &identity)
        .coursework(&coursework, Action::Delete)
        .await?;

    sqlx::query("DELETE FROM coursework WHERE id = ?")
        .bind(&id)
        .execute(&state.db)
        .await?;

    Ok(StatusCode::NO_CONTENT)
}

/// Assign a student to an assignment or quiz.
pub async fn assign_student(
    State(state): State<Arc<AppState>>,
    identity: Identity,
    Path(id): Path<String>,
    Json(req): Json<AssignStudentRequest>,
) -> Result<StatusCode, ApiError> {
    let coursework = load_coursework(&state, &id).await?;
    Guard::new(&state.db, &identity)
        .coursework(&coursework, Action::Update)
        .await?;

    let student: Option<(String,)> = sqlx::query_as("SELECT id FROM student_profiles WHERE id = ?")
        .bind(&req.student_id)
        .fetch_optional(&state.db)
        .await?;
    if student.is_none() {
        return Err(ApiError::invalid_request("Student does not exist"));
    }

    sqlx::query(
        "INSERT OR IGNORE INTO coursework_students (id, coursework_id, student_id) VALUES (?, ?, ?)",
    )
    .bind(Uuid::new_v4().to_string())
    .bind(&coursework.id)
    .bind(&req.student_id)
    .execute(&state.db)
    .await?;

    Ok(StatusCode::CREATED)
}

/// Submit work. Only an assigned student may submit; a second submission
/// overwrites the first (last write wins at the storage layer).
pub async fn submit(
    State(state): State<Arc<AppState>>,
    identity: Identity,
    Path(id): Path<String>,
    Json(req): Json<SubmitRequest>,
) -> Result<Json<Submission>, ApiError> {
    let coursework = load_coursework(&state, &id).await?;
    let profile = Guard::new(&state.db, &identity)
        .submission(&coursework)
        .await?;

    let content = req.content.map(|v| v.to_string());
    let now = Utc::now().to_rfc3339();
    sqlx::query(
        "INSERT INTO submissions (id, coursework_id, student_id, content, submitted_at) \
         VALUES (?, ?, ?, ?, ?) \
         ON CONFLICT (coursework_id, student_id) DO UPDATE SET \
         content = excluded.content, \
         submitted_at = excluded.submitted_at",
    )
    .bind(Uuid::new_v4().to_string())
    .bind(&coursework.id)
    .bind(&profile.id)
    .bind(&content)
    .bind(&now)
    .execute(&state.db)
    .await?;

    let submission: Submission =
        sqlx::query_as("SELECT * FROM submissions WHERE coursework_id = ? AND student_id = ?")
            .bind(&coursework.id)
            .bind(&profile.id)
            .fetch_one(&state.db)
            .await?;

    Ok(Json(submission))
}

/// List submissions for grading (owning teacher or admin).
pub async fn list_submissions(
    State(state): State<Arc<AppState>>,
    identity: Identity,
    Path(id): Path<String>,
) -> Result<Json<Vec<Submission>>, ApiError> {
    let coursework = load_coursework(&state, &id).await?;
    Guard::new(&state.db, &identity)
        .coursework(&coursework, Action::Grade)
        .await?;

    let submissions: Vec<Submission> =
        sqlx::query_as("SELECT * FROM submissions WHERE coursework_id = ? ORDER BY submitted_at ASC")
            .bind(&coursework.id)
            .fetch_all(&state.db)
            .await?;

    Ok(Json(submissions))
}

/// The caller's own submission, if any.
pub async fn my_submission(
    State(state): State<Arc<AppState>>,
    identity: Identity,
    Path(id): Path<String>,
) -> Result<Json<Submission>, ApiError> {
    let coursework = load_coursework(&state, &id).await?;
    let guard = Guard::new(&state.db, &identity);
    guard.coursework(&coursework, Action::Read).await?;
    let profile = guard.require_student_profile().await?;

    let submission: Option<Submission> =
        sqlx::query_as("SELECT * FROM submissions WHERE coursework_id = ? AND student_id = ?")
            .bind(&coursework.id)
            .bind(&profile.id)
            .fetch_optional(&state.db)
            .await?;

    submission
        .map(Json)
        .ok_or_else(|| ApiError::not_found("No submission yet"))
}

/// Grade a student's submission.
pub async fn grade(
    State(state): State<Arc<AppState>>,
    identity: Identity,
    Path(id): Path<String>,
    Json(req): Json<GradeRequest>,
) -> Result<Json<Submission>, ApiError> {
    let coursework = load_coursework(&state, &id).await?;
    Guard::new(&state.db, &identity)
        .coursework(&coursework, Action::Grade)
        .await?;

    if req.grade < 0 || req.grade > coursework.total_points {
        return Err(ApiError::validation_field(
            "grade",
            format!("Grade must be between 0 and {}", coursework.total_points),
        ));
    }

    let updated = sqlx::query(
        "UPDATE submissions SET grade = ?, feedback = ?, graded_at = datetime('now') \
         WHERE coursework_id = ? AND student_id = ?",
    )
    .bind(req.grade)
    .bind(&req.feedback)
    .bind(&coursework.id)
    .bind(&req.student_id)
    .execute(&state.db)
    .await?;

    if updated.rows_affected() == 0 {
        return Err(ApiError::not_found("No submission to grade"));
    }

    let submission: Submission =
        sqlx::query_as("SELECT * FROM submissions WHERE coursework_id = ? AND student_id = ?")
            .bind(&coursework.id)
            .bind(&req.student_id)
            .fetch_one(&state.db)
            .await?;

    Ok(Json(submission))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{self, DbPool};

    async fn seed(pool: &DbPool) {
        sqlx::query(
            "INSERT INTO users (id, email, password_hash, name, role) \
             VALUES ('u-t', 't@example.com', 'x', 'T', 'teacher'), \
                    ('u-s', 's@example.com', 'x', 'S', 'student')",
        )
        .execute(pool)
        .await
        .unwrap();
        sqlx::query("INSERT INTO teacher_profiles (id, user_id) VALUES ('tp1', 'u-t')")
            .execute(pool)
            .await
            .unwrap();
        sqlx::query("INSERT INTO student_profiles (id, user_id) VALUES ('sp1', 'u-s')")
            .execute(pool)
            .await
            .unwrap();
        sqlx::query("INSERT INTO courses (id, title, teacher_id) VALUES ('c1', 'Algebra', 'tp1')")
            .execute(pool)
            .await
            .unwrap();
        sqlx::query(
            "INSERT INTO coursework (id, course_id, teacher_id, kind, title) \
             VALUES ('cw1', 'c1', 'tp1', 'assignment', 'HW 1')",
        )
        .execute(pool)
        .await
        .unwrap();
        sqlx::query(
            "INSERT INTO coursework_students (id, coursework_id, student_id) \
             VALUES ('cws1', 'cw1', 'sp1')",
        )
        .execute(pool)
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn test_resubmission_overwrites_single_row() {
        let pool = db::init_in_memory().await.unwrap();
        seed(&pool).await;

        for content in ["first draft", "second draft"] {
            sqlx::query(
                "INSERT INTO submissions (id, coursework_id, student_id, content) \
                 VALUES (?, 'cw1', 'sp1', ?) \
                 ON CONFLICT (coursework_id, student_id) DO UPDATE SET \
                 content = excluded.content, submitted_at = excluded.submitted_at",
            )
            .bind(uuid::Uuid::new_v4().to_string())
            .bind(content)
            .execute(&pool)
            .await
            .unwrap();
        }

        let rows: Vec<Submission> = sqlx::query_as("SELECT * FROM submissions")
            .fetch_all(&pool)
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].content.as_deref(), Some("second draft"));
    }

    #[tokio::test]
    async fn test_unique_pair_constraint_on_assignment_relation() {
        let pool = db::init_in_memory().await.unwrap();
        seed(&pool).await;

        // Assigning the same student twice keeps a single relation row
        sqlx::query(
            "INSERT OR IGNORE INTO coursework_students (id, coursework_id, student_id) \
             VALUES ('cws2', 'cw1', 'sp1')",
        )
        .execute(&pool)
        .await
        .unwrap();

        let count: (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM coursework_students WHERE coursework_id = 'cw1' AND student_id = 'sp1'",
        )
        .fetch_one(&pool)
        .await
        .unwrap();
        assert_eq!(count.0, 1);
    }
}

//! Course endpoints: CRUD, enrollment, roster.
//!
//! List visibility is role-scoped at the query level (admin all, teacher
//! own, student enrolled); single-resource access goes through the guard.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use std::sync::Arc;
use uuid::Uuid;

use crate::db::{
    Course, CourseDetail, CreateCourseRequest, EnrollRequest, Role, StudentWithUser,
    UpdateCourseRequest,
};
use crate::AppState;

use super::auth::Identity;
use super::error::{ApiError, ValidationErrorBuilder};
use super::guard::Guard;
use super::policy::Action;
use super::validation::{validate_title, validate_uuid};

async fn load_course(state: &AppState, id: &str) -> Result<Course, ApiError> {
    validate_uuid(id, "course_id").map_err(|e| ApiError::validation_field("course_id", e))?;
    let course: Option<Course> = sqlx::query_as("SELECT * FROM courses WHERE id = ?")
        .bind(id)
        .fetch_optional(&state.db)
        .await?;
    course.ok_or_else(|| ApiError::not_found("Course not found"))
}

/// List courses visible to the caller.
pub async fn list_courses(
    State(state): State<Arc<AppState>>,
    identity: Identity,
) -> Result<Json<Vec<Course>>, ApiError> {
    let guard = Guard::new(&state.db, &identity);

    let courses = match identity.role_enum() {
        Some(Role::Admin) => {
            sqlx::query_as("SELECT * FROM courses ORDER BY created_at DESC")
                .fetch_all(&state.db)
                .await?
        }
        Some(Role::Teacher) => {
            let profile = guard.require_teacher_profile().await?;
            sqlx::query_as("SELECT * FROM courses WHERE teacher_id = ? ORDER BY created_at DESC")
                .bind(&profile.id)
                .fetch_all(&state.db)
                .await?
        }
        Some(Role::Student) => {
            let profile = guard.require_student_profile().await?;
            sqlx::query_as(
                "SELECT c.* FROM courses c \
                 INNER JOIN enrollments e ON c.id = e.course_id \
                 WHERE e.student_id = ? ORDER BY c.created_at DESC",
            )
            .bind(&profile.id)
            .fetch_all(&state.db)
            .await?
        }
        None => return Err(ApiError::forbidden("Access denied")),
    };

    Ok(Json(courses))
}

/// Get one course with its enrollment count.
pub async fn get_course(
    State(state): State<Arc<AppState>>,
    identity: Identity,
    Path(id): Path<String>,
) -> Result<Json<CourseDetail>, ApiError> {
    let course = load_course(&state, &id).await?;
    Guard::new(&state.db, &identity)
        .course(&course, Action::Read)
        .await?;

    let count: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM enrollments WHERE course_id = ?")
        .bind(&course.id)
        .fetch_one(&state.db)
        .await?;

    Ok(Json(CourseDetail {
        course,
        enrolled_count: count.0,
    }))
}

/// Create a course. A teacher creating a course becomes its owner.
pub async fn create_course(
    State(state): State<Arc<AppState>>,
    identity: Identity,
    Json(req): Json<CreateCourseRequest>,
) -> Result<(StatusCode, Json<Course>), ApiError> {
    let mut errors = ValidationErrorBuilder::new();
    if let Err(e) = validate_title(&req.title) {
        errors.add("title", e);
    }
    if let Some(ref teacher_id) = req.teacher_id {
        if let Err(e) = validate_uuid(teacher_id, "teacher_id") {
            errors.add("teacher_id", e);
        }
    }
    errors.finish()?;

    let guard = Guard::new(&state.db, &identity);
    let own_profile = guard.course_create().await?;

    let teacher_id = match own_profile {
        Some(profile) => Some(profile.id),
        None => req.teacher_id,
    };

    if let Some(ref teacher_id) = teacher_id {
        let exists: Option<(String,)> = sqlx::query_as("SELECT id FROM teacher_profiles WHERE id = ?")
            .bind(teacher_id)
            .fetch_optional(&state.db)
            .await?;
        if exists.is_none() {
            return Err(ApiError::invalid_request("Assigned teacher does not exist"));
        }
    }

    let id = Uuid::new_v4().to_string();
    sqlx::query(
        "INSERT INTO courses (id, title, description, teacher_id, tenure_start, tenure_end) \
         VALUES (?, ?, ?, ?, ?, ?)",
    )
    .bind(&id)
    .bind(&req.title)
    .bind(&req.description)
    .bind(&teacher_id)
    .bind(&req.tenure_start)
    .bind(&req.tenure_end)
    .execute(&state.db)
    .await?;

    let course: Course = sqlx::query_as("SELECT * FROM courses WHERE id = ?")
        .bind(&id)
        .fetch_one(&state.db)
        .await?;

    tracing::info!(course = %course.title, by = %identity.email, "Course created");

    Ok((StatusCode::CREATED, Json(course)))
}

/// Update a course (admin only per policy).
pub async fn update_course(
    State(state): State<Arc<AppState>>,
    identity: Identity,
    Path(id): Path<String>,
    Json(req): Json<UpdateCourseRequest>,
) -> Result<Json<Course>, ApiError> {
    let course = load_course(&state, &id).await?;
    Guard::new(&state.db, &identity)
        .course(&course, Action::Update)
        .await?;

    if let Some(ref title) = req.title {
        validate_title(title).map_err(|e| ApiError::validation_field("title", e))?;
    }

    sqlx::query(
        "UPDATE courses SET \
         title = COALESCE(?, title), \
         description = COALESCE(?, description), \
         teacher_id = COALESCE(?, teacher_id), \
         tenure_start = COALESCE(?, tenure_start), \
         tenure_end = COALESCE(?, tenure_end), \
         updated_at = datetime('now') \
         WHERE id = ?",
    )
    .bind(&req.title)
    .bind(&req.description)
    .bind(&req.teacher_id)
    .bind(&req.tenure_start)
    .bind(&req.tenure_end)
    .bind(&id)
    .execute(&state.db)
    .await?;

    let course: Course = sqlx::query_as("SELECT * FROM courses WHERE id = ?")
        .bind(&id)
        .fetch_one(&state.db)
        .await?;

    Ok(Json(course))
}

/// Delete a course (admin only per policy). Enrollments, sessions, and
/// coursework cascade at the store.
pub async fn delete_course(
    State(state): State<Arc<AppState>>,
    identity: Identity,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    let course = load_course(&state, &id).await?;
    Guard::new(&state.db, &identity)
        .course(&course, Action::Delete)
        .await?;

    sqlx::query("DELETE FROM courses WHERE id = ?")
        .bind(&id)
        .execute(&state.db)
        .await?;

    tracing::info!(course_id = %id, by = %identity.email, "Course deleted");

    Ok(StatusCode::NO_CONTENT)
}

/// Enroll a student in a course. Enrollment is course management, gated
/// like an update.
pub async fn enroll_student(
    State(state): State<Arc<AppState>>,
    identity: Identity,
    Path(id): Path<String>,
    Json(req): Json<EnrollRequest>,
) -> Result<StatusCode, ApiError> {
    let course = load_course(&state, &id).await?;
    Guard::new(&state.db, &identity)
        .course(&course, Action::Update)
        .await?;

    let student: Option<(String,)> = sqlx::query_as("SELECT id FROM student_profiles WHERE id = ?")
        .bind(&req.student_id)
        .fetch_optional(&state.db)
        .await?;
    if student.is_none() {
        return Err(ApiError::invalid_request("Student does not exist"));
    }

    // Unique (course_id, student_id); enrolling twice is a no-op
    sqlx::query(
        "INSERT OR IGNORE INTO enrollments (id, course_id, student_id) VALUES (?, ?, ?)",
    )
    .bind(Uuid::new_v4().to_string())
    .bind(&course.id)
    .bind(&req.student_id)
    .execute(&state.db)
    .await?;

    Ok(StatusCode::CREATED)
}

/// Remove a student from a course.
pub async fn unenroll_student(
    State(state): State<Arc<AppState>>,
    identity: Identity,
    Path((id, student_id)): Path<(String, String)>,
) -> Result<StatusCode, ApiError> {
    let course = load_course(&state, &id).await?;
    Guard::new(&state.db, &identity)
        .course(&course, Action::Update)
        .await?;

    sqlx::query("DELETE FROM enrollments WHERE course_id = ? AND student_id = ?")
        .bind(&course.id)
        .bind(&student_id)
        .execute(&state.db)
        .await?;

    Ok(StatusCode::NO_CONTENT)
}

/// List the enrolled students of a course. Visible to whoever can read
/// the course; a teacher therefore only sees rosters of courses they own.
pub async fn course_roster(
    State(state): State<Arc<AppState>>,
    identity: Identity,
    Path(id): Path<String>,
) -> Result<Json<Vec<StudentWithUser>>, ApiError> {
    let course = load_course(&state, &id).await?;
    Guard::new(&state.db, &identity)
        .course(&course, Action::Read)
        .await?;

    let roster: Vec<StudentWithUser> = sqlx::query_as(
        "SELECT sp.id, sp.user_id, sp.student_no, sp.gender, sp.fees_paid, \
                u.name, u.email, u.phone \
         FROM student_profiles sp \
         INNER JOIN enrollments e ON e.student_id = sp.id \
         INNER JOIN users u ON u.id = sp.user_id \
         WHERE e.course_id = ? \
         ORDER BY u.name ASC",
    )
    .bind(&course.id)
    .fetch_all(&state.db)
    .await?;

    Ok(Json(roster))
}

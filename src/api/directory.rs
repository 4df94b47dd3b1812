//! Admin directory: create and manage teacher and student accounts.
//!
//! Every endpoint here is admin-only. Account creation writes the user
//! row and its role profile in one transaction so a failure leaves no
//! half-created account behind.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use std::sync::Arc;
use uuid::Uuid;

use crate::db::{
    CreateStudentRequest, CreateTeacherRequest, StudentWithUser, TeacherWithUser,
    UpdateStudentRequest, UpdateTeacherRequest,
};
use crate::AppState;

use super::auth::{hash_password, Identity};
use super::error::{ApiError, ValidationErrorBuilder};
use super::guard::Guard;
use super::validation::{validate_email, validate_name, validate_password};

fn validate_account_fields(email: &str, password: &str, name: &str) -> Result<(), ApiError> {
    let mut errors = ValidationErrorBuilder::new();
    if let Err(e) = validate_email(email) {
        errors.add("email", e);
    }
    if let Err(e) = validate_password(password) {
        errors.add("password", e);
    }
    if let Err(e) = validate_name(name) {
        errors.add("name", e);
    }
    errors.finish()
}

pub async fn list_teachers(
    State(state): State<Arc<AppState>>,
    identity: Identity,
) -> Result<Json<Vec<TeacherWithUser>>, ApiError> {
    Guard::new(&state.db, &identity).directory()?;

    let teachers: Vec<TeacherWithUser> = sqlx::query_as(
        "SELECT tp.id, tp.user_id, tp.qualification, tp.joined_on, u.name, u.email, u.phone \
         FROM teacher_profiles tp \
         INNER JOIN users u ON u.id = tp.user_id \
         ORDER BY u.name ASC",
    )
    .fetch_all(&state.db)
    .await?;

    Ok(Json(teachers))
}

pub async fn get_teacher(
    State(state): State<Arc<AppState>>,
    identity: Identity,
    Path(id): Path<String>,
) -> Result<Json<TeacherWithUser>, ApiError> {
    Guard::new(&state.db, &identity).directory()?;

    let teacher: Option<TeacherWithUser> = sqlx::query_as(
        "SELECT tp.id, tp.user_id, tp.qualification, tp.joined_on, u.name, u.email, u.phone \
         FROM teacher_profiles tp \
         INNER JOIN users u ON u.id = tp.user_id \
         WHERE tp.id = ?",
    )
    .bind(&id)
    .fetch_optional(&state.db)
    .await?;

    teacher
        .map(Json)
        .ok_or_else(|| ApiError::not_found("Teacher not found"))
}

pub async fn create_teacher(
    State(state): State<Arc<AppState>>,
    identity: Identity,
    Json(req): Json<CreateTeacherRequest>,
) -> Result<(StatusCode, Json<TeacherWithUser>), ApiError> {
    Guard::new(&state.db, &identity).directory()?;
    validate_account_fields(&req.email, &req.password, &req.name)?;

    let existing: Option<(String,)> = sqlx::query_as("SELECT id FROM users WHERE email = ?")
        .bind(&req.email)
        .fetch_optional(&state.db)
        .await?;
    if existing.is_some() {
        return Err(ApiError::conflict("An account with this email already exists"));
    }

    let password_hash =
        hash_password(&req.password).map_err(|_| ApiError::internal("Failed to hash password"))?;
    let user_id = Uuid::new_v4().to_string();
    let profile_id = Uuid::new_v4().to_string();

    let mut tx = state.db.begin().await?;
    sqlx::query(
        "INSERT INTO users (id, email, password_hash, name, phone, role) \
         VALUES (?, ?, ?, ?, ?, 'teacher')",
    )
    .bind(&user_id)
    .bind(&req.email)
    .bind(&password_hash)
    .bind(&req.name)
    .bind(&req.phone)
    .execute(&mut *tx)
    .await?;
    sqlx::query(
        "INSERT INTO teacher_profiles (id, user_id, qualification, joined_on) VALUES (?, ?, ?, ?)",
    )
    .bind(&profile_id)
    .bind(&user_id)
    .bind(&req.qualification)
    .bind(&req.joined_on)
    .execute(&mut *tx)
    .await?;
    tx.commit().await?;

    tracing::info!(email = %req.email, by = %identity.email, "Teacher account created");

    let teacher: TeacherWithUser = sqlx::query_as(
        "SELECT tp.id, tp.user_id, tp.qualification, tp.joined_on, u.name, u.email, u.phone \
         FROM teacher_profiles tp \
         INNER JOIN users u ON u.id = tp.user_id \
         WHERE tp.id = ?",
    )
    .bind(&profile_id)
    .fetch_one(&state.db)
    .await?;

    Ok((StatusCode::CREATED, Json(teacher)))
}

pub async fn update_teacher(
    State(state): State<Arc<AppState>>,
    identity: Identity,
    Path(id): Path<String>,
    Json(req): Json<UpdateTeacherRequest>,
) -> Result<Json<TeacherWithUser>, ApiError> {
    Guard::new(&state.db, &identity).directory()?;

    let profile: Option<(String,)> =
        sqlx::query_as("SELECT user_id FROM teacher_profiles WHERE id = ?")
            .bind(&id)
            .fetch_optional(&state.db)
            .await?;
    let (user_id,) = profile.ok_or_else(|| ApiError::not_found("Teacher not found"))?;

    if let Some(ref name) = req.name {
        validate_name(name).map_err(|e| ApiError::validation_field("name", e))?;
    }

    let mut tx = state.db.begin().await?;
    sqlx::query(
        "UPDATE users SET name = COALESCE(?, name), phone = COALESCE(?, phone), \
         updated_at = datetime('now') WHERE id = ?",
    )
    .bind(&req.name)
    .bind(&req.phone)
    .bind(&user_id)
    .execute(&mut *tx)
    .await?;
    sqlx::query(
        "UPDATE teacher_profiles SET qualification = COALESCE(?, qualification), \
         joined_on = COALESCE(?, joined_on) WHERE id = ?",
    )
    .bind(&req.qualification)
    .bind(&req.joined_on)
    .bind(&id)
    .execute(&mut *tx)
    .await?;
    tx.commit().await?;

    let teacher: TeacherWithUser = sqlx::query_as(
        "SELECT tp.id, tp.user_id, tp.qualification, tp.joined_on, u.name, u.email, u.phone \
         FROM teacher_profiles tp \
         INNER JOIN users u ON u.id = tp.user_id \
         WHERE tp.id = ?",
    )
    .bind(&id)
    .fetch_one(&state.db)
    .await?;

    Ok(Json(teacher))
}

/// Delete a teacher account. Deleting the user row cascades the profile
/// and their auth sessions; owned courses fall back to unassigned.
pub async fn delete_teacher(
    State(state): State<Arc<AppState>>,
    identity: Identity,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    Guard::new(&state.db, &identity).directory()?;

    let profile: Option<(String,)> =
        sqlx::query_as("SELECT user_id FROM teacher_profiles WHERE id = ?")
            .bind(&id)
            .fetch_optional(&state.db)
            .await?;
    let (user_id,) = profile.ok_or_else(|| ApiError::not_found("Teacher not found"))?;

    sqlx::query("DELETE FROM users WHERE id = ?")
        .bind(&user_id)
        .execute(&state.db)
        .await?;

    tracing::info!(teacher_id = %id, by = %identity.email, "Teacher account deleted");

    Ok(StatusCode::NO_CONTENT)
}

pub async fn list_students(
    State(state): State<Arc<AppState>>,
    identity: Identity,
) -> Result<Json<Vec<StudentWithUser>>, ApiError> {
    Guard::new(&state.db, &identity).directory()?;

    let students: Vec<StudentWithUser> = sqlx::query_as(
        "SELECT sp.id, sp.user_id, sp.student_no, sp.gender, sp.fees_paid, \
                u.name, u.email, u.phone \
         FROM student_profiles sp \
         INNER JOIN users u ON u.id = sp.user_id \
         ORDER BY u.name ASC",
    )
    .fetch_all(&state.db)
    .await?;

    Ok(Json(students))
}

pub async fn get_student(
    State(state): State<Arc<AppState>>,
    identity: Identity,
    Path(id): Path<String>,
) -> Result<Json<StudentWithUser>, ApiError> {
    Guard::new(&state.db, &identity).directory()?;

    let student: Option<StudentWithUser> = sqlx::query_as(
        "SELECT sp.id, sp.user_id, sp.student_no, sp.gender, sp.fees_paid, \
                u.name, u.email, u.phone \
         FROM student_profiles sp \
         INNER JOIN users u ON u.id = sp.user_id \
         WHERE sp.id = ?",
    )
    .bind(&id)
    .fetch_optional(&state.db)
    .await?;

    student
        .map(Json)
        .ok_or_else(|| ApiError::not_found("Student not found"))
}

pub async fn create_student(
    State(state): State<Arc<AppState>>,
    identity: Identity,
    Json(req): Json<CreateStudentRequest>,
) -> Result<(StatusCode, Json<StudentWithUser>), ApiError> {
    Guard::new(&state.db, &identity).directory()?;
    validate_account_fields(&req.email, &req.password, &req.name)?;

    let existing: Option<(String,)> = sqlx::query_as("SELECT id FROM users WHERE email = ?")
        .bind(&req.email)
        .fetch_optional(&state.db)
        .await?;
    if existing.is_some() {
        return Err(ApiError::conflict("An account with this email already exists"));
    }

    let password_hash =
        hash_password(&req.password).map_err(|_| ApiError::internal("Failed to hash password"))?;
    let user_id = Uuid::new_v4().to_string();
    let profile_id = Uuid::new_v4().to_string();

    let mut tx = state.db.begin().await?;
    sqlx::query(
        "INSERT INTO users (id, email, password_hash, name, phone, role) \
         VALUES (?, ?, ?, ?, ?, 'student')",
    )
    .bind(&user_id)
    .bind(&req.email)
    .bind(&password_hash)
    .bind(&req.name)
    .bind(&req.phone)
    .execute(&mut *tx)
    .await?;
    sqlx::query(
        "INSERT INTO student_profiles (id, user_id, student_no, gender) VALUES (?, ?, ?, ?)",
    )
    .bind(&profile_id)
    .bind(&user_id)
    .bind(&req.student_no)
    .bind(&req.gender)
    .execute(&mut *tx)
    .await?;
    tx.commit().await?;

    tracing::info!(email = %req.email, by = %identity.email, "Student account created");

    let student: StudentWithUser = sqlx::query_as(
        "SELECT sp.id, sp.user_id, sp.student_no, sp.gender, sp.fees_paid, \
                u.name, u.email, u.phone \
         FROM student_profiles sp \
         INNER JOIN users u ON u.id = sp.user_id \
         WHERE sp.id = ?",
    )
    .bind(&profile_id)
    .fetch_one(&state.db)
    .await?;

    Ok((StatusCode::CREATED, Json(student)))
}

pub async fn update_student(
    State(state): State<Arc<AppState>>,
    identity: Identity,
    Path(id): Path<String>,
    Json(req): Json<UpdateStudentRequest>,
) -> Result<Json<StudentWithUser>, ApiError> {
    Guard::new(&state.db, &identity).directory()?;

    let profile: Option<(String,)> =
        sqlx::query_as("SELECT user_id FROM student_profiles WHERE id = ?")
            .bind(&id)
            .fetch_optional(&state.db)
            .await?;
    let (user_id,) = profile.ok_or_else(|| ApiError::not_found("Student not found"))?;

    if let Some(ref name) = req.name {
        validate_name(name).map_err(|e| ApiError::validation_field("name", e))?;
    }

    let mut tx = state.db.begin().await?;
    sqlx::query(
        "UPDATE users SET name = COALESCE(?, name), phone = COALESCE(?, phone), \
         updated_at = datetime('now') WHERE id = ?",
    )
    .bind(&req.name)
    .bind(&req.phone)
    .bind(&user_id)
    .execute(&mut *tx)
    .await?;
    sqlx::query(
        "UPDATE student_profiles SET student_no = COALESCE(?, student_no), \
         gender = COALESCE(?, gender), fees_paid = COALESCE(?, fees_paid) WHERE id = ?",
    )
    .bind(&req.student_no)
    .bind(&req.gender)
    .bind(req.fees_paid.map(|b| b as i64))
    .bind(&id)
    .execute(&mut *tx)
    .await?;
    tx.commit().await?;

    let student: StudentWithUser = sqlx::query_as(
        "SELECT sp.id, sp.user_id, sp.student_no, sp.gender, sp.fees_paid, \
                u.name, u.email, u.phone \
         FROM student_profiles sp \
         INNER JOIN users u ON u.id = sp.user_id \
         WHERE sp.id = ?",
    )
    .bind(&id)
    .fetch_one(&state.db)
    .await?;

    Ok(Json(student))
}

pub async fn delete_student(
    State(state): State<Arc<AppState>>,
    identity: Identity,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    Guard::new(&state.db, &identity).directory()?;

    let profile: Option<(String,)> =
        sqlx::query_as("SELECT user_id FROM student_profiles WHERE id = ?")
            .bind(&id)
            .fetch_optional(&state.db)
            .await?;
    let (user_id,) = profile.ok_or_else(|| ApiError::not_found("Student not found"))?;

    sqlx::query("DELETE FROM users WHERE id = ?")
        .bind(&user_id)
        .execute(&state.db)
        .await?;

    tracing::info!(student_id = %id, by = %identity.email, "Student account deleted");

    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;

    #[tokio::test]
    async fn test_deleting_user_cascades_profile() {
        let pool = db::init_in_memory().await.unwrap();
        sqlx::query(
            "INSERT INTO users (id, email, password_hash, name, role) \
             VALUES ('u1', 't@example.com', 'x', 'T', 'teacher')",
        )
        .execute(&pool)
        .await
        .unwrap();
        sqlx::query("INSERT INTO teacher_profiles (id, user_id) VALUES ('tp1', 'u1')")
            .execute(&pool)
            .await
            .unwrap();

        sqlx::query("DELETE FROM users WHERE id = 'u1'")
            .execute(&pool)
            .await
            .unwrap();

        let remaining: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM teacher_profiles")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(remaining.0, 0);
    }

    #[tokio::test]
    async fn test_email_is_unique_case_insensitively() {
        let pool = db::init_in_memory().await.unwrap();
        sqlx::query(
            "INSERT INTO users (id, email, password_hash, name, role) \
             VALUES ('u1', 'Same@Example.com', 'x', 'A', 'student')",
        )
        .execute(&pool)
        .await
        .unwrap();

        let dup = sqlx::query(
            "INSERT INTO users (id, email, password_hash, name, role) \
             VALUES ('u2', 'same@example.com', 'x', 'B', 'student')",
        )
        .execute(&pool)
        .await;
        assert!(dup.is_err());
    }
}

//! Scheduled class session endpoints and the join authorizer.
//!
//! Joining a session passes through ordered gates: the session must
//! exist, the scheduled start must have passed, a room must have been
//! provisioned, and the caller's role/ownership must admit them. Only
//! then is a short-lived room token minted and appended to the join URL.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;
use uuid::Uuid;

use crate::db::{
    AssignStudentRequest, Course, CourseSession, CreateSessionRequest, DbPool,
    JoinSessionResponse, Role, SessionDetail, UpdateSessionRequest,
};
use crate::rooms::{compose_join_url, JoinTokenRequest, RoomProvider};
use crate::AppState;

use super::auth::Identity;
use super::error::{ApiError, ValidationErrorBuilder};
use super::guard::Guard;
use super::policy::{Action, OwnershipStore};
use super::validation::{validate_timestamp, validate_title, validate_uuid};

async fn load_session(state: &AppState, id: &str) -> Result<CourseSession, ApiError> {
    validate_uuid(id, "session_id").map_err(|e| ApiError::validation_field("session_id", e))?;
    let session: Option<CourseSession> = sqlx::query_as("SELECT * FROM course_sessions WHERE id = ?")
        .bind(id)
        .fetch_optional(&state.db)
        .await?;
    session.ok_or_else(|| ApiError::not_found("Session not found"))
}

/// List sessions visible to the caller.
pub async fn list_sessions(
    State(state): State<Arc<AppState>>,
    identity: Identity,
) -> Result<Json<Vec<CourseSession>>, ApiError> {
    let guard = Guard::new(&state.db, &identity);

    let sessions = match identity.role_enum() {
        Some(Role::Admin) => {
            sqlx::query_as("SELECT * FROM course_sessions ORDER BY scheduled_at DESC")
                .fetch_all(&state.db)
                .await?
        }
        Some(Role::Teacher) => {
            let profile = guard.require_teacher_profile().await?;
            sqlx::query_as(
                "SELECT * FROM course_sessions WHERE teacher_id = ? ORDER BY scheduled_at DESC",
            )
            .bind(&profile.id)
            .fetch_all(&state.db)
            .await?
        }
        Some(Role::Student) => {
            let profile = guard.require_student_profile().await?;
            sqlx::query_as(
                "SELECT cs.* FROM course_sessions cs \
                 INNER JOIN session_students ss ON cs.id = ss.session_id \
                 WHERE ss.student_id = ? ORDER BY cs.scheduled_at DESC",
            )
            .bind(&profile.id)
            .fetch_all(&state.db)
            .await?
        }
        None => return Err(ApiError::forbidden("Access denied")),
    };

    Ok(Json(sessions))
}

pub async fn get_session(
    State(state): State<Arc<AppState>>,
    identity: Identity,
    Path(id): Path<String>,
) -> Result<Json<SessionDetail>, ApiError> {
    let session = load_session(&state, &id).await?;
    Guard::new(&state.db, &identity)
        .course_session(&session, Action::Read)
        .await?;
    let status = session.status(Utc::now());
    Ok(Json(SessionDetail { session, status }))
}

/// Schedule a session for a course and provision its video room.
///
/// Provisioning is attempted once here; on failure the session is still
/// created without a room and joining reports `room_unavailable`.
pub async fn create_session(
    State(state): State<Arc<AppState>>,
    identity: Identity,
    Json(req): Json<CreateSessionRequest>,
) -> Result<(StatusCode, Json<CourseSession>), ApiError> {
    let mut errors = ValidationErrorBuilder::new();
    if let Err(e) = validate_title(&req.title) {
        errors.add("title", e);
    }
    if let Err(e) = validate_timestamp(&req.scheduled_at, "scheduled_at") {
        errors.add("scheduled_at", e);
    }
    if let Err(e) = validate_uuid(&req.course_id, "course_id") {
        errors.add("course_id", e);
    }
    errors.finish()?;

    let course: Option<Course> = sqlx::query_as("SELECT * FROM courses WHERE id = ?")
        .bind(&req.course_id)
        .fetch_optional(&state.db)
        .await?;
    let course = course.ok_or_else(|| ApiError::not_found("Course not found"))?;

    let guard = Guard::new(&state.db, &identity);
    let teacher_id = match guard.session_create(&course).await? {
        Some(profile) => profile.id,
        None => req
            .teacher_id
            .or_else(|| course.teacher_id.clone())
            .ok_or_else(|| {
                ApiError::invalid_request("Course has no assigned teacher for this session")
            })?,
    };

    // One room per session, provisioned at setup. The reference is stable
    // for the session's lifetime.
    let room = match state.rooms.provision_room(&req.title).await {
        Ok(room) => Some(room),
        Err(e) => {
            tracing::warn!(error = %e, "Room provisioning failed; session created without room");
            None
        }
    };

    let id = Uuid::new_v4().to_string();
    sqlx::query(
        "INSERT INTO course_sessions \
         (id, course_id, teacher_id, title, scheduled_at, duration_minutes, room_id, room_url) \
         VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(&id)
    .bind(&course.id)
    .bind(&teacher_id)
    .bind(&req.title)
    .bind(&req.scheduled_at)
    .bind(req.duration_minutes.unwrap_or(60))
    .bind(room.as_ref().map(|r| r.room_id.clone()))
    .bind(room.as_ref().map(|r| r.url.clone()))
    .execute(&state.db)
    .await?;

    for student_id in &req.student_ids {
        sqlx::query(
            "INSERT OR IGNORE INTO session_students (id, session_id, student_id) VALUES (?, ?, ?)",
        )
        .bind(Uuid::new_v4().to_string())
        .bind(&id)
        .bind(student_id)
        .execute(&state.db)
        .await?;
    }

    let session: CourseSession = sqlx::query_as("SELECT * FROM course_sessions WHERE id = ?")
        .bind(&id)
        .fetch_one(&state.db)
        .await?;

    tracing::info!(session = %session.title, by = %identity.email, "Session scheduled");

    Ok((StatusCode::CREATED, Json(session)))
}

pub async fn update_session(
    State(state): State<Arc<AppState>>,
    identity: Identity,
    Path(id): Path<String>,
    Json(req): Json<UpdateSessionRequest>,
) -> Result<Json<CourseSession>, ApiError> {
    let session = load_session(&state, &id).await?;
    Guard::new(&state.db, &identity)
        .course_session(&session, Action::Update)
        .await?;

    if let Some(ref title) = req.title {
        validate_title(title).map_err(|e| ApiError::validation_field("title", e))?;
    }
    if let Some(ref scheduled_at) = req.scheduled_at {
        validate_timestamp(scheduled_at, "scheduled_at")
            .map_err(|e| ApiError::validation_field("scheduled_at", e))?;
    }

    sqlx::query(
        "UPDATE course_sessions SET \
         title = COALESCE(?, title), \
         scheduled_at = COALESCE(?, scheduled_at), \
         duration_minutes = COALESCE(?, duration_minutes), \
         updated_at = datetime('now') \
         WHERE id = ?",
    )
    .bind(&req.title)
    .bind(&req.scheduled_at)
    .bind(req.duration_minutes)
    .bind(&id)
    .execute(&state.db)
    .await?;

    let session: CourseSession = sqlx::query_as("SELECT * FROM course_sessions WHERE id = ?")
        .bind(&id)
        .fetch_one(&state.db)
        .await?;

    Ok(Json(session))
}

/// Delete a session. Room de-provisioning is best-effort: a provider
/// failure is logged and the deletion proceeds.
pub async fn delete_session(
    State(state): State<Arc<AppState>>,
    identity: Identity,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    let session = load_session(&state, &id).await?;
    Guard::new(&state.db, &identity)
        .course_session(&session, Action::Delete)
        .await?;

    if let Some(ref room_id) = session.room_id {
        if let Err(e) = state.rooms.deprovision_room(room_id).await {
            tracing::warn!(room = %room_id, error = %e, "Room de-provisioning failed");
        }
    }

    sqlx::query("DELETE FROM course_sessions WHERE id = ?")
        .bind(&id)
        .execute(&state.db)
        .await?;

    tracing::info!(session_id = %id, by = %identity.email, "Session deleted");

    Ok(StatusCode::NO_CONTENT)
}

/// Assign a student to a session. Assignment is tracked independently of
/// course enrollment; no subset constraint is enforced.
pub async fn assign_student(
    State(state): State<Arc<AppState>>,
    identity: Identity,
    Path(id): Path<String>,
    Json(req): Json<AssignStudentRequest>,
) -> Result<StatusCode, ApiError> {
    let session = load_session(&state, &id).await?;
    Guard::new(&state.db, &identity)
        .course_session(&session, Action::Update)
        .await?;

    let student: Option<(String,)> = sqlx::query_as("SELECT id FROM student_profiles WHERE id = ?")
        .bind(&req.student_id)
        .fetch_optional(&state.db)
        .await?;
    if student.is_none() {
        return Err(ApiError::invalid_request("Student does not exist"));
    }

    sqlx::query(
        "INSERT OR IGNORE INTO session_students (id, session_id, student_id) VALUES (?, ?, ?)",
    )
    .bind(Uuid::new_v4().to_string())
    .bind(&session.id)
    .bind(&req.student_id)
    .execute(&state.db)
    .await?;

    Ok(StatusCode::CREATED)
}

pub async fn unassign_student(
    State(state): State<Arc<AppState>>,
    identity: Identity,
    Path((id, student_id)): Path<(String, String)>,
) -> Result<StatusCode, ApiError> {
    let session = load_session(&state, &id).await?;
    Guard::new(&state.db, &identity)
        .course_session(&session, Action::Update)
        .await?;

    sqlx::query("DELETE FROM session_students WHERE session_id = ? AND student_id = ?")
        .bind(&session.id)
        .bind(&student_id)
        .execute(&state.db)
        .await?;

    Ok(StatusCode::NO_CONTENT)
}

/// Join endpoint: run the gates and hand back a tokenized room URL.
pub async fn join_session(
    State(state): State<Arc<AppState>>,
    identity: Identity,
    Path(id): Path<String>,
) -> Result<Json<JoinSessionResponse>, ApiError> {
    let session = load_session(&state, &id).await?;
    let response = authorize_join(
        &state.db,
        state.rooms.as_ref(),
        &identity,
        &session,
        Utc::now(),
        state.config.rooms.join_token_ttl_hours,
    )
    .await?;
    Ok(Json(response))
}

/// The session-join authorizer.
///
/// Gate order is fixed: time gate, then room gate, then role/ownership
/// gate, then token minting. The time gate fires for every role, admin
/// included. None of the gates retry; a minting failure surfaces as
/// `upstream_failure`, distinct from any authorization denial.
pub async fn authorize_join(
    pool: &DbPool,
    rooms: &dyn RoomProvider,
    identity: &Identity,
    session: &CourseSession,
    now: DateTime<Utc>,
    token_ttl_hours: i64,
) -> Result<JoinSessionResponse, ApiError> {
    let scheduled_at = DateTime::parse_from_rfc3339(&session.scheduled_at)
        .map_err(|_| ApiError::internal("Session has an invalid schedule"))?
        .with_timezone(&Utc);

    if now < scheduled_at {
        return Err(ApiError::too_early("Session has not started yet"));
    }

    let (room_id, room_url) = match (&session.room_id, &session.room_url) {
        (Some(id), Some(url)) => (id, url),
        _ => {
            return Err(ApiError::room_unavailable(
                "No video room is available for this session",
            ))
        }
    };

    let store = OwnershipStore::new(pool);
    let is_owner = match identity.role_enum() {
        Some(Role::Admin) => true,
        Some(Role::Teacher) => {
            let profile = store
                .teacher_profile_for_user(&identity.user_id)
                .await
                .map_err(|e| {
                    tracing::error!("Ownership lookup failed during join: {}", e);
                    ApiError::forbidden("Access denied")
                })?
                .ok_or_else(|| ApiError::forbidden("No teacher profile for this account"))?;
            if profile.id != session.teacher_id {
                return Err(ApiError::forbidden("This is not your session"));
            }
            true
        }
        Some(Role::Student) => {
            let profile = store
                .student_profile_for_user(&identity.user_id)
                .await
                .map_err(|e| {
                    tracing::error!("Ownership lookup failed during join: {}", e);
                    ApiError::forbidden("Access denied")
                })?
                .ok_or_else(|| ApiError::forbidden("No student profile for this account"))?;
            let assigned = store
                .is_assigned_to_session(&session.id, &profile.id)
                .await
                .map_err(|e| {
                    tracing::error!("Ownership lookup failed during join: {}", e);
                    ApiError::forbidden("Access denied")
                })?;
            if !assigned {
                return Err(ApiError::forbidden("You are not assigned to this session"));
            }
            false
        }
        None => return Err(ApiError::forbidden("Access denied")),
    };

    let expires_at_unix = (now + Duration::hours(token_ttl_hours)).timestamp();
    let token = rooms
        .mint_join_token(JoinTokenRequest {
            room_id: room_id.clone(),
            user_name: identity.name.clone(),
            is_owner,
            expires_at_unix,
        })
        .await
        .map_err(|e| {
            tracing::error!(error = %e, "Join token minting failed");
            ApiError::upstream("Could not obtain a room access token")
        })?;

    Ok(JoinSessionResponse {
        url: compose_join_url(room_url, &token),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::error::ErrorCode;
    use crate::db;
    use crate::rooms::{ProvisionedRoom, RoomError};
    use async_trait::async_trait;

    struct FakeRooms {
        fail_mint: bool,
    }

    #[async_trait]
    impl RoomProvider for FakeRooms {
        async fn provision_room(&self, _title: &str) -> Result<ProvisionedRoom, RoomError> {
            Ok(ProvisionedRoom {
                room_id: "room-1".to_string(),
                url: "https://rooms.example/room-1".to_string(),
            })
        }

        async fn deprovision_room(&self, _room_id: &str) -> Result<(), RoomError> {
            Ok(())
        }

        async fn mint_join_token(&self, req: JoinTokenRequest) -> Result<String, RoomError> {
            if self.fail_mint {
                return Err(RoomError::Provider {
                    status: 500,
                    message: "boom".to_string(),
                });
            }
            Ok(format!(
                "tok-{}-{}",
                req.user_name.to_lowercase().replace(' ', "-"),
                if req.is_owner { "owner" } else { "guest" }
            ))
        }
    }

    fn identity(role: &str) -> Identity {
        Identity {
            user_id: format!("user-{}", role),
            email: format!("{}@example.com", role),
            name: role.to_string(),
            role: role.to_string(),
        }
    }

    fn session_row(id: &str, scheduled_at: DateTime<Utc>, with_room: bool) -> CourseSession {
        CourseSession {
            id: id.to_string(),
            course_id: "c1".to_string(),
            teacher_id: "tp1".to_string(),
            title: "Algebra".to_string(),
            scheduled_at: scheduled_at.to_rfc3339(),
            duration_minutes: 60,
            room_id: with_room.then(|| "room-1".to_string()),
            room_url: with_room.then(|| "https://rooms.example/room-1".to_string()),
            created_at: Utc::now().to_rfc3339(),
            updated_at: Utc::now().to_rfc3339(),
        }
    }

    async fn seed(pool: &DbPool) {
        for role in ["admin", "teacher", "student"] {
            sqlx::query(
                "INSERT INTO users (id, email, password_hash, name, role) VALUES (?, ?, 'x', ?, ?)",
            )
            .bind(format!("user-{}", role))
            .bind(format!("{}@example.com", role))
            .bind(role)
            .bind(role)
            .execute(pool)
            .await
            .unwrap();
        }
        sqlx::query("INSERT INTO teacher_profiles (id, user_id) VALUES ('tp1', 'user-teacher')")
            .execute(pool)
            .await
            .unwrap();
        sqlx::query("INSERT INTO student_profiles (id, user_id) VALUES ('sp1', 'user-student')")
            .execute(pool)
            .await
            .unwrap();
        sqlx::query("INSERT INTO courses (id, title, teacher_id) VALUES ('c1', 'Algebra', 'tp1')")
            .execute(pool)
            .await
            .unwrap();
        sqlx::query(
            "INSERT INTO course_sessions (id, course_id, teacher_id, title, scheduled_at, room_id, room_url) \
             VALUES ('cs1', 'c1', 'tp1', 'Algebra', ?, 'room-1', 'https://rooms.example/room-1')",
        )
        .bind((Utc::now() - Duration::hours(1)).to_rfc3339())
        .execute(pool)
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn test_time_gate_precedes_role_gate_even_for_admin() {
        let pool = db::init_in_memory().await.unwrap();
        seed(&pool).await;
        let rooms = FakeRooms { fail_mint: false };
        // Session scheduled an hour from now; admin tries to join now
        let session = session_row("cs1", Utc::now() + Duration::hours(1), true);

        let err = authorize_join(&pool, &rooms, &identity("admin"), &session, Utc::now(), 4)
            .await
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::TooEarly);
    }

    #[tokio::test]
    async fn test_missing_room_reports_room_unavailable() {
        let pool = db::init_in_memory().await.unwrap();
        seed(&pool).await;
        let rooms = FakeRooms { fail_mint: false };
        let session = session_row("cs1", Utc::now() - Duration::hours(1), false);

        let err = authorize_join(&pool, &rooms, &identity("admin"), &session, Utc::now(), 4)
            .await
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::RoomUnavailable);
    }

    #[tokio::test]
    async fn test_assigned_student_gets_tokenized_url() {
        let pool = db::init_in_memory().await.unwrap();
        seed(&pool).await;
        sqlx::query(
            "INSERT INTO session_students (id, session_id, student_id) VALUES ('ss1', 'cs1', 'sp1')",
        )
        .execute(&pool)
        .await
        .unwrap();

        let rooms = FakeRooms { fail_mint: false };
        let session = session_row("cs1", Utc::now() - Duration::minutes(5), true);

        let response = authorize_join(&pool, &rooms, &identity("student"), &session, Utc::now(), 4)
            .await
            .unwrap();
        assert!(response.url.contains("?t="));
        assert!(response.url.contains("guest"));
    }

    #[tokio::test]
    async fn test_unassigned_student_is_forbidden() {
        let pool = db::init_in_memory().await.unwrap();
        seed(&pool).await;
        // A second session of the same course without an assignment row
        sqlx::query(
            "INSERT INTO course_sessions (id, course_id, teacher_id, title, scheduled_at, room_id, room_url) \
             VALUES ('cs2', 'c1', 'tp1', 'Algebra II', ?, 'room-2', 'https://rooms.example/room-2')",
        )
        .bind((Utc::now() - Duration::hours(1)).to_rfc3339())
        .execute(&pool)
        .await
        .unwrap();

        let rooms = FakeRooms { fail_mint: false };
        let session = session_row("cs2", Utc::now() - Duration::hours(1), true);

        let err = authorize_join(&pool, &rooms, &identity("student"), &session, Utc::now(), 4)
            .await
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::Forbidden);
    }

    #[tokio::test]
    async fn test_owning_teacher_gets_owner_token() {
        let pool = db::init_in_memory().await.unwrap();
        seed(&pool).await;
        let rooms = FakeRooms { fail_mint: false };
        let session = session_row("cs1", Utc::now() - Duration::minutes(5), true);

        let response = authorize_join(&pool, &rooms, &identity("teacher"), &session, Utc::now(), 4)
            .await
            .unwrap();
        assert!(response.url.contains("owner"));
    }

    #[tokio::test]
    async fn test_non_owning_teacher_is_forbidden() {
        let pool = db::init_in_memory().await.unwrap();
        seed(&pool).await;
        sqlx::query(
            "INSERT INTO users (id, email, password_hash, name, role) \
             VALUES ('user-other', 'other@example.com', 'x', 'Other', 'teacher')",
        )
        .execute(&pool)
        .await
        .unwrap();
        sqlx::query("INSERT INTO teacher_profiles (id, user_id) VALUES ('tp2', 'user-other')")
            .execute(&pool)
            .await
            .unwrap();

        let rooms = FakeRooms { fail_mint: false };
        let session = session_row("cs1", Utc::now() - Duration::minutes(5), true);
        let other = Identity {
            user_id: "user-other".to_string(),
            email: "other@example.com".to_string(),
            name: "Other".to_string(),
            role: "teacher".to_string(),
        };

        let err = authorize_join(&pool, &rooms, &other, &session, Utc::now(), 4)
            .await
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::Forbidden);
    }

    #[tokio::test]
    async fn test_mint_failure_is_upstream_not_forbidden() {
        let pool = db::init_in_memory().await.unwrap();
        seed(&pool).await;
        let rooms = FakeRooms { fail_mint: true };
        let session = session_row("cs1", Utc::now() - Duration::minutes(5), true);

        let err = authorize_join(&pool, &rooms, &identity("admin"), &session, Utc::now(), 4)
            .await
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::UpstreamFailure);
    }

    #[tokio::test]
    async fn test_join_url_respects_existing_query_string() {
        let pool = db::init_in_memory().await.unwrap();
        seed(&pool).await;
        let rooms = FakeRooms { fail_mint: false };
        let mut session = session_row("cs1", Utc::now() - Duration::minutes(5), true);
        session.room_url = Some("https://rooms.example/room-1?layout=grid".to_string());

        let response = authorize_join(&pool, &rooms, &identity("admin"), &session, Utc::now(), 4)
            .await
            .unwrap();
        assert!(response.url.contains("?layout=grid&t="));
    }
}

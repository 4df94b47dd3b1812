//! Scheduled live class session models.
//!
//! A `CourseSession` is a scheduled meeting, not to be confused with an
//! `AuthSession` (a login credential).

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct CourseSession {
    pub id: String,
    pub course_id: String,
    pub teacher_id: String,
    pub title: String,
    /// RFC 3339 timestamp the session becomes joinable.
    pub scheduled_at: String,
    pub duration_minutes: i64,
    /// Externally provisioned room reference. NULL until provisioning
    /// succeeds; stable for the session's lifetime afterwards.
    pub room_id: Option<String>,
    pub room_url: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl CourseSession {
    /// Inferred lifecycle status relative to `now`. An unparseable
    /// timestamp reads as still scheduled, which keeps the join time
    /// gate closed.
    pub fn status(&self, now: DateTime<Utc>) -> SessionStatus {
        let start = match DateTime::parse_from_rfc3339(&self.scheduled_at) {
            Ok(t) => t.with_timezone(&Utc),
            Err(_) => return SessionStatus::Scheduled,
        };
        if now < start {
            SessionStatus::Scheduled
        } else if now >= start + Duration::minutes(self.duration_minutes) {
            SessionStatus::Completed
        } else {
            SessionStatus::Live
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Scheduled,
    Live,
    Completed,
}

#[derive(Debug, Deserialize)]
pub struct CreateSessionRequest {
    pub course_id: String,
    /// Admin may schedule on a teacher's behalf; ignored for teachers.
    pub teacher_id: Option<String>,
    pub title: String,
    pub scheduled_at: String,
    pub duration_minutes: Option<i64>,
    #[serde(default)]
    pub student_ids: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateSessionRequest {
    pub title: Option<String>,
    pub scheduled_at: Option<String>,
    pub duration_minutes: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct AssignStudentRequest {
    pub student_id: String,
}

#[derive(Debug, Serialize)]
pub struct SessionDetail {
    #[serde(flatten)]
    pub session: CourseSession,
    pub status: SessionStatus,
}

#[derive(Debug, Serialize)]
pub struct JoinSessionResponse {
    pub url: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session(scheduled_at: &str, duration_minutes: i64) -> CourseSession {
        CourseSession {
            id: "cs1".to_string(),
            course_id: "c1".to_string(),
            teacher_id: "tp1".to_string(),
            title: "Algebra".to_string(),
            scheduled_at: scheduled_at.to_string(),
            duration_minutes,
            room_id: None,
            room_url: None,
            created_at: Utc::now().to_rfc3339(),
            updated_at: Utc::now().to_rfc3339(),
        }
    }

    #[test]
    fn test_status_follows_the_clock() {
        let now = Utc::now();
        let s = session(&(now + Duration::hours(1)).to_rfc3339(), 60);
        assert_eq!(s.status(now), SessionStatus::Scheduled);

        let s = session(&(now - Duration::minutes(30)).to_rfc3339(), 60);
        assert_eq!(s.status(now), SessionStatus::Live);

        let s = session(&(now - Duration::hours(2)).to_rfc3339(), 60);
        assert_eq!(s.status(now), SessionStatus::Completed);
    }

    #[test]
    fn test_unparseable_schedule_reads_as_scheduled() {
        let s = session("not a timestamp", 60);
        assert_eq!(s.status(Utc::now()), SessionStatus::Scheduled);
    }
}

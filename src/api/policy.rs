//! Centralized role-based access control.
//!
//! Every API route consults this one table instead of repeating inline
//! role checks. `can_access` is a pure function of role, resource kind,
//! action, and a pre-computed ownership context; the ownership context is
//! looked up fresh per request by [`OwnershipStore`], never cached across
//! requests.

use crate::db::{DbPool, Role, StudentProfile, TeacherProfile};

/// What the caller is trying to do to a resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Read,
    Create,
    Update,
    Delete,
    Grade,
    Submit,
    Manage,
}

/// Resource categories gated by the policy table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceKind {
    Course,
    CourseSession,
    Coursework,
    Submission,
    Directory,
    Message,
}

/// Ownership context for a single (identity, resource) pair, evaluated
/// against current data at request time.
#[derive(Debug, Clone, Copy, Default)]
pub struct Ownership {
    /// Teacher-side predicate: the acting teacher profile owns the
    /// resource (course.teacher_id match, or the session/coursework
    /// belongs to them).
    pub owns: bool,
    /// Student-side predicate: an explicit enrollment or assignment row
    /// links the acting student profile to the resource. For messages,
    /// the caller is a participant.
    pub assigned: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Allow,
    Deny,
}

impl Decision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Decision::Allow)
    }
}

fn allow_if(cond: bool) -> Decision {
    if cond {
        Decision::Allow
    } else {
        Decision::Deny
    }
}

/// The role policy table. `role` is `None` when the stored role string
/// did not parse; unknown roles are denied everything.
pub fn can_access(
    role: Option<Role>,
    kind: ResourceKind,
    action: Action,
    ownership: Ownership,
) -> Decision {
    let Some(role) = role else {
        return Decision::Deny;
    };

    use Action::*;
    use ResourceKind::*;
    use Role::*;

    match (kind, action, role) {
        // Courses: admin sees all, teacher own only, student enrolled only
        (Course, Read, Admin) => Decision::Allow,
        (Course, Read, Teacher) => allow_if(ownership.owns),
        (Course, Read, Student) => allow_if(ownership.assigned),
        (Course, Create, Admin | Teacher) => Decision::Allow,
        (Course, Update | Delete, Admin) => Decision::Allow,
        (Course, _, _) => Decision::Deny,

        // Scheduled sessions: students are read-only and must be assigned
        (CourseSession, Read, Admin) => Decision::Allow,
        (CourseSession, Read, Teacher) => allow_if(ownership.owns),
        (CourseSession, Read, Student) => allow_if(ownership.assigned),
        (CourseSession, Create | Update | Delete, Admin) => Decision::Allow,
        (CourseSession, Create | Update | Delete, Teacher) => allow_if(ownership.owns),
        (CourseSession, _, _) => Decision::Deny,

        // Assignments and quizzes: authoring and grading are teacher-side
        (Coursework, Read, Admin) => Decision::Allow,
        (Coursework, Read, Teacher) => allow_if(ownership.owns),
        (Coursework, Read, Student) => allow_if(ownership.assigned),
        (Coursework, Create | Update | Delete | Grade, Admin) => Decision::Allow,
        (Coursework, Create | Update | Delete | Grade, Teacher) => allow_if(ownership.owns),
        (Coursework, _, _) => Decision::Deny,

        // Submissions: only an assigned student may submit
        (Submission, Submit, Student) => allow_if(ownership.assigned),
        (Submission, Read, Admin) => Decision::Allow,
        (Submission, Read, Teacher) => allow_if(ownership.owns),
        (Submission, Read, Student) => allow_if(ownership.assigned),
        (Submission, _, _) => Decision::Deny,

        // User directory management is admin only
        (Directory, _, Admin) => Decision::Allow,
        (Directory, _, _) => Decision::Deny,

        // Messaging: any authenticated role, own conversations only
        (Message, Create, _) => Decision::Allow,
        (Message, Read, _) => allow_if(ownership.assigned),
        (Message, _, _) => Decision::Deny,
    }
}

/// Per-request ownership lookups against the backing store.
///
/// These are deliberately re-read on every gated request; the staleness
/// window is zero at the cost of a lookup per check.
pub struct OwnershipStore<'a> {
    pool: &'a DbPool,
}

impl<'a> OwnershipStore<'a> {
    pub fn new(pool: &'a DbPool) -> Self {
        Self { pool }
    }

    pub async fn teacher_profile_for_user(
        &self,
        user_id: &str,
    ) -> Result<Option<TeacherProfile>, sqlx::Error> {
        sqlx::query_as("SELECT * FROM teacher_profiles WHERE user_id = ?")
            .bind(user_id)
            .fetch_optional(self.pool)
            .await
    }

    pub async fn student_profile_for_user(
        &self,
        user_id: &str,
    ) -> Result<Option<StudentProfile>, sqlx::Error> {
        sqlx::query_as("SELECT * FROM student_profiles WHERE user_id = ?")
            .bind(user_id)
            .fetch_optional(self.pool)
            .await
    }

    pub async fn is_enrolled(&self, course_id: &str, student_id: &str) -> Result<bool, sqlx::Error> {
        let row: Option<(i64,)> =
            sqlx::query_as("SELECT 1 FROM enrollments WHERE course_id = ? AND student_id = ?")
                .bind(course_id)
                .bind(student_id)
                .fetch_optional(self.pool)
                .await?;
        Ok(row.is_some())
    }

    pub async fn is_assigned_to_session(
        &self,
        session_id: &str,
        student_id: &str,
    ) -> Result<bool, sqlx::Error> {
        let row: Option<(i64,)> =
            sqlx::query_as("SELECT 1 FROM session_students WHERE session_id = ? AND student_id = ?")
                .bind(session_id)
                .bind(student_id)
                .fetch_optional(self.pool)
                .await?;
        Ok(row.is_some())
    }

    pub async fn is_assigned_to_coursework(
        &self,
        coursework_id: &str,
        student_id: &str,
    ) -> Result<bool, sqlx::Error> {
        let row: Option<(i64,)> = sqlx::query_as(
            "SELECT 1 FROM coursework_students WHERE coursework_id = ? AND student_id = ?",
        )
        .bind(coursework_id)
        .bind(student_id)
        .fetch_optional(self.pool)
        .await?;
        Ok(row.is_some())
    }
}

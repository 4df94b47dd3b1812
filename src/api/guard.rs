//! Route-level authorization guard.
//!
//! Handlers resolve the target resource, then call one `Guard` method with
//! the intended action before touching any further data. The guard
//! evaluates the policy table with freshly looked-up ownership and
//! short-circuits with a structured denial.
//!
//! Denials are fail-closed: a failed ownership lookup denies, and a
//! student denied read access gets `NotFound` so gated resources are
//! indistinguishable from absent ones.

use tracing::error;

use crate::db::{Course, CourseSession, Coursework, DbPool, Role, StudentProfile, TeacherProfile};

use super::auth::Identity;
use super::error::ApiError;
use super::policy::{can_access, Action, Ownership, OwnershipStore, ResourceKind};

pub struct Guard<'a> {
    pool: &'a DbPool,
    identity: &'a Identity,
}

impl<'a> Guard<'a> {
    pub fn new(pool: &'a DbPool, identity: &'a Identity) -> Self {
        Self { pool, identity }
    }

    fn store(&self) -> OwnershipStore<'a> {
        OwnershipStore::new(self.pool)
    }

    fn role(&self) -> Option<Role> {
        self.identity.role_enum()
    }

    // Ownership-store failures deny rather than surfacing a 5xx from an
    // authorization check.
    fn lookup_failed(err: sqlx::Error) -> ApiError {
        error!("Ownership lookup failed during authorization: {}", err);
        ApiError::forbidden("Access denied")
    }

    fn denial(&self, action: Action) -> ApiError {
        if self.role() == Some(Role::Student) && action == Action::Read {
            ApiError::not_found("Resource not found")
        } else {
            ApiError::forbidden("You do not have permission to perform this action")
        }
    }

    fn check(&self, kind: ResourceKind, action: Action, ownership: Ownership) -> Result<(), ApiError> {
        if can_access(self.role(), kind, action, ownership).is_allowed() {
            Ok(())
        } else {
            Err(self.denial(action))
        }
    }

    /// The acting teacher profile; a teacher without one is denied with an
    /// explicit 4xx rather than a silent empty result.
    pub async fn require_teacher_profile(&self) -> Result<TeacherProfile, ApiError> {
        self.store()
            .teacher_profile_for_user(&self.identity.user_id)
            .await
            .map_err(Self::lookup_failed)?
            .ok_or_else(|| ApiError::forbidden("No teacher profile for this account"))
    }

    pub async fn require_student_profile(&self) -> Result<StudentProfile, ApiError> {
        self.store()
            .student_profile_for_user(&self.identity.user_id)
            .await
            .map_err(Self::lookup_failed)?
            .ok_or_else(|| ApiError::forbidden("No student profile for this account"))
    }

    async fn ownership_for_course(&self, course: &Course) -> Result<Ownership, ApiError> {
        match self.role() {
            Some(Role::Teacher) => {
                let profile = self.require_teacher_profile().await?;
                Ok(Ownership {
                    owns: course.teacher_id.as_deref() == Some(profile.id.as_str()),
                    assigned: false,
                })
            }
            Some(Role::Student) => {
                let profile = self.require_student_profile().await?;
                let enrolled = self
                    .store()
                    .is_enrolled(&course.id, &profile.id)
                    .await
                    .map_err(Self::lookup_failed)?;
                Ok(Ownership {
                    owns: false,
                    assigned: enrolled,
                })
            }
            _ => Ok(Ownership::default()),
        }
    }

    pub async fn course(&self, course: &Course, action: Action) -> Result<(), ApiError> {
        let ownership = self.ownership_for_course(course).await?;
        self.check(ResourceKind::Course, action, ownership)
    }

    /// Gate creating a course. A teacher may create (becoming owner); the
    /// returned profile id is the owner to record, `None` for admin.
    pub async fn course_create(&self) -> Result<Option<TeacherProfile>, ApiError> {
        self.check(ResourceKind::Course, Action::Create, Ownership::default())?;
        match self.role() {
            Some(Role::Teacher) => Ok(Some(self.require_teacher_profile().await?)),
            _ => Ok(None),
        }
    }

    /// Gate creating a resource under a course (a scheduled session or a
    /// piece of coursework). Teachers must own the course; the returned
    /// profile is the teacher to record, `None` for admin.
    async fn create_for_course(
        &self,
        course: &Course,
        kind: ResourceKind,
    ) -> Result<Option<TeacherProfile>, ApiError> {
        match self.role() {
            Some(Role::Teacher) => {
                let profile = self.require_teacher_profile().await?;
                let owns = course.teacher_id.as_deref() == Some(profile.id.as_str());
                self.check(
                    kind,
                    Action::Create,
                    Ownership {
                        owns,
                        assigned: false,
                    },
                )?;
                Ok(Some(profile))
            }
            _ => {
                self.check(kind, Action::Create, Ownership::default())?;
                Ok(None)
            }
        }
    }

    pub async fn session_create(&self, course: &Course) -> Result<Option<TeacherProfile>, ApiError> {
        self.create_for_course(course, ResourceKind::CourseSession)
            .await
    }

    pub async fn coursework_create(
        &self,
        course: &Course,
    ) -> Result<Option<TeacherProfile>, ApiError> {
        self.create_for_course(course, ResourceKind::Coursework).await
    }

    pub async fn course_session(
        &self,
        session: &CourseSession,
        action: Action,
    ) -> Result<(), ApiError> {
        let ownership = match self.role() {
            Some(Role::Teacher) => {
                let profile = self.require_teacher_profile().await?;
                Ownership {
                    owns: session.teacher_id == profile.id,
                    assigned: false,
                }
            }
            Some(Role::Student) => {
                let profile = self.require_student_profile().await?;
                let assigned = self
                    .store()
                    .is_assigned_to_session(&session.id, &profile.id)
                    .await
                    .map_err(Self::lookup_failed)?;
                Ownership {
                    owns: false,
                    assigned,
                }
            }
            _ => Ownership::default(),
        };
        self.check(ResourceKind::CourseSession, action, ownership)
    }

    pub async fn coursework(&self, coursework: &Coursework, action: Action) -> Result<(), ApiError> {
        let ownership = match self.role() {
            Some(Role::Teacher) => {
                let profile = self.require_teacher_profile().await?;
                Ownership {
                    owns: coursework.teacher_id == profile.id,
                    assigned: false,
                }
            }
            Some(Role::Student) => {
                let profile = self.require_student_profile().await?;
                let assigned = self
                    .store()
                    .is_assigned_to_coursework(&coursework.id, &profile.id)
                    .await
                    .map_err(Self::lookup_failed)?;
                Ownership {
                    owns: false,
                    assigned,
                }
            }
            _ => Ownership::default(),
        };
        self.check(ResourceKind::Coursework, action, ownership)
    }

    /// Gate a submission; returns the acting student profile on allow so
    /// the handler can upsert against it.
    pub async fn submission(&self, coursework: &Coursework) -> Result<StudentProfile, ApiError> {
        if self.role() != Some(Role::Student) {
            return Err(self.denial(Action::Submit));
        }
        let profile = self.require_student_profile().await?;
        let assigned = self
            .store()
            .is_assigned_to_coursework(&coursework.id, &profile.id)
            .await
            .map_err(Self::lookup_failed)?;
        self.check(
            ResourceKind::Submission,
            Action::Submit,
            Ownership {
                owns: false,
                assigned,
            },
        )?;
        Ok(profile)
    }

    pub fn directory(&self) -> Result<(), ApiError> {
        self.check(ResourceKind::Directory, Action::Manage, Ownership::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::error::ErrorCode;
    use crate::db;

    fn identity(role: &str) -> Identity {
        Identity {
            user_id: format!("user-{}", role),
            email: format!("{}@example.com", role),
            name: role.to_string(),
            role: role.to_string(),
        }
    }

    async fn seed(pool: &DbPool) -> (Course, TeacherProfile, StudentProfile) {
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

        let course: Course = sqlx::query_as("SELECT * FROM courses WHERE id = 'c1'")
            .fetch_one(pool)
            .await
            .unwrap();
        let teacher: TeacherProfile = sqlx::query_as("SELECT * FROM teacher_profiles WHERE id = 'tp1'")
            .fetch_one(pool)
            .await
            .unwrap();
        let student: StudentProfile = sqlx::query_as("SELECT * FROM student_profiles WHERE id = 'sp1'")
            .fetch_one(pool)
            .await
            .unwrap();
        (course, teacher, student)
    }

    #[tokio::test]
    async fn test_owning_teacher_reads_course() {
        let pool = db::init_in_memory().await.unwrap();
        let (course, _, _) = seed(&pool).await;
        let id = identity("teacher");
        let guard = Guard::new(&pool, &id);
        assert!(guard.course(&course, Action::Read).await.is_ok());
    }

    #[tokio::test]
    async fn test_non_owning_teacher_is_forbidden() {
        let pool = db::init_in_memory().await.unwrap();
        let (mut course, _, _) = seed(&pool).await;
        course.teacher_id = Some("other-teacher".to_string());
        let id = identity("teacher");
        let guard = Guard::new(&pool, &id);
        let err = guard.course(&course, Action::Read).await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::Forbidden);
    }

    #[tokio::test]
    async fn test_teacher_cannot_delete_own_course() {
        let pool = db::init_in_memory().await.unwrap();
        let (course, _, _) = seed(&pool).await;
        let id = identity("teacher");
        let guard = Guard::new(&pool, &id);
        let err = guard.course(&course, Action::Delete).await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::Forbidden);
    }

    #[tokio::test]
    async fn test_unenrolled_student_sees_not_found() {
        let pool = db::init_in_memory().await.unwrap();
        let (course, _, _) = seed(&pool).await;
        let id = identity("student");
        let guard = Guard::new(&pool, &id);
        let err = guard.course(&course, Action::Read).await.unwrap_err();
        // Existence hiding: gated read denial reads as absence
        assert_eq!(err.code(), ErrorCode::NotFound);
    }

    #[tokio::test]
    async fn test_enrolled_student_reads_course() {
        let pool = db::init_in_memory().await.unwrap();
        let (course, _, student) = seed(&pool).await;
        sqlx::query("INSERT INTO enrollments (id, course_id, student_id) VALUES ('e1', 'c1', ?)")
            .bind(&student.id)
            .execute(&pool)
            .await
            .unwrap();
        let id = identity("student");
        let guard = Guard::new(&pool, &id);
        assert!(guard.course(&course, Action::Read).await.is_ok());
    }

    #[tokio::test]
    async fn test_teacher_without_profile_gets_explicit_denial() {
        let pool = db::init_in_memory().await.unwrap();
        let (course, _, _) = seed(&pool).await;
        sqlx::query("DELETE FROM teacher_profiles").execute(&pool).await.unwrap();
        let id = identity("teacher");
        let guard = Guard::new(&pool, &id);
        let err = guard.course(&course, Action::Read).await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::Forbidden);
    }

    #[tokio::test]
    async fn test_admin_passes_every_course_gate() {
        let pool = db::init_in_memory().await.unwrap();
        let (course, _, _) = seed(&pool).await;
        let id = identity("admin");
        let guard = Guard::new(&pool, &id);
        for action in [Action::Read, Action::Update, Action::Delete] {
            assert!(guard.course(&course, action).await.is_ok());
        }
    }

    #[tokio::test]
    async fn test_unknown_role_is_denied() {
        let pool = db::init_in_memory().await.unwrap();
        let (course, _, _) = seed(&pool).await;
        let id = Identity {
            user_id: "user-x".to_string(),
            email: "x@example.com".to_string(),
            name: "x".to_string(),
            role: "superuser".to_string(),
        };
        let guard = Guard::new(&pool, &id);
        assert!(guard.course(&course, Action::Read).await.is_err());
    }

    #[tokio::test]
    async fn test_teacher_schedules_only_under_own_course() {
        let pool = db::init_in_memory().await.unwrap();
        let (mut course, _, _) = seed(&pool).await;
        let id = identity("teacher");
        let guard = Guard::new(&pool, &id);

        let profile = guard.session_create(&course).await.unwrap();
        assert_eq!(profile.unwrap().id, "tp1");

        course.teacher_id = Some("other-teacher".to_string());
        let err = guard.session_create(&course).await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::Forbidden);
    }

    #[tokio::test]
    async fn test_student_cannot_author_coursework() {
        let pool = db::init_in_memory().await.unwrap();
        let (course, _, _) = seed(&pool).await;
        let id = identity("student");
        let guard = Guard::new(&pool, &id);
        let err = guard.coursework_create(&course).await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::Forbidden);
    }

    #[tokio::test]
    async fn test_admin_authors_coursework_without_own_profile() {
        let pool = db::init_in_memory().await.unwrap();
        let (course, _, _) = seed(&pool).await;
        let id = identity("admin");
        let guard = Guard::new(&pool, &id);
        assert!(guard.coursework_create(&course).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_directory_admin_only() {
        let pool = db::init_in_memory().await.unwrap();
        seed(&pool).await;
        let admin = identity("admin");
        assert!(Guard::new(&pool, &admin).directory().is_ok());
        let teacher = identity("teacher");
        assert!(Guard::new(&pool, &teacher).directory().is_err());
    }
}

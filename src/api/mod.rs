mod attachments;
pub mod auth;
mod courses;
mod coursework;
mod directory;
pub mod error;
pub mod guard;
mod messages;
pub mod policy;
pub mod redirect;
mod sessions;
mod validation;

use axum::{
    middleware,
    routing::{delete, get, post, put},
    Router,
};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use crate::AppState;

pub fn create_router(state: Arc<AppState>) -> Router {
    // Auth routes (public)
    let auth_routes = Router::new()
        .route("/sign-up", post(auth::sign_up))
        .route("/sign-in", post(auth::sign_in));

    // Protected API routes
    let api_routes = Router::new()
        // Session lifecycle for the signed-in user
        .route("/auth/sign-out", post(auth::sign_out))
        .route("/auth/me", get(auth::me))
        // Courses
        .route("/courses", get(courses::list_courses))
        .route("/courses", post(courses::create_course))
        .route("/courses/:id", get(courses::get_course))
        .route("/courses/:id", put(courses::update_course))
        .route("/courses/:id", delete(courses::delete_course))
        .route("/courses/:id/students", post(courses::enroll_student))
        .route(
            "/courses/:id/students/:student_id",
            delete(courses::unenroll_student),
        )
        .route("/courses/:id/roster", get(courses::course_roster))
        .route("/courses/:id/coursework", get(coursework::list_for_course))
        // Class sessions
        .route("/sessions", get(sessions::list_sessions))
        .route("/sessions", post(sessions::create_session))
        .route("/sessions/:id", get(sessions::get_session))
        .route("/sessions/:id", put(sessions::update_session))
        .route("/sessions/:id", delete(sessions::delete_session))
        .route("/sessions/:id/students", post(sessions::assign_student))
        .route(
            "/sessions/:id/students/:student_id",
            delete(sessions::unassign_student),
        )
        .route("/sessions/:id/join", post(sessions::join_session))
        // Assignments and quizzes
        .route("/coursework", post(coursework::create_coursework))
        .route("/coursework/:id", get(coursework::get_coursework))
        .route("/coursework/:id", put(coursework::update_coursework))
        .route("/coursework/:id", delete(coursework::delete_coursework))
        .route("/coursework/:id/students", post(coursework::assign_student))
        .route("/coursework/:id/submit", post(coursework::submit))
        .route("/coursework/:id/submissions", get(coursework::list_submissions))
        .route("/coursework/:id/my-submission", get(coursework::my_submission))
        .route("/coursework/:id/grade", post(coursework::grade))
        // Admin directory
        .route("/teachers", get(directory::list_teachers))
        .route("/teachers", post(directory::create_teacher))
        .route("/teachers/:id", get(directory::get_teacher))
        .route("/teachers/:id", put(directory::update_teacher))
        .route("/teachers/:id", delete(directory::delete_teacher))
        .route("/students", get(directory::list_students))
        .route("/students", post(directory::create_student))
        .route("/students/:id", get(directory::get_student))
        .route("/students/:id", put(directory::update_student))
        .route("/students/:id", delete(directory::delete_student))
        // Messaging
        .route("/messages", get(messages::list_conversations))
        .route("/messages", post(messages::send_message))
        .route("/messages/:user_id", get(messages::get_conversation))
        // Attachments
        .route("/attachments", post(attachments::upload))
        .route("/attachments/:id", get(attachments::download))
        .route("/attachments/:id", delete(attachments::delete))
        // Protected by auth
        .layer(middleware::from_fn_with_state(
            state.clone(),
            auth::auth_middleware,
        ));

    Router::new()
        .route("/health", get(health_check))
        .nest("/api/auth", auth_routes)
        .nest("/api", api_routes)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health_check() -> &'static str {
    "OK"
}

//! Edge redirector for page routes.
//!
//! Runs in front of the static frontend and sends browsers to the right
//! place before any page renders: unauthenticated visitors on protected
//! prefixes to the sign-in page, signed-in users on auth pages or a
//! wrong role's portal to their own home. API and health routes are
//! never redirected; they answer with status codes instead.

use axum::{
    extract::{Request, State},
    middleware::Next,
    response::{IntoResponse, Redirect, Response},
};
use std::sync::Arc;

use crate::db::Role;
use crate::AppState;

use super::auth::{extract_token, resolve_session};

const SIGN_IN_PATH: &str = "/sign-in";
const AUTH_PAGES: &[&str] = &["/sign-in", "/sign-up"];

/// Where to send a visitor with this role for this path, if anywhere.
///
/// Pure on (path, role) so the whole redirect table is testable without
/// a request in hand. `None` means let the request through.
pub fn redirect_target(path: &str, role: Option<Role>) -> Option<&'static str> {
    // API traffic answers with status codes, never redirects
    if path.starts_with("/api") || path == "/health" {
        return None;
    }

    let on_auth_page = AUTH_PAGES
        .iter()
        .any(|p| path == *p || path.starts_with(&format!("{}/", p)));

    match role {
        None => {
            let protected = [Role::Admin, Role::Teacher, Role::Student]
                .iter()
                .any(|r| is_portal_path(path, *r));
            if protected {
                Some(SIGN_IN_PATH)
            } else {
                None
            }
        }
        Some(role) => {
            if on_auth_page || path == "/" {
                return Some(role.home_path());
            }
            for other in [Role::Admin, Role::Teacher, Role::Student] {
                if other != role && is_portal_path(path, other) {
                    return Some(role.home_path());
                }
            }
            None
        }
    }
}

fn is_portal_path(path: &str, role: Role) -> bool {
    let prefix = role.home_path();
    path == prefix || path.starts_with(&format!("{}/", prefix))
}

/// Page-route middleware applying `redirect_target` with the caller's
/// session, if any. Session resolution fails open to "signed out".
pub async fn redirect_middleware(
    State(state): State<Arc<AppState>>,
    request: Request,
    next: Next,
) -> Response {
    let path = request.uri().path().to_string();

    let role = match extract_token(request.headers()) {
        Some(token) => resolve_session(&state.db, &token)
            .await
            .and_then(|identity| identity.role_enum()),
        None => None,
    };

    match redirect_target(&path, role) {
        Some(target) => Redirect::temporary(target).into_response(),
        None => next.run(request).await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_api_routes_are_never_redirected() {
        assert_eq!(redirect_target("/api/courses", None), None);
        assert_eq!(redirect_target("/api/auth/sign-in", Some(Role::Admin)), None);
        assert_eq!(redirect_target("/health", None), None);
    }

    #[test]
    fn test_signed_out_visitor_on_portal_goes_to_sign_in() {
        assert_eq!(redirect_target("/admin", None), Some("/sign-in"));
        assert_eq!(redirect_target("/teacher/courses", None), Some("/sign-in"));
        assert_eq!(redirect_target("/student", None), Some("/sign-in"));
    }

    #[test]
    fn test_signed_out_visitor_on_public_pages_passes() {
        assert_eq!(redirect_target("/", None), None);
        assert_eq!(redirect_target("/sign-in", None), None);
        assert_eq!(redirect_target("/sign-up", None), None);
    }

    #[test]
    fn test_signed_in_user_on_auth_page_goes_home() {
        assert_eq!(redirect_target("/sign-in", Some(Role::Teacher)), Some("/teacher"));
        assert_eq!(redirect_target("/sign-up", Some(Role::Student)), Some("/student"));
        assert_eq!(redirect_target("/", Some(Role::Admin)), Some("/admin"));
    }

    #[test]
    fn test_wrong_portal_prefix_goes_to_own_home() {
        assert_eq!(redirect_target("/admin/users", Some(Role::Student)), Some("/student"));
        assert_eq!(redirect_target("/teacher", Some(Role::Student)), Some("/student"));
        assert_eq!(redirect_target("/student/courses", Some(Role::Teacher)), Some("/teacher"));
    }

    #[test]
    fn test_own_portal_passes_through() {
        assert_eq!(redirect_target("/admin/users", Some(Role::Admin)), None);
        assert_eq!(redirect_target("/teacher/courses", Some(Role::Teacher)), None);
        assert_eq!(redirect_target("/student", Some(Role::Student)), None);
    }

    #[test]
    fn test_prefix_matching_is_segment_aware() {
        // "/teachers-lounge" is not the teacher portal
        assert_eq!(redirect_target("/teachers-lounge", None), None);
        assert_eq!(redirect_target("/administration", Some(Role::Student)), None);
    }
}

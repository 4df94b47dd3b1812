use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use axum::{
    body::Body,
    extract::{FromRequestParts, State},
    http::{request::Parts, HeaderMap, Request},
    middleware::Next,
    response::Response,
    Json,
};
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use chrono::{DateTime, Utc};
use rand::Rng;
use sha2::{Digest, Sha256};
use std::sync::Arc;

use crate::db::{DbPool, LoginRequest, LoginResponse, Role, SignUpRequest, User, UserResponse};
use crate::AppState;

use super::error::{ApiError, ValidationErrorBuilder};
use super::validation::{validate_email, validate_name, validate_password, validate_role};

pub const SESSION_COOKIE: &str = "classhub_session";

/// The resolved identity of the caller, threaded through handlers as an
/// explicit value rather than ambient state.
#[derive(Debug, Clone)]
pub struct Identity {
    pub user_id: String,
    pub email: String,
    pub name: String,
    pub role: String,
}

impl Identity {
    pub fn role_enum(&self) -> Option<Role> {
        self.role.parse().ok()
    }
}

/// Hash a password using Argon2
pub fn hash_password(password: &str) -> Result<String, argon2::password_hash::Error> {
    let salt = SaltString::generate(&mut OsRng);
    let argon2 = Argon2::default();
    let hash = argon2.hash_password(password.as_bytes(), &salt)?;
    Ok(hash.to_string())
}

/// Verify a password against a hash
pub fn verify_password(password: &str, hash: &str) -> bool {
    let parsed_hash = match PasswordHash::new(hash) {
        Ok(h) => h,
        Err(_) => return false,
    };
    Argon2::default()
        .verify_password(password.as_bytes(), &parsed_hash)
        .is_ok()
}

/// Generate a random session token
fn generate_token() -> String {
    let mut rng = rand::rng();
    let bytes: [u8; 32] = rng.random();
    hex::encode(bytes)
}

/// Hash a token for storage
fn hash_token(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    hex::encode(hasher.finalize())
}

/// Extract the bearer token from the Authorization header or the session
/// cookie.
pub(crate) fn extract_token(headers: &HeaderMap) -> Option<String> {
    if let Some(auth_header) = headers.get("Authorization").and_then(|h| h.to_str().ok()) {
        if let Some(token) = auth_header.strip_prefix("Bearer ") {
            return Some(token.to_string());
        }
    }

    let jar = CookieJar::from_headers(headers);
    jar.get(SESSION_COOKIE).map(|c| c.value().to_string())
}

/// Map an opaque token to an identity.
///
/// Fails open to `None` on any backend error, malformed token, or expired
/// token. Expired sessions are treated identically to missing ones but are
/// not deleted here; cleanup is an external concern.
pub async fn resolve_session(pool: &DbPool, token: &str) -> Option<Identity> {
    let token_hash = hash_token(token);

    let session: crate::db::AuthSession =
        sqlx::query_as("SELECT * FROM sessions WHERE token_hash = ?")
            .bind(&token_hash)
            .fetch_optional(pool)
            .await
            .ok()
            .flatten()?;

    let expires_at = DateTime::parse_from_rfc3339(&session.expires_at).ok()?;
    if expires_at <= Utc::now() {
        return None;
    }

    let user: User = sqlx::query_as("SELECT * FROM users WHERE id = ?")
        .bind(&session.user_id)
        .fetch_optional(pool)
        .await
        .ok()
        .flatten()?;

    Some(Identity {
        user_id: user.id,
        email: user.email,
        name: user.name,
        role: user.role,
    })
}

/// Route guard middleware: resolves the session and attaches the identity
/// to the request before any handler or data access runs. Applied to every
/// protected route; authorization per action happens in the guard module.
pub async fn auth_middleware(
    State(state): State<Arc<AppState>>,
    mut request: Request<Body>,
    next: Next,
) -> Result<Response, ApiError> {
    let token = extract_token(request.headers())
        .ok_or_else(|| ApiError::unauthenticated("Authentication required"))?;

    let identity = resolve_session(&state.db, &token)
        .await
        .ok_or_else(|| ApiError::unauthenticated("Session is invalid or expired"))?;

    request.extensions_mut().insert(identity);
    Ok(next.run(request).await)
}

/// Extractor reading the identity placed by `auth_middleware`.
#[axum::async_trait]
impl FromRequestParts<Arc<AppState>> for Identity {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        _state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<Identity>()
            .cloned()
            .ok_or_else(|| ApiError::unauthenticated("Authentication required"))
    }
}

fn validate_sign_up(req: &SignUpRequest) -> Result<(), ApiError> {
    let mut errors = ValidationErrorBuilder::new();

    if let Err(e) = validate_email(&req.email) {
        errors.add("email", e);
    }
    if let Err(e) = validate_password(&req.password) {
        errors.add("password", e);
    }
    if let Err(e) = validate_name(&req.name) {
        errors.add("name", e);
    }
    if let Err(e) = validate_role(&req.role) {
        errors.add("role", e);
    }

    errors.finish()
}

async fn issue_session(
    pool: &DbPool,
    user_id: &str,
    ttl_days: i64,
    headers: &HeaderMap,
) -> Result<String, ApiError> {
    let token = generate_token();
    let token_hash = hash_token(&token);
    let expires_at = (Utc::now() + chrono::Duration::days(ttl_days)).to_rfc3339();

    let user_agent = headers
        .get("user-agent")
        .and_then(|h| h.to_str().ok())
        .map(|s| s.to_string());
    let ip_address = headers
        .get("x-forwarded-for")
        .and_then(|h| h.to_str().ok())
        .and_then(|s| s.split(',').next())
        .map(|s| s.trim().to_string());

    sqlx::query(
        "INSERT INTO sessions (id, user_id, token_hash, user_agent, ip_address, expires_at) \
         VALUES (?, ?, ?, ?, ?, ?)",
    )
    .bind(uuid::Uuid::new_v4().to_string())
    .bind(user_id)
    .bind(&token_hash)
    .bind(&user_agent)
    .bind(&ip_address)
    .bind(&expires_at)
    .execute(pool)
    .await?;

    Ok(token)
}

// Session-scoped cookie; the server-side expires_at is authoritative.
fn session_cookie(token: &str) -> Cookie<'static> {
    Cookie::build((SESSION_COOKIE, token.to_string()))
        .path("/")
        .http_only(true)
        .same_site(SameSite::Lax)
        .build()
}

/// Sign up a new user with a role-specific profile.
///
/// The user row and the profile row are created in one transaction: a
/// profile insert failure rolls back the user so no orphan credential row
/// is left behind.
pub async fn sign_up(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    jar: CookieJar,
    Json(req): Json<SignUpRequest>,
) -> Result<(CookieJar, Json<LoginResponse>), ApiError> {
    validate_sign_up(&req)?;

    // Role is asserted by the client here, matching observed behavior.
    // Nothing prevents self-registration as admin; likely a defect.
    if req.role == Role::Admin.as_str() {
        tracing::warn!(email = %req.email, "Self-registration with admin role");
    }

    let existing: Option<(String,)> = sqlx::query_as("SELECT id FROM users WHERE email = ?")
        .bind(&req.email)
        .fetch_optional(&state.db)
        .await?;
    if existing.is_some() {
        return Err(ApiError::conflict("A user with this email already exists"));
    }

    let user_id = uuid::Uuid::new_v4().to_string();
    let password_hash =
        hash_password(&req.password).map_err(|_| ApiError::internal("Failed to hash password"))?;

    let mut tx = state.db.begin().await?;

    sqlx::query(
        "INSERT INTO users (id, email, password_hash, name, phone, role) VALUES (?, ?, ?, ?, ?, ?)",
    )
    .bind(&user_id)
    .bind(&req.email)
    .bind(&password_hash)
    .bind(&req.name)
    .bind(&req.phone)
    .bind(&req.role)
    .execute(&mut *tx)
    .await?;

    match req.role.parse() {
        Ok(Role::Teacher) => {
            sqlx::query("INSERT INTO teacher_profiles (id, user_id) VALUES (?, ?)")
                .bind(uuid::Uuid::new_v4().to_string())
                .bind(&user_id)
                .execute(&mut *tx)
                .await?;
        }
        Ok(Role::Student) => {
            sqlx::query("INSERT INTO student_profiles (id, user_id) VALUES (?, ?)")
                .bind(uuid::Uuid::new_v4().to_string())
                .bind(&user_id)
                .execute(&mut *tx)
                .await?;
        }
        _ => {}
    }

    tx.commit().await?;

    tracing::info!(email = %req.email, role = %req.role, "User signed up");

    let ttl = state.config.auth.session_ttl_days;
    let token = issue_session(&state.db, &user_id, ttl, &headers).await?;
    let jar = jar.add(session_cookie(&token));

    Ok((
        jar,
        Json(LoginResponse {
            token,
            user: UserResponse {
                id: user_id,
                email: req.email,
                name: req.name,
                phone: req.phone,
                role: req.role,
            },
        }),
    ))
}

/// Sign-in endpoint
pub async fn sign_in(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    jar: CookieJar,
    Json(req): Json<LoginRequest>,
) -> Result<(CookieJar, Json<LoginResponse>), ApiError> {
    let user: Option<User> = sqlx::query_as("SELECT * FROM users WHERE email = ?")
        .bind(&req.email)
        .fetch_optional(&state.db)
        .await?;

    let user = user.ok_or_else(|| ApiError::unauthenticated("Invalid credentials"))?;

    if !verify_password(&req.password, &user.password_hash) {
        return Err(ApiError::unauthenticated("Invalid credentials"));
    }

    let ttl = state.config.auth.session_ttl_days;
    let token = issue_session(&state.db, &user.id, ttl, &headers).await?;
    let jar = jar.add(session_cookie(&token));

    Ok((
        jar,
        Json(LoginResponse {
            token,
            user: UserResponse::from(user),
        }),
    ))
}

/// Sign-out endpoint: deletes the session row and clears the cookie.
pub async fn sign_out(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    jar: CookieJar,
) -> Result<CookieJar, ApiError> {
    if let Some(token) = extract_token(&headers) {
        let token_hash = hash_token(&token);
        sqlx::query("DELETE FROM sessions WHERE token_hash = ?")
            .bind(&token_hash)
            .execute(&state.db)
            .await?;
    }

    Ok(jar.remove(Cookie::from(SESSION_COOKIE)))
}

/// Return the caller's resolved identity.
pub async fn me(identity: Identity) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "id": identity.user_id,
        "email": identity.email,
        "name": identity.name,
        "role": identity.role,
    }))
}

/// Create the seed admin account on first start if no users exist.
pub async fn ensure_admin_user(
    pool: &DbPool,
    email: &str,
    password: Option<&str>,
) -> anyhow::Result<()> {
    let count: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM users")
        .fetch_one(pool)
        .await?;
    if count.0 > 0 {
        return Ok(());
    }

    let password = match password {
        Some(p) => p.to_string(),
        None => {
            let generated = generate_token();
            tracing::warn!("Generated admin password: {}", generated);
            generated
        }
    };

    let password_hash =
        hash_password(&password).map_err(|e| anyhow::anyhow!("Failed to hash password: {}", e))?;

    sqlx::query(
        "INSERT INTO users (id, email, password_hash, name, role) VALUES (?, ?, ?, ?, 'admin')",
    )
    .bind(uuid::Uuid::new_v4().to_string())
    .bind(email)
    .bind(&password_hash)
    .bind("Administrator")
    .execute(pool)
    .await?;

    tracing::info!("Created seed admin user {}", email);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::error::ErrorCode;
    use crate::db;
    use crate::rooms::HttpRoomProvider;
    use crate::storage::ObjectStore;

    async fn test_state(pool: DbPool) -> Arc<AppState> {
        let config = crate::config::Config::default();
        let rooms = Arc::new(HttpRoomProvider::new("http://localhost".to_string(), None));
        let storage = Arc::new(ObjectStore::from_config(&config.storage).await);
        Arc::new(AppState::new(config, pool, rooms, storage))
    }

    async fn insert_user(pool: &DbPool, email: &str, role: &str) -> String {
        let id = uuid::Uuid::new_v4().to_string();
        sqlx::query(
            "INSERT INTO users (id, email, password_hash, name, role) VALUES (?, ?, 'x', 'Test', ?)",
        )
        .bind(&id)
        .bind(email)
        .bind(role)
        .execute(pool)
        .await
        .unwrap();
        id
    }

    async fn insert_session(pool: &DbPool, user_id: &str, token: &str, expires_at: &str) {
        sqlx::query(
            "INSERT INTO sessions (id, user_id, token_hash, expires_at) VALUES (?, ?, ?, ?)",
        )
        .bind(uuid::Uuid::new_v4().to_string())
        .bind(user_id)
        .bind(hash_token(token))
        .bind(expires_at)
        .execute(pool)
        .await
        .unwrap();
    }

    #[test]
    fn test_password_roundtrip() {
        let hash = hash_password("correct horse").unwrap();
        assert!(verify_password("correct horse", &hash));
        assert!(!verify_password("wrong horse", &hash));
    }

    #[test]
    fn test_verify_rejects_garbage_hash() {
        assert!(!verify_password("anything", "not-a-hash"));
    }

    #[tokio::test]
    async fn test_resolver_returns_identity_for_valid_token() {
        let pool = db::init_in_memory().await.unwrap();
        let user_id = insert_user(&pool, "t@example.com", "teacher").await;
        let expires = (Utc::now() + chrono::Duration::days(1)).to_rfc3339();
        insert_session(&pool, &user_id, "tok1", &expires).await;

        let identity = resolve_session(&pool, "tok1").await.unwrap();
        assert_eq!(identity.user_id, user_id);
        assert_eq!(identity.role_enum(), Some(Role::Teacher));
    }

    #[tokio::test]
    async fn test_resolver_is_idempotent() {
        let pool = db::init_in_memory().await.unwrap();
        let user_id = insert_user(&pool, "t@example.com", "teacher").await;
        let expires = (Utc::now() + chrono::Duration::days(1)).to_rfc3339();
        insert_session(&pool, &user_id, "tok1", &expires).await;

        let first = resolve_session(&pool, "tok1").await.unwrap();
        let second = resolve_session(&pool, "tok1").await.unwrap();
        assert_eq!(first.user_id, second.user_id);
        assert_eq!(first.email, second.email);
    }

    #[tokio::test]
    async fn test_resolver_treats_expired_as_absent_without_deleting() {
        let pool = db::init_in_memory().await.unwrap();
        let user_id = insert_user(&pool, "s@example.com", "student").await;
        let expired = (Utc::now() - chrono::Duration::hours(1)).to_rfc3339();
        insert_session(&pool, &user_id, "old", &expired).await;

        assert!(resolve_session(&pool, "old").await.is_none());

        // Lazy expiry: the row is still there
        let count: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM sessions")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(count.0, 1);
    }

    #[tokio::test]
    async fn test_resolver_absent_for_unknown_or_malformed_token() {
        let pool = db::init_in_memory().await.unwrap();
        assert!(resolve_session(&pool, "nope").await.is_none());
        assert!(resolve_session(&pool, "").await.is_none());
    }

    #[tokio::test]
    async fn test_duplicate_email_sign_up_leaves_no_orphan_rows() {
        let pool = db::init_in_memory().await.unwrap();
        let state = test_state(pool.clone()).await;

        let request = |email: &str| SignUpRequest {
            email: email.to_string(),
            password: "longenough".to_string(),
            name: "Student".to_string(),
            phone: None,
            role: "student".to_string(),
        };

        sign_up(
            State(state.clone()),
            HeaderMap::new(),
            CookieJar::default(),
            Json(request("dup@example.com")),
        )
        .await
        .unwrap();

        // Same address with different casing: email is unique NOCASE
        let err = sign_up(
            State(state),
            HeaderMap::new(),
            CookieJar::default(),
            Json(request("Dup@Example.com")),
        )
        .await
        .unwrap_err();
        assert_eq!(err.code(), ErrorCode::Conflict);

        let users: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM users")
            .fetch_one(&pool)
            .await
            .unwrap();
        let profiles: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM student_profiles")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!((users.0, profiles.0), (1, 1));
    }

    #[tokio::test]
    async fn test_ensure_admin_user_only_seeds_empty_db() {
        let pool = db::init_in_memory().await.unwrap();
        ensure_admin_user(&pool, "admin@classhub.local", Some("pw"))
            .await
            .unwrap();
        ensure_admin_user(&pool, "admin2@classhub.local", Some("pw"))
            .await
            .unwrap();

        let count: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM users")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(count.0, 1);
    }
}

//! Input validation for API requests.
//!
//! Validation runs before authorization: a malformed request is rejected
//! with `invalid_request`/`validation_error` without consulting the policy
//! table. For collecting multiple field errors use `ValidationErrorBuilder`
//! from the `error` module.

use lazy_static::lazy_static;
use regex::Regex;

lazy_static! {
    /// Pragmatic email shape check; uniqueness is enforced by the store
    static ref EMAIL_REGEX: Regex =
        Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").unwrap();
}

pub fn validate_email(email: &str) -> Result<(), String> {
    if email.is_empty() {
        return Err("Email is required".to_string());
    }
    if email.len() > 254 {
        return Err("Email is too long (max 254 characters)".to_string());
    }
    if !EMAIL_REGEX.is_match(email) {
        return Err("Invalid email address".to_string());
    }
    Ok(())
}

pub fn validate_password(password: &str) -> Result<(), String> {
    if password.len() < 8 {
        return Err("Password must be at least 8 characters".to_string());
    }
    if password.len() > 128 {
        return Err("Password is too long (max 128 characters)".to_string());
    }
    Ok(())
}

pub fn validate_name(name: &str) -> Result<(), String> {
    if name.trim().is_empty() {
        return Err("Name is required".to_string());
    }
    if name.len() > 120 {
        return Err("Name is too long (max 120 characters)".to_string());
    }
    Ok(())
}

pub fn validate_role(role: &str) -> Result<(), String> {
    role.parse::<crate::db::Role>()
        .map(|_| ())
        .map_err(|_| "Invalid role. Must be one of: admin, teacher, student".to_string())
}

pub fn validate_title(title: &str) -> Result<(), String> {
    if title.trim().is_empty() {
        return Err("Title is required".to_string());
    }
    if title.len() > 200 {
        return Err("Title is too long (max 200 characters)".to_string());
    }
    Ok(())
}

/// Validate a UUID string
pub fn validate_uuid(id: &str, field_name: &str) -> Result<(), String> {
    if id.is_empty() {
        return Err(format!("{} is required", field_name));
    }
    if uuid::Uuid::parse_str(id).is_err() {
        return Err(format!("Invalid {} format", field_name));
    }
    Ok(())
}

/// Validate an RFC 3339 timestamp
pub fn validate_timestamp(value: &str, field_name: &str) -> Result<(), String> {
    chrono::DateTime::parse_from_rfc3339(value)
        .map(|_| ())
        .map_err(|_| format!("Invalid {}: expected an RFC 3339 timestamp", field_name))
}

pub fn validate_points(points: i64) -> Result<(), String> {
    if points < 0 {
        return Err("Points cannot be negative".to_string());
    }
    if points > 10_000 {
        return Err("Points are too large (max 10000)".to_string());
    }
    Ok(())
}

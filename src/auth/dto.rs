use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

use super::repo_types::User;
use crate::error::AppError;

lazy_static! {
    static ref EMAIL_RE: Regex = Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").unwrap();
    static ref USERNAME_RE: Regex = Regex::new(r"^[A-Za-z0-9_.-]{3,64}$").unwrap();
}

pub const MIN_PASSWORD_LEN: usize = 6;

pub(crate) fn is_valid_email(email: &str) -> bool {
    EMAIL_RE.is_match(email)
}

/// Request body for user registration.
#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    pub username: String,
    pub email: String,
    pub password: String,
}

impl RegisterRequest {
    /// Trims and lowercases what needs it, then checks field rules.
    pub fn normalize(mut self) -> Result<Self, AppError> {
        self.username = self.username.trim().to_string();
        self.email = self.email.trim().to_lowercase();

        if !USERNAME_RE.is_match(&self.username) {
            return Err(AppError::Validation(
                "Username must be 3-64 letters, digits, '.', '_' or '-'".into(),
            ));
        }
        if !is_valid_email(&self.email) {
            return Err(AppError::Validation("Invalid email".into()));
        }
        if self.password.chars().count() < MIN_PASSWORD_LEN {
            return Err(AppError::Validation(format!(
                "Password must be at least {} characters long.",
                MIN_PASSWORD_LEN
            )));
        }
        Ok(self)
    }
}

/// Request body for login. `username` also accepts an email address.
#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

/// Request body for token refresh.
#[derive(Debug, Deserialize)]
pub struct RefreshRequest {
    pub refresh_token: String,
}

/// Response returned after login, register or refresh.
#[derive(Debug, Serialize)]
pub struct AuthResponse {
    pub message: &'static str,
    pub access_token: String,
    pub refresh_token: String,
    pub token_type: &'static str,
    pub token_expires_in_minutes: u64,
    pub user: PublicUser,
}

/// Public part of the user returned to the client.
#[derive(Debug, Serialize)]
pub struct PublicUser {
    pub id: Uuid,
    pub username: String,
    pub email: String,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

impl From<User> for PublicUser {
    fn from(u: User) -> Self {
        Self {
            id: u.id,
            username: u.username,
            email: u.email,
            created_at: u.created_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn req(username: &str, email: &str, password: &str) -> RegisterRequest {
        RegisterRequest {
            username: username.into(),
            email: email.into(),
            password: password.into(),
        }
    }

    #[test]
    fn normalize_trims_and_lowercases() {
        let r = req("  alice ", " Alice@Example.COM ", "secret1").normalize().unwrap();
        assert_eq!(r.username, "alice");
        assert_eq!(r.email, "alice@example.com");
    }

    #[test]
    fn normalize_rejects_bad_fields() {
        assert!(req("al", "a@b.co", "secret1").normalize().is_err());
        assert!(req("alice", "not-an-email", "secret1").normalize().is_err());
        assert!(req("alice", "a@b.co", "short").normalize().is_err());
    }

    #[test]
    fn public_user_hides_password_hash() {
        let user = User {
            id: Uuid::new_v4(),
            username: "alice".into(),
            email: "alice@example.com".into(),
            password_hash: "$argon2id$secret".into(),
            is_active: true,
            created_at: OffsetDateTime::now_utc(),
            updated_at: OffsetDateTime::now_utc(),
        };
        let json = serde_json::to_string(&PublicUser::from(user.clone())).unwrap();
        assert!(json.contains("alice@example.com"));
        assert!(!json.contains("argon2"));
        assert!(!serde_json::to_string(&user).unwrap().contains("argon2"));
    }
}

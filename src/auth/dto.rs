use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::users::model::PublicUser;

/// Request body for user registration.
#[derive(Debug, Deserialize)]
pub struct SignupRequest {
    pub name: String,
    pub email: String,
    pub password: String,
}

/// Request body for login.
#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Deserialize)]
pub struct VerifyEmailRequest {
    pub email: String,
    pub code: String,
}

/// Response returned after login.
#[derive(Debug, Serialize)]
pub struct AuthResponse {
    pub auth_token: String,
    #[serde(with = "time::serde::rfc3339")]
    pub expires_at: OffsetDateTime,
    pub user: PublicUser,
}

#[derive(Debug, Serialize)]
pub struct SessionsResponse {
    pub count: usize,
    #[serde(with = "time::serde::rfc3339::option")]
    pub current_expires_at: Option<OffsetDateTime>,
}

/// `{}`
#[derive(Debug, Default, Serialize)]
pub struct Empty {}

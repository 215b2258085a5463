use axum::{
    async_trait,
    extract::FromRequestParts,
    http::{header::AUTHORIZATION, request::Parts, HeaderValue},
};
use tracing::debug;

use crate::auth::claims::Claims;
use crate::auth::error::{AuthError, AuthResult};
use crate::error::AppError;
use crate::state::AppState;
use crate::users::model::User;

/// A request whose bearer token verified and whose subject resolved to a user.
///
/// Says nothing about revocation; that is the job of the guards run by
/// [`Authorized`](crate::auth::guards::Authorized).
#[derive(Debug, Clone)]
pub struct AuthSession {
    pub user: User,
    pub token: String,
    pub claims: Claims,
}

#[async_trait]
impl FromRequestParts<AppState> for AuthSession {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let token = parts
            .headers
            .get(AUTHORIZATION)
            .ok_or(AuthError::MissingAuthorization)
            .and_then(parse_bearer)
            .map_err(|e| {
                debug!(error = %e, "no usable bearer token");
                AppError::from(e)
            })?;

        let claims = state.jwt.verify(&token).await.map_err(|e| {
            debug!(error = %e, "bearer token rejected");
            AppError::from(e)
        })?;

        // Same rejection as a bad signature: callers learn nothing about the subject.
        let user = state.users.find_by_id(claims.sub).await?.ok_or_else(|| {
            debug!(user_id = %claims.sub, "token subject has no user");
            AppError::Unauthorized
        })?;

        Ok(Self {
            user,
            token,
            claims,
        })
    }
}

fn parse_bearer(value: &HeaderValue) -> AuthResult<String> {
    let raw = value
        .to_str()
        .map_err(|_| AuthError::InvalidAuthorization)?
        .trim();

    let token = raw
        .strip_prefix("Bearer ")
        .or_else(|| raw.strip_prefix("bearer "))
        .ok_or(AuthError::InvalidAuthorization)?
        .trim();

    if token.is_empty() {
        return Err(AuthError::InvalidAuthorization);
    }

    Ok(token.to_owned())
}

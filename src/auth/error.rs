use thiserror::Error;

use crate::error::AppError;

pub type AuthResult<T> = Result<T, AuthError>;

/// Detailed token verification failures. The detail is for server logs; at
/// the HTTP boundary they collapse into [`AppError::Unauthorized`].
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("authorization header missing")]
    MissingAuthorization,
    #[error("authorization header malformed")]
    InvalidAuthorization,
    #[error("failed to decode token header: {0}")]
    InvalidHeader(String),
    #[error("no decoding key registered for kid '{0}'")]
    UnknownKeyId(String),
    #[error("token algorithm {0:?} does not match its key")]
    AlgorithmMismatch(jsonwebtoken::Algorithm),
    #[error("token verification failed: {0}")]
    Verification(String),
    #[error("failed to fetch JWKS: {0}")]
    JwksFetch(String),
    #[error("failed to parse JWKS response: {0}")]
    JwksDecode(String),
    #[error("JWKS key '{kid}' is unusable: {reason}")]
    JwksKey { kid: String, reason: String },
}

impl From<jsonwebtoken::errors::Error> for AuthError {
    fn from(value: jsonwebtoken::errors::Error) -> Self {
        Self::Verification(value.to_string())
    }
}

impl From<AuthError> for AppError {
    fn from(e: AuthError) -> Self {
        match e {
            AuthError::JwksFetch(_) | AuthError::JwksDecode(_) | AuthError::JwksKey { .. } => {
                AppError::Internal(anyhow::Error::new(e))
            }
            _ => AppError::Unauthorized,
        }
    }
}

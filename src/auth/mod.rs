use crate::state::AppState;
use axum::Router;

pub mod claims;
mod dto;
pub mod error;
pub mod extractors;
pub mod guards;
pub mod handlers;
pub mod jwks;
pub mod jwt;
pub mod keys;
pub mod password;
pub mod services;
pub mod tokens;

#[cfg(test)]
pub(crate) mod test_support;

pub fn router() -> Router<AppState> {
    Router::new().merge(handlers::auth_routes())
}

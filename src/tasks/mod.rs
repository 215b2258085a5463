use crate::state::AppState;
use axum::Router;

pub mod dto;
pub mod handlers;
pub mod memory;
pub mod model;
pub mod repo;

pub fn router() -> Router<AppState> {
    Router::new().merge(handlers::task_routes())
}

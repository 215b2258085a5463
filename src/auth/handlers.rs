use axum::{
    extract::State,
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use tracing::{info, instrument};

use crate::{
    auth::{
        dto::{AuthResponse, Empty, LoginRequest, SessionsResponse, SignupRequest, VerifyEmailRequest},
        guards::{Authorized, KnownSession, Session},
        services,
    },
    error::AppResult,
    state::AppState,
    users::dto::UserResponse,
};

pub fn auth_routes() -> Router<AppState> {
    Router::new()
        .route("/auth/signup", post(signup))
        .route("/auth/verify-email", post(verify_email))
        .route("/auth/login", post(login))
        .route("/auth/logout", post(logout))
        .route("/auth/logout-all", post(logout_all))
        .route("/auth/resend-verification", post(resend_verification))
        .route("/auth/sessions", get(sessions))
}

#[instrument(skip(state, payload))]
pub async fn signup(
    State(state): State<AppState>,
    Json(payload): Json<SignupRequest>,
) -> AppResult<(StatusCode, Json<UserResponse>)> {
    let user = services::signup(&state, &payload.name, &payload.email, &payload.password).await?;
    Ok((
        StatusCode::CREATED,
        Json(UserResponse {
            user: (&user).into(),
        }),
    ))
}

#[instrument(skip(state, payload))]
pub async fn verify_email(
    State(state): State<AppState>,
    Json(payload): Json<VerifyEmailRequest>,
) -> AppResult<Json<UserResponse>> {
    let user = services::verify_email(&state, &payload.email, &payload.code).await?;
    Ok(Json(UserResponse {
        user: (&user).into(),
    }))
}

#[instrument(skip(state, payload))]
pub async fn login(
    State(state): State<AppState>,
    Json(payload): Json<LoginRequest>,
) -> AppResult<Json<AuthResponse>> {
    let (issued, user) = services::authenticate(&state, &payload.email, &payload.password).await?;
    Ok(Json(AuthResponse {
        auth_token: issued.token,
        expires_at: issued.expires_at,
        user: (&user).into(),
    }))
}

#[instrument(skip_all, fields(user_id = %auth.user.id))]
pub async fn logout(State(state): State<AppState>, auth: Authorized<Session>) -> AppResult<Json<Empty>> {
    let user = state.tokens.remove_token(auth.user.id, &auth.token).await?;
    info!(sessions = user.tokens.len(), "user logged out");
    Ok(Json(Empty::default()))
}

#[instrument(skip_all, fields(user_id = %auth.user.id))]
pub async fn logout_all(State(state): State<AppState>, auth: Authorized<Session>) -> AppResult<Json<Empty>> {
    state.tokens.clear_tokens(auth.user.id).await?;
    info!("all sessions revoked");
    Ok(Json(Empty::default()))
}

#[instrument(skip_all, fields(user_id = %auth.user.id))]
pub async fn resend_verification(
    State(state): State<AppState>,
    auth: Authorized<Session>,
) -> AppResult<(StatusCode, Json<Empty>)> {
    services::resend_verification(&state, &auth.user).await?;
    Ok((StatusCode::ACCEPTED, Json(Empty::default())))
}

#[instrument(skip_all, fields(user_id = %auth.user.id))]
pub async fn sessions(auth: Authorized<KnownSession>) -> Json<SessionsResponse> {
    let current_expires_at = auth
        .user
        .tokens
        .iter()
        .find(|t| t.token == auth.token)
        .and_then(|t| t.expiry);
    Json(SessionsResponse {
        count: auth.user.tokens.len(),
        current_expires_at,
    })
}

use axum::{
    extract::{DefaultBodyLimit, Multipart, State},
    http::StatusCode,
    response::Redirect,
    routing::get,
    Json, Router,
};
use tracing::{info, instrument};

use crate::{
    auth::guards::{Authorized, Session, VerifiedSession},
    error::{AppError, AppResult},
    state::AppState,
    users::{
        dto::{UpdateProfileRequest, UserResponse},
        services,
    },
};

pub fn user_routes() -> Router<AppState> {
    Router::new()
        .route("/users/me", get(get_me).patch(update_me).delete(delete_me))
        .route(
            "/users/me/avatar",
            get(get_avatar)
                .post(upload_avatar)
                .delete(delete_avatar)
                // Room for the multipart framing around a maximum size image.
                .layer(DefaultBodyLimit::max(services::AVATAR_MAX_BYTES + 64 * 1024)),
        )
}

#[instrument(skip_all, fields(user_id = %auth.user.id))]
pub async fn get_me(auth: Authorized<Session>) -> Json<UserResponse> {
    Json(UserResponse {
        user: (&auth.user).into(),
    })
}

#[instrument(skip_all, fields(user_id = %auth.user.id))]
pub async fn update_me(
    State(state): State<AppState>,
    auth: Authorized<Session>,
    Json(payload): Json<UpdateProfileRequest>,
) -> AppResult<Json<UserResponse>> {
    let user = services::update_profile(&state, &auth.user, payload).await?;
    Ok(Json(UserResponse {
        user: (&user).into(),
    }))
}

#[instrument(skip_all, fields(user_id = %auth.user.id))]
pub async fn delete_me(State(state): State<AppState>, auth: Authorized<Session>) -> AppResult<StatusCode> {
    services::delete_account(&state, &auth.user).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// POST /users/me/avatar (multipart)
/// Field: avatar, one jpeg, png or webp image.
#[instrument(skip_all, fields(user_id = %auth.user.id))]
pub async fn upload_avatar(
    State(state): State<AppState>,
    auth: Authorized<VerifiedSession>,
    mut mp: Multipart,
) -> AppResult<StatusCode> {
    while let Some(field) = mp
        .next_field()
        .await
        .map_err(|e| AppError::bad_request(e.body_text()))?
    {
        if field.name() != Some("avatar") {
            continue;
        }
        let content_type = field
            .content_type()
            .map(str::to_owned)
            .unwrap_or_else(|| "application/octet-stream".into());
        let data = field
            .bytes()
            .await
            .map_err(|e| AppError::bad_request(e.body_text()))?;

        services::upload_avatar(&state, &auth.user, data, &content_type).await?;
        info!("avatar uploaded");
        return Ok(StatusCode::NO_CONTENT);
    }
    Err(AppError::bad_request("avatar is required"))
}

/// 307 to a short lived presigned URL of the avatar.
#[instrument(skip_all, fields(user_id = %auth.user.id))]
pub async fn get_avatar(State(state): State<AppState>, auth: Authorized<Session>) -> AppResult<Redirect> {
    let url = services::avatar_url(&state, &auth.user).await?;
    Ok(Redirect::temporary(&url))
}

#[instrument(skip_all, fields(user_id = %auth.user.id))]
pub async fn delete_avatar(State(state): State<AppState>, auth: Authorized<Session>) -> AppResult<StatusCode> {
    services::remove_avatar(&state, &auth.user).await?;
    Ok(StatusCode::NO_CONTENT)
}

use bytes::Bytes;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::auth::password::hash_password;
use crate::auth::services::{normalize_email, normalize_name, send_verification, validate_password, verification_for};
use crate::error::{AppError, AppResult};
use crate::state::AppState;
use crate::users::dto::UpdateProfileRequest;
use crate::users::model::{ProfileChanges, User};

pub const AVATAR_MAX_BYTES: usize = 1024 * 1024;
pub const AVATAR_URL_TTL_SECS: u64 = 600;

/// Extension for each accepted avatar content type.
pub fn avatar_extension(content_type: &str) -> Option<&'static str> {
    match content_type {
        "image/jpeg" => Some("jpg"),
        "image/png" => Some("png"),
        "image/webp" => Some("webp"),
        _ => None,
    }
}

/// Applies a profile update. A new address must be verified again.
#[instrument(skip_all, fields(user_id = %user.id))]
pub async fn update_profile(state: &AppState, user: &User, req: UpdateProfileRequest) -> AppResult<User> {
    let mut changes = ProfileChanges::default();

    if let Some(name) = req.name.as_deref() {
        changes.name = Some(normalize_name(name)?);
    }
    if let Some(password) = req.password.as_deref() {
        validate_password(password)?;
        changes.password_hash = Some(hash_password(password)?);
    }
    if let Some(email) = req.email.as_deref() {
        let email = normalize_email(email)?;
        if email != user.email.address {
            changes.email = Some((email, verification_for(state)));
        }
    }

    if changes.is_empty() {
        return Ok(user.clone());
    }
    let email_changed = changes.email.is_some();

    let updated = state
        .users
        .update_profile(user.id, changes)
        .await?
        .ok_or(AppError::NotFound("user"))?;

    if email_changed {
        info!(email = %updated.email.address, "email changed; verification required");
        send_verification(state, &updated).await;
    }
    Ok(updated)
}

/// Removes owned tasks, then the user, then the avatar object.
///
/// Each step tolerates having already run, so a retry after a partial
/// failure finishes the job.
#[instrument(skip_all, fields(user_id = %user.id))]
pub async fn delete_account(state: &AppState, user: &User) -> AppResult<()> {
    let removed = state.tasks.delete_by_owner(user.id).await?;
    state.users.delete(user.id).await?;

    if let Some(key) = &user.avatar_key {
        if let Err(e) = state.storage.delete_object(key).await {
            warn!(error = ?e, %key, "avatar cleanup failed");
        }
    }
    info!(tasks_removed = removed, "account deleted");
    Ok(())
}

#[instrument(skip_all, fields(user_id = %user.id, size = body.len()))]
pub async fn upload_avatar(state: &AppState, user: &User, body: Bytes, content_type: &str) -> AppResult<User> {
    let ext = avatar_extension(content_type)
        .ok_or_else(|| AppError::bad_request("avatar must be a jpeg, png or webp image"))?;
    if body.is_empty() {
        return Err(AppError::bad_request("avatar is empty"));
    }
    if body.len() > AVATAR_MAX_BYTES {
        return Err(AppError::bad_request("avatar must be at most 1 MiB"));
    }

    let key = format!("avatars/{}/{}.{}", user.id, Uuid::new_v4(), ext);
    state.storage.put_object(&key, body, content_type).await?;

    let change = state
        .users
        .set_avatar(user.id, Some(key))
        .await?
        .ok_or(AppError::NotFound("user"))?;

    if let Some(old) = &change.previous_key {
        delete_stale_avatar(state, old).await;
    }
    Ok(change.user)
}

async fn delete_stale_avatar(state: &AppState, key: &str) {
    if let Err(e) = state.storage.delete_object(key).await {
        warn!(error = ?e, %key, "stale avatar cleanup failed");
    }
}

pub async fn avatar_url(state: &AppState, user: &User) -> AppResult<String> {
    let key = user.avatar_key.as_deref().ok_or(AppError::NotFound("avatar"))?;
    Ok(state.storage.presign_get(key, AVATAR_URL_TTL_SECS).await?)
}

#[instrument(skip_all, fields(user_id = %user.id))]
pub async fn remove_avatar(state: &AppState, user: &User) -> AppResult<()> {
    if user.avatar_key.is_none() {
        return Ok(());
    }
    let change = state
        .users
        .set_avatar(user.id, None)
        .await?
        .ok_or(AppError::NotFound("user"))?;
    if let Some(old) = &change.previous_key {
        delete_stale_avatar(state, old).await;
    }
    Ok(())
}

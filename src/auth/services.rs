use lazy_static::lazy_static;
use rand::Rng;
use regex::Regex;
use time::{Duration as TimeDuration, OffsetDateTime};
use tracing::{error, info, warn};

use crate::auth::jwt::IssuedToken;
use crate::auth::password::{hash_password, verify_password, MIN_PASSWORD_LEN};
use crate::error::{AppError, AppResult};
use crate::state::AppState;
use crate::users::model::{EmailVerification, NewUser, TokenEntry, User};

pub const INVALID_CODE: &str = "invalid or expired verification code";

pub(crate) fn is_valid_email(email: &str) -> bool {
    lazy_static! {
        static ref EMAIL_RE: Regex = Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").unwrap();
    }
    EMAIL_RE.is_match(email)
}

/// Trims and lowercases, then checks the shape of the address.
pub fn normalize_email(raw: &str) -> AppResult<String> {
    let email = raw.trim().to_lowercase();
    if !is_valid_email(&email) {
        warn!(email = %email, "invalid email");
        return Err(AppError::bad_request("invalid email"));
    }
    Ok(email)
}

pub fn validate_password(plain: &str) -> AppResult<()> {
    if plain.chars().count() < MIN_PASSWORD_LEN {
        return Err(AppError::bad_request(format!(
            "password must be at least {MIN_PASSWORD_LEN} characters"
        )));
    }
    Ok(())
}

pub fn normalize_name(raw: &str) -> AppResult<String> {
    let name = raw.trim();
    if name.is_empty() {
        return Err(AppError::bad_request("name must not be empty"));
    }
    Ok(name.to_string())
}

/// Fresh six digit challenge valid for `ttl`.
pub fn new_verification(ttl: TimeDuration) -> EmailVerification {
    let code = format!("{:06}", rand::thread_rng().gen_range(0..1_000_000u32));
    EmailVerification::new(code, OffsetDateTime::now_utc() + ttl)
}

pub fn verification_for(state: &AppState) -> EmailVerification {
    new_verification(TimeDuration::minutes(state.config.verification_ttl_minutes))
}

/// Delivery problems are logged; the account change they belong to stands.
pub async fn send_verification(state: &AppState, user: &User) {
    let Some(v) = &user.email.verification else {
        return;
    };
    if let Err(e) = state
        .mailer
        .send_verification(&user.email.address, &user.name, &v.code)
        .await
    {
        error!(error = ?e, user_id = %user.id, "verification email failed");
    }
}

pub async fn signup(state: &AppState, name: &str, email: &str, password: &str) -> AppResult<User> {
    let name = normalize_name(name)?;
    let email = normalize_email(email)?;
    validate_password(password)?;

    if state.users.find_by_email(&email).await?.is_some() {
        warn!(email = %email, "email already registered");
        return Err(AppError::Conflict("email address already registered"));
    }

    let password_hash = hash_password(password)?;
    let user = state
        .users
        .create(NewUser {
            name,
            email,
            password_hash,
            verification: verification_for(state),
        })
        .await?;

    info!(user_id = %user.id, email = %user.email.address, "user registered");
    send_verification(state, &user).await;
    Ok(user)
}

/// Confirms the pending challenge. Confirming an already verified address succeeds.
pub async fn verify_email(state: &AppState, email: &str, code: &str) -> AppResult<User> {
    let email = normalize_email(email)?;
    let user = state
        .users
        .find_by_email(&email)
        .await?
        .ok_or_else(|| AppError::bad_request(INVALID_CODE))?;
    if user.email.verified {
        return Ok(user);
    }

    let user = state
        .users
        .confirm_email(user.id, code.trim(), OffsetDateTime::now_utc())
        .await?
        .ok_or_else(|| {
            warn!(user_id = %user.id, "verification code rejected");
            AppError::bad_request(INVALID_CODE)
        })?;
    info!(user_id = %user.id, "email verified");
    Ok(user)
}

pub async fn resend_verification(state: &AppState, user: &User) -> AppResult<()> {
    if user.email.verified {
        return Err(AppError::Conflict("email address already verified"));
    }
    let user = state
        .users
        .set_verification(user.id, verification_for(state))
        .await?
        .ok_or(AppError::NotFound("user"))?;
    send_verification(state, &user).await;
    Ok(())
}

lazy_static! {
    /// Verified against when the email is unknown, so both failure paths cost
    /// one argon2 run.
    static ref DUMMY_HASH: String = hash_password("not-a-real-password").unwrap_or_default();
}

/// Checks credentials, issues a token and records it against the user.
///
/// Unknown email and wrong password are indistinguishable to the caller.
pub async fn authenticate(state: &AppState, email: &str, password: &str) -> AppResult<(IssuedToken, User)> {
    let email = email.trim().to_lowercase();

    let Some(user) = state.users.find_by_email(&email).await? else {
        verify_password(password, &DUMMY_HASH);
        warn!(email = %email, "login unknown email");
        return Err(AppError::Unauthorized);
    };

    if !verify_password(password, &user.password_hash) {
        warn!(email = %email, user_id = %user.id, "login invalid password");
        return Err(AppError::Unauthorized);
    }

    let issued = state.jwt.issue(user.id, &user.email.address)?;
    let user = state
        .tokens
        .add_token(user.id, TokenEntry::new(issued.token.clone(), Some(issued.expires_at)))
        .await?;

    info!(user_id = %user.id, sessions = user.tokens.len(), "user logged in");
    Ok((issued, user))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::users::model::MAX_VERIFICATION_ATTEMPTS;

    #[test]
    fn email_normalization() {
        assert_eq!(normalize_email("  Ada@Example.COM ").unwrap(), "ada@example.com");
        assert!(normalize_email("ada@localhost").is_err());
        assert!(normalize_email("not an email").is_err());
    }

    #[test]
    fn password_and_name_rules() {
        assert!(validate_password("short").is_err());
        assert!(validate_password("long enough").is_ok());
        assert!(normalize_name("   ").is_err());
        assert_eq!(normalize_name(" Ada ").unwrap(), "Ada");
    }

    #[test]
    fn verification_codes_are_six_digits() {
        for _ in 0..50 {
            let v = new_verification(TimeDuration::minutes(5));
            assert_eq!(v.code.len(), 6);
            assert!(v.code.chars().all(|c| c.is_ascii_digit()));
            assert!(v.expiry > OffsetDateTime::now_utc());
        }
    }

    #[tokio::test]
    async fn login_records_token_with_jwt_expiry() {
        let fakes = AppState::fake();
        let state = &fakes.state;
        signup(state, "Ada", "ada@example.com", "correct horse").await.unwrap();

        let (issued, user) = authenticate(state, "ADA@example.com", "correct horse").await.unwrap();
        assert_eq!(user.tokens.len(), 1);
        assert_eq!(user.tokens[0].token, issued.token);
        assert_eq!(user.tokens[0].expiry, Some(issued.expires_at));

        let claims = state.jwt.verify(&issued.token).await.unwrap();
        assert_eq!(claims.sub, user.id);
    }

    #[tokio::test]
    async fn bad_credentials_are_unauthorized() {
        let fakes = AppState::fake();
        let state = &fakes.state;
        signup(state, "Ada", "ada@example.com", "correct horse").await.unwrap();

        assert!(matches!(
            authenticate(state, "ada@example.com", "wrong horse").await,
            Err(AppError::Unauthorized)
        ));
        assert!(matches!(
            authenticate(state, "nobody@example.com", "correct horse").await,
            Err(AppError::Unauthorized)
        ));
    }

    #[tokio::test]
    async fn signup_rejects_duplicate_email() {
        let fakes = AppState::fake();
        let state = &fakes.state;
        signup(state, "Ada", "ada@example.com", "correct horse").await.unwrap();
        assert!(matches!(
            signup(state, "Other", " ADA@example.com", "another pass").await,
            Err(AppError::Conflict(_))
        ));
    }

    #[tokio::test]
    async fn verify_email_flow() {
        let fakes = AppState::fake();
        let state = &fakes.state;
        let user = signup(state, "Ada", "ada@example.com", "correct horse").await.unwrap();
        assert!(!user.email.verified);

        assert!(matches!(
            verify_email(state, "ada@example.com", "not-it").await,
            Err(AppError::BadRequest(_))
        ));

        let code = fakes.mailer.last_code_for("ada@example.com").unwrap();
        let user = verify_email(state, "ada@example.com", &code).await.unwrap();
        assert!(user.email.verified);
        assert!(user.email.verification.is_none());

        // Repeating the request is harmless.
        assert!(verify_email(state, "ada@example.com", &code).await.unwrap().email.verified);
        assert!(matches!(
            resend_verification(state, &user).await,
            Err(AppError::Conflict(_))
        ));
    }

    #[tokio::test]
    async fn too_many_wrong_codes_require_a_resend() {
        let fakes = AppState::fake();
        let state = &fakes.state;
        let user = signup(state, "Ada", "ada@example.com", "correct horse").await.unwrap();
        let code = fakes.mailer.last_code_for("ada@example.com").unwrap();
        let wrong = if code == "000000" { "111111" } else { "000000" };

        for _ in 0..MAX_VERIFICATION_ATTEMPTS {
            assert!(matches!(
                verify_email(state, "ada@example.com", wrong).await,
                Err(AppError::BadRequest(_))
            ));
        }
        assert!(matches!(
            verify_email(state, "ada@example.com", &code).await,
            Err(AppError::BadRequest(_))
        ));

        resend_verification(state, &user).await.unwrap();
        let code = fakes.mailer.last_code_for("ada@example.com").unwrap();
        assert!(verify_email(state, "ada@example.com", &code).await.unwrap().email.verified);
    }

    #[tokio::test]
    async fn resend_replaces_the_code() {
        let fakes = AppState::fake();
        let state = &fakes.state;
        let user = signup(state, "Ada", "ada@example.com", "correct horse").await.unwrap();
        resend_verification(state, &user).await.unwrap();
        assert_eq!(fakes.mailer.sent_count(), 2);

        let latest = fakes.mailer.last_code_for("ada@example.com").unwrap();
        let stored = state.users.find_by_id(user.id).await.unwrap().unwrap();
        assert_eq!(stored.email.verification.unwrap().code, latest);
    }
}

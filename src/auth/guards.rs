use std::marker::PhantomData;

use axum::{async_trait, extract::FromRequestParts, http::request::Parts};
use time::OffsetDateTime;
use tracing::debug;

use crate::auth::claims::Claims;
use crate::auth::extractors::AuthSession;
use crate::auth::tokens;
use crate::error::{AppError, AppResult};
use crate::state::AppState;
use crate::users::model::User;

pub const EMAIL_NOT_VERIFIED: &str = "email address is not verified";

/// Everything a guard may look at.
#[derive(Debug, Clone, Copy)]
pub struct GuardContext<'a> {
    pub user: &'a User,
    pub token: &'a str,
    pub now: OffsetDateTime,
}

pub fn token_ownership(ctx: &GuardContext<'_>) -> bool {
    tokens::is_current(ctx.user, ctx.token)
}

pub fn token_validity(ctx: &GuardContext<'_>) -> bool {
    tokens::is_valid(ctx.user, ctx.token, ctx.now)
}

pub fn email_verified(ctx: &GuardContext<'_>) -> AppResult<()> {
    if ctx.user.email.verified {
        Ok(())
    } else {
        Err(AppError::Forbidden(EMAIL_NOT_VERIFIED))
    }
}

/// Admission checks run after authentication.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Guard {
    TokenOwnership,
    TokenValidity,
    EmailVerified,
}

impl Guard {
    pub fn check(self, ctx: &GuardContext<'_>) -> AppResult<()> {
        let admitted = match self {
            Guard::TokenOwnership => token_ownership(ctx),
            Guard::TokenValidity => token_validity(ctx),
            Guard::EmailVerified => return email_verified(ctx),
        };
        if admitted {
            Ok(())
        } else {
            Err(AppError::Unauthorized)
        }
    }
}

/// Runs `guards` in order and stops at the first rejection.
pub fn evaluate(guards: &[Guard], ctx: &GuardContext<'_>) -> AppResult<()> {
    guards.iter().try_for_each(|guard| {
        guard.check(ctx).map_err(|e| {
            debug!(user_id = %ctx.user.id, ?guard, "guard rejected request");
            e
        })
    })
}

/// Names the guard list of a route.
pub trait Policy: Send + Sync + 'static {
    const GUARDS: &'static [Guard];
}

/// Any unrevoked, unexpired session of the user.
pub struct Session;

impl Policy for Session {
    const GUARDS: &'static [Guard] = &[Guard::TokenValidity];
}

/// An unrevoked, unexpired session of a user with a verified address.
pub struct VerifiedSession;

impl Policy for VerifiedSession {
    const GUARDS: &'static [Guard] = &[Guard::TokenValidity, Guard::EmailVerified];
}

/// Any recorded session, expired or not.
pub struct KnownSession;

impl Policy for KnownSession {
    const GUARDS: &'static [Guard] = &[Guard::TokenOwnership];
}

/// Authenticated request that passed every guard of `P`.
///
/// Handlers of public routes simply do not take this extractor.
pub struct Authorized<P: Policy> {
    pub user: User,
    pub token: String,
    pub claims: Claims,
    _policy: PhantomData<P>,
}

#[async_trait]
impl<P: Policy> FromRequestParts<AppState> for Authorized<P> {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let session = AuthSession::from_request_parts(parts, state).await?;
        let ctx = GuardContext {
            user: &session.user,
            token: &session.token,
            now: OffsetDateTime::now_utc(),
        };
        evaluate(P::GUARDS, &ctx)?;

        Ok(Self {
            user: session.user,
            token: session.token,
            claims: session.claims,
            _policy: PhantomData,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::users::model::{Email, TokenEntry};
    use time::Duration;
    use uuid::Uuid;

    fn user(verified: bool, tokens: Vec<TokenEntry>) -> User {
        let now = OffsetDateTime::now_utc();
        User {
            id: Uuid::new_v4(),
            name: "Barbara".into(),
            password_hash: String::new(),
            email: Email {
                address: "barbara@example.com".into(),
                verified,
                verification: None,
            },
            tokens,
            avatar_key: None,
            created_at: now,
            updated_at: now,
        }
    }

    fn ctx<'a>(user: &'a User, token: &'a str) -> GuardContext<'a> {
        GuardContext {
            user,
            token,
            now: OffsetDateTime::now_utc(),
        }
    }

    #[test]
    fn ownership_requires_membership() {
        let u = user(true, vec![TokenEntry::new("mine", None)]);
        assert!(Guard::TokenOwnership.check(&ctx(&u, "mine")).is_ok());
        assert!(matches!(
            Guard::TokenOwnership.check(&ctx(&u, "theirs")),
            Err(AppError::Unauthorized)
        ));
    }

    #[test]
    fn validity_is_stricter_than_ownership() {
        let past = OffsetDateTime::now_utc() - Duration::seconds(1);
        let u = user(true, vec![TokenEntry::new("old", Some(past))]);
        let c = ctx(&u, "old");
        assert!(token_ownership(&c));
        assert!(!token_validity(&c));
        assert!(evaluate(KnownSession::GUARDS, &c).is_ok());
        assert!(matches!(
            evaluate(Session::GUARDS, &c),
            Err(AppError::Unauthorized)
        ));
    }

    #[test]
    fn unverified_email_is_forbidden_not_unauthorized() {
        let u = user(false, vec![TokenEntry::new("t", None)]);
        let err = evaluate(VerifiedSession::GUARDS, &ctx(&u, "t")).unwrap_err();
        assert!(matches!(err, AppError::Forbidden(EMAIL_NOT_VERIFIED)));
        assert!(evaluate(Session::GUARDS, &ctx(&u, "t")).is_ok());
    }

    #[test]
    fn chain_short_circuits_on_first_failure() {
        // Revoked token and unverified email: validity runs first, so the
        // caller sees the generic rejection.
        let u = user(false, vec![]);
        let err = evaluate(VerifiedSession::GUARDS, &ctx(&u, "gone")).unwrap_err();
        assert!(matches!(err, AppError::Unauthorized));
    }

    #[test]
    fn empty_chain_admits() {
        let u = user(false, vec![]);
        assert!(evaluate(&[], &ctx(&u, "anything")).is_ok());
    }
}

use std::future::Future;
use std::sync::Arc;

use time::OffsetDateTime;
use tracing::{debug, instrument};
use uuid::Uuid;

use crate::error::{AppError, AppResult, StoreResult};
use crate::users::model::{TokenEntry, User};
use crate::users::repo::UserStore;

/// Authoritative set of active bearer tokens per user.
///
/// Mutations run on their own task, so a client disconnect that drops the
/// request future cannot cancel a write the store already accepted.
#[derive(Clone)]
pub struct TokenStore {
    users: Arc<dyn UserStore>,
}

impl TokenStore {
    pub fn new(users: Arc<dyn UserStore>) -> Self {
        Self { users }
    }

    /// Records `entry`; a token value already present is left as is.
    /// Other entries that have already expired are pruned in the same write.
    #[instrument(skip(self, entry))]
    pub async fn add_token(&self, user_id: Uuid, entry: TokenEntry) -> AppResult<User> {
        let users = Arc::clone(&self.users);
        let now = OffsetDateTime::now_utc();
        let user = detached(async move { users.push_token(user_id, entry, now).await })
            .await?
            .ok_or(AppError::NotFound("user"))?;
        debug!(sessions = user.tokens.len(), "token added");
        Ok(user)
    }

    /// Drops every entry with this token value. Removing an absent token succeeds.
    #[instrument(skip(self, token))]
    pub async fn remove_token(&self, user_id: Uuid, token: &str) -> AppResult<User> {
        let users = Arc::clone(&self.users);
        let token = token.to_owned();
        let user = detached(async move { users.pull_token(user_id, &token).await })
            .await?
            .ok_or(AppError::NotFound("user"))?;
        debug!(sessions = user.tokens.len(), "token removed");
        Ok(user)
    }

    #[instrument(skip(self))]
    pub async fn clear_tokens(&self, user_id: Uuid) -> AppResult<User> {
        let users = Arc::clone(&self.users);
        detached(async move { users.clear_tokens(user_id).await })
            .await?
            .ok_or(AppError::NotFound("user"))
    }
}

async fn detached<T, F>(fut: F) -> AppResult<T>
where
    T: Send + 'static,
    F: Future<Output = StoreResult<T>> + Send + 'static,
{
    tokio::spawn(fut)
        .await
        .map_err(|e| AppError::Internal(anyhow::Error::new(e).context("token store task")))?
        .map_err(AppError::from)
}

/// True iff `token` is one of the user's recorded tokens.
pub fn is_current(user: &User, token: &str) -> bool {
    user.tokens.iter().any(|t| t.token == token)
}

/// True iff `token` is recorded and its recorded expiry, if any, is after `now`.
pub fn is_valid(user: &User, token: &str, now: OffsetDateTime) -> bool {
    user.tokens
        .iter()
        .any(|t| t.token == token && t.expiry.map_or(true, |expiry| expiry > now))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::users::memory::MemoryUserStore;
    use crate::users::model::{EmailVerification, NewUser};
    use time::Duration;

    async fn setup() -> (TokenStore, Arc<MemoryUserStore>, User) {
        let users = Arc::new(MemoryUserStore::new());
        let user = users
            .create(NewUser {
                name: "Linus".into(),
                email: "linus@example.com".into(),
                password_hash: "hash".into(),
                verification: EmailVerification::new("000000", OffsetDateTime::now_utc()),
            })
            .await
            .unwrap();
        (TokenStore::new(users.clone()), users, user)
    }

    #[tokio::test]
    async fn add_token_is_idempotent() {
        let (store, _, user) = setup().await;
        store.add_token(user.id, TokenEntry::new("t1", None)).await.unwrap();
        let after = store.add_token(user.id, TokenEntry::new("t1", None)).await.unwrap();
        assert_eq!(after.tokens.iter().filter(|t| t.token == "t1").count(), 1);
    }

    #[tokio::test]
    async fn remove_absent_token_is_noop() {
        let (store, _, user) = setup().await;
        store.add_token(user.id, TokenEntry::new("t1", None)).await.unwrap();
        let after = store.remove_token(user.id, "never-issued").await.unwrap();
        assert_eq!(after.tokens, vec![TokenEntry::new("t1", None)]);
    }

    #[tokio::test]
    async fn login_logout_logout_again() {
        let (store, _, user) = setup().await;
        let after = store.add_token(user.id, TokenEntry::new("T1", None)).await.unwrap();
        assert_eq!(after.tokens.len(), 1);
        let after = store.remove_token(user.id, "T1").await.unwrap();
        assert!(after.tokens.is_empty());
        let after = store.remove_token(user.id, "T1").await.unwrap();
        assert!(after.tokens.is_empty());
    }

    #[tokio::test]
    async fn missing_user_is_not_found() {
        let (store, _, _) = setup().await;
        let err = store
            .add_token(Uuid::new_v4(), TokenEntry::new("t", None))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::NotFound("user")));
        let err = store.remove_token(Uuid::new_v4(), "t").await.unwrap_err();
        assert!(matches!(err, AppError::NotFound("user")));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_adds_and_removes_do_not_lose_updates() {
        let (store, users, user) = setup().await;
        for i in 0..10 {
            store
                .add_token(user.id, TokenEntry::new(format!("old-{i}"), None))
                .await
                .unwrap();
        }

        let mut handles = Vec::new();
        for i in 0..10 {
            let s = store.clone();
            handles.push(tokio::spawn(async move {
                s.add_token(user.id, TokenEntry::new(format!("new-{i}"), None)).await
            }));
            let s = store.clone();
            handles.push(tokio::spawn(async move {
                s.remove_token(user.id, &format!("old-{i}")).await
            }));
        }
        for h in handles {
            h.await.unwrap().unwrap();
        }

        let user = users.find_by_id(user.id).await.unwrap().unwrap();
        let mut tokens: Vec<_> = user.tokens.iter().map(|t| t.token.clone()).collect();
        tokens.sort();
        let mut expected: Vec<_> = (0..10).map(|i| format!("new-{i}")).collect();
        expected.sort();
        assert_eq!(tokens, expected);
    }

    #[tokio::test]
    async fn expired_entry_is_current_but_not_valid() {
        let (store, _, user) = setup().await;
        let now = OffsetDateTime::now_utc();
        store
            .add_token(user.id, TokenEntry::new("fresh", Some(now + Duration::minutes(1))))
            .await
            .unwrap();
        let user_after = store
            .add_token(user.id, TokenEntry::new("stale", Some(now - Duration::minutes(1))))
            .await
            .unwrap();

        assert!(is_current(&user_after, "stale"));
        assert!(!is_valid(&user_after, "stale", now));
        assert!(is_valid(&user_after, "fresh", now));
        assert!(!is_current(&user_after, "unknown"));
        assert!(!is_valid(&user_after, "unknown", now));
    }

    #[tokio::test]
    async fn adding_a_token_prunes_expired_entries() {
        let (store, _, user) = setup().await;
        let now = OffsetDateTime::now_utc();
        store
            .add_token(user.id, TokenEntry::new("stale", Some(now - Duration::minutes(1))))
            .await
            .unwrap();
        store.add_token(user.id, TokenEntry::new("legacy", None)).await.unwrap();

        let after = store
            .add_token(user.id, TokenEntry::new("fresh", Some(now + Duration::hours(1))))
            .await
            .unwrap();
        let tokens: Vec<_> = after.tokens.iter().map(|t| t.token.as_str()).collect();
        assert_eq!(tokens, ["legacy", "fresh"]);
    }

    #[tokio::test]
    async fn entry_without_expiry_stays_valid() {
        let (store, _, user) = setup().await;
        let user = store.add_token(user.id, TokenEntry::new("legacy", None)).await.unwrap();
        assert!(is_valid(&user, "legacy", OffsetDateTime::now_utc() + Duration::days(365)));
    }

    #[tokio::test]
    async fn expiry_equal_to_now_is_not_valid() {
        let (store, _, user) = setup().await;
        let now = OffsetDateTime::now_utc();
        let user = store.add_token(user.id, TokenEntry::new("edge", Some(now))).await.unwrap();
        assert!(!is_valid(&user, "edge", now));
    }
}

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock, RwLockWriteGuard};

use async_trait::async_trait;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::error::{StoreError, StoreResult};
use crate::users::model::{
    AvatarChange, Email, EmailVerification, NewUser, ProfileChanges, TokenEntry, User,
    MAX_VERIFICATION_ATTEMPTS,
};
use crate::users::repo::UserStore;

/// Process-local user store. Each mutation runs under one write lock, which
/// gives the same per-user atomicity as the conditional SQL updates.
#[derive(Default)]
pub struct MemoryUserStore {
    users: RwLock<HashMap<Uuid, User>>,
}

impl MemoryUserStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<Uuid, User>> {
        self.users.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn mutate<F>(&self, id: Uuid, f: F) -> StoreResult<Option<User>>
    where
        F: FnOnce(&mut User),
    {
        let mut users = self.write();
        Ok(users.get_mut(&id).map(|user| {
            f(user);
            user.clone()
        }))
    }
}

#[async_trait]
impl UserStore for MemoryUserStore {
    async fn find_by_id(&self, id: Uuid) -> StoreResult<Option<User>> {
        let users = self.users.read().unwrap_or_else(PoisonError::into_inner);
        Ok(users.get(&id).cloned())
    }

    async fn find_by_email(&self, email: &str) -> StoreResult<Option<User>> {
        let users = self.users.read().unwrap_or_else(PoisonError::into_inner);
        Ok(users.values().find(|u| u.email.address == email).cloned())
    }

    async fn create(&self, new: NewUser) -> StoreResult<User> {
        let mut users = self.write();
        if users.values().any(|u| u.email.address == new.email) {
            return Err(StoreError::DuplicateEmail);
        }
        let now = OffsetDateTime::now_utc();
        let user = User {
            id: Uuid::new_v4(),
            name: new.name,
            password_hash: new.password_hash,
            email: Email {
                address: new.email,
                verified: false,
                verification: Some(new.verification),
            },
            tokens: Vec::new(),
            avatar_key: None,
            created_at: now,
            updated_at: now,
        };
        users.insert(user.id, user.clone());
        Ok(user)
    }

    async fn update_profile(&self, id: Uuid, changes: ProfileChanges) -> StoreResult<Option<User>> {
        let mut users = self.write();
        if let Some((address, _)) = &changes.email {
            if users
                .values()
                .any(|u| u.id != id && &u.email.address == address)
            {
                return Err(StoreError::DuplicateEmail);
            }
        }
        let Some(user) = users.get_mut(&id) else {
            return Ok(None);
        };
        if let Some(name) = changes.name {
            user.name = name;
        }
        if let Some(hash) = changes.password_hash {
            user.password_hash = hash;
        }
        if let Some((address, verification)) = changes.email {
            user.email = Email {
                address,
                verified: false,
                verification: Some(verification),
            };
        }
        user.updated_at = OffsetDateTime::now_utc();
        Ok(Some(user.clone()))
    }

    async fn push_token(
        &self,
        id: Uuid,
        entry: TokenEntry,
        now: OffsetDateTime,
    ) -> StoreResult<Option<User>> {
        self.mutate(id, |user| {
            user.tokens
                .retain(|t| t.token == entry.token || t.expiry.map_or(true, |e| e > now));
            if !user.tokens.iter().any(|t| t.token == entry.token) {
                user.tokens.push(entry);
            }
        })
    }

    async fn pull_token(&self, id: Uuid, token: &str) -> StoreResult<Option<User>> {
        self.mutate(id, |user| user.tokens.retain(|t| t.token != token))
    }

    async fn clear_tokens(&self, id: Uuid) -> StoreResult<Option<User>> {
        self.mutate(id, |user| user.tokens.clear())
    }

    async fn set_verification(
        &self,
        id: Uuid,
        verification: EmailVerification,
    ) -> StoreResult<Option<User>> {
        self.mutate(id, |user| user.email.verification = Some(verification))
    }

    async fn confirm_email(
        &self,
        id: Uuid,
        code: &str,
        now: OffsetDateTime,
    ) -> StoreResult<Option<User>> {
        let mut users = self.write();
        let Some(user) = users.get_mut(&id) else {
            return Ok(None);
        };
        let Some(challenge) = user.email.verification.as_mut() else {
            return Ok(None);
        };
        if challenge.code != code || challenge.expiry <= now {
            challenge.attempts += 1;
            if challenge.attempts >= MAX_VERIFICATION_ATTEMPTS {
                user.email.verification = None;
            }
            return Ok(None);
        }
        user.email.verified = true;
        user.email.verification = None;
        user.updated_at = OffsetDateTime::now_utc();
        Ok(Some(user.clone()))
    }

    async fn set_avatar(&self, id: Uuid, key: Option<String>) -> StoreResult<Option<AvatarChange>> {
        let mut users = self.write();
        let Some(user) = users.get_mut(&id) else {
            return Ok(None);
        };
        let previous_key = std::mem::replace(&mut user.avatar_key, key);
        user.updated_at = OffsetDateTime::now_utc();
        Ok(Some(AvatarChange {
            user: user.clone(),
            previous_key,
        }))
    }

    async fn delete(&self, id: Uuid) -> StoreResult<bool> {
        Ok(self.write().remove(&id).is_some())
    }
}

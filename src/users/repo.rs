use async_trait::async_trait;
use sqlx::{types::Json, FromRow, PgPool};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::error::StoreResult;
use crate::users::model::{
    AvatarChange, Email, EmailVerification, NewUser, ProfileChanges, TokenEntry, User,
    MAX_VERIFICATION_ATTEMPTS,
};

/// Persistence seam for the user aggregate.
///
/// Every mutation is a single conditional update keyed on the user id, so
/// concurrent requests for the same user never overwrite each other's token
/// changes. Methods returning `Option<User>` yield `None` when no user matched.
#[async_trait]
pub trait UserStore: Send + Sync {
    async fn find_by_id(&self, id: Uuid) -> StoreResult<Option<User>>;
    async fn find_by_email(&self, email: &str) -> StoreResult<Option<User>>;
    async fn create(&self, new: NewUser) -> StoreResult<User>;
    async fn update_profile(&self, id: Uuid, changes: ProfileChanges) -> StoreResult<Option<User>>;

    /// Appends `entry` unless a token with the same value is already recorded.
    /// Entries that expired at or before `now` are dropped in the same update.
    async fn push_token(
        &self,
        id: Uuid,
        entry: TokenEntry,
        now: OffsetDateTime,
    ) -> StoreResult<Option<User>>;
    /// Removes every entry whose value equals `token`.
    async fn pull_token(&self, id: Uuid, token: &str) -> StoreResult<Option<User>>;
    async fn clear_tokens(&self, id: Uuid) -> StoreResult<Option<User>>;

    async fn set_verification(
        &self,
        id: Uuid,
        verification: EmailVerification,
    ) -> StoreResult<Option<User>>;
    /// Marks the address verified only if `code` matches an unexpired challenge.
    ///
    /// A miss counts against the challenge, which is discarded after
    /// `MAX_VERIFICATION_ATTEMPTS` misses. Returns `None` on any miss.
    async fn confirm_email(
        &self,
        id: Uuid,
        code: &str,
        now: OffsetDateTime,
    ) -> StoreResult<Option<User>>;

    /// Replaces the avatar key and reports the key it replaced.
    async fn set_avatar(&self, id: Uuid, key: Option<String>) -> StoreResult<Option<AvatarChange>>;
    async fn delete(&self, id: Uuid) -> StoreResult<bool>;
}

macro_rules! user_columns {
    () => {
        "id, name, password_hash, email, email_verified, verification_code, \
         verification_expiry, verification_attempts, tokens, avatar_key, created_at, updated_at"
    };
}

macro_rules! code_matches {
    () => {
        "COALESCE(verification_code = $2 AND verification_expiry > $3, false)"
    };
}

/// Row shape of the `users` table.
#[derive(Debug, FromRow)]
struct UserRow {
    id: Uuid,
    name: String,
    password_hash: String,
    email: String,
    email_verified: bool,
    verification_code: Option<String>,
    verification_expiry: Option<OffsetDateTime>,
    verification_attempts: i32,
    tokens: Json<Vec<TokenEntry>>,
    avatar_key: Option<String>,
    created_at: OffsetDateTime,
    updated_at: OffsetDateTime,
}

#[derive(Debug, FromRow)]
struct AvatarRow {
    #[sqlx(flatten)]
    user: UserRow,
    previous_key: Option<String>,
}

impl From<UserRow> for User {
    fn from(r: UserRow) -> Self {
        let verification = match (r.verification_code, r.verification_expiry) {
            (Some(code), Some(expiry)) => Some(EmailVerification {
                code,
                expiry,
                attempts: r.verification_attempts,
            }),
            _ => None,
        };
        Self {
            id: r.id,
            name: r.name,
            password_hash: r.password_hash,
            email: Email {
                address: r.email,
                verified: r.email_verified,
                verification,
            },
            tokens: r.tokens.0,
            avatar_key: r.avatar_key,
            created_at: r.created_at,
            updated_at: r.updated_at,
        }
    }
}

#[derive(Clone)]
pub struct PgUserStore {
    db: PgPool,
}

impl PgUserStore {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }
}

#[async_trait]
impl UserStore for PgUserStore {
    async fn find_by_id(&self, id: Uuid) -> StoreResult<Option<User>> {
        let row = sqlx::query_as::<_, UserRow>(concat!(
            "SELECT ",
            user_columns!(),
            " FROM users WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.db)
        .await?;
        Ok(row.map(User::from))
    }

    async fn find_by_email(&self, email: &str) -> StoreResult<Option<User>> {
        let row = sqlx::query_as::<_, UserRow>(concat!(
            "SELECT ",
            user_columns!(),
            " FROM users WHERE email = $1"
        ))
        .bind(email)
        .fetch_optional(&self.db)
        .await?;
        Ok(row.map(User::from))
    }

    async fn create(&self, new: NewUser) -> StoreResult<User> {
        let row = sqlx::query_as::<_, UserRow>(concat!(
            r#"
            INSERT INTO users (id, name, password_hash, email, verification_code, verification_expiry)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING "#,
            user_columns!()
        ))
        .bind(Uuid::new_v4())
        .bind(&new.name)
        .bind(&new.password_hash)
        .bind(&new.email)
        .bind(&new.verification.code)
        .bind(new.verification.expiry)
        .fetch_one(&self.db)
        .await?;
        Ok(row.into())
    }

    async fn update_profile(&self, id: Uuid, changes: ProfileChanges) -> StoreResult<Option<User>> {
        let (email, code, expiry) = match changes.email {
            Some((address, v)) => (Some(address), Some(v.code), Some(v.expiry)),
            None => (None, None, None),
        };
        let row = sqlx::query_as::<_, UserRow>(concat!(
            r#"
            UPDATE users
               SET name = COALESCE($2, name),
                   password_hash = COALESCE($3, password_hash),
                   email = COALESCE($4, email),
                   email_verified = CASE WHEN $4::text IS NULL THEN email_verified ELSE false END,
                   verification_code = CASE WHEN $4::text IS NULL THEN verification_code ELSE $5 END,
                   verification_expiry = CASE WHEN $4::text IS NULL THEN verification_expiry ELSE $6 END,
                   verification_attempts = CASE WHEN $4::text IS NULL THEN verification_attempts ELSE 0 END,
                   updated_at = now()
             WHERE id = $1
            RETURNING "#,
            user_columns!()
        ))
        .bind(id)
        .bind(changes.name)
        .bind(changes.password_hash)
        .bind(email)
        .bind(code)
        .bind(expiry)
        .fetch_optional(&self.db)
        .await?;
        Ok(row.map(User::from))
    }

    async fn push_token(
        &self,
        id: Uuid,
        entry: TokenEntry,
        now: OffsetDateTime,
    ) -> StoreResult<Option<User>> {
        let row = sqlx::query_as::<_, UserRow>(concat!(
            r#"
            UPDATE users
               SET tokens = COALESCE(
                     (SELECT jsonb_agg(t.e ORDER BY t.i)
                        FROM jsonb_array_elements(tokens) WITH ORDINALITY AS t(e, i)
                       WHERE t.e->>'token' = $2
                          OR jsonb_typeof(t.e->'expiry') IS DISTINCT FROM 'number'
                          OR (t.e->>'expiry')::bigint > $4),
                     '[]'::jsonb)
                   || CASE
                        WHEN tokens @> jsonb_build_array(jsonb_build_object('token', $2::text))
                          THEN '[]'::jsonb
                        ELSE jsonb_build_array(
                               jsonb_build_object('token', $2::text, 'expiry', $3::bigint))
                      END
             WHERE id = $1
            RETURNING "#,
            user_columns!()
        ))
        .bind(id)
        .bind(&entry.token)
        .bind(entry.expiry.map(|e| e.unix_timestamp()))
        .bind(now.unix_timestamp())
        .fetch_optional(&self.db)
        .await?;
        Ok(row.map(User::from))
    }

    async fn pull_token(&self, id: Uuid, token: &str) -> StoreResult<Option<User>> {
        let row = sqlx::query_as::<_, UserRow>(concat!(
            r#"
            UPDATE users
               SET tokens = COALESCE(
                     (SELECT jsonb_agg(t.e ORDER BY t.i)
                        FROM jsonb_array_elements(tokens) WITH ORDINALITY AS t(e, i)
                       WHERE t.e->>'token' <> $2),
                     '[]'::jsonb)
             WHERE id = $1
            RETURNING "#,
            user_columns!()
        ))
        .bind(id)
        .bind(token)
        .fetch_optional(&self.db)
        .await?;
        Ok(row.map(User::from))
    }

    async fn clear_tokens(&self, id: Uuid) -> StoreResult<Option<User>> {
        let row = sqlx::query_as::<_, UserRow>(concat!(
            "UPDATE users SET tokens = '[]'::jsonb WHERE id = $1 RETURNING ",
            user_columns!()
        ))
        .bind(id)
        .fetch_optional(&self.db)
        .await?;
        Ok(row.map(User::from))
    }

    async fn set_verification(
        &self,
        id: Uuid,
        verification: EmailVerification,
    ) -> StoreResult<Option<User>> {
        let row = sqlx::query_as::<_, UserRow>(concat!(
            r#"
            UPDATE users
               SET verification_code = $2, verification_expiry = $3, verification_attempts = 0
             WHERE id = $1
            RETURNING "#,
            user_columns!()
        ))
        .bind(id)
        .bind(&verification.code)
        .bind(verification.expiry)
        .fetch_optional(&self.db)
        .await?;
        Ok(row.map(User::from))
    }

    async fn confirm_email(
        &self,
        id: Uuid,
        code: &str,
        now: OffsetDateTime,
    ) -> StoreResult<Option<User>> {
        let row = sqlx::query_as::<_, UserRow>(concat!(
            r#"
            UPDATE users
               SET email_verified = email_verified OR "#,
            code_matches!(),
            r#",
                   verification_attempts = CASE WHEN "#,
            code_matches!(),
            r#" THEN 0 ELSE verification_attempts + 1 END,
                   verification_code = CASE WHEN "#,
            code_matches!(),
            r#" OR verification_attempts + 1 >= $4 THEN NULL ELSE verification_code END,
                   verification_expiry = CASE WHEN "#,
            code_matches!(),
            r#" OR verification_attempts + 1 >= $4 THEN NULL ELSE verification_expiry END,
                   updated_at = CASE WHEN "#,
            code_matches!(),
            r#" THEN now() ELSE updated_at END
             WHERE id = $1
               AND verification_code IS NOT NULL
            RETURNING "#,
            user_columns!()
        ))
        .bind(id)
        .bind(code)
        .bind(now)
        .bind(MAX_VERIFICATION_ATTEMPTS)
        .fetch_optional(&self.db)
        .await?;
        // Every SET expression sees the pre-update row, so a hit is exactly
        // the case where the returned row is verified.
        Ok(row.map(User::from).filter(|u| u.email.verified))
    }

    async fn set_avatar(&self, id: Uuid, key: Option<String>) -> StoreResult<Option<AvatarChange>> {
        // The locking read waits out concurrent writers, so `previous_key` is
        // the value this update actually replaced.
        let row = sqlx::query_as::<_, AvatarRow>(concat!(
            r#"
            WITH prev AS (
                SELECT id AS prev_id, avatar_key AS previous_key
                  FROM users
                 WHERE id = $1
                   FOR UPDATE
            )
            UPDATE users
               SET avatar_key = $2, updated_at = now()
              FROM prev
             WHERE id = prev.prev_id
            RETURNING "#,
            user_columns!(),
            ", prev.previous_key"
        ))
        .bind(id)
        .bind(key)
        .fetch_optional(&self.db)
        .await?;
        Ok(row.map(|r| AvatarChange {
            user: r.user.into(),
            previous_key: r.previous_key,
        }))
    }

    async fn delete(&self, id: Uuid) -> StoreResult<bool> {
        let res = sqlx::query("DELETE FROM users WHERE id = $1")
            .bind(id)
            .execute(&self.db)
            .await?;
        Ok(res.rows_affected() > 0)
    }
}

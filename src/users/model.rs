use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

/// One active bearer token recorded against a user.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TokenEntry {
    pub token: String,
    #[serde(default, with = "time::serde::timestamp::option")]
    pub expiry: Option<OffsetDateTime>,
}

impl TokenEntry {
    pub fn new(token: impl Into<String>, expiry: Option<OffsetDateTime>) -> Self {
        Self {
            token: token.into(),
            expiry,
        }
    }
}

/// Wrong codes a challenge tolerates before it is discarded.
pub const MAX_VERIFICATION_ATTEMPTS: i32 = 5;

/// Pending email verification challenge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmailVerification {
    pub code: String,
    pub expiry: OffsetDateTime,
    /// Wrong codes submitted against this challenge so far.
    pub attempts: i32,
}

impl EmailVerification {
    pub fn new(code: impl Into<String>, expiry: OffsetDateTime) -> Self {
        Self {
            code: code.into(),
            expiry,
            attempts: 0,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Email {
    pub address: String,
    pub verified: bool,
    pub verification: Option<EmailVerification>,
}

/// User aggregate as held by the user store. Only `PublicUser` leaves the process.
#[derive(Debug, Clone)]
pub struct User {
    pub id: Uuid,
    pub name: String,
    pub password_hash: String,
    pub email: Email,
    pub tokens: Vec<TokenEntry>,
    pub avatar_key: Option<String>,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

/// Fields needed to insert a new user.
#[derive(Debug, Clone)]
pub struct NewUser {
    pub name: String,
    pub email: String,
    pub password_hash: String,
    pub verification: EmailVerification,
}

/// Result of replacing the avatar key.
#[derive(Debug, Clone)]
pub struct AvatarChange {
    pub user: User,
    /// Key that was stored right before the update.
    pub previous_key: Option<String>,
}

/// Partial profile update; `None` leaves the field untouched.
#[derive(Debug, Clone, Default)]
pub struct ProfileChanges {
    pub name: Option<String>,
    pub password_hash: Option<String>,
    /// A new address resets verification to the given challenge.
    pub email: Option<(String, EmailVerification)>,
}

impl ProfileChanges {
    pub fn is_empty(&self) -> bool {
        self.name.is_none() && self.password_hash.is_none() && self.email.is_none()
    }
}

/// Public part of the user returned to the client.
#[derive(Debug, Clone, Serialize)]
pub struct PublicUser {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    pub email_verified: bool,
    pub has_avatar: bool,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

impl From<&User> for PublicUser {
    fn from(u: &User) -> Self {
        Self {
            id: u.id,
            name: u.name.clone(),
            email: u.email.address.clone(),
            email_verified: u.email.verified,
            has_avatar: u.avatar_key.is_some(),
            created_at: u.created_at,
            updated_at: u.updated_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn public_user_never_carries_secrets() {
        let now = OffsetDateTime::now_utc();
        let user = User {
            id: Uuid::new_v4(),
            name: "Ada".into(),
            password_hash: "$argon2id$v=19$secret".into(),
            email: Email {
                address: "ada@example.com".into(),
                verified: false,
                verification: Some(EmailVerification::new("123456", now)),
            },
            tokens: vec![TokenEntry::new("abc.def.ghi", None)],
            avatar_key: None,
            created_at: now,
            updated_at: now,
        };

        let json = serde_json::to_string(&PublicUser::from(&user)).unwrap();
        assert!(json.contains("ada@example.com"));
        assert!(!json.contains("argon2"));
        assert!(!json.contains("abc.def.ghi"));
        assert!(!json.contains("123456"));
    }

    #[test]
    fn token_entry_expiry_is_optional_in_json() {
        let entry: TokenEntry = serde_json::from_str(r#"{"token":"t"}"#).unwrap();
        assert_eq!(entry.expiry, None);

        let entry: TokenEntry = serde_json::from_str(r#"{"token":"t","expiry":1700000000}"#).unwrap();
        assert_eq!(entry.expiry.map(|e| e.unix_timestamp()), Some(1_700_000_000));
    }
}

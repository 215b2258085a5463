use std::sync::Arc;

use anyhow::Context;
use jsonwebtoken::{decode, decode_header, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use time::{Duration as TimeDuration, OffsetDateTime};
use tracing::debug;
use uuid::Uuid;

use crate::auth::claims::Claims;
use crate::auth::error::{AuthError, AuthResult};
use crate::auth::jwks::JwksFetcher;
use crate::auth::keys::{KeySet, RefreshPolicy};
use crate::config::{JwtConfig, SigningAlgorithm};

/// A freshly signed bearer token and the instant its `exp` claim names.
#[derive(Debug, Clone)]
pub struct IssuedToken {
    pub token: String,
    pub expires_at: OffsetDateTime,
}

/// Signing key, verification key set and claim policy.
pub struct JwtKeys {
    encoding: EncodingKey,
    header: Header,
    pub issuer: String,
    pub audience: String,
    pub ttl: TimeDuration,
    pub leeway: u64,
    keys: Arc<KeySet>,
}

impl JwtKeys {
    pub fn from_config(cfg: &JwtConfig) -> anyhow::Result<Self> {
        let (encoding, decoding, algorithm) = match cfg.algorithm {
            SigningAlgorithm::HS256 => {
                let secret = cfg.secret.as_deref().context("JWT_SECRET is not set")?;
                (
                    EncodingKey::from_secret(secret.as_bytes()),
                    DecodingKey::from_secret(secret.as_bytes()),
                    Algorithm::HS256,
                )
            }
            SigningAlgorithm::RS256 => {
                let private = cfg.private_key_pem.as_deref().context("RSA private key is not set")?;
                let public = cfg.public_key_pem.as_deref().context("RSA public key is not set")?;
                (
                    EncodingKey::from_rsa_pem(private.as_bytes()).context("parse RSA private key")?,
                    DecodingKey::from_rsa_pem(public.as_bytes()).context("parse RSA public key")?,
                    Algorithm::RS256,
                )
            }
        };

        let policy = RefreshPolicy {
            interval: std::time::Duration::from_secs(cfg.jwks_refresh_minutes * 60),
            min_interval: std::time::Duration::from_secs(cfg.jwks_min_refresh_seconds),
        };
        let mut keys = KeySet::new(policy).with_local(cfg.key_id.clone(), decoding, algorithm);
        if let Some(url) = &cfg.jwks_url {
            keys = keys.with_jwks(JwksFetcher::new(url.as_str())?);
        }

        let mut header = Header::new(algorithm);
        header.kid = cfg.key_id.clone();

        Ok(Self {
            encoding,
            header,
            issuer: cfg.issuer.clone(),
            audience: cfg.audience.clone(),
            ttl: TimeDuration::minutes(cfg.ttl_minutes),
            leeway: cfg.leeway_seconds,
            keys: Arc::new(keys),
        })
    }

    pub fn key_set(&self) -> &Arc<KeySet> {
        &self.keys
    }

    /// Signs a token for `user_id`. Each call yields a distinct token value.
    pub fn issue(&self, user_id: Uuid, email: &str) -> anyhow::Result<IssuedToken> {
        let now = OffsetDateTime::now_utc();
        let claims = Claims {
            sub: user_id,
            email: email.to_string(),
            iat: now.unix_timestamp(),
            exp: (now + self.ttl).unix_timestamp(),
            iss: self.issuer.clone(),
            aud: self.audience.clone(),
            jti: Some(Uuid::new_v4()),
        };
        let token = encode(&self.header, &claims, &self.encoding)?;
        let expires_at = OffsetDateTime::from_unix_timestamp(claims.exp)?;
        debug!(user_id = %user_id, "jwt signed");
        Ok(IssuedToken { token, expires_at })
    }

    /// Checks signature, algorithm, `exp`, `iss` and `aud`.
    pub async fn verify(&self, token: &str) -> AuthResult<Claims> {
        let header = decode_header(token).map_err(|e| AuthError::InvalidHeader(e.to_string()))?;
        let key = self.keys.resolve(header.kid.as_deref()).await?;
        if header.alg != key.algorithm {
            return Err(AuthError::AlgorithmMismatch(header.alg));
        }

        let mut validation = Validation::new(key.algorithm);
        validation.set_audience(std::slice::from_ref(&self.audience));
        validation.set_issuer(std::slice::from_ref(&self.issuer));
        validation.set_required_spec_claims(&["exp", "sub", "iss", "aud"]);
        validation.leeway = self.leeway;

        let data = decode::<Claims>(token, &key.key, &validation)?;
        debug!(user_id = %data.claims.sub, "jwt verified");
        Ok(data.claims)
    }
}

#[cfg(test)]
pub(crate) fn test_config(secret: &str) -> JwtConfig {
    JwtConfig {
        algorithm: SigningAlgorithm::HS256,
        secret: Some(secret.into()),
        private_key_pem: None,
        public_key_pem: None,
        key_id: None,
        issuer: "test-issuer".into(),
        audience: "test-aud".into(),
        ttl_minutes: 5,
        leeway_seconds: 0,
        jwks_url: None,
        jwks_refresh_minutes: 15,
        jwks_min_refresh_seconds: 30,
    }
}

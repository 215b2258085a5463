use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::{Duration, Instant};

use jsonwebtoken::{Algorithm, DecodingKey};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::auth::error::{AuthError, AuthResult};
use crate::auth::jwks::JwksFetcher;

/// A decoding key together with the only algorithm it may verify.
#[derive(Clone)]
pub struct VerifyingKey {
    pub key: DecodingKey,
    pub algorithm: Algorithm,
}

/// How often the remote key set is reloaded.
#[derive(Debug, Clone, Copy)]
pub struct RefreshPolicy {
    /// Period of the background reload.
    pub interval: Duration,
    /// Lower bound between two reloads triggered by an unknown `kid`.
    pub min_interval: Duration,
}

impl Default for RefreshPolicy {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(15 * 60),
            min_interval: Duration::from_secs(30),
        }
    }
}

/// Verification keys: locally configured ones plus a cache of a remote JWKS.
///
/// Built once at startup and shared behind an `Arc`.
pub struct KeySet {
    default_key: Option<VerifyingKey>,
    local: HashMap<String, VerifyingKey>,
    remote: RwLock<HashMap<String, DecodingKey>>,
    jwks: Option<JwksFetcher>,
    policy: RefreshPolicy,
    last_refresh: Mutex<Option<Instant>>,
}

impl KeySet {
    pub fn new(policy: RefreshPolicy) -> Self {
        Self {
            default_key: None,
            local: HashMap::new(),
            remote: RwLock::new(HashMap::new()),
            jwks: None,
            policy,
            last_refresh: Mutex::new(None),
        }
    }

    /// Registers a local key. Tokens without a `kid` header are checked
    /// against the first local key registered.
    pub fn with_local(mut self, kid: Option<String>, key: DecodingKey, algorithm: Algorithm) -> Self {
        let key = VerifyingKey { key, algorithm };
        if self.default_key.is_none() {
            self.default_key = Some(key.clone());
        }
        if let Some(kid) = kid {
            self.local.insert(kid, key);
        }
        self
    }

    pub fn with_jwks(mut self, fetcher: JwksFetcher) -> Self {
        self.jwks = Some(fetcher);
        self
    }

    pub fn has_remote(&self, kid: &str) -> bool {
        self.remote
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(kid)
    }

    fn remote_key(&self, kid: &str) -> Option<VerifyingKey> {
        let remote = self.remote.read().unwrap_or_else(PoisonError::into_inner);
        remote.get(kid).map(|key| VerifyingKey {
            key: key.clone(),
            algorithm: Algorithm::RS256,
        })
    }

    /// Finds the key for a token header `kid`, reloading the JWKS once if the
    /// id is unknown and the last reload is older than `min_interval`.
    pub async fn resolve(&self, kid: Option<&str>) -> AuthResult<VerifyingKey> {
        let Some(kid) = kid else {
            return self
                .default_key
                .clone()
                .ok_or_else(|| AuthError::InvalidHeader("token has no kid".into()));
        };

        if let Some(key) = self.local.get(kid) {
            return Ok(key.clone());
        }
        if let Some(key) = self.remote_key(kid) {
            return Ok(key);
        }
        if self.jwks.is_some() && self.refresh_if_stale().await? {
            if let Some(key) = self.remote_key(kid) {
                return Ok(key);
            }
        }
        Err(AuthError::UnknownKeyId(kid.to_string()))
    }

    /// Reloads the remote key set unconditionally. Returns the number of keys
    /// now cached; an empty response keeps the previous keys.
    pub async fn refresh(&self) -> AuthResult<usize> {
        let mut last = self.last_refresh.lock().await;
        self.reload(&mut last).await
    }

    async fn refresh_if_stale(&self) -> AuthResult<bool> {
        let mut last = self.last_refresh.lock().await;
        if last.is_some_and(|at| at.elapsed() < self.policy.min_interval) {
            debug!("jwks refresh skipped, too recent");
            return Ok(false);
        }
        self.reload(&mut last).await?;
        Ok(true)
    }

    async fn reload(&self, last: &mut Option<Instant>) -> AuthResult<usize> {
        let Some(fetcher) = &self.jwks else {
            return Ok(0);
        };
        *last = Some(Instant::now());
        let keys = fetcher.fetch().await?;
        let mut remote = self.remote.write().unwrap_or_else(PoisonError::into_inner);
        if !keys.is_empty() {
            remote.clear();
            remote.extend(keys);
        }
        info!(url = fetcher.url(), keys = remote.len(), "jwks refreshed");
        Ok(remote.len())
    }

    /// Spawns the periodic reload task when a JWKS endpoint is configured.
    pub fn spawn_refresh(self: &Arc<Self>) -> Option<tokio::task::JoinHandle<()>> {
        self.jwks.as_ref()?;
        let keys = Arc::clone(self);
        Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(keys.policy.interval);
            loop {
                ticker.tick().await;
                if let Err(e) = keys.refresh().await {
                    warn!(error = %e, "periodic jwks refresh failed");
                }
            }
        }))
    }
}

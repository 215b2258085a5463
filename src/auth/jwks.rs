use std::time::Duration;

use jsonwebtoken::DecodingKey;
use reqwest::Client;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::auth::error::{AuthError, AuthResult};

const FETCH_TIMEOUT: Duration = Duration::from_secs(5);

/// Downloads RSA verification keys from a remote JWKS endpoint.
#[derive(Clone)]
pub struct JwksFetcher {
    client: Client,
    url: String,
}

impl JwksFetcher {
    pub fn new(url: impl Into<String>) -> AuthResult<Self> {
        let client = Client::builder()
            .timeout(FETCH_TIMEOUT)
            .build()
            .map_err(|err| AuthError::JwksFetch(err.to_string()))?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Returns `(kid, key)` pairs for every usable RS256 key in the set.
    ///
    /// Keys of other types and malformed RSA entries are skipped. The fetch
    /// fails only when a malformed entry leaves no usable key at all.
    pub async fn fetch(&self) -> AuthResult<Vec<(String, DecodingKey)>> {
        let response = self
            .client
            .get(&self.url)
            .send()
            .await
            .map_err(|err| AuthError::JwksFetch(err.to_string()))?;

        if !response.status().is_success() {
            return Err(AuthError::JwksFetch(format!(
                "HTTP {} from {}",
                response.status(),
                self.url
            )));
        }

        let body: JwksResponse = response
            .json()
            .await
            .map_err(|err| AuthError::JwksDecode(err.to_string()))?;

        let mut keys = Vec::new();
        let mut rejected = None;
        for key in body.keys {
            let Some(kid) = key.kid else {
                debug!("skipping JWKS entry without kid");
                continue;
            };
            if key.kty.as_deref().unwrap_or("RSA") != "RSA"
                || key.alg.as_deref().is_some_and(|alg| alg != "RS256")
                || key.use_.as_deref().is_some_and(|u| u != "sig")
            {
                debug!(kid, "skipping non RS256 signing key");
                continue;
            }
            let decoding = match (key.n, key.e) {
                (Some(n), Some(e)) => {
                    DecodingKey::from_rsa_components(&n, &e).map_err(|err| err.to_string())
                }
                _ => Err("missing RSA components".to_string()),
            };
            match decoding {
                Ok(decoding) => keys.push((kid, decoding)),
                Err(reason) => {
                    warn!(kid, %reason, "skipping malformed JWKS key");
                    rejected = Some(AuthError::JwksKey { kid, reason });
                }
            }
        }

        match rejected {
            Some(err) if keys.is_empty() => Err(err),
            _ => Ok(keys),
        }
    }
}

#[derive(Debug, Deserialize)]
struct JwksResponse {
    keys: Vec<JwkEntry>,
}

#[derive(Debug, Deserialize)]
struct JwkEntry {
    kid: Option<String>,
    kty: Option<String>,
    alg: Option<String>,
    #[serde(rename = "use")]
    use_: Option<String>,
    n: Option<String>,
    e: Option<String>,
}

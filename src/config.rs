use anyhow::Context;
use serde::Deserialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub enum SigningAlgorithm {
    HS256,
    RS256,
}

impl std::str::FromStr for SigningAlgorithm {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "HS256" => Ok(Self::HS256),
            "RS256" => Ok(Self::RS256),
            other => anyhow::bail!("unsupported JWT_ALGORITHM '{other}'"),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct JwtConfig {
    pub algorithm: SigningAlgorithm,
    /// HMAC secret, required for HS256.
    pub secret: Option<String>,
    /// PEM encoded RSA private key, required for RS256.
    pub private_key_pem: Option<String>,
    /// PEM encoded RSA public key matching `private_key_pem`.
    pub public_key_pem: Option<String>,
    pub key_id: Option<String>,
    pub issuer: String,
    pub audience: String,
    pub ttl_minutes: i64,
    pub leeway_seconds: u64,
    pub jwks_url: Option<String>,
    pub jwks_refresh_minutes: u64,
    pub jwks_min_refresh_seconds: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct S3Config {
    pub endpoint: String,
    pub bucket: String,
    pub access_key: String,
    pub secret_key: String,
    pub region: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// Without a database URL the service keeps its data in memory.
    pub database_url: Option<String>,
    pub jwt: JwtConfig,
    pub s3: S3Config,
    pub verification_ttl_minutes: i64,
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.into())
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse::<T>().ok())
        .unwrap_or(default)
}

fn read_pem(key: &str) -> anyhow::Result<Option<String>> {
    match std::env::var(key) {
        Ok(path) => std::fs::read_to_string(&path)
            .with_context(|| format!("read {key} at {path}"))
            .map(Some),
        Err(_) => Ok(None),
    }
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let database_url = std::env::var("DATABASE_URL").ok();

        let algorithm = env_or("JWT_ALGORITHM", "HS256").parse::<SigningAlgorithm>()?;
        let jwt = JwtConfig {
            algorithm,
            secret: std::env::var("JWT_SECRET").ok(),
            private_key_pem: read_pem("JWT_PRIVATE_KEY_PATH")?,
            public_key_pem: read_pem("JWT_PUBLIC_KEY_PATH")?,
            key_id: std::env::var("JWT_KEY_ID").ok(),
            issuer: env_or("JWT_ISSUER", "taskd"),
            audience: env_or("JWT_AUDIENCE", "taskd-users"),
            ttl_minutes: env_parse("JWT_TTL_MINUTES", 60 * 24 * 7),
            leeway_seconds: env_parse("JWT_LEEWAY_SECONDS", 30),
            jwks_url: std::env::var("JWKS_URL").ok(),
            jwks_refresh_minutes: env_parse("JWKS_REFRESH_MINUTES", 15),
            jwks_min_refresh_seconds: env_parse("JWKS_MIN_REFRESH_SECONDS", 30),
        };
        match jwt.algorithm {
            SigningAlgorithm::HS256 if jwt.secret.is_none() => {
                anyhow::bail!("JWT_SECRET is required for HS256")
            }
            SigningAlgorithm::RS256
                if jwt.private_key_pem.is_none() || jwt.public_key_pem.is_none() =>
            {
                anyhow::bail!("JWT_PRIVATE_KEY_PATH and JWT_PUBLIC_KEY_PATH are required for RS256")
            }
            _ => {}
        }

        let s3 = S3Config {
            endpoint: env_or("S3_ENDPOINT", "http://localhost:9000"),
            bucket: env_or("S3_BUCKET", "avatars"),
            access_key: env_or("S3_ACCESS_KEY", "minioadmin"),
            secret_key: env_or("S3_SECRET_KEY", "minioadmin"),
            region: env_or("S3_REGION", "us-east-1"),
        };

        Ok(Self {
            database_url,
            jwt,
            s3,
            verification_ttl_minutes: env_parse("VERIFICATION_TTL_MINUTES", 60 * 24),
        })
    }
}

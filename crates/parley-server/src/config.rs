//! Server configuration loaded from environment variables.
//!
//! Every setting has a default so the server starts with zero configuration
//! in development. In production the two secrets must be provided.

use std::fmt;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;

use anyhow::bail;

use parley_shared::constants::{DEFAULT_HISTORY_LIMIT, DEFAULT_HTTP_PORT, DEFAULT_SALT_LENGTH};
use parley_shared::{CipherAlgorithm, CryptoConfig, KdfParams};

const DEV_JWT_SECRET: &str = "parley-dev-jwt-secret";
const DEV_CRYPTO_SECRET: &str = "parley-dev-crypto-secret";

/// Deployment mode. Development adds diagnostics to outbound error events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Environment {
    Development,
    Production,
}

impl Environment {
    pub fn is_development(self) -> bool {
        self == Environment::Development
    }
}

impl FromStr for Environment {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "development" | "dev" => Ok(Environment::Development),
            "production" | "prod" => Ok(Environment::Production),
            other => Err(format!("unknown environment '{other}'")),
        }
    }
}

/// Server configuration.
#[derive(Clone)]
pub struct ServerConfig {
    /// Socket address for the HTTP / WebSocket server.
    /// Env: `HTTP_ADDR`
    /// Default: `0.0.0.0:8080`
    pub http_addr: SocketAddr,

    /// SQLite database file.
    /// Env: `DATABASE_PATH`
    /// Default: `./parley.db`
    pub database_path: PathBuf,

    /// Env: `APP_ENV` (`development` / `production`)
    /// Default: `production`
    pub environment: Environment,

    /// HS256 secret used to verify bearer tokens.
    /// Env: `JWT_SECRET`
    pub jwt_secret: Option<String>,

    /// Shared secret the message-at-rest keys are derived from.
    /// Env: `CRYPTO_SECRET`
    pub crypto_secret: Option<String>,

    /// Env: `CRYPTO_ALGORITHM` (`xchacha20-poly1305` / `aes-256-gcm`)
    pub crypto_algorithm: String,

    /// Env: `CRYPTO_SALT_LENGTH`
    /// Default: `16`
    pub salt_length: usize,

    /// Env: `CRYPTO_IV_LENGTH`
    /// Default: the cipher's nonce size.
    pub iv_length: Option<usize>,

    /// Env: `KDF_MEMORY_KIB`, `KDF_ITERATIONS`, `KDF_PARALLELISM`
    pub kdf: KdfParams,

    /// Messages returned by `load-chat`.
    /// Env: `HISTORY_LIMIT`
    /// Default: `50`
    pub history_limit: u32,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_addr: ([0, 0, 0, 0], DEFAULT_HTTP_PORT).into(),
            database_path: PathBuf::from("./parley.db"),
            environment: Environment::Production,
            jwt_secret: None,
            crypto_secret: None,
            crypto_algorithm: CipherAlgorithm::XChaCha20Poly1305.name().to_string(),
            salt_length: DEFAULT_SALT_LENGTH,
            iv_length: None,
            kdf: KdfParams::default(),
            history_limit: DEFAULT_HISTORY_LIMIT,
        }
    }
}

impl ServerConfig {
    /// Load configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`from_env`](Self::from_env) with an injectable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        parse_into(&lookup, "HTTP_ADDR", &mut config.http_addr);
        parse_into(&lookup, "APP_ENV", &mut config.environment);

        if let Some(path) = lookup("DATABASE_PATH") {
            config.database_path = PathBuf::from(path);
        }

        config.jwt_secret = lookup("JWT_SECRET").filter(|s| !s.is_empty());
        config.crypto_secret = lookup("CRYPTO_SECRET").filter(|s| !s.is_empty());

        // Validated when the crypto engine is built; a bad name stops startup.
        if let Some(algorithm) = lookup("CRYPTO_ALGORITHM") {
            config.crypto_algorithm = algorithm;
        }

        parse_into(&lookup, "CRYPTO_SALT_LENGTH", &mut config.salt_length);

        let mut iv_length = 0usize;
        if parse_into(&lookup, "CRYPTO_IV_LENGTH", &mut iv_length) {
            config.iv_length = Some(iv_length);
        }

        parse_into(&lookup, "KDF_MEMORY_KIB", &mut config.kdf.memory_kib);
        parse_into(&lookup, "KDF_ITERATIONS", &mut config.kdf.iterations);
        parse_into(&lookup, "KDF_PARALLELISM", &mut config.kdf.parallelism);
        parse_into(&lookup, "HISTORY_LIMIT", &mut config.history_limit);

        // RUST_LOG is handled directly by tracing-subscriber's EnvFilter.

        config
    }

    pub fn jwt_secret(&self) -> anyhow::Result<String> {
        self.secret(&self.jwt_secret, "JWT_SECRET", DEV_JWT_SECRET)
    }

    pub fn crypto_config(&self) -> anyhow::Result<CryptoConfig> {
        Ok(CryptoConfig {
            secret: self.secret(&self.crypto_secret, "CRYPTO_SECRET", DEV_CRYPTO_SECRET)?,
            algorithm: self.crypto_algorithm.clone(),
            salt_length: self.salt_length,
            iv_length: self.iv_length,
            kdf: self.kdf,
        })
    }

    fn secret(
        &self,
        value: &Option<String>,
        name: &str,
        dev_fallback: &str,
    ) -> anyhow::Result<String> {
        match value {
            Some(secret) => Ok(secret.clone()),
            None if self.environment.is_development() => {
                tracing::warn!(variable = name, "Secret not set, using development default");
                Ok(dev_fallback.to_string())
            }
            None => bail!("{name} must be set in production"),
        }
    }
}

impl fmt::Debug for ServerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerConfig")
            .field("http_addr", &self.http_addr)
            .field("database_path", &self.database_path)
            .field("environment", &self.environment)
            .field("jwt_secret", &self.jwt_secret.as_ref().map(|_| "<redacted>"))
            .field("crypto_secret", &self.crypto_secret.as_ref().map(|_| "<redacted>"))
            .field("crypto_algorithm", &self.crypto_algorithm)
            .field("salt_length", &self.salt_length)
            .field("iv_length", &self.iv_length)
            .field("kdf", &self.kdf)
            .field("history_limit", &self.history_limit)
            .finish()
    }
}

/// Parse `key` into `target`. Invalid values are logged and ignored.
fn parse_into<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str, target: &mut T) -> bool
where
    T: FromStr,
    T::Err: fmt::Display,
{
    let Some(raw) = lookup(key) else {
        return false;
    };
    match raw.trim().parse::<T>() {
        Ok(value) => {
            *target = value;
            true
        }
        Err(e) => {
            tracing::warn!(variable = key, value = %raw, error = %e, "Invalid value, using default");
            false
        }
    }
}

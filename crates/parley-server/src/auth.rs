//! Connection authentication.
//!
//! A connection is admitted once, at handshake time, from the bearer token in
//! its `authorization` header. Every later event on the connection is trusted
//! to come from the user resolved here.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use axum::http::HeaderMap;
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use parley_shared::models::User;
use parley_shared::types::UserId;
use parley_store::UserRepository;

use crate::error::GatewayError;

const AUTHORIZATION: &str = "authorization";
const BEARER_SCHEME: &str = "bearer";

// ---------------------------------------------------------------------------
// Handshake metadata
// ---------------------------------------------------------------------------

/// Key/value metadata sent at connect time. Keys are case-insensitive.
#[derive(Debug, Clone, Default)]
pub struct Handshake {
    headers: HashMap<String, String>,
}

impl Handshake {
    pub fn from_pairs<K, V>(pairs: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: AsRef<str>,
        V: Into<String>,
    {
        Self {
            headers: pairs
                .into_iter()
                .map(|(k, v)| (k.as_ref().to_ascii_lowercase(), v.into()))
                .collect(),
        }
    }

    /// Headers that are not valid UTF-8 are skipped.
    pub fn from_header_map(headers: &HeaderMap) -> Self {
        Self::from_pairs(
            headers
                .iter()
                .filter_map(|(name, value)| Some((name.as_str(), value.to_str().ok()?))),
        )
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.headers.get(&key.to_ascii_lowercase()).map(String::as_str)
    }

    /// The credential from `authorization`, scheme prefix stripped.
    /// `None` when the header is absent or nothing is left after stripping.
    pub fn bearer_token(&self) -> Option<&str> {
        let raw = self.get(AUTHORIZATION)?.trim();
        let token = match raw.split_once(char::is_whitespace) {
            Some((scheme, rest)) if scheme.eq_ignore_ascii_case(BEARER_SCHEME) => rest,
            None if raw.eq_ignore_ascii_case(BEARER_SCHEME) => "",
            _ => raw,
        };
        let token = token.trim();
        (!token.is_empty()).then_some(token)
    }
}

// ---------------------------------------------------------------------------
// Token verification
// ---------------------------------------------------------------------------

/// Why a token was refused. Only ever logged; clients just see
/// "Unauthenticated".
#[derive(Debug, Error)]
#[error("invalid token: {0}")]
pub struct InvalidToken(pub String);

#[async_trait]
pub trait TokenVerifier: Send + Sync {
    async fn verify(&self, token: &str) -> Result<UserId, InvalidToken>;
}

/// Claims carried by access tokens.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// User id.
    pub sub: String,
    pub exp: i64,
    #[serde(default)]
    pub iat: i64,
}

/// HS256 verifier for tokens issued by the account service.
pub struct JwtVerifier {
    key: DecodingKey,
    validation: Validation,
}

impl JwtVerifier {
    pub fn new(secret: &str) -> Self {
        Self {
            key: DecodingKey::from_secret(secret.as_bytes()),
            validation: Validation::new(Algorithm::HS256),
        }
    }
}

#[async_trait]
impl TokenVerifier for JwtVerifier {
    async fn verify(&self, token: &str) -> Result<UserId, InvalidToken> {
        let data = decode::<Claims>(token, &self.key, &self.validation)
            .map_err(|e| InvalidToken(e.to_string()))?;
        UserId::parse(&data.claims.sub)
            .map_err(|_| InvalidToken("subject is not a user id".to_string()))
    }
}

// ---------------------------------------------------------------------------
// Gate
// ---------------------------------------------------------------------------

/// Admits or rejects a connection attempt.
#[derive(Clone)]
pub struct AuthGate {
    verifier: Arc<dyn TokenVerifier>,
    users: Arc<dyn UserRepository>,
}

impl AuthGate {
    pub fn new(verifier: Arc<dyn TokenVerifier>, users: Arc<dyn UserRepository>) -> Self {
        Self { verifier, users }
    }

    /// Resolve the user behind the handshake's bearer token.
    ///
    /// Missing, malformed, expired and forged tokens, as well as tokens for
    /// deleted accounts, all collapse into [`GatewayError::Unauthenticated`].
    pub async fn authenticate(&self, handshake: &Handshake) -> Result<User, GatewayError> {
        let Some(token) = handshake.bearer_token() else {
            warn!("Handshake rejected: no bearer token");
            return Err(GatewayError::Unauthenticated);
        };

        let user_id = self.verifier.verify(token).await.map_err(|e| {
            warn!(reason = %e, "Handshake rejected: token refused");
            GatewayError::Unauthenticated
        })?;

        match self.users.find_user_by_id(user_id).await? {
            Some(user) => {
                debug!(user = %user.id.short(), "Handshake accepted");
                Ok(user)
            }
            None => {
                warn!(user = %user_id.short(), "Handshake rejected: unknown user");
                Err(GatewayError::Unauthenticated)
            }
        }
    }
}

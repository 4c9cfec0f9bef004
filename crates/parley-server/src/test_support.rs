//! Shared fixtures for the server's unit tests.

use std::sync::Arc;

use chrono::{Duration, Utc};
use jsonwebtoken::{encode, EncodingKey, Header};

use parley_shared::models::{Chat, User};
use parley_shared::types::UserId;
use parley_shared::{CryptoConfig, CryptoEngine, Decryptor, KdfParams};
use parley_store::{Database, SqliteRepository};

use crate::auth::{AuthGate, Claims, Handshake, JwtVerifier};
use crate::gateway::Gateway;
use crate::registry::ConnectionRegistry;
use crate::service::MessageService;

pub const JWT_SECRET: &str = "test-jwt-secret";

/// Engine with cheap Argon2 parameters.
pub fn engine() -> CryptoEngine {
    let config = CryptoConfig {
        kdf: KdfParams::new(64, 1, 1),
        ..CryptoConfig::new("test-crypto-secret")
    };
    CryptoEngine::new(&config).unwrap()
}

pub fn sign_token(user_id: UserId, ttl: Duration) -> String {
    let now = Utc::now();
    sign_token_with(
        JWT_SECRET,
        &Claims {
            sub: user_id.to_string(),
            exp: (now + ttl).timestamp(),
            iat: now.timestamp(),
        },
    )
}

pub fn sign_token_with(secret: &str, claims: &Claims) -> String {
    encode(
        &Header::default(),
        claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
    .unwrap()
}

pub fn handshake_for(user: &User) -> Handshake {
    let token = sign_token(user.id, Duration::hours(1));
    Handshake::from_pairs([("Authorization", format!("Bearer {token}"))])
}

pub struct Fixture {
    pub repo: Arc<SqliteRepository>,
    pub engine: CryptoEngine,
    pub gate: AuthGate,
    pub service: MessageService,
    pub gateway: Gateway,
    pub alice: User,
    pub bob: User,
    /// Not a member of `chat`.
    pub carol: User,
    /// Direct chat between alice and bob.
    pub chat: Chat,
}

pub async fn fixture() -> Fixture {
    fixture_with_diagnostics(false).await
}

pub async fn fixture_with_diagnostics(diagnostics: bool) -> Fixture {
    let repo = Arc::new(SqliteRepository::new(Database::open_in_memory().unwrap()));

    let (users, chat) = repo
        .with_db(|db| {
            let mut users = Vec::new();
            for name in ["alice", "bob", "carol"] {
                let user = User {
                    id: UserId::new(),
                    username: name.to_string(),
                    created_at: Utc::now(),
                };
                db.insert_user(&user)?;
                users.push(user);
            }
            let chat = db.create_direct_chat(users[0].id, users[1].id)?;
            Ok((users, chat))
        })
        .await
        .unwrap();

    let [alice, bob, carol]: [User; 3] = users.try_into().unwrap();

    let engine = engine();
    let gate = AuthGate::new(Arc::new(JwtVerifier::new(JWT_SECRET)), repo.clone());
    let service = MessageService::new(repo.clone(), Decryptor::new(engine.clone()), 50);
    let gateway = Gateway::new(
        gate.clone(),
        ConnectionRegistry::new(),
        service.clone(),
        engine.clone(),
        diagnostics,
    );

    Fixture {
        repo,
        engine,
        gate,
        service,
        gateway,
        alice,
        bob,
        carol,
        chat,
    }
}

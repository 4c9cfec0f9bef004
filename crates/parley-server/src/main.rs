//! # parley-server
//!
//! Messaging backend binary:
//! - **WebSocket gateway** (`/ws`) admitting bearer-token authenticated
//!   connections and fanning new messages out to every online chat member
//! - **Encryption at rest** of message text (Argon2id + AEAD)
//! - **SQLite store** for users, direct chats and messages
//! - **REST endpoints** for health checks and server info

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tracing::info;
use tracing_subscriber::EnvFilter;

use parley_server::api::{self, AppState};
use parley_server::auth::{AuthGate, JwtVerifier};
use parley_server::config::ServerConfig;
use parley_server::gateway::Gateway;
use parley_server::registry::ConnectionRegistry;
use parley_server::service::MessageService;
use parley_shared::{CryptoEngine, Decryptor};
use parley_store::{Database, SqliteRepository};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // -----------------------------------------------------------------------
    // 1. Initialize tracing (respects RUST_LOG env var)
    // -----------------------------------------------------------------------
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,parley_server=debug")),
        )
        .init();

    info!("Starting Parley server v{}", env!("CARGO_PKG_VERSION"));

    // -----------------------------------------------------------------------
    // 2. Load configuration
    // -----------------------------------------------------------------------
    let config = ServerConfig::from_env();
    info!(?config, "Loaded configuration");

    let jwt_secret = config.jwt_secret()?;
    let crypto_config = config.crypto_config()?;

    // -----------------------------------------------------------------------
    // 3. Initialize subsystems
    // -----------------------------------------------------------------------

    // A bad cipher name or IV length stops startup here.
    let engine = CryptoEngine::new(&crypto_config).context("Invalid crypto configuration")?;
    info!(
        algorithm = %engine.algorithm(),
        salt_length = engine.salt_length(),
        iv_length = engine.iv_length(),
        "Crypto engine ready"
    );

    let db = Database::open_at(&config.database_path)
        .with_context(|| format!("Failed to open database at {}", config.database_path.display()))?;
    let repo = Arc::new(SqliteRepository::new(db));

    let gate = AuthGate::new(Arc::new(JwtVerifier::new(&jwt_secret)), repo.clone());
    let registry = ConnectionRegistry::new();
    let messages = MessageService::new(repo, Decryptor::new(engine.clone()), config.history_limit);
    let gateway = Gateway::new(
        gate,
        registry.clone(),
        messages,
        engine,
        config.environment.is_development(),
    );

    let http_addr = config.http_addr;
    let app_state = AppState {
        gateway,
        config: Arc::new(config),
    };

    // -----------------------------------------------------------------------
    // 4. Spawn background tasks
    // -----------------------------------------------------------------------

    // Periodic sweep of registry entries whose socket writer is gone (every minute)
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(60));
        loop {
            interval.tick().await;
            registry.prune_closed().await;
        }
    });

    // -----------------------------------------------------------------------
    // 5. Run the HTTP / WebSocket server (blocks until shutdown)
    // -----------------------------------------------------------------------
    tokio::select! {
        result = api::serve(app_state, http_addr) => {
            if let Err(e) = result {
                tracing::error!(error = %e, "HTTP server failed");
                return Err(e);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down");
        }
    }

    Ok(())
}

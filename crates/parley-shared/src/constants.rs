/// Application name
pub const APP_NAME: &str = "Parley";

/// XChaCha20-Poly1305 nonce size in bytes
pub const XCHACHA_NONCE_SIZE: usize = 24;

/// AES-256-GCM nonce size in bytes
pub const AES_GCM_NONCE_SIZE: usize = 12;

/// Symmetric key size in bytes (both supported ciphers use 256-bit keys)
pub const SYMMETRIC_KEY_SIZE: usize = 32;

/// Default salt length prepended to every encrypted payload
pub const DEFAULT_SALT_LENGTH: usize = 16;

/// Argon2 refuses salts shorter than this
pub const MIN_SALT_LENGTH: usize = 8;

/// Argon2id defaults (OWASP baseline): 19 MiB, 2 passes, 1 lane
pub const DEFAULT_KDF_MEMORY_KIB: u32 = 19 * 1024;
pub const DEFAULT_KDF_ITERATIONS: u32 = 2;
pub const DEFAULT_KDF_PARALLELISM: u32 = 1;

/// Maximum plaintext message length in characters
pub const MAX_MESSAGE_LENGTH: usize = 4096;

/// Default number of messages returned when loading a chat
pub const DEFAULT_HISTORY_LIMIT: u32 = 50;

/// Default HTTP port (server)
pub const DEFAULT_HTTP_PORT: u16 = 8080;

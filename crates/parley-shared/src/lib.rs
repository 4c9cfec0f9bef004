//! # parley-shared
//!
//! Types shared by the Parley store and server: identifiers, domain models,
//! the at-rest message cipher, the shape-aware decryptor and the JSON event
//! protocol spoken over live connections.

pub mod constants;
pub mod crypto;
pub mod decrypt;
pub mod error;
pub mod models;
pub mod protocol;
pub mod types;

pub use crypto::{CipherAlgorithm, CryptoConfig, CryptoEngine, KdfParams};
pub use decrypt::{Decryptable, Decryptor};
pub use error::CryptoError;

//! At-rest encryption of message text.
//!
//! Every payload is self-describing apart from the shared secret:
//! `base64(salt || iv || ciphertext)`. A fresh salt and IV are drawn for each
//! call, the key is stretched from the secret and the salt with Argon2id, and
//! the text is sealed with an AEAD cipher so any modification is rejected on
//! the way back.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use aes_gcm::Aes256Gcm;
use argon2::{Algorithm, Argon2, Params, Version};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use chacha20poly1305::{
    aead::{Aead, KeyInit},
    XChaCha20Poly1305, XNonce,
};
use rand::RngCore;
use zeroize::Zeroizing;

use crate::constants::{
    AES_GCM_NONCE_SIZE, DEFAULT_KDF_ITERATIONS, DEFAULT_KDF_MEMORY_KIB, DEFAULT_KDF_PARALLELISM,
    DEFAULT_SALT_LENGTH, MIN_SALT_LENGTH, SYMMETRIC_KEY_SIZE, XCHACHA_NONCE_SIZE,
};
use crate::error::CryptoError;

type DerivedKey = Zeroizing<[u8; SYMMETRIC_KEY_SIZE]>;

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Symmetric ciphers accepted by `CRYPTO_ALGORITHM`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CipherAlgorithm {
    XChaCha20Poly1305,
    Aes256Gcm,
}

impl CipherAlgorithm {
    /// IV (nonce) length the cipher requires.
    pub fn nonce_len(self) -> usize {
        match self {
            CipherAlgorithm::XChaCha20Poly1305 => XCHACHA_NONCE_SIZE,
            CipherAlgorithm::Aes256Gcm => AES_GCM_NONCE_SIZE,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            CipherAlgorithm::XChaCha20Poly1305 => "xchacha20-poly1305",
            CipherAlgorithm::Aes256Gcm => "aes-256-gcm",
        }
    }
}

impl FromStr for CipherAlgorithm {
    type Err = CryptoError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "xchacha20-poly1305" | "xchacha20poly1305" => Ok(CipherAlgorithm::XChaCha20Poly1305),
            "aes-256-gcm" | "aes256gcm" => Ok(CipherAlgorithm::Aes256Gcm),
            other => Err(CryptoError::InvalidConfig(format!(
                "unsupported cipher algorithm '{other}'"
            ))),
        }
    }
}

impl fmt::Display for CipherAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Argon2id cost parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KdfParams {
    /// Memory cost in KiB.
    pub memory_kib: u32,
    /// Number of passes.
    pub iterations: u32,
    /// Degree of parallelism (lanes).
    pub parallelism: u32,
}

impl KdfParams {
    pub fn new(memory_kib: u32, iterations: u32, parallelism: u32) -> Self {
        Self {
            memory_kib,
            iterations,
            parallelism,
        }
    }
}

impl Default for KdfParams {
    fn default() -> Self {
        Self::new(
            DEFAULT_KDF_MEMORY_KIB,
            DEFAULT_KDF_ITERATIONS,
            DEFAULT_KDF_PARALLELISM,
        )
    }
}

/// Everything needed to build a [`CryptoEngine`].
///
/// The algorithm is kept as the raw configured name so that a typo surfaces
/// as a [`CryptoError::InvalidConfig`] when the engine is built.
#[derive(Clone)]
pub struct CryptoConfig {
    pub secret: String,
    pub algorithm: String,
    pub salt_length: usize,
    /// `None` means "whatever the cipher needs".
    pub iv_length: Option<usize>,
    pub kdf: KdfParams,
}

impl CryptoConfig {
    pub fn new(secret: impl Into<String>) -> Self {
        Self {
            secret: secret.into(),
            algorithm: CipherAlgorithm::XChaCha20Poly1305.name().to_string(),
            salt_length: DEFAULT_SALT_LENGTH,
            iv_length: None,
            kdf: KdfParams::default(),
        }
    }
}

impl fmt::Debug for CryptoConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CryptoConfig")
            .field("secret", &"<redacted>")
            .field("algorithm", &self.algorithm)
            .field("salt_length", &self.salt_length)
            .field("iv_length", &self.iv_length)
            .field("kdf", &self.kdf)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

struct EngineInner {
    secret: Zeroizing<Vec<u8>>,
    algorithm: CipherAlgorithm,
    salt_length: usize,
    iv_length: usize,
    params: Params,
}

/// Encrypts and decrypts message text with a process-wide shared secret.
///
/// Cheap to clone; clones share the same secret and parameters.
#[derive(Clone)]
pub struct CryptoEngine {
    inner: Arc<EngineInner>,
}

impl CryptoEngine {
    /// Validate `config` and build the engine.
    pub fn new(config: &CryptoConfig) -> Result<Self, CryptoError> {
        if config.secret.is_empty() {
            return Err(CryptoError::InvalidConfig(
                "encryption secret must not be empty".into(),
            ));
        }

        let algorithm: CipherAlgorithm = config.algorithm.parse()?;

        if config.salt_length < MIN_SALT_LENGTH {
            return Err(CryptoError::InvalidConfig(format!(
                "salt length {} is below the minimum of {MIN_SALT_LENGTH}",
                config.salt_length
            )));
        }

        let iv_length = config.iv_length.unwrap_or(algorithm.nonce_len());
        if iv_length != algorithm.nonce_len() {
            return Err(CryptoError::InvalidConfig(format!(
                "{algorithm} needs a {}-byte IV, configured {iv_length}",
                algorithm.nonce_len()
            )));
        }

        let params = Params::new(
            config.kdf.memory_kib,
            config.kdf.iterations,
            config.kdf.parallelism,
            Some(SYMMETRIC_KEY_SIZE),
        )
        .map_err(|e| CryptoError::InvalidConfig(format!("argon2 parameters: {e}")))?;

        Ok(Self {
            inner: Arc::new(EngineInner {
                secret: Zeroizing::new(config.secret.as_bytes().to_vec()),
                algorithm,
                salt_length: config.salt_length,
                iv_length,
                params,
            }),
        })
    }

    pub fn algorithm(&self) -> CipherAlgorithm {
        self.inner.algorithm
    }

    pub fn salt_length(&self) -> usize {
        self.inner.salt_length
    }

    pub fn iv_length(&self) -> usize {
        self.inner.iv_length
    }

    /// Encrypt `plaintext`, returning `base64(salt || iv || ciphertext)`.
    pub fn encrypt(&self, plaintext: &str) -> Result<String, CryptoError> {
        let salt = random_bytes(self.inner.salt_length);
        let iv = random_bytes(self.inner.iv_length);
        let key = self.derive_key(&salt)?;

        let ciphertext = self.seal(&key, &iv, plaintext.as_bytes())?;

        let mut output = Vec::with_capacity(salt.len() + iv.len() + ciphertext.len());
        output.extend_from_slice(&salt);
        output.extend_from_slice(&iv);
        output.extend_from_slice(&ciphertext);
        Ok(BASE64.encode(output))
    }

    /// Reverse of [`encrypt`](Self::encrypt).
    pub fn decrypt(&self, payload: &str) -> Result<String, CryptoError> {
        let data = BASE64
            .decode(payload.trim())
            .map_err(|e| CryptoError::MalformedPayload(format!("invalid base64: {e}")))?;

        let header_len = self.inner.salt_length + self.inner.iv_length;
        if data.len() < header_len {
            return Err(CryptoError::MalformedPayload(format!(
                "payload is {} bytes, need at least {header_len}",
                data.len()
            )));
        }

        let (salt, rest) = data.split_at(self.inner.salt_length);
        let (iv, ciphertext) = rest.split_at(self.inner.iv_length);

        let key = self.derive_key(salt)?;
        let plaintext = Zeroizing::new(self.open(&key, iv, ciphertext)?);

        String::from_utf8(plaintext.to_vec())
            .map_err(|_| CryptoError::MalformedPayload("plaintext is not valid UTF-8".into()))
    }

    fn derive_key(&self, salt: &[u8]) -> Result<DerivedKey, CryptoError> {
        let argon2 = Argon2::new(
            Algorithm::Argon2id,
            Version::V0x13,
            self.inner.params.clone(),
        );

        let mut key = Zeroizing::new([0u8; SYMMETRIC_KEY_SIZE]);
        argon2
            .hash_password_into(&self.inner.secret, salt, &mut key[..])
            .map_err(|e| CryptoError::KeyDerivation(e.to_string()))?;
        Ok(key)
    }

    fn seal(&self, key: &DerivedKey, iv: &[u8], plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        match self.inner.algorithm {
            CipherAlgorithm::XChaCha20Poly1305 => {
                let cipher = XChaCha20Poly1305::new_from_slice(&key[..])
                    .map_err(|_| CryptoError::EncryptionFailed)?;
                cipher
                    .encrypt(XNonce::from_slice(iv), plaintext)
                    .map_err(|_| CryptoError::EncryptionFailed)
            }
            CipherAlgorithm::Aes256Gcm => {
                let cipher = Aes256Gcm::new_from_slice(&key[..])
                    .map_err(|_| CryptoError::EncryptionFailed)?;
                cipher
                    .encrypt(aes_gcm::Nonce::from_slice(iv), plaintext)
                    .map_err(|_| CryptoError::EncryptionFailed)
            }
        }
    }

    fn open(&self, key: &DerivedKey, iv: &[u8], ciphertext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        match self.inner.algorithm {
            CipherAlgorithm::XChaCha20Poly1305 => {
                let cipher = XChaCha20Poly1305::new_from_slice(&key[..])
                    .map_err(|_| CryptoError::DecryptionFailed)?;
                cipher
                    .decrypt(XNonce::from_slice(iv), ciphertext)
                    .map_err(|_| CryptoError::DecryptionFailed)
            }
            CipherAlgorithm::Aes256Gcm => {
                let cipher = Aes256Gcm::new_from_slice(&key[..])
                    .map_err(|_| CryptoError::DecryptionFailed)?;
                cipher
                    .decrypt(aes_gcm::Nonce::from_slice(iv), ciphertext)
                    .map_err(|_| CryptoError::DecryptionFailed)
            }
        }
    }
}

impl fmt::Debug for CryptoEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CryptoEngine")
            .field("algorithm", &self.inner.algorithm)
            .field("salt_length", &self.inner.salt_length)
            .field("iv_length", &self.inner.iv_length)
            .finish_non_exhaustive()
    }
}

fn random_bytes(len: usize) -> Vec<u8> {
    let mut bytes = vec![0u8; len];
    rand::rngs::OsRng.fill_bytes(&mut bytes);
    bytes
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config(secret: &str) -> CryptoConfig {
        CryptoConfig {
            kdf: KdfParams::new(64, 1, 1),
            ..CryptoConfig::new(secret)
        }
    }

    fn engine(secret: &str) -> CryptoEngine {
        CryptoEngine::new(&test_config(secret)).unwrap()
    }

    #[test]
    fn test_encrypt_decrypt_roundtrip() {
        let engine = engine("correct horse battery staple");
        for plaintext in ["", "hi", "Parley, plain and simple!", "emoji \u{1F510} ok"] {
            let payload = engine.encrypt(plaintext).unwrap();
            assert_eq!(engine.decrypt(&payload).unwrap(), plaintext);
        }
    }

    #[test]
    fn test_same_plaintext_gives_different_payloads() {
        let engine = engine("secret");
        let a = engine.encrypt("hello").unwrap();
        let b = engine.encrypt("hello").unwrap();

        assert_ne!(a, b);
        assert_eq!(engine.decrypt(&a).unwrap(), "hello");
        assert_eq!(engine.decrypt(&b).unwrap(), "hello");
    }

    #[test]
    fn test_payload_layout() {
        let engine = engine("secret");
        let payload = engine.encrypt("test").unwrap();
        let raw = BASE64.decode(&payload).unwrap();
        // salt (16) + iv (24) + ciphertext (4 + 16 tag)
        assert_eq!(raw.len(), DEFAULT_SALT_LENGTH + XCHACHA_NONCE_SIZE + 4 + 16);
    }

    #[test]
    fn test_ciphertext_does_not_contain_plaintext() {
        let engine = engine("secret");
        let payload = engine.encrypt("attack at dawn").unwrap();
        assert_ne!(payload, "attack at dawn");
        let raw = BASE64.decode(&payload).unwrap();
        assert!(!raw
            .windows("attack".len())
            .any(|w| w == "attack".as_bytes()));
    }

    #[test]
    fn test_flipping_any_byte_is_detected() {
        let engine = engine("secret");
        let payload = engine.encrypt("tamper me").unwrap();
        let raw = BASE64.decode(&payload).unwrap();

        for i in 0..raw.len() {
            let mut tampered = raw.clone();
            tampered[i] ^= 0x01;
            let result = engine.decrypt(&BASE64.encode(&tampered));
            assert!(
                matches!(result, Err(ref e) if e.is_decryption_error()),
                "byte {i} flip was not detected"
            );
        }
    }

    #[test]
    fn test_wrong_secret_fails() {
        let payload = engine("secret-one").encrypt("Secret message").unwrap();
        let err = engine("secret-two").decrypt(&payload).unwrap_err();
        assert!(matches!(err, CryptoError::DecryptionFailed));
    }

    #[test]
    fn test_short_payload_fails() {
        let engine = engine("secret");
        let short = BASE64.encode([0u8; 10]);
        assert!(matches!(
            engine.decrypt(&short),
            Err(CryptoError::MalformedPayload(_))
        ));
        assert!(matches!(
            engine.decrypt(""),
            Err(CryptoError::MalformedPayload(_))
        ));
    }

    #[test]
    fn test_invalid_base64_fails() {
        let engine = engine("secret");
        assert!(matches!(
            engine.decrypt("***not base64***"),
            Err(CryptoError::MalformedPayload(_))
        ));
    }

    #[test]
    fn test_aes_gcm_roundtrip() {
        let config = CryptoConfig {
            algorithm: "aes-256-gcm".into(),
            ..test_config("secret")
        };
        let engine = CryptoEngine::new(&config).unwrap();
        assert_eq!(engine.iv_length(), AES_GCM_NONCE_SIZE);

        let payload = engine.encrypt("over gcm").unwrap();
        assert_eq!(engine.decrypt(&payload).unwrap(), "over gcm");
    }

    #[test]
    fn test_unknown_algorithm_is_config_error() {
        let config = CryptoConfig {
            algorithm: "rot13".into(),
            ..test_config("secret")
        };
        assert!(matches!(
            CryptoEngine::new(&config),
            Err(CryptoError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_iv_length_must_match_cipher() {
        let config = CryptoConfig {
            iv_length: Some(16),
            ..test_config("secret")
        };
        assert!(matches!(
            CryptoEngine::new(&config),
            Err(CryptoError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_short_salt_and_empty_secret_rejected() {
        let config = CryptoConfig {
            salt_length: 4,
            ..test_config("secret")
        };
        assert!(CryptoEngine::new(&config).is_err());
        assert!(CryptoEngine::new(&test_config("")).is_err());
    }
}

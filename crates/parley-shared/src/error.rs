use thiserror::Error;

#[derive(Error, Debug)]
pub enum CryptoError {
    #[error("Invalid crypto configuration: {0}")]
    InvalidConfig(String),

    #[error("Key derivation failed: {0}")]
    KeyDerivation(String),

    #[error("Encryption failed")]
    EncryptionFailed,

    #[error("Decryption failed: invalid ciphertext or wrong key")]
    DecryptionFailed,

    #[error("Malformed encrypted payload: {0}")]
    MalformedPayload(String),
}

impl CryptoError {
    /// True for every failure that means "this payload cannot be read back".
    pub fn is_decryption_error(&self) -> bool {
        matches!(
            self,
            CryptoError::DecryptionFailed | CryptoError::MalformedPayload(_)
        )
    }
}

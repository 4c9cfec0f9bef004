//! Shape-aware decryption of outgoing responses.
//!
//! Message text sits at different depths depending on the response: directly
//! on a [`DirectChatMessage`] or [`ChatMessage`], or on every element of
//! [`DirectChat::messages`]. Each shape implements [`Decryptable`] and knows
//! which of its fields carry ciphertext, so callers only ever write
//! `decryptor.decrypt(value)`.

use crate::crypto::CryptoEngine;
use crate::error::CryptoError;
use crate::models::{ChatMessage, DirectChat, DirectChatMessage};

/// A response shape with ciphertext-bearing fields.
pub trait Decryptable: Sized {
    /// Shape name, used in logs.
    const SHAPE: &'static str;

    /// Replace every encrypted field with its plaintext.
    fn decrypt_fields(self, engine: &CryptoEngine) -> Result<Self, CryptoError>;
}

impl Decryptable for ChatMessage {
    const SHAPE: &'static str = "ChatMessage";

    fn decrypt_fields(mut self, engine: &CryptoEngine) -> Result<Self, CryptoError> {
        self.message_text = engine.decrypt(&self.message_text)?;
        Ok(self)
    }
}

impl Decryptable for DirectChatMessage {
    const SHAPE: &'static str = "DirectChatMessage";

    fn decrypt_fields(mut self, engine: &CryptoEngine) -> Result<Self, CryptoError> {
        self.message_text = engine.decrypt(&self.message_text)?;
        Ok(self)
    }
}

impl Decryptable for DirectChat {
    const SHAPE: &'static str = "DirectChat";

    fn decrypt_fields(mut self, engine: &CryptoEngine) -> Result<Self, CryptoError> {
        self.messages = self.messages.decrypt_fields(engine)?;
        Ok(self)
    }
}

impl<T: Decryptable> Decryptable for Vec<T> {
    const SHAPE: &'static str = "Vec";

    fn decrypt_fields(self, engine: &CryptoEngine) -> Result<Self, CryptoError> {
        self.into_iter()
            .map(|item| item.decrypt_fields(engine))
            .collect()
    }
}

impl<T: Decryptable> Decryptable for Option<T> {
    const SHAPE: &'static str = "Option";

    fn decrypt_fields(self, engine: &CryptoEngine) -> Result<Self, CryptoError> {
        self.map(|inner| inner.decrypt_fields(engine)).transpose()
    }
}

/// Entry point used by services: owns the engine and dispatches by shape.
#[derive(Clone, Debug)]
pub struct Decryptor {
    engine: CryptoEngine,
}

impl Decryptor {
    pub fn new(engine: CryptoEngine) -> Self {
        Self { engine }
    }

    pub fn decrypt<T: Decryptable>(&self, data: T) -> Result<T, CryptoError> {
        data.decrypt_fields(&self.engine)
    }
}

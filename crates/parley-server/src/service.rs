//! Message creation and chat loading.
//!
//! The service only ever sees ciphertext on the way in; plaintext exists
//! again after the stored result went through the [`Decryptor`].

use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, warn};

use parley_shared::models::{Chat, DirectChat, DirectChatMessage};
use parley_shared::types::{ChatId, UserId};
use parley_shared::{Decryptable, Decryptor};
use parley_store::ChatRepository;

use crate::error::GatewayError;

#[derive(Clone)]
pub struct MessageService {
    chats: Arc<dyn ChatRepository>,
    decryptor: Decryptor,
    history_limit: u32,
}

impl MessageService {
    pub fn new(chats: Arc<dyn ChatRepository>, decryptor: Decryptor, history_limit: u32) -> Self {
        Self {
            chats,
            decryptor,
            history_limit,
        }
    }

    /// Persist `encrypted_text` as a new message from `sender_id` and return
    /// it enriched with its sender and chat, text decrypted.
    pub async fn create_message(
        &self,
        sender_id: UserId,
        chat_id: ChatId,
        encrypted_text: &str,
    ) -> Result<DirectChatMessage, GatewayError> {
        let chat = self.member_chat(sender_id, chat_id).await?;
        let sender = chat
            .member(&sender_id)
            .cloned()
            .ok_or(GatewayError::NotAChatMember)?;

        let stored = self
            .chats
            .insert_message(&chat, &sender, encrypted_text, Utc::now())
            .await
            .map_err(GatewayError::Persistence)?;

        debug!(
            message_id = %stored.id,
            chat_id = %chat.id,
            sender = %sender_id.short(),
            "Message created"
        );

        self.decrypt(DirectChatMessage::from_parts(stored, sender, chat))
            .await
    }

    /// The chat with its most recent messages, oldest first, decrypted.
    pub async fn load_chat(
        &self,
        requester_id: UserId,
        chat_id: ChatId,
    ) -> Result<DirectChat, GatewayError> {
        let chat = self.member_chat(requester_id, chat_id).await?;
        let messages = self
            .chats
            .find_chat_messages(chat.id, self.history_limit)
            .await?;

        self.decrypt(DirectChat::from_parts(chat, messages)).await
    }

    /// Load the chat and check that `user_id` belongs to it.
    async fn member_chat(&self, user_id: UserId, chat_id: ChatId) -> Result<Chat, GatewayError> {
        let chat = self
            .chats
            .find_chat_by_id(chat_id)
            .await?
            .ok_or(GatewayError::ChatNotFound(chat_id))?;

        if !chat.is_member(&user_id) {
            warn!(
                user = %user_id.short(),
                chat_id = %chat_id,
                "Rejected access by non-member"
            );
            return Err(GatewayError::NotAChatMember);
        }
        Ok(chat)
    }

    /// Key derivation is CPU-bound, so decryption runs on the blocking pool.
    async fn decrypt<T>(&self, data: T) -> Result<T, GatewayError>
    where
        T: Decryptable + Send + 'static,
    {
        let decryptor = self.decryptor.clone();
        let decrypted = tokio::task::spawn_blocking(move || decryptor.decrypt(data))
            .await
            .map_err(|e| GatewayError::Internal(format!("decrypt task failed: {e}")))?;

        decrypted.map_err(|e| {
            warn!(shape = T::SHAPE, error = %e, "Failed to decrypt response");
            GatewayError::Crypto(e)
        })
    }
}

#[cfg(test)]
mod tests {
    use parley_store::SqliteRepository;

    use super::*;
    use crate::test_support;

    #[tokio::test]
    async fn test_create_message_round_trips_through_store() {
        let fx = test_support::fixture().await;
        let ciphertext = fx.engine.encrypt("hello bob").unwrap();

        let message = fx
            .service
            .create_message(fx.alice.id, fx.chat.id, &ciphertext)
            .await
            .unwrap();

        assert_eq!(message.message_text, "hello bob");
        assert_eq!(message.sender.id, fx.alice.id);
        assert_eq!(message.chat.id, fx.chat.id);
        assert_eq!(message.recipient_ids().len(), 2);
    }

    #[tokio::test]
    async fn test_no_plaintext_at_rest() {
        let fx = test_support::fixture().await;
        let ciphertext = fx.engine.encrypt("top secret").unwrap();
        fx.service
            .create_message(fx.alice.id, fx.chat.id, &ciphertext)
            .await
            .unwrap();

        let stored = fx.repo.find_chat_messages(fx.chat.id, 10).await.unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].message_text, ciphertext);
        assert!(!stored[0].message_text.contains("top secret"));
    }

    #[tokio::test]
    async fn test_non_member_cannot_write() {
        let fx = test_support::fixture().await;
        let ciphertext = fx.engine.encrypt("let me in").unwrap();

        let result = fx
            .service
            .create_message(fx.carol.id, fx.chat.id, &ciphertext)
            .await;
        assert!(matches!(result, Err(GatewayError::NotAChatMember)));

        let stored = fx.repo.find_chat_messages(fx.chat.id, 10).await.unwrap();
        assert!(stored.is_empty());
    }

    #[tokio::test]
    async fn test_unknown_chat() {
        let fx = test_support::fixture().await;
        let missing = ChatId::new();
        let result = fx.service.create_message(fx.alice.id, missing, "x").await;
        assert!(matches!(result, Err(GatewayError::ChatNotFound(id)) if id == missing));
    }

    #[tokio::test]
    async fn test_undecryptable_row_is_internal() {
        let fx = test_support::fixture().await;
        let result = fx
            .service
            .create_message(fx.alice.id, fx.chat.id, "not-a-real-payload")
            .await;

        let err = result.unwrap_err();
        assert!(err.is_internal());
        assert_eq!(err.client_message(), "Internal server error");
    }

    #[tokio::test]
    async fn test_load_chat_returns_history_oldest_first() {
        let fx = test_support::fixture().await;
        for (sender, text) in [(fx.alice.id, "one"), (fx.bob.id, "two"), (fx.alice.id, "three")] {
            let ciphertext = fx.engine.encrypt(text).unwrap();
            fx.service
                .create_message(sender, fx.chat.id, &ciphertext)
                .await
                .unwrap();
        }

        let chat = fx.service.load_chat(fx.bob.id, fx.chat.id).await.unwrap();
        let texts: Vec<_> = chat.messages.iter().map(|m| m.message_text.as_str()).collect();
        assert_eq!(texts, ["one", "two", "three"]);
        assert_eq!(chat.users.len(), 2);

        let denied = fx.service.load_chat(fx.carol.id, fx.chat.id).await;
        assert!(matches!(denied, Err(GatewayError::NotAChatMember)));
    }

    #[tokio::test]
    async fn test_history_limit_keeps_most_recent() {
        let fx = test_support::fixture().await;
        let repo: Arc<SqliteRepository> = Arc::clone(&fx.repo);
        let service = MessageService::new(repo, Decryptor::new(fx.engine.clone()), 2);

        for text in ["a", "b", "c"] {
            let ciphertext = fx.engine.encrypt(text).unwrap();
            service
                .create_message(fx.alice.id, fx.chat.id, &ciphertext)
                .await
                .unwrap();
        }

        let chat = service.load_chat(fx.alice.id, fx.chat.id).await.unwrap();
        let texts: Vec<_> = chat.messages.iter().map(|m| m.message_text.as_str()).collect();
        assert_eq!(texts, ["b", "c"]);
    }
}

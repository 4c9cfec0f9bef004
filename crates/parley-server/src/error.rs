use std::error::Error as _;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

use parley_shared::protocol::{ErrorPayload, FieldError};
use parley_shared::types::ChatId;
use parley_shared::CryptoError;
use parley_store::StoreError;

const INTERNAL_MESSAGE: &str = "Internal server error";

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("Unauthenticated")]
    Unauthenticated,

    #[error("Validation failed")]
    Validation(Vec<FieldError>),

    #[error("Chat not found: {0}")]
    ChatNotFound(ChatId),

    #[error("You are not a member of this chat")]
    NotAChatMember,

    #[error("Failed to persist message: {0}")]
    Persistence(#[source] StoreError),

    #[error("Storage error: {0}")]
    Store(#[from] StoreError),

    #[error("Crypto error: {0}")]
    Crypto(#[from] CryptoError),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl GatewayError {
    /// Internal failures are logged in full but never described to clients.
    pub fn is_internal(&self) -> bool {
        matches!(
            self,
            GatewayError::Store(_) | GatewayError::Crypto(_) | GatewayError::Internal(_)
        )
    }

    /// Failures on the server side, logged at `error` level. Unlike
    /// [`is_internal`](Self::is_internal) this includes failed writes, whose
    /// client message is still descriptive.
    pub fn is_server_fault(&self) -> bool {
        self.is_internal() || matches!(self, GatewayError::Persistence(_))
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            GatewayError::Unauthenticated => StatusCode::UNAUTHORIZED,
            GatewayError::Validation(_) => StatusCode::BAD_REQUEST,
            GatewayError::ChatNotFound(_) => StatusCode::NOT_FOUND,
            GatewayError::NotAChatMember => StatusCode::FORBIDDEN,
            GatewayError::Persistence(_)
            | GatewayError::Store(_)
            | GatewayError::Crypto(_)
            | GatewayError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Message safe to show to the client.
    pub fn client_message(&self) -> String {
        match self {
            GatewayError::Persistence(_) => "Failed to save message".to_string(),
            _ if self.is_internal() => INTERNAL_MESSAGE.to_string(),
            _ => self.to_string(),
        }
    }

    /// Build the body of the outbound `error` event.
    ///
    /// With `diagnostics` the full error chain and a timestamp are attached.
    pub fn to_payload(&self, diagnostics: bool) -> ErrorPayload {
        let message = self.client_message();
        let errors = match self {
            GatewayError::Validation(errors) => errors.clone(),
            _ => vec![FieldError::general(message.clone())],
        };

        let payload = ErrorPayload::new(message, errors);
        if diagnostics {
            payload.with_diagnostics(self.chain())
        } else {
            payload
        }
    }

    fn chain(&self) -> String {
        let mut out = format!("{self:?}");
        let mut source = self.source();
        while let Some(cause) = source {
            out.push_str("\n  caused by: ");
            out.push_str(&cause.to_string());
            source = cause.source();
        }
        out
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let body = serde_json::to_value(self.to_payload(false)).unwrap_or_else(|_| {
            serde_json::json!({ "status": "error", "message": INTERNAL_MESSAGE, "errors": [] })
        });
        (self.status_code(), axum::Json(body)).into_response()
    }
}

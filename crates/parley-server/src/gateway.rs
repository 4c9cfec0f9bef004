//! Per-connection message gateway.
//!
//! Each live connection is driven through
//! `Connecting -> Authenticating -> Open -> Closed`. Only `Open` sessions
//! have inbound events dispatched; errors are reported to the session that
//! caused them and never to anybody else.

use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use parley_shared::models::User;
use parley_shared::protocol::{
    ClientEvent, CreateMessage, LoadChat, ServerEvent, CHAT_LOADED, MESSAGE_RECEIVED,
};
use parley_shared::types::ConnectionId;
use parley_shared::CryptoEngine;

use crate::auth::{AuthGate, Handshake};
use crate::error::GatewayError;
use crate::registry::{Connection, ConnectionRegistry};
use crate::service::MessageService;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Authenticating,
    Open,
    Closed,
}

/// One client connection as seen by the gateway.
#[derive(Debug)]
pub struct Session {
    id: ConnectionId,
    state: ConnectionState,
    user: Option<User>,
    connection: Option<Connection>,
}

impl Session {
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// The authenticated user, once the handshake succeeded.
    pub fn user(&self) -> Option<&User> {
        self.user.as_ref()
    }

    /// Outbound handle, present while the session is open.
    pub fn connection(&self) -> Option<&Connection> {
        self.connection.as_ref()
    }

    fn transition(&mut self, next: ConnectionState) {
        debug!(
            connection_id = %self.id,
            user_id = ?self.user.as_ref().map(|u| u.id.short()),
            from = ?self.state,
            to = ?next,
            "Connection state changed"
        );
        self.state = next;
    }
}

#[derive(Clone)]
pub struct Gateway {
    gate: AuthGate,
    registry: ConnectionRegistry,
    messages: MessageService,
    engine: CryptoEngine,
    diagnostics: bool,
}

impl Gateway {
    /// `diagnostics` attaches error chains and timestamps to outbound error
    /// events; development only.
    pub fn new(
        gate: AuthGate,
        registry: ConnectionRegistry,
        messages: MessageService,
        engine: CryptoEngine,
        diagnostics: bool,
    ) -> Self {
        Self {
            gate,
            registry,
            messages,
            engine,
            diagnostics,
        }
    }

    pub fn registry(&self) -> &ConnectionRegistry {
        &self.registry
    }

    /// A new transport connection arrived.
    pub fn connect(&self) -> Session {
        let session = Session {
            id: ConnectionId::new(),
            state: ConnectionState::Connecting,
            user: None,
            connection: None,
        };
        debug!(connection_id = %session.id, "Connection attempt");
        session
    }

    /// Run the authentication gate for `session`. On failure the session is
    /// closed and must not be opened.
    pub async fn authenticate(
        &self,
        session: &mut Session,
        handshake: &Handshake,
    ) -> Result<(), GatewayError> {
        session.transition(ConnectionState::Authenticating);

        match self.gate.authenticate(handshake).await {
            Ok(user) => {
                session.user = Some(user);
                Ok(())
            }
            Err(e) => {
                if e.is_server_fault() {
                    error!(connection_id = %session.id, error = %e, "Authentication failed");
                }
                session.transition(ConnectionState::Closed);
                Err(e)
            }
        }
    }

    /// Register an authenticated session with its outbound channel, making
    /// the user reachable by broadcasts.
    pub async fn open(
        &self,
        session: &mut Session,
        tx: mpsc::Sender<ServerEvent>,
    ) -> Result<(), GatewayError> {
        let user_id = match (&session.state, &session.user) {
            (ConnectionState::Authenticating, Some(user)) => user.id,
            _ => return Err(GatewayError::Unauthenticated),
        };

        let connection = Connection::new(session.id, tx);
        self.registry.register(user_id, connection.clone()).await;
        session.connection = Some(connection);
        session.transition(ConnectionState::Open);

        info!(connection_id = %session.id, user_id = %user_id.short(), "Connection opened");
        Ok(())
    }

    /// Handle one inbound text frame. Failures are reported to the session.
    pub async fn handle_frame(&self, session: &Session, frame: &str) {
        if session.state != ConnectionState::Open {
            warn!(connection_id = %session.id, state = ?session.state, "Frame on non-open connection dropped");
            return;
        }

        match ClientEvent::from_frame(frame) {
            Ok(event) => self.handle_event(session, event).await,
            Err(errors) => self.report(session, GatewayError::Validation(errors)),
        }
    }

    pub async fn handle_event(&self, session: &Session, event: ClientEvent) {
        let Some(user) = session.user.as_ref() else {
            self.report(session, GatewayError::Unauthenticated);
            return;
        };
        debug!(connection_id = %session.id, user_id = %user.id.short(), event = event.name(), "Inbound event");

        let result = match event {
            ClientEvent::CreateMessage(payload) => self.create_message(user, payload).await,
            ClientEvent::LoadChat(payload) => self.load_chat(session, user, payload).await,
        };

        if let Err(e) = result {
            self.report(session, e);
        }
    }

    async fn create_message(&self, user: &User, payload: CreateMessage) -> Result<(), GatewayError> {
        let chat_id = payload.validate().map_err(GatewayError::Validation)?;
        let encrypted = self.encrypt(payload.message_text).await?;

        let message = self
            .messages
            .create_message(user.id, chat_id, &encrypted)
            .await?;

        self.registry
            .broadcast(message.recipient_ids(), MESSAGE_RECEIVED, &message)
            .await
            .map_err(|e| GatewayError::Internal(format!("serialize message: {e}")))?;
        Ok(())
    }

    async fn load_chat(
        &self,
        session: &Session,
        user: &User,
        payload: LoadChat,
    ) -> Result<(), GatewayError> {
        let chat_id = payload.validate().map_err(GatewayError::Validation)?;
        let chat = self.messages.load_chat(user.id, chat_id).await?;

        let event = ServerEvent::success(CHAT_LOADED, &chat)
            .map_err(|e| GatewayError::Internal(format!("serialize chat: {e}")))?;
        self.push(session, event);
        Ok(())
    }

    async fn encrypt(&self, plaintext: String) -> Result<String, GatewayError> {
        let engine = self.engine.clone();
        tokio::task::spawn_blocking(move || engine.encrypt(&plaintext))
            .await
            .map_err(|e| GatewayError::Internal(format!("encrypt task failed: {e}")))?
            .map_err(GatewayError::from)
    }

    /// Turn `err` into an `error` event for the originating session only.
    fn report(&self, session: &Session, err: GatewayError) {
        if err.is_server_fault() {
            error!(connection_id = %session.id, error = ?err, "Server error while handling event");
        } else {
            debug!(connection_id = %session.id, error = %err, "Event rejected");
        }

        match ServerEvent::error(&err.to_payload(self.diagnostics)) {
            Ok(event) => self.push(session, event),
            Err(e) => error!(connection_id = %session.id, error = %e, "Failed to serialize error event"),
        }
    }

    fn push(&self, session: &Session, event: ServerEvent) {
        let delivered = session
            .connection
            .as_ref()
            .map(|connection| connection.push(event))
            .unwrap_or(false);
        if !delivered {
            debug!(connection_id = %session.id, "Outbound event dropped, connection gone");
        }
    }

    /// Transport went away. Safe to call in any state, more than once.
    pub async fn close(&self, session: &mut Session) {
        if session.state == ConnectionState::Closed {
            return;
        }

        if let (Some(user), Some(connection)) = (&session.user, session.connection.take()) {
            self.registry
                .deregister_connection(user.id, connection.id())
                .await;
            info!(connection_id = %session.id, user_id = %user.id.short(), "Connection closed");
        }
        session.transition(ConnectionState::Closed);
    }
}

//! Registry of live connections, one per user.
//!
//! A user reachable through the registry has exactly one entry: connecting
//! again from another device replaces the previous entry. The replaced socket
//! is left alone; it simply stops receiving pushes.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::{Notify, RwLock};
use tracing::{debug, warn};

use parley_shared::protocol::ServerEvent;
use parley_shared::types::{ConnectionId, UserId};

/// Outbound frames a connection may have queued before it counts as lagging.
pub const OUTBOUND_QUEUE_CAPACITY: usize = 256;

/// Outbound handle of one live connection.
///
/// Pushing never blocks: frames are queued on a bounded channel drained by
/// the connection's writer task. A full queue drops the frame and fires the
/// lag signal, on which the connection task closes the socket.
#[derive(Debug, Clone)]
pub struct Connection {
    id: ConnectionId,
    tx: mpsc::Sender<ServerEvent>,
    lagged: Arc<Notify>,
}

impl Connection {
    pub fn new(id: ConnectionId, tx: mpsc::Sender<ServerEvent>) -> Self {
        Self {
            id,
            tx,
            lagged: Arc::new(Notify::new()),
        }
    }

    /// A fresh connection plus the receiving end its writer drains.
    pub fn channel() -> (Self, mpsc::Receiver<ServerEvent>) {
        let (tx, rx) = mpsc::channel(OUTBOUND_QUEUE_CAPACITY);
        (Self::new(ConnectionId::new(), tx), rx)
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Queue `event`. Returns `false` if the connection is gone or lagging.
    pub fn push(&self, event: ServerEvent) -> bool {
        match self.tx.try_send(event) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                warn!(connection = %self.id, "Outbound queue full, frame dropped");
                self.lagged.notify_one();
                false
            }
            Err(TrySendError::Closed(_)) => false,
        }
    }

    /// Fired when a push found the outbound queue full.
    pub fn lag_signal(&self) -> Arc<Notify> {
        Arc::clone(&self.lagged)
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

#[derive(Default, Clone)]
pub struct ConnectionRegistry {
    inner: Arc<RwLock<HashMap<UserId, Connection>>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `connection` the reachable endpoint for `user_id`.
    ///
    /// Returns the id of the connection that was replaced, if any.
    pub async fn register(&self, user_id: UserId, connection: Connection) -> Option<ConnectionId> {
        let connection_id = connection.id();
        let mut guard = self.inner.write().await;
        let replaced = guard.insert(user_id, connection).map(|old| old.id());

        debug!(
            user = %user_id.short(),
            connection = %connection_id,
            replaced = ?replaced,
            online = guard.len(),
            "Connection registered"
        );
        replaced
    }

    /// Remove whatever entry `user_id` has. No-op if there is none.
    pub async fn deregister(&self, user_id: UserId) -> bool {
        let removed = self.inner.write().await.remove(&user_id).is_some();
        if removed {
            debug!(user = %user_id.short(), "Connection deregistered");
        }
        removed
    }

    /// Remove the entry for `user_id` only if it still points at
    /// `connection_id`, so a stale device disconnecting cannot evict the
    /// user's newer connection.
    pub async fn deregister_connection(&self, user_id: UserId, connection_id: ConnectionId) -> bool {
        let mut guard = self.inner.write().await;
        match guard.get(&user_id) {
            Some(current) if current.id() == connection_id => {
                guard.remove(&user_id);
                debug!(
                    user = %user_id.short(),
                    connection = %connection_id,
                    "Connection deregistered"
                );
                true
            }
            Some(_) => {
                debug!(
                    user = %user_id.short(),
                    connection = %connection_id,
                    "Stale connection closed, newer entry kept"
                );
                false
            }
            None => false,
        }
    }

    /// Push `{status: "success", data: payload}` under `event` to every
    /// listed user that is online. Offline users are skipped.
    ///
    /// Returns how many connections the event was handed to.
    pub async fn broadcast<T: Serialize>(
        &self,
        user_ids: impl IntoIterator<Item = UserId>,
        event: &str,
        payload: &T,
    ) -> Result<usize, serde_json::Error> {
        let frame = ServerEvent::success(event, payload)?;
        let recipients: HashSet<UserId> = user_ids.into_iter().collect();

        let guard = self.inner.read().await;
        let mut delivered = 0;
        for user_id in &recipients {
            if let Some(connection) = guard.get(user_id) {
                if connection.push(frame.clone()) {
                    delivered += 1;
                }
            }
        }

        debug!(
            event,
            recipients = recipients.len(),
            delivered,
            "Broadcast"
        );
        Ok(delivered)
    }

    pub async fn is_online(&self, user_id: UserId) -> bool {
        self.inner.read().await.contains_key(&user_id)
    }

    pub async fn online_count(&self) -> usize {
        self.inner.read().await.len()
    }

    /// Drop entries whose writer side has already gone away.
    pub async fn prune_closed(&self) -> usize {
        let mut guard = self.inner.write().await;
        let before = guard.len();
        guard.retain(|_, connection| !connection.is_closed());
        let removed = before - guard.len();
        if removed > 0 {
            debug!(removed, "Pruned closed connections");
        }
        removed
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use parley_shared::protocol::MESSAGE_RECEIVED;
    use serde_json::json;

    use super::*;

    #[tokio::test]
    async fn test_register_overwrites_previous_connection() {
        let registry = ConnectionRegistry::new();
        let user = UserId::new();
        let (first, mut first_rx) = Connection::channel();
        let (second, mut second_rx) = Connection::channel();
        let first_id = first.id();

        assert!(registry.register(user, first).await.is_none());
        assert_eq!(registry.register(user, second).await, Some(first_id));
        assert_eq!(registry.online_count().await, 1);

        let delivered = registry
            .broadcast([user], MESSAGE_RECEIVED, &json!({"n": 1}))
            .await
            .unwrap();
        assert_eq!(delivered, 1);

        let event = second_rx.try_recv().unwrap();
        assert_eq!(event.event, MESSAGE_RECEIVED);
        assert_eq!(event.data["status"], "success");
        assert_eq!(event.data["data"]["n"], 1);
        assert!(first_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_broadcast_skips_offline_users() {
        let registry = ConnectionRegistry::new();
        let online = UserId::new();
        let offline = UserId::new();
        let (connection, mut rx) = Connection::channel();
        registry.register(online, connection).await;

        let delivered = registry
            .broadcast([online, offline], MESSAGE_RECEIVED, &"hello")
            .await
            .unwrap();

        assert_eq!(delivered, 1);
        assert_eq!(rx.try_recv().unwrap().data["data"], "hello");
    }

    #[tokio::test]
    async fn test_broadcast_dedupes_recipients() {
        let registry = ConnectionRegistry::new();
        let user = UserId::new();
        let (connection, mut rx) = Connection::channel();
        registry.register(user, connection).await;

        registry
            .broadcast([user, user], MESSAGE_RECEIVED, &1)
            .await
            .unwrap();

        assert!(rx.try_recv().is_ok());
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_deregister_is_idempotent() {
        let registry = ConnectionRegistry::new();
        let user = UserId::new();
        let (connection, _rx) = Connection::channel();
        registry.register(user, connection).await;

        assert!(registry.deregister(user).await);
        assert!(!registry.deregister(user).await);
        assert!(!registry.is_online(user).await);
    }

    #[tokio::test]
    async fn test_stale_connection_does_not_evict_newer_one() {
        let registry = ConnectionRegistry::new();
        let user = UserId::new();
        let (old, _old_rx) = Connection::channel();
        let (new, _new_rx) = Connection::channel();
        let old_id = old.id();
        let new_id = new.id();

        registry.register(user, old).await;
        registry.register(user, new).await;

        assert!(!registry.deregister_connection(user, old_id).await);
        assert!(registry.is_online(user).await);
        assert!(registry.deregister_connection(user, new_id).await);
        assert!(!registry.is_online(user).await);
    }

    #[tokio::test]
    async fn test_full_queue_drops_frame_and_signals_lag() {
        let (connection, mut rx) = Connection::channel();
        let lagged = connection.lag_signal();
        let event = ServerEvent::success(MESSAGE_RECEIVED, &"x").unwrap();

        for _ in 0..OUTBOUND_QUEUE_CAPACITY {
            assert!(connection.push(event.clone()));
        }
        assert!(!connection.push(event.clone()));

        tokio::time::timeout(Duration::from_millis(100), lagged.notified())
            .await
            .expect("lag signal should fire");

        // Queued frames are untouched; space frees up once the writer drains.
        assert!(rx.try_recv().is_ok());
        assert!(connection.push(event));
    }

    #[tokio::test]
    async fn test_prune_removes_dropped_receivers() {
        let registry = ConnectionRegistry::new();
        let (gone, gone_rx) = Connection::channel();
        let (alive, _alive_rx) = Connection::channel();
        registry.register(UserId::new(), gone).await;
        registry.register(UserId::new(), alive).await;

        drop(gone_rx);
        assert_eq!(registry.prune_closed().await, 1);
        assert_eq!(registry.online_count().await, 1);
    }

    #[tokio::test]
    async fn test_concurrent_register_and_broadcast() {
        let registry = ConnectionRegistry::new();
        let mut receivers = Vec::new();
        let mut tasks = Vec::new();
        let mut users = Vec::new();

        for _ in 0..32 {
            let user = UserId::new();
            let (connection, rx) = Connection::channel();
            receivers.push(rx);
            users.push(user);
            let registry = registry.clone();
            tasks.push(tokio::spawn(async move {
                registry.register(user, connection).await;
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }

        let delivered = registry
            .broadcast(users.clone(), MESSAGE_RECEIVED, &"all")
            .await
            .unwrap();
        assert_eq!(delivered, 32);
        for rx in receivers.iter_mut() {
            assert!(rx.try_recv().is_ok());
        }
    }
}

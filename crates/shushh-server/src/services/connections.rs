//! Live connection registry
//!
//! Maps each identity to the outbound channel of its current socket. A newer
//! connection for the same identity replaces the older one; the older socket's
//! disconnect is then a no-op thanks to the connection id check.

use shushh_types::{ServerMessage, UserId};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, info};
use uuid::Uuid;

pub type Outbound = mpsc::UnboundedSender<ServerMessage>;

struct Entry {
    connection_id: String,
    tx: Outbound,
}

#[derive(Clone, Default)]
pub struct ConnectionManager {
    connections: Arc<RwLock<HashMap<UserId, Entry>>>,
}

impl ConnectionManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `tx` as the live connection for `user_id` and return its
    /// connection id. `on_register` runs while the registry is locked, so no
    /// concurrently routed message can reach `tx` before whatever it sends.
    pub async fn register<F>(&self, user_id: &str, tx: Outbound, on_register: F) -> String
    where
        F: FnOnce(&Outbound),
    {
        let connection_id = Uuid::new_v4().to_string();
        let mut conns = self.connections.write().await;

        on_register(&tx);

        let previous = conns.insert(
            user_id.to_string(),
            Entry {
                connection_id: connection_id.clone(),
                tx,
            },
        );
        if let Some(previous) = previous {
            info!(
                "Connection for {} replaced (old conn_id={}, new conn_id={})",
                user_id, previous.connection_id, connection_id
            );
        } else {
            info!("User connected: {} (conn_id={})", user_id, connection_id);
        }
        connection_id
    }

    /// Remove the entry for `user_id` if it still belongs to `connection_id`
    pub async fn unregister(&self, user_id: &str, connection_id: &str) -> bool {
        let mut conns = self.connections.write().await;
        match conns.get(user_id) {
            Some(entry) if entry.connection_id == connection_id => {
                conns.remove(user_id);
                info!("User disconnected: {} (conn_id={})", user_id, connection_id);
                true
            }
            _ => {
                debug!(
                    "Stale disconnect for {} (conn_id={}), keeping newer connection",
                    user_id, connection_id
                );
                false
            }
        }
    }

    /// Deliver `msg` to `user_id`, or hand it to `offline` when there is no
    /// live connection. `offline` runs under the registry lock.
    pub async fn send_or_else<F>(&self, user_id: &str, msg: ServerMessage, offline: F)
    where
        F: FnOnce(ServerMessage),
    {
        let conns = self.connections.read().await;
        match conns.get(user_id) {
            Some(entry) => {
                if let Err(returned) = entry.tx.send(msg) {
                    debug!("Channel for {} already closed", user_id);
                    offline(returned.0);
                }
            }
            None => offline(msg),
        }
    }

    /// Deliver `msg` if `user_id` is connected, returning whether it was sent
    pub async fn send(&self, user_id: &str, msg: ServerMessage) -> bool {
        let mut delivered = true;
        self.send_or_else(user_id, msg, |_| delivered = false).await;
        delivered
    }

    #[cfg(test)]
    pub async fn is_online(&self, user_id: &str) -> bool {
        self.connections.read().await.contains_key(user_id)
    }

    /// Identities with a live connection, sorted
    pub async fn online(&self) -> Vec<UserId> {
        let mut users: Vec<UserId> = self.connections.read().await.keys().cloned().collect();
        users.sort();
        users
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn welcome(id: &str) -> ServerMessage {
        ServerMessage::Welcome {
            id: id.to_string(),
            keyed: false,
        }
    }

    #[tokio::test]
    async fn test_register_and_send() {
        let manager = ConnectionManager::new();
        let (tx, mut rx) = mpsc::unbounded_channel();

        manager.register("1", tx, |_| {}).await;
        assert!(manager.is_online("1").await);
        assert!(manager.send("1", welcome("1")).await);
        assert_eq!(rx.recv().await, Some(welcome("1")));

        assert!(!manager.send("2", welcome("2")).await);
    }

    #[tokio::test]
    async fn test_on_register_runs_first() {
        let manager = ConnectionManager::new();
        let (tx, mut rx) = mpsc::unbounded_channel();

        manager
            .register("1", tx, |tx| {
                tx.send(welcome("first")).unwrap();
            })
            .await;
        manager.send("1", welcome("second")).await;

        assert_eq!(rx.recv().await, Some(welcome("first")));
        assert_eq!(rx.recv().await, Some(welcome("second")));
    }

    #[tokio::test]
    async fn test_replaced_connection_keeps_newer_entry() {
        let manager = ConnectionManager::new();
        let (old_tx, _old_rx) = mpsc::unbounded_channel();
        let (new_tx, mut new_rx) = mpsc::unbounded_channel();

        let old_id = manager.register("1", old_tx, |_| {}).await;
        let new_id = manager.register("1", new_tx, |_| {}).await;
        assert_ne!(old_id, new_id);

        assert!(!manager.unregister("1", &old_id).await);
        assert!(manager.is_online("1").await);

        manager.send("1", welcome("1")).await;
        assert_eq!(new_rx.recv().await, Some(welcome("1")));

        assert!(manager.unregister("1", &new_id).await);
        assert!(!manager.is_online("1").await);
    }

    #[tokio::test]
    async fn test_closed_channel_falls_back() {
        let manager = ConnectionManager::new();
        let (tx, rx) = mpsc::unbounded_channel();
        manager.register("1", tx, |_| {}).await;
        drop(rx);

        let mut fallback = None;
        manager
            .send_or_else("1", welcome("1"), |msg| fallback = Some(msg))
            .await;
        assert_eq!(fallback, Some(welcome("1")));
    }

    #[tokio::test]
    async fn test_online_is_sorted() {
        let manager = ConnectionManager::new();
        for id in ["b", "a", "c"] {
            let (tx, _rx) = mpsc::unbounded_channel();
            manager.register(id, tx, |_| {}).await;
        }
        assert_eq!(manager.online().await, vec!["a", "b", "c"]);
    }
}

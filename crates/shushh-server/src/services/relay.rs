//! Relay core: transport handshakes, routing and re-encryption
//!
//! The relay only ever touches the transport layer. Chat envelopes are
//! unwrapped with the sender's transport key and rewrapped with the
//! recipient's; the end-to-end ciphertext inside passes through unchanged.

use super::connections::{ConnectionManager, Outbound};
use super::key_registry::KeyRegistry;
use super::offline_queue::OfflineQueue;
use shushh_core::crypto::dh;
use shushh_core::{envelope, error_code, ClientMessage, KeyPair, ServerMessage};
use tracing::{debug, info, warn};

pub struct Relay {
    connections: ConnectionManager,
    keys: KeyRegistry,
    queue: OfflineQueue,
}

impl Relay {
    pub fn new(keys: KeyRegistry, queue: OfflineQueue) -> Self {
        Self {
            connections: ConnectionManager::new(),
            keys,
            queue,
        }
    }

    #[cfg(test)]
    pub fn queue(&self) -> &OfflineQueue {
        &self.queue
    }

    pub async fn online(&self) -> Vec<String> {
        self.connections.online().await
    }

    /// Register an authenticated connection, greet it and flush its queue.
    /// Returns the connection id to pass to [`disconnect`](Self::disconnect).
    pub async fn connect(&self, user_id: &str, tx: Outbound) -> String {
        let keyed = self.keys.get(user_id).await.is_some();

        let queue = &self.queue;
        self.connections
            .register(user_id, tx, |tx| {
                send_reply(
                    tx,
                    ServerMessage::Welcome {
                        id: user_id.to_string(),
                        keyed,
                    },
                );

                let backlog = queue.drain(user_id);
                if !backlog.is_empty() {
                    info!("Flushing {} queued envelopes to {}", backlog.len(), user_id);
                }
                for msg in backlog {
                    if let Err(returned) = tx.send(msg) {
                        debug!("Socket for {} closed during flush, requeueing", user_id);
                        queue.push(user_id, returned.0);
                    }
                }
            })
            .await
    }

    /// Forget the live connection. The transport key is kept for reuse.
    pub async fn disconnect(&self, user_id: &str, connection_id: &str) {
        self.connections.unregister(user_id, connection_id).await;
    }

    /// Process one message from `user_id`. Failures are reported back on
    /// `reply` and never end the connection.
    pub async fn handle(&self, user_id: &str, reply: &Outbound, msg: ClientMessage) {
        match msg {
            ClientMessage::AuthDhRequest { public } => {
                self.transport_handshake(user_id, reply, &public).await
            }
            ClientMessage::DhRequest { to, public } => {
                let msg = ServerMessage::DhRequest {
                    from: user_id.to_string(),
                    public,
                };
                self.forward(&to, msg).await
            }
            ClientMessage::DhResponse { to, public } => {
                let msg = ServerMessage::DhResponse {
                    from: user_id.to_string(),
                    public,
                };
                self.forward(&to, msg).await
            }
            ClientMessage::DhDeclined { to } => {
                let msg = ServerMessage::DhDeclined {
                    from: user_id.to_string(),
                };
                self.forward(&to, msg).await
            }
            ClientMessage::PeerLogout { to } => {
                let msg = ServerMessage::PeerLogout {
                    from: user_id.to_string(),
                };
                self.forward(&to, msg).await
            }
            ClientMessage::Message { to, data } => {
                self.route_message(user_id, reply, &to, &data).await
            }
            ClientMessage::Unknown => {
                debug!("Ignoring message of unknown type from {}", user_id);
            }
        }
    }

    async fn transport_handshake(&self, user_id: &str, reply: &Outbound, public: &str) {
        let client_public = match dh::parse_public(public) {
            Ok(value) => value,
            Err(e) => {
                warn!("Rejected auth-dh-request from {}: {}", user_id, e);
                send_reply(
                    reply,
                    ServerMessage::error(error_code::INVALID_PUBLIC_VALUE, e.to_string()),
                );
                return;
            }
        };

        let pair = KeyPair::generate();
        let relay_public = pair.public_hex();
        self.keys.insert(user_id, pair.agree(&client_public)).await;
        info!("Transport key established for {}", user_id);

        send_reply(
            reply,
            ServerMessage::AuthDhResponse {
                public: relay_public,
            },
        );
    }

    /// Handshake and logout traffic goes to live connections only
    async fn forward(&self, to: &str, msg: ServerMessage) {
        let kind = msg.kind();
        if !self.connections.send(to, msg).await {
            debug!("{} is offline, dropping {}", to, kind);
        }
    }

    async fn route_message(&self, from: &str, reply: &Outbound, to: &str, data: &[u8]) {
        let Some(sender_key) = self.keys.get(from).await else {
            warn!("No transport key for sender {}, dropping message", from);
            send_reply(
                reply,
                ServerMessage::error(
                    error_code::MISSING_TRANSPORT_KEY,
                    "no transport key on record, renegotiate",
                ),
            );
            return;
        };

        let inner = match envelope::strip_transport(data, &sender_key) {
            Ok(inner) => inner,
            Err(e) => {
                warn!("Malformed envelope from {}: {}", from, e);
                send_reply(
                    reply,
                    ServerMessage::error(error_code::MALFORMED_CIPHERTEXT, e.to_string()),
                );
                return;
            }
        };

        let Some(recipient_key) = self.keys.get(to).await else {
            warn!("No transport key for recipient {}, dropping message", to);
            send_reply(
                reply,
                ServerMessage::error(
                    error_code::RECIPIENT_UNKEYED,
                    format!("{} has no transport key", to),
                ),
            );
            return;
        };

        let msg = ServerMessage::Message {
            from: from.to_string(),
            data: envelope::wrap_transport(&inner, &recipient_key),
        };
        self.connections
            .send_or_else(to, msg, |msg| self.queue.push(to, msg))
            .await;
    }
}

/// Send on the caller's own channel. A closed channel means its socket is
/// already gone.
fn send_reply(tx: &Outbound, msg: ServerMessage) {
    if let Err(returned) = tx.send(msg) {
        debug!("Dropping {} for a closed connection", returned.0.kind());
    }
}

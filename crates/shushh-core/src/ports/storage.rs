//! Storage traits for key persistence

use crate::crypto::SessionKey;
use crate::Result;
use async_trait::async_trait;
use std::collections::HashMap;

/// Durable transport-key store used by the relay, keyed by user identity
#[async_trait]
pub trait TransportKeyStore: Send + Sync {
    async fn load_transport_key(&self, user_id: &str) -> Result<Option<SessionKey>>;
    async fn save_transport_key(&self, user_id: &str, key: &SessionKey) -> Result<()>;
}

/// Client-side cache of established keys.
///
/// The transport key is indexed by the client's own identity, peer keys by
/// the peer's identity. Reads never fail; a cache that cannot be read simply
/// has no key.
pub trait KeyCache: Send {
    fn transport_key(&self, user_id: &str) -> Option<SessionKey>;
    fn store_transport_key(&mut self, user_id: &str, key: &SessionKey) -> Result<()>;
    fn peer_key(&self, peer_id: &str) -> Option<SessionKey>;
    fn store_peer_key(&mut self, peer_id: &str, key: &SessionKey) -> Result<()>;
    fn remove_peer_key(&mut self, peer_id: &str) -> Result<()>;
}

/// Process-local key cache
#[derive(Debug, Default, Clone)]
pub struct MemoryKeyCache {
    transport: HashMap<String, SessionKey>,
    peers: HashMap<String, SessionKey>,
}

impl MemoryKeyCache {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyCache for MemoryKeyCache {
    fn transport_key(&self, user_id: &str) -> Option<SessionKey> {
        self.transport.get(user_id).cloned()
    }

    fn store_transport_key(&mut self, user_id: &str, key: &SessionKey) -> Result<()> {
        self.transport.insert(user_id.to_string(), key.clone());
        Ok(())
    }

    fn peer_key(&self, peer_id: &str) -> Option<SessionKey> {
        self.peers.get(peer_id).cloned()
    }

    fn store_peer_key(&mut self, peer_id: &str, key: &SessionKey) -> Result<()> {
        self.peers.insert(peer_id.to_string(), key.clone());
        Ok(())
    }

    fn remove_peer_key(&mut self, peer_id: &str) -> Result<()> {
        self.peers.remove(peer_id);
        Ok(())
    }
}

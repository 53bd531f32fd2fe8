//! Transport key registry
//!
//! Reads hit the in-memory map first and fall back to the durable store when
//! one is configured, caching whatever it returns. Store failures never
//! propagate: a key that cannot be loaded is treated as absent, which makes
//! the client renegotiate.

use dashmap::DashMap;
use shushh_core::ports::TransportKeyStore;
use shushh_core::SessionKey;
use shushh_types::UserId;
use std::sync::Arc;
use tracing::{debug, warn};

pub struct KeyRegistry {
    keys: DashMap<UserId, SessionKey>,
    store: Option<Arc<dyn TransportKeyStore>>,
}

impl KeyRegistry {
    /// Registry without durable backing; keys are lost on restart
    pub fn in_memory() -> Self {
        Self {
            keys: DashMap::new(),
            store: None,
        }
    }

    pub fn with_store(store: Arc<dyn TransportKeyStore>) -> Self {
        Self {
            keys: DashMap::new(),
            store: Some(store),
        }
    }

    pub async fn get(&self, user_id: &str) -> Option<SessionKey> {
        if let Some(key) = self.keys.get(user_id).map(|entry| entry.value().clone()) {
            return Some(key);
        }

        let store = self.store.as_ref()?;
        match store.load_transport_key(user_id).await {
            Ok(Some(key)) => {
                debug!("Loaded persisted transport key for {}", user_id);
                self.keys.insert(user_id.to_string(), key.clone());
                Some(key)
            }
            Ok(None) => None,
            Err(e) => {
                warn!("Failed to load transport key for {}: {}", user_id, e);
                None
            }
        }
    }

    /// Record a freshly negotiated key, replacing any previous one
    pub async fn insert(&self, user_id: &str, key: SessionKey) {
        self.keys.insert(user_id.to_string(), key.clone());

        if let Some(store) = &self.store {
            if let Err(e) = store.save_transport_key(user_id, &key).await {
                warn!("Failed to persist transport key for {}: {}", user_id, e);
            }
        }
    }

    #[cfg(test)]
    pub fn cached(&self) -> usize {
        self.keys.len()
    }
}

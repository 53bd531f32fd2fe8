//! On-disk key cache (~/.shushh/keys.json)

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use shushh_core::ports::KeyCache;
use shushh_core::{SessionKey, StoredKey};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::warn;

#[derive(Debug, Default, Serialize, Deserialize)]
struct CacheFile {
    /// Own identity -> transport key
    #[serde(default)]
    transport: BTreeMap<String, StoredKey>,
    /// Peer identity -> peer key
    #[serde(default)]
    peers: BTreeMap<String, StoredKey>,
}

/// JSON file of hex key/IV pairs, rewritten on every change
pub struct FileKeyCache {
    path: PathBuf,
    data: CacheFile,
}

impl FileKeyCache {
    /// Get the shushh home directory (~/.shushh)
    pub fn shushh_home() -> Result<PathBuf> {
        if let Ok(path) = std::env::var("SHUSHH_HOME") {
            return Ok(PathBuf::from(path));
        }
        let home = dirs::home_dir().context("Could not find home directory")?;
        Ok(home.join(".shushh"))
    }

    pub fn default_path() -> Result<PathBuf> {
        Ok(Self::shushh_home()?.join("keys.json"))
    }

    /// Load the cache at `path`. A missing file is an empty cache; an
    /// unreadable one is logged and replaced on the next write.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let data = if path.exists() {
            let content = std::fs::read_to_string(&path)
                .with_context(|| format!("Failed to read key cache from {:?}", path))?;
            serde_json::from_str(&content).unwrap_or_else(|e| {
                warn!("Ignoring unreadable key cache {:?}: {}", path, e);
                CacheFile::default()
            })
        } else {
            CacheFile::default()
        };

        Ok(Self { path, data })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn save(&self) -> shushh_core::Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = serde_json::to_string_pretty(&self.data)?;
        std::fs::write(&self.path, content)?;

        // Set permissions on Unix (restrict to owner only)
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mut perms = std::fs::metadata(&self.path)?.permissions();
            perms.set_mode(0o600);
            std::fs::set_permissions(&self.path, perms)?;
        }

        Ok(())
    }
}

fn decode(kind: &str, id: &str, stored: Option<&StoredKey>) -> Option<SessionKey> {
    match SessionKey::from_stored(stored?) {
        Ok(key) => Some(key),
        Err(e) => {
            warn!("Ignoring cached {} key for {}: {}", kind, id, e);
            None
        }
    }
}

impl KeyCache for FileKeyCache {
    fn transport_key(&self, user_id: &str) -> Option<SessionKey> {
        decode("transport", user_id, self.data.transport.get(user_id))
    }

    fn store_transport_key(&mut self, user_id: &str, key: &SessionKey) -> shushh_core::Result<()> {
        self.data
            .transport
            .insert(user_id.to_string(), key.to_stored());
        self.save()
    }

    fn peer_key(&self, peer_id: &str) -> Option<SessionKey> {
        decode("peer", peer_id, self.data.peers.get(peer_id))
    }

    fn store_peer_key(&mut self, peer_id: &str, key: &SessionKey) -> shushh_core::Result<()> {
        self.data.peers.insert(peer_id.to_string(), key.to_stored());
        self.save()
    }

    fn remove_peer_key(&mut self, peer_id: &str) -> shushh_core::Result<()> {
        if self.data.peers.remove(peer_id).is_some() {
            self.save()
        } else {
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(seed: u8) -> SessionKey {
        SessionKey::new([seed; 32], [seed.wrapping_mul(3); 32])
    }

    #[test]
    fn test_missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let cache = FileKeyCache::open(dir.path().join("keys.json")).unwrap();
        assert!(cache.transport_key("1").is_none());
        assert!(cache.peer_key("2").is_none());
    }

    #[test]
    fn test_keys_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("keys.json");

        let mut cache = FileKeyCache::open(&path).unwrap();
        cache.store_transport_key("1", &key(1)).unwrap();
        cache.store_peer_key("2", &key(2)).unwrap();

        let reopened = FileKeyCache::open(&path).unwrap();
        assert_eq!(reopened.transport_key("1"), Some(key(1)));
        assert_eq!(reopened.peer_key("2"), Some(key(2)));
        assert!(reopened.peer_key("1").is_none());
    }

    #[test]
    fn test_remove_peer_key() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("keys.json");

        let mut cache = FileKeyCache::open(&path).unwrap();
        cache.store_peer_key("2", &key(2)).unwrap();
        cache.remove_peer_key("2").unwrap();
        cache.remove_peer_key("never-stored").unwrap();

        let reopened = FileKeyCache::open(&path).unwrap();
        assert!(reopened.peer_key("2").is_none());
    }

    #[test]
    fn test_corrupt_cache_starts_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("keys.json");
        std::fs::write(&path, "{ not json").unwrap();

        let mut cache = FileKeyCache::open(&path).unwrap();
        assert!(cache.transport_key("1").is_none());

        cache.store_transport_key("1", &key(4)).unwrap();
        let reopened = FileKeyCache::open(&path).unwrap();
        assert_eq!(reopened.transport_key("1"), Some(key(4)));
    }

    #[test]
    fn test_bad_entry_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("keys.json");
        std::fs::write(
            &path,
            r#"{"transport": {"1": {"key": "abcd", "iv": "00"}}, "peers": {}}"#,
        )
        .unwrap();

        let cache = FileKeyCache::open(&path).unwrap();
        assert!(cache.transport_key("1").is_none());
    }

    #[cfg(unix)]
    #[test]
    fn test_file_is_owner_only() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("keys.json");
        let mut cache = FileKeyCache::open(&path).unwrap();
        cache.store_peer_key("2", &key(2)).unwrap();

        let mode = std::fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }
}

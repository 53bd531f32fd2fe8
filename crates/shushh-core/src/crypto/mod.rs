//! Cryptographic primitives
//!
//! Fixed-group Diffie-Hellman, AES-256 in IGE mode and the SHA-512 based key
//! derivation. None of this is negotiable: every participant must use the same
//! group, cipher and hash to interoperate.

pub mod dh;
pub mod ige;
pub mod kdf;

pub use dh::KeyPair;
pub use kdf::derive_key_and_iv;

use crate::Result;
use shushh_types::{StoredKey, IV_LEN, KEY_LEN};

/// Symmetric key material produced by one completed handshake
#[derive(Clone, PartialEq, Eq)]
pub struct SessionKey {
    key: [u8; KEY_LEN],
    iv: [u8; IV_LEN],
}

impl SessionKey {
    pub fn new(key: [u8; KEY_LEN], iv: [u8; IV_LEN]) -> Self {
        Self { key, iv }
    }

    pub fn key(&self) -> &[u8; KEY_LEN] {
        &self.key
    }

    pub fn iv(&self) -> &[u8; IV_LEN] {
        &self.iv
    }

    pub fn to_stored(&self) -> StoredKey {
        StoredKey::new(&self.key, &self.iv)
    }

    pub fn from_stored(stored: &StoredKey) -> Result<Self> {
        let (key, iv) = stored.decode()?;
        Ok(Self { key, iv })
    }
}

impl std::fmt::Debug for SessionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SessionKey { .. }")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stored_round_trip() {
        let key = SessionKey::new([1u8; KEY_LEN], [2u8; IV_LEN]);
        let restored = SessionKey::from_stored(&key.to_stored()).unwrap();
        assert_eq!(restored, key);
    }

    #[test]
    fn test_debug_does_not_leak() {
        let key = SessionKey::new([0xab; KEY_LEN], [0xcd; IV_LEN]);
        let printed = format!("{:?}", key);
        assert!(!printed.contains("171"));
        assert!(!printed.to_lowercase().contains("ab"));
    }
}

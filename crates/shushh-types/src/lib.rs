//! Shushh Types - Pure wire and storage types
//!
//! This crate contains only serde data types with no async runtime or
//! cryptographic dependencies, shared by the relay and its clients.

pub mod message;

pub use message::*;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Stable, durable user identifier (the `sub` claim of the credential)
pub type UserId = String;

/// WebSocket close code sent when the connect request carries no credential
pub const CLOSE_NO_CREDENTIAL: u16 = 4001;

/// WebSocket close code sent when the credential is malformed, badly signed or expired
pub const CLOSE_INVALID_CREDENTIAL: u16 = 4002;

/// Length of a symmetric session key in bytes
pub const KEY_LEN: usize = 32;

/// Length of an IGE initialization vector in bytes
pub const IV_LEN: usize = 32;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum KeyDecodeError {
    #[error("invalid hex in {field}: {reason}")]
    InvalidHex { field: &'static str, reason: String },

    #[error("{field} must be {expected} bytes, got {actual}")]
    WrongLength {
        field: &'static str,
        expected: usize,
        actual: usize,
    },
}

/// Key/IV pair encoded as lowercase hex, the form used by durable stores
/// and local key caches.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredKey {
    pub key: String,
    pub iv: String,
}

impl StoredKey {
    pub fn new(key: &[u8; KEY_LEN], iv: &[u8; IV_LEN]) -> Self {
        Self {
            key: hex::encode(key),
            iv: hex::encode(iv),
        }
    }

    /// Decode back into raw key and IV bytes
    pub fn decode(&self) -> Result<([u8; KEY_LEN], [u8; IV_LEN]), KeyDecodeError> {
        Ok((
            decode_fixed::<KEY_LEN>("key", &self.key)?,
            decode_fixed::<IV_LEN>("iv", &self.iv)?,
        ))
    }
}

fn decode_fixed<const N: usize>(field: &'static str, s: &str) -> Result<[u8; N], KeyDecodeError> {
    let bytes = hex::decode(s).map_err(|e| KeyDecodeError::InvalidHex {
        field,
        reason: e.to_string(),
    })?;
    bytes
        .as_slice()
        .try_into()
        .map_err(|_| KeyDecodeError::WrongLength {
            field,
            expected: N,
            actual: bytes.len(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stored_key_decode() {
        let stored = StoredKey::new(&[7u8; KEY_LEN], &[9u8; IV_LEN]);
        assert_eq!(stored.key.len(), KEY_LEN * 2);

        let (key, iv) = stored.decode().unwrap();
        assert_eq!(key, [7u8; KEY_LEN]);
        assert_eq!(iv, [9u8; IV_LEN]);
    }

    #[test]
    fn test_stored_key_rejects_bad_input() {
        let short = StoredKey {
            key: "abcd".to_string(),
            iv: hex::encode([0u8; IV_LEN]),
        };
        assert_eq!(
            short.decode(),
            Err(KeyDecodeError::WrongLength {
                field: "key",
                expected: KEY_LEN,
                actual: 2
            })
        );

        let garbage = StoredKey {
            key: hex::encode([0u8; KEY_LEN]),
            iv: "zz".to_string(),
        };
        assert!(matches!(
            garbage.decode(),
            Err(KeyDecodeError::InvalidHex { field: "iv", .. })
        ));
    }
}

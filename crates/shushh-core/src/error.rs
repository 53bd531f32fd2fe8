//! Error types for Shushh

use shushh_types::{KeyDecodeError, UserId};
use thiserror::Error;

pub type Result<T> = std::result::Result<T, CoreError>;

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("Format error: {0}")]
    Format(String),

    #[error("No transport key on record")]
    MissingTransportKey,

    #[error("No peer key on record for {0}")]
    MissingPeerKey(UserId),

    #[error("Invalid DH public value: {0}")]
    InvalidPublicValue(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Invalid UTF-8 in message body: {0}")]
    Utf8(#[from] std::string::FromUtf8Error),

    #[error("Invalid key material: {0}")]
    KeyDecode(#[from] KeyDecodeError),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl CoreError {
    /// True for failures caused by absent key material, recoverable by a new handshake
    pub fn is_missing_key(&self) -> bool {
        matches!(
            self,
            CoreError::MissingTransportKey | CoreError::MissingPeerKey(_)
        )
    }
}

impl From<serde_json::Error> for CoreError {
    fn from(e: serde_json::Error) -> Self {
        CoreError::Serialization(e.to_string())
    }
}

impl From<std::io::Error> for CoreError {
    fn from(e: std::io::Error) -> Self {
        CoreError::Storage(e.to_string())
    }
}

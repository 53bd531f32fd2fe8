//! WebSocket message protocol
//!
//! Every frame is a JSON object tagged by `type`. DH public values travel as
//! lowercase hex, ciphertext as an array of byte values.

use crate::UserId;
use serde::{Deserialize, Serialize};

/// Client -> Relay messages
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ClientMessage {
    // Transport key exchange with the relay
    AuthDhRequest {
        public: String,
    },

    // End-to-end key exchange, relayed to `to`
    DhRequest {
        to: UserId,
        public: String,
    },
    DhResponse {
        to: UserId,
        public: String,
    },
    DhDeclined {
        to: UserId,
    },
    PeerLogout {
        to: UserId,
    },

    // Chat payload, encrypted under the peer key then the transport key
    Message {
        to: UserId,
        data: Vec<u8>,
    },

    #[serde(other)]
    Unknown,
}

impl ClientMessage {
    /// Recipient identity for relayed messages
    pub fn target(&self) -> Option<&str> {
        match self {
            ClientMessage::DhRequest { to, .. }
            | ClientMessage::DhResponse { to, .. }
            | ClientMessage::DhDeclined { to }
            | ClientMessage::PeerLogout { to }
            | ClientMessage::Message { to, .. } => Some(to),
            ClientMessage::AuthDhRequest { .. } | ClientMessage::Unknown => None,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            ClientMessage::AuthDhRequest { .. } => "auth-dh-request",
            ClientMessage::DhRequest { .. } => "dh-request",
            ClientMessage::DhResponse { .. } => "dh-response",
            ClientMessage::DhDeclined { .. } => "dh-declined",
            ClientMessage::PeerLogout { .. } => "peer-logout",
            ClientMessage::Message { .. } => "message",
            ClientMessage::Unknown => "unknown",
        }
    }
}

/// Relay -> Client messages
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ServerMessage {
    // Connection
    Welcome {
        id: UserId,
        /// True when the relay already holds a transport key for `id`
        #[serde(default)]
        keyed: bool,
    },
    Error {
        code: String,
        message: String,
    },

    // Transport key exchange
    AuthDhResponse {
        public: String,
    },

    // Relayed from `from`
    DhRequest {
        from: UserId,
        public: String,
    },
    DhResponse {
        from: UserId,
        public: String,
    },
    DhDeclined {
        from: UserId,
    },
    PeerLogout {
        from: UserId,
    },
    Message {
        from: UserId,
        data: Vec<u8>,
    },

    #[serde(other)]
    Unknown,
}

impl ServerMessage {
    pub fn error(code: &str, message: impl Into<String>) -> Self {
        ServerMessage::Error {
            code: code.to_string(),
            message: message.into(),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            ServerMessage::Welcome { .. } => "welcome",
            ServerMessage::Error { .. } => "error",
            ServerMessage::AuthDhResponse { .. } => "auth-dh-response",
            ServerMessage::DhRequest { .. } => "dh-request",
            ServerMessage::DhResponse { .. } => "dh-response",
            ServerMessage::DhDeclined { .. } => "dh-declined",
            ServerMessage::PeerLogout { .. } => "peer-logout",
            ServerMessage::Message { .. } => "message",
            ServerMessage::Unknown => "unknown",
        }
    }
}

/// Error codes carried by [`ServerMessage::Error`]
pub mod error_code {
    pub const INVALID_MESSAGE: &str = "invalid_message";
    pub const MISSING_TRANSPORT_KEY: &str = "missing_transport_key";
    pub const RECIPIENT_UNKEYED: &str = "recipient_unkeyed";
    pub const INVALID_PUBLIC_VALUE: &str = "invalid_public_value";
    pub const MALFORMED_CIPHERTEXT: &str = "malformed_ciphertext";
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_message_wire_format() {
        let msg = ClientMessage::DhRequest {
            to: "2".to_string(),
            public: "0abc".to_string(),
        };
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"type": "dh-request", "to": "2", "public": "0abc"})
        );

        let chat: ClientMessage =
            serde_json::from_str(r#"{"type":"message","to":"7","data":[1,2,255]}"#).unwrap();
        assert_eq!(
            chat,
            ClientMessage::Message {
                to: "7".to_string(),
                data: vec![1, 2, 255]
            }
        );
        assert_eq!(chat.target(), Some("7"));
    }

    #[test]
    fn test_unknown_type_is_not_an_error() {
        let msg: ClientMessage =
            serde_json::from_str(r#"{"type":"typing-indicator","to":"3"}"#).unwrap();
        assert_eq!(msg, ClientMessage::Unknown);

        let msg: ServerMessage = serde_json::from_str(r#"{"type":"presence"}"#).unwrap();
        assert_eq!(msg, ServerMessage::Unknown);
    }

    #[test]
    fn test_missing_field_is_an_error() {
        let result = serde_json::from_str::<ClientMessage>(r#"{"type":"dh-request","to":"3"}"#);
        assert!(result.is_err());
    }

    #[test]
    fn test_welcome_keyed_defaults_false() {
        let msg: ServerMessage = serde_json::from_str(r#"{"type":"welcome","id":"1"}"#).unwrap();
        assert_eq!(
            msg,
            ServerMessage::Welcome {
                id: "1".to_string(),
                keyed: false
            }
        );
    }

    #[test]
    fn test_relayed_messages_ignore_extra_fields() {
        // Relays that echo the original `to` alongside `from` are accepted
        let msg: ServerMessage =
            serde_json::from_str(r#"{"type":"dh-declined","to":"1","from":"2"}"#).unwrap();
        assert_eq!(
            msg,
            ServerMessage::DhDeclined {
                from: "2".to_string()
            }
        );
    }
}

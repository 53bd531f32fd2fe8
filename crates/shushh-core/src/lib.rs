//! Shushh Core Library
//!
//! Key exchange, IGE encryption, message envelopes and the client protocol
//! state machine shared by the relay and the CLI.

// Re-export pure types from shushh-types
pub use shushh_types::*;

pub mod crypto;
pub mod envelope;
pub mod error;
pub mod ports;
pub mod session;

pub use crypto::{KeyPair, SessionKey};
pub use error::{CoreError, Result};
pub use session::{ChatLine, ClientSession, Output, PeerState, SessionEvent, TransportState};

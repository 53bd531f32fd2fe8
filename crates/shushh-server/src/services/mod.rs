//! Relay services

pub mod auth;
pub mod connections;
pub mod key_registry;
pub mod offline_queue;
pub mod relay;

pub use auth::AuthService;
pub use key_registry::KeyRegistry;
pub use offline_queue::OfflineQueue;
pub use relay::Relay;

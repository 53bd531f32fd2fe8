//! Storage layer
//!
//! SQLite (embedded) backs the durable transport-key store. Everything else
//! the relay keeps lives in memory.

pub mod db;

pub use db::Database;

//! HTTP handlers

pub mod users;
pub mod ws;

pub async fn health() -> &'static str {
    "ok"
}

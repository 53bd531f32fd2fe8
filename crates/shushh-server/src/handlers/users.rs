//! User directory handlers

use crate::AppState;
use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
    Json,
};
use serde::Serialize;

#[derive(Debug, Serialize)]
pub struct OnlineResponse {
    users: Vec<String>,
}

/// Identities with a live connection. Requires a bearer credential.
pub async fn online(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<OnlineResponse>, StatusCode> {
    let token = headers
        .get("authorization")
        .and_then(|h| h.to_str().ok())
        .and_then(|h| h.strip_prefix("Bearer "))
        .ok_or(StatusCode::UNAUTHORIZED)?;

    state
        .auth_service
        .validate_token(Some(token))
        .map_err(|_| StatusCode::UNAUTHORIZED)?;

    Ok(Json(OnlineResponse {
        users: state.relay.online().await,
    }))
}

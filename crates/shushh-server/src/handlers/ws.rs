//! WebSocket endpoint
//!
//! One task per socket: the receive loop parses frames and hands them to the
//! relay, while a forward task drains the connection's channel into the
//! socket.

use crate::services::auth::AuthError;
use crate::AppState;
use axum::extract::ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::response::IntoResponse;
use futures::{sink::SinkExt, stream::StreamExt};
use serde::Deserialize;
use shushh_types::{error_code, ClientMessage, ServerMessage};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

#[derive(Debug, Deserialize)]
pub struct ConnectParams {
    token: Option<String>,
}

/// Handle WebSocket upgrade. Credentials are checked after the upgrade so a
/// rejection can carry its close code.
pub async fn handler(
    ws: WebSocketUpgrade,
    Query(params): Query<ConnectParams>,
    State(state): State<AppState>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state, params.token))
}

async fn handle_socket(mut socket: WebSocket, state: AppState, token: Option<String>) {
    let user_id = match state.auth_service.validate_token(token.as_deref()) {
        Ok(user_id) => user_id,
        Err(e) => {
            reject(&mut socket, &e).await;
            return;
        }
    };

    let (mut sender, mut receiver) = socket.split();

    // Create channel for sending messages to this client
    let (tx, mut rx) = mpsc::unbounded_channel::<ServerMessage>();

    let forward_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            match serde_json::to_string(&msg) {
                Ok(json) => {
                    if sender.send(Message::Text(json)).await.is_err() {
                        break;
                    }
                }
                Err(e) => warn!("Failed to serialize {}: {}", msg.kind(), e),
            }
        }
    });

    let connection_id = state.relay.connect(&user_id, tx.clone()).await;

    while let Some(msg) = receiver.next().await {
        match msg {
            Ok(Message::Text(text)) => match serde_json::from_str::<ClientMessage>(&text) {
                Ok(client_msg) => {
                    debug!(
                        "{} from {} to {}",
                        client_msg.kind(),
                        user_id,
                        client_msg.target().unwrap_or("relay")
                    );
                    state.relay.handle(&user_id, &tx, client_msg).await;
                }
                Err(e) => {
                    warn!("Invalid message from {}: {}", user_id, e);
                    let _ = tx.send(ServerMessage::error(
                        error_code::INVALID_MESSAGE,
                        e.to_string(),
                    ));
                }
            },
            Ok(Message::Binary(_)) => {
                debug!("Ignoring binary frame from {}", user_id);
            }
            Ok(Message::Close(_)) => {
                info!("WebSocket connection closed by {}", user_id);
                break;
            }
            Ok(_) => {}
            Err(e) => {
                warn!("WebSocket error for {}: {}", user_id, e);
                break;
            }
        }
    }

    state.relay.disconnect(&user_id, &connection_id).await;
    forward_task.abort();
}

async fn reject(socket: &mut WebSocket, err: &AuthError) {
    info!("Rejecting WebSocket connection: {}", err);
    let frame = CloseFrame {
        code: err.close_code(),
        reason: err.to_string().into(),
    };
    if let Err(e) = socket.send(Message::Close(Some(frame))).await {
        debug!("Failed to send close frame: {}", e);
    }
}

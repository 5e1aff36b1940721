//! WebSocket handler for Axum
//!
//! Operators authenticate with the operator token in the query string, since
//! browsers cannot set headers on a WebSocket upgrade.

use axum::{
    extract::{
        ws::{Message, WebSocket},
        Query, State, WebSocketUpgrade,
    },
    http::StatusCode,
    response::Response,
};
use futures::{stream::StreamExt, SinkExt};
use serde::Deserialize;
use std::sync::Arc;
use subtle::ConstantTimeEq;
use tokio::sync::mpsc;

use crate::state::AppState;

use super::{
    connection::Connection,
    events::{ClientEvent, ServerEvent},
};

#[derive(Debug, Deserialize)]
pub struct WebSocketQuery {
    token: String,
}

/// WebSocket handler - upgrades HTTP connection to WebSocket
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(app_state): State<AppState>,
    Query(params): Query<WebSocketQuery>,
) -> Result<Response, StatusCode> {
    let expected = app_state.config.operator_token.as_bytes();
    if !bool::from(params.token.as_bytes().ct_eq(expected)) {
        tracing::warn!("WebSocket auth failed: invalid operator token");
        return Err(StatusCode::UNAUTHORIZED);
    }

    tracing::info!("WebSocket connection upgrade requested");

    Ok(ws.on_upgrade(move |socket| handle_socket(socket, app_state)))
}

/// Handle individual WebSocket connection
async fn handle_socket(socket: WebSocket, app_state: AppState) {
    let (mut sender, mut receiver) = socket.split();

    // Create channel for sending events to this connection
    let (tx, mut rx) = mpsc::unbounded_channel::<ServerEvent>();

    let ws_state = app_state.ws.clone();
    let conn = ws_state.add_connection(Connection::new(tx)).await;
    let session_id = conn.session_id;

    let _ = conn.send(ServerEvent::Connected { session_id });
    let status_task = conn.follow_status(app_state.lifecycle.clone());

    // Spawn task to send messages to client
    let send_task = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            match serde_json::to_string(&event) {
                Ok(json) => {
                    if sender.send(Message::Text(json)).await.is_err() {
                        break; // Connection closed
                    }
                }
                Err(e) => {
                    tracing::error!(error = ?e, "Failed to serialize WebSocket event");
                }
            }
        }
    });

    // Handle incoming messages
    while let Some(Ok(msg)) = receiver.next().await {
        match msg {
            Message::Text(text) => match serde_json::from_str::<ClientEvent>(&text) {
                Ok(event) => handle_client_event(event, &conn, &app_state),
                Err(e) => {
                    tracing::warn!(
                        error = ?e,
                        session_id = %session_id,
                        "Failed to parse client event"
                    );
                    let _ = conn.send(ServerEvent::Error {
                        message: "Invalid event format".to_string(),
                    });
                }
            },
            Message::Close(_) => {
                tracing::info!(session_id = %session_id, "WebSocket close frame received");
                break;
            }
            Message::Ping(_) | Message::Pong(_) => {
                // Axum handles ping/pong automatically
            }
            _ => {} // Ignore binary messages
        }
    }

    // Cleanup on disconnect
    tracing::info!(session_id = %session_id, "WebSocket connection closing");
    ws_state.remove_connection(&session_id).await;

    status_task.abort();
    send_task.abort();
}

/// Handle client event
fn handle_client_event(event: ClientEvent, conn: &Arc<Connection>, app_state: &AppState) {
    let reply = match event {
        ClientEvent::Ping => ServerEvent::Pong,
        ClientEvent::Refresh => ServerEvent::from(app_state.lifecycle.status()),
    };
    let _ = conn.send(reply);
}

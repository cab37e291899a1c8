//! WebSocket message handlers.
//!
//! Contains the logic for handling incoming WebSocket connections
//! and processing client messages.

use axum::extract::ws::{Message, WebSocket};
use futures::{SinkExt, StreamExt};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use super::manager::WebSocketManager;
use super::messages::{ClientMessage, ServerMessage};

/// Handle an authenticated WebSocket connection until it closes
pub async fn handle_ws_connection(
    socket: WebSocket,
    ws_manager: Arc<WebSocketManager>,
    username: String,
) {
    let session_id = uuid::Uuid::new_v4().to_string();
    info!(session_id = %session_id, username = %username, "New WebSocket connection");

    let (mut ws_tx, mut ws_rx) = socket.split();
    let (msg_tx, mut msg_rx) = mpsc::unbounded_channel::<ServerMessage>();
    ws_manager.add_connection(session_id.clone(), username, msg_tx);
    ws_manager.send_to(
        &session_id,
        ServerMessage::Connected {
            session_id: session_id.clone(),
        },
    );

    // Forward queued messages to the socket
    let session_id_clone = session_id.clone();
    let send_task = tokio::spawn(async move {
        while let Some(msg) = msg_rx.recv().await {
            match serde_json::to_string(&msg) {
                Ok(json) => {
                    if ws_tx.send(Message::Text(json.into())).await.is_err() {
                        break;
                    }
                }
                Err(e) => {
                    error!(error = %e, "Failed to serialize WebSocket message");
                }
            }
        }
        debug!(session_id = %session_id_clone, "WebSocket send task ended");
    });

    while let Some(result) = ws_rx.next().await {
        match result {
            Ok(Message::Text(text)) => {
                handle_client_message(&session_id, &text, &ws_manager);
            }
            Ok(Message::Binary(data)) => {
                if let Ok(text) = String::from_utf8(data.to_vec()) {
                    handle_client_message(&session_id, &text, &ws_manager);
                }
            }
            Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => {}
            Ok(Message::Close(_)) => {
                info!(session_id = %session_id, "WebSocket connection closed by client");
                break;
            }
            Err(e) => {
                error!(session_id = %session_id, error = %e, "WebSocket error");
                break;
            }
        }
    }

    ws_manager.remove_connection(&session_id);
    send_task.abort();
    info!(session_id = %session_id, "WebSocket connection closed");
}

fn handle_client_message(session_id: &str, text: &str, ws_manager: &WebSocketManager) {
    let msg: ClientMessage = match serde_json::from_str(text) {
        Ok(msg) => msg,
        Err(e) => {
            warn!(session_id = %session_id, error = %e, "Failed to parse client message");
            ws_manager.send_to(
                session_id,
                ServerMessage::Error {
                    code: "parse_error".to_string(),
                    message: format!("Failed to parse message: {}", e),
                    recoverable: true,
                },
            );
            return;
        }
    };

    match msg {
        ClientMessage::Subscribe { job_id } => {
            ws_manager.subscribe(session_id, job_id.as_deref());
            ws_manager.send_to(session_id, ServerMessage::Subscribed { job_id });
        }
        ClientMessage::Unsubscribe { job_id } => {
            ws_manager.unsubscribe(session_id, job_id.as_deref());
            ws_manager.send_to(session_id, ServerMessage::Unsubscribed { job_id });
        }
        ClientMessage::Ping => {
            let timestamp = SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_millis() as u64)
                .unwrap_or(0);
            ws_manager.send_to(session_id, ServerMessage::Pong { timestamp });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_messages_update_subscriptions() {
        let manager = WebSocketManager::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        manager.add_connection("s".to_string(), "admin".to_string(), tx);

        handle_client_message("s", r#"{"type":"subscribe","job_id":"j1"}"#, &manager);
        assert_eq!(manager.subscriber_count("j1"), 1);
        assert!(matches!(rx.try_recv(), Ok(ServerMessage::Subscribed { job_id: Some(_) })));

        handle_client_message("s", r#"{"type":"ping"}"#, &manager);
        assert!(matches!(rx.try_recv(), Ok(ServerMessage::Pong { .. })));

        handle_client_message("s", "not json", &manager);
        assert!(matches!(
            rx.try_recv(),
            Ok(ServerMessage::Error { recoverable: true, .. })
        ));

        handle_client_message("s", r#"{"type":"unsubscribe","job_id":"j1"}"#, &manager);
        assert_eq!(manager.subscriber_count("j1"), 0);
    }
}

//! WebSocket endpoint: handshake authentication and the per-connection loop.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::response::Response;
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use tracing::{debug, error, info};

use super::protocol::ServerEvent;
use super::relay::{ConnectionContext, Relay};
use crate::auth::{authenticate_token, AppState, AuthError};
use crate::models::{User, MAX_ENCODED_CONTENT_BYTES};

#[derive(Debug, Deserialize)]
pub struct SocketAuthQuery {
    pub token: String,
}

pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(app_state): State<AppState>,
    Query(query): Query<SocketAuthQuery>,
) -> Result<Response, AuthError> {
    // Authentication happens before the upgrade: a rejected handshake leaves no state behind.
    let auth_user = authenticate_token(&app_state, &query.token).await?;
    let relay = app_state.relay.clone();

    Ok(ws
        .max_message_size(MAX_ENCODED_CONTENT_BYTES)
        .max_frame_size(MAX_ENCODED_CONTENT_BYTES)
        .on_upgrade(move |socket| run_connection(socket, relay, auth_user.user)))
}

async fn run_connection(socket: WebSocket, relay: Arc<Relay>, user: User) {
    let (connection_id, mut outbound) = relay.hub().register(user.id, &user.username).await;
    let ctx = ConnectionContext { connection_id, user_id: user.id, username: user.username };
    info!(connection_id = %connection_id, user_id = ctx.user_id, "Socket connected");

    let (mut sink, mut stream) = socket.split();

    let writer = tokio::spawn(async move {
        while let Some(event) = outbound.recv().await {
            let text = match serde_json::to_string(&event) {
                Ok(text) => text,
                Err(e) => {
                    error!("Failed to serialize server event: {}", e);
                    continue;
                }
            };
            if sink.send(Message::Text(text.into())).await.is_err() {
                break;
            }
        }
    });

    let Some(closed) = relay.hub().closed_signal(connection_id).await else {
        writer.abort();
        return;
    };

    // Events from one connection are handled strictly one after another.
    loop {
        let frame = tokio::select! {
            _ = closed.cancelled() => {
                info!(connection_id = %connection_id, "Connection closed by hub");
                break;
            }
            frame = stream.next() => match frame {
                Some(frame) => frame,
                None => break,
            },
        };
        match frame {
            Ok(Message::Text(text)) => relay.handle_text(&ctx, text.as_str()).await,
            Ok(Message::Binary(_)) => {
                relay
                    .hub()
                    .send_to_connection(connection_id, ServerEvent::error("Binary frames are not supported"))
                    .await;
            }
            Ok(Message::Close(_)) => break,
            Ok(_) => {}
            Err(e) => {
                debug!(connection_id = %connection_id, "Socket read error: {}", e);
                break;
            }
        }
    }

    relay.disconnect(&ctx).await;
    writer.abort();
    info!(connection_id = %connection_id, user_id = ctx.user_id, "Socket disconnected");
}

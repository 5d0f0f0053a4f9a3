use std::time::Duration;

use axum::{
    extract::{
        ws::{Message, WebSocket},
        RawQuery, State, WebSocketUpgrade,
    },
    http::HeaderMap,
    response::{IntoResponse, Response},
};
use futures::{sink::SinkExt, stream::StreamExt};
use tokio::sync::mpsc;
use uuid::Uuid;

use super::gateway::Session;
use super::types::WsMessage;
use crate::middleware::{authenticate_token, extract_token};
use crate::state::AppState;

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

/// Realtime gateway.
///
/// A token may be supplied on the upgrade request (`Authorization` header or
/// `?token=`); otherwise the client must send an `authenticate` event before
/// anything else. An invalid token on the upgrade request is refused outright.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    headers: HeaderMap,
    RawQuery(query): RawQuery,
) -> Response {
    let user_id = match extract_token(&headers, query.as_deref()) {
        Some(token) => match authenticate_token(&state, &token).await {
            Ok(user_id) => Some(user_id),
            Err(e) => return e.into_response(),
        },
        None => None,
    };

    ws.on_upgrade(move |socket| handle_socket(socket, state, user_id))
}

async fn handle_socket(socket: WebSocket, state: AppState, user_id: Option<Uuid>) {
    let (mut sender, mut receiver) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<WsMessage>();
    let (frames_tx, mut frames_rx) = mpsc::unbounded_channel::<String>();

    let mut session = Session::new(state, tx.clone());
    if let Some(user_id) = user_id {
        session.establish(user_id).await;
    }

    // Frames are handled one at a time in arrival order. The worker is never
    // aborted: it drains what was received, then unregisters.
    tokio::spawn(async move {
        while let Some(text) = frames_rx.recv().await {
            session.handle_text(&text).await;
        }
        let user_id = session.user_id();
        session.close().await;
        tracing::info!("WebSocket closed for {:?}", user_id);
    });

    // Task: send messages from channel to WebSocket
    let mut send_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            match serde_json::to_string(&msg) {
                Ok(json) => {
                    if sender.send(Message::Text(json)).await.is_err() {
                        break;
                    }
                }
                Err(e) => tracing::error!("Failed to encode outbound frame: {:?}", e),
            }
        }
    });

    // Task: forward text frames to the worker
    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            match msg {
                Message::Text(text) => {
                    if frames_tx.send(text).is_err() {
                        break;
                    }
                }
                Message::Close(_) => break,
                _ => {}
            }
        }
    });

    let tx_heartbeat = tx;
    let mut heartbeat_task = tokio::spawn(async move {
        let mut interval = tokio::time::interval(HEARTBEAT_INTERVAL);
        loop {
            interval.tick().await;
            if tx_heartbeat.send(WsMessage::Ping).is_err() {
                break;
            }
        }
    });

    // Stop the socket tasks when any one finishes
    tokio::select! {
        _ = &mut send_task => {
            recv_task.abort();
            heartbeat_task.abort();
        },
        _ = &mut recv_task => {
            send_task.abort();
            heartbeat_task.abort();
        },
        _ = &mut heartbeat_task => {
            send_task.abort();
            recv_task.abort();
        }
    }
}

use std::time::Duration;

use axum::{
    Extension,
    extract::{
        Path, State, WebSocketUpgrade,
        ws::{Message, WebSocket},
    },
    http::StatusCode,
    response::Response,
};
use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tracing::{info, warn};
use uuid::Uuid;

use campus_chat::RoomSubscription;
use campus_types::api::Claims;
use campus_types::events::LiveEvent;
use campus_types::models::MessageWithSender;

use crate::auth::AppState;
use crate::reject;

/// Server sends a Ping this often; two missed Pongs drop the connection.
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);

/// Upgrade to a WebSocket that streams new messages in one room.
///
/// The subscription is taken before upgrading so a caller who cannot see the
/// room gets a plain HTTP error instead of an empty socket.
pub async fn live_room(
    State(state): State<AppState>,
    Path(room_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
    ws: WebSocketUpgrade,
) -> Result<Response, StatusCode> {
    let (tx, rx) = mpsc::unbounded_channel();
    let subscription = state
        .client(&claims)
        .subscribe_to_room_messages(room_id, move |message| {
            // Receiver gone means the socket is closing.
            let _ = tx.send(message);
        })
        .await
        .map_err(reject)?;

    Ok(ws.on_upgrade(move |socket| stream_room(socket, subscription, rx, claims.username)))
}

async fn stream_room(
    socket: WebSocket,
    subscription: RoomSubscription,
    mut messages: mpsc::UnboundedReceiver<MessageWithSender>,
    username: String,
) {
    let room_id = subscription.room_id();
    let (mut sender, mut receiver) = socket.split();

    info!("{} watching room {}", username, room_id);

    if send_event(&mut sender, &LiveEvent::Ready { room_id }).await.is_err() {
        subscription.unsubscribe().await;
        return;
    }

    let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
    heartbeat.tick().await;
    let mut pong_received = true;
    let mut missed_heartbeats: u8 = 0;

    loop {
        tokio::select! {
            message = messages.recv() => {
                let Some(message) = message else { break };
                if send_event(&mut sender, &LiveEvent::MessageCreate(message)).await.is_err() {
                    break;
                }
            }
            incoming = receiver.next() => {
                match incoming {
                    Some(Ok(Message::Pong(_))) => pong_received = true,
                    Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                    Some(Ok(_)) => {}
                }
            }
            _ = heartbeat.tick() => {
                if std::mem::replace(&mut pong_received, false) {
                    missed_heartbeats = 0;
                } else {
                    missed_heartbeats += 1;
                    if missed_heartbeats >= 2 {
                        warn!("Heartbeat timeout for {} in room {}, dropping connection", username, room_id);
                        break;
                    }
                }
                if sender.send(Message::Ping(Bytes::new())).await.is_err() {
                    break;
                }
            }
        }
    }

    subscription.unsubscribe().await;
    info!("{} stopped watching room {}", username, room_id);
}

async fn send_event(
    sender: &mut futures_util::stream::SplitSink<WebSocket, Message>,
    event: &LiveEvent,
) -> Result<(), axum::Error> {
    let text = match serde_json::to_string(event) {
        Ok(text) => text,
        Err(e) => {
            warn!("Failed to encode live event: {}", e);
            return Ok(());
        }
    };
    sender.send(Message::Text(text.into())).await
}

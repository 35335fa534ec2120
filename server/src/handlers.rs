use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use futures_util::{SinkExt, StreamExt};
use sketchparty_shared::{ClientMessage, ServerMessage};
use tokio::sync::{mpsc, RwLock};
use uuid::Uuid;

use crate::logic::{apply_client_message, deliver};
use crate::rooms::{join_room, leave_room};
use crate::state::{AppState, Room};

pub async fn ping_handler() -> impl IntoResponse {
    StatusCode::NO_CONTENT
}

pub async fn ws_handler(State(state): State<AppState>, ws: WebSocketUpgrade) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let (mut socket_sender, mut socket_receiver) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<ServerMessage>();
    let connection_id = Uuid::new_v4();
    eprintln!("WS connected conn={connection_id}");

    let send_task = tokio::spawn(async move {
        while let Some(message) = rx.recv().await {
            if let Ok(payload) = bincode::encode_to_vec(&message, bincode::config::standard()) {
                if socket_sender.send(Message::Binary(payload)).await.is_err() {
                    break;
                }
            }
        }
    });

    // Set once the connection has joined; a connection belongs to at most
    // one room at a time.
    let mut membership: Option<(String, Arc<RwLock<Room>>)> = None;

    while let Some(Ok(message)) = socket_receiver.next().await {
        let client_message = match message {
            Message::Text(text) => match serde_json::from_str::<ClientMessage>(&text) {
                Ok(parsed) => parsed,
                Err(_) => {
                    let _ = tx.send(ServerMessage::InvalidData {
                        message: "Malformed message payload.".to_string(),
                    });
                    continue;
                }
            },
            Message::Binary(data) => {
                match bincode::decode_from_slice::<ClientMessage, _>(
                    &data,
                    bincode::config::standard(),
                ) {
                    Ok((parsed, _)) => parsed,
                    Err(_) => {
                        let _ = tx.send(ServerMessage::InvalidData {
                            message: "Malformed message payload.".to_string(),
                        });
                        continue;
                    }
                }
            }
            Message::Close(_) => break,
            _ => continue,
        };

        match client_message {
            ClientMessage::CreateRoom { room_id, username }
            | ClientMessage::JoinRoom { room_id, username }
                if membership.is_some() =>
            {
                let _ = (room_id, username);
                let _ = tx.send(ServerMessage::InvalidData {
                    message: "Already in a room.".to_string(),
                });
            }
            ClientMessage::CreateRoom { room_id, username } => {
                membership =
                    join_room(&state, &tx, connection_id, &room_id, &username, true).await;
            }
            ClientMessage::JoinRoom { room_id, username } => {
                membership =
                    join_room(&state, &tx, connection_id, &room_id, &username, false).await;
            }
            ClientMessage::LeaveRoom => {
                if let Some((room_id, room)) = membership.take() {
                    leave_room(&state, &room_id, &room, connection_id).await;
                }
            }
            in_room_message => {
                let Some((_, room)) = membership.as_ref() else {
                    continue;
                };
                // Applying and sending under the same write lock keeps each
                // room's delivery order equal to its acceptance order.
                let mut guard = room.write().await;
                let deliveries = apply_client_message(&mut guard, connection_id, in_room_message);
                deliver(&guard, connection_id, &deliveries);
            }
        }
    }

    if let Some((room_id, room)) = membership.take() {
        leave_room(&state, &room_id, &room, connection_id).await;
    }
    eprintln!("WS disconnected conn={connection_id}");
    send_task.abort();
}

use std::sync::Arc;

use sketchparty_shared::ServerMessage;
use tokio::sync::{mpsc, RwLock};
use uuid::Uuid;

use crate::logic::{deliver, reassign_bootstrap_sources, Delivery};
use crate::state::{AppState, Member, Room, MAX_ROOM_ID_LEN, MAX_USERNAME_LEN};

pub fn normalize_room_id(value: &str) -> Option<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() || trimmed.len() > MAX_ROOM_ID_LEN {
        return None;
    }
    if !trimmed
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    {
        return None;
    }
    Some(trimmed.to_string())
}

pub fn normalize_username(value: &str) -> Option<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() || trimmed.len() > MAX_USERNAME_LEN {
        return None;
    }
    Some(trimmed.to_string())
}

pub async fn get_room(state: &AppState, room_id: &str) -> Option<Arc<RwLock<Room>>> {
    state.rooms.read().await.get(room_id).cloned()
}

pub async fn get_or_create_room(state: &AppState, room_id: &str) -> Arc<RwLock<Room>> {
    if let Some(room) = state.rooms.read().await.get(room_id).cloned() {
        return room;
    }
    eprintln!("Creating room {room_id}...");
    let room = Arc::new(RwLock::new(Room::default()));
    let mut rooms = state.rooms.write().await;
    let entry = rooms
        .entry(room_id.to_string())
        .or_insert_with(|| room.clone());
    entry.clone()
}

/// Validates the join, admits the member, and tells everyone. Validation
/// failures are reported to the requester only and touch no room state.
/// Returns the room the connection now belongs to.
pub async fn join_room(
    state: &AppState,
    tx: &mpsc::UnboundedSender<ServerMessage>,
    connection_id: Uuid,
    room_id: &str,
    username: &str,
    create: bool,
) -> Option<(String, Arc<RwLock<Room>>)> {
    let Some(room_id) = normalize_room_id(room_id) else {
        let _ = tx.send(ServerMessage::InvalidData {
            message: "Room ID must be 1-64 letters, digits, dashes or underscores.".to_string(),
        });
        return None;
    };
    let Some(username) = normalize_username(username) else {
        let _ = tx.send(ServerMessage::InvalidData {
            message: "Username must not be empty.".to_string(),
        });
        return None;
    };

    let room = loop {
        let candidate = if create {
            get_or_create_room(state, &room_id).await
        } else {
            match get_room(state, &room_id).await {
                Some(room) => room,
                None => {
                    let _ = tx.send(ServerMessage::RoomNotFound {
                        message:
                            "Oops! The Room ID you entered doesn't exist or hasn't been created yet."
                                .to_string(),
                    });
                    return None;
                }
            }
        };
        // Admission happens while the registry lock confirms the mapping:
        // a concurrent last-member leave either reclaims the room before the
        // re-check (and the join resolves again) or re-checks emptiness after
        // it, sees this member and keeps the room. Lock order is always
        // registry first, then room.
        let rooms = state.rooms.read().await;
        let still_mapped = rooms
            .get(&room_id)
            .map(|current| Arc::ptr_eq(current, &candidate))
            .unwrap_or(false);
        if !still_mapped {
            continue;
        }
        let mut guard = candidate.write().await;
        guard.members.push(Member {
            id: connection_id,
            username: username.clone(),
            tx: tx.clone(),
        });
        eprintln!(
            "WS joined room={room_id} conn={connection_id} members={}",
            guard.members.len()
        );

        let members = guard.users(&room_id);
        let user = members
            .last()
            .cloned()
            .unwrap_or_else(|| sketchparty_shared::User {
                id: connection_id.to_string(),
                username: username.clone(),
                room_id: room_id.clone(),
            });
        let deliveries = vec![
            Delivery::to(
                connection_id,
                ServerMessage::RoomJoined {
                    user,
                    members: members.clone(),
                    room_id: room_id.clone(),
                },
            ),
            Delivery::room(ServerMessage::UpdateMembers { members }),
            Delivery::room(ServerMessage::SendNotification {
                title: "New member arrived!".to_string(),
                message: format!("{username} joined the party."),
            }),
        ];
        deliver(&guard, connection_id, &deliveries);
        drop(guard);
        drop(rooms);
        break candidate;
    };

    Some((room_id, room))
}

/// Idempotent removal. The remainder of the room learns about the departure;
/// an emptied room is discarded together with its undo history.
pub async fn leave_room(
    state: &AppState,
    room_id: &str,
    room: &Arc<RwLock<Room>>,
    member_id: Uuid,
) {
    let mut empty = false;
    {
        let mut guard = room.write().await;
        let Some(index) = guard
            .members
            .iter()
            .position(|member| member.id == member_id)
        else {
            return;
        };
        let member = guard.members.remove(index);
        guard
            .pending_bootstraps
            .retain(|pending| pending.joiner != member_id);
        let rebinds = reassign_bootstrap_sources(&mut guard, member_id);
        eprintln!(
            "WS left room={room_id} conn={member_id} members={}",
            guard.members.len()
        );

        if guard.members.is_empty() {
            empty = true;
        } else {
            let members = guard.users(room_id);
            let deliveries = vec![
                Delivery::room(ServerMessage::UpdateMembers { members }),
                Delivery::room(ServerMessage::SendNotification {
                    title: "Member departure!".to_string(),
                    message: format!("{} left the party", member.username),
                }),
            ];
            deliver(&guard, member_id, &deliveries);
            deliver(&guard, member_id, &rebinds);
        }
    }

    if empty {
        let mut rooms = state.rooms.write().await;
        if let Some(current) = rooms.get(room_id) {
            // A join may have been admitted since the emptiness check above;
            // re-check under the registry lock before discarding.
            if Arc::ptr_eq(current, room) && room.read().await.members.is_empty() {
                eprintln!("Discarding empty room {room_id}");
                rooms.remove(room_id);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sketchparty_shared::ClientMessage;

    fn channel() -> (
        mpsc::UnboundedSender<ServerMessage>,
        mpsc::UnboundedReceiver<ServerMessage>,
    ) {
        mpsc::unbounded_channel()
    }

    #[test]
    fn room_id_normalization() {
        assert_eq!(
            normalize_room_id("  abc-123  ").as_deref(),
            Some("abc-123")
        );
        assert!(normalize_room_id("").is_none());
        assert!(normalize_room_id("   ").is_none());
        assert!(normalize_room_id("has spaces").is_none());
        assert!(normalize_room_id(&"x".repeat(MAX_ROOM_ID_LEN + 1)).is_none());
    }

    #[tokio::test]
    async fn create_then_join_sees_both_members_in_join_order() {
        let state = AppState::default();
        let (tx_a, mut rx_a) = channel();
        let a = Uuid::new_v4();
        let (room_id, _room) = join_room(&state, &tx_a, a, "room-1", "ada", true)
            .await
            .unwrap();
        assert_eq!(room_id, "room-1");
        match rx_a.recv().await.unwrap() {
            ServerMessage::RoomJoined {
                user,
                members,
                room_id,
            } => {
                assert_eq!(user.id, a.to_string());
                assert_eq!(room_id, "room-1");
                assert_eq!(members.len(), 1);
            }
            other => panic!("unexpected message: {other:?}"),
        }

        let (tx_b, mut rx_b) = channel();
        let b = Uuid::new_v4();
        join_room(&state, &tx_b, b, "room-1", "bob", false)
            .await
            .unwrap();

        // skip a's own update-members/notification from the first join
        while let Ok(message) = rx_a.try_recv() {
            if let ServerMessage::UpdateMembers { members } = message {
                if members.len() == 2 {
                    assert_eq!(members[0].username, "ada");
                    assert_eq!(members[1].username, "bob");
                }
            }
        }
        let mut saw_update = false;
        while let Ok(message) = rx_b.try_recv() {
            if let ServerMessage::UpdateMembers { members } = message {
                saw_update = true;
                assert_eq!(members.len(), 2);
            }
        }
        assert!(saw_update);
    }

    #[tokio::test]
    async fn join_missing_room_is_rejected_without_creating_it() {
        let state = AppState::default();
        let (tx, mut rx) = channel();
        let result = join_room(&state, &tx, Uuid::new_v4(), "no-such-room", "ada", false).await;
        assert!(result.is_none());
        assert!(matches!(
            rx.recv().await.unwrap(),
            ServerMessage::RoomNotFound { .. }
        ));
        assert!(state.rooms.read().await.is_empty());
    }

    #[tokio::test]
    async fn invalid_join_reaches_only_the_requester_and_mutates_nothing() {
        let state = AppState::default();
        let (tx, mut rx) = channel();
        assert!(join_room(&state, &tx, Uuid::new_v4(), "room-1", "   ", true)
            .await
            .is_none());
        assert!(matches!(
            rx.recv().await.unwrap(),
            ServerMessage::InvalidData { .. }
        ));
        assert!(state.rooms.read().await.is_empty());

        assert!(join_room(&state, &tx, Uuid::new_v4(), "bad id!", "ada", true)
            .await
            .is_none());
        assert!(matches!(
            rx.recv().await.unwrap(),
            ServerMessage::InvalidData { .. }
        ));
        assert!(state.rooms.read().await.is_empty());
    }

    #[tokio::test]
    async fn last_leave_discards_the_room_and_its_history() {
        let state = AppState::default();
        let (tx_a, _rx_a) = channel();
        let a = Uuid::new_v4();
        let (room_id, room) = join_room(&state, &tx_a, a, "room-1", "ada", true)
            .await
            .unwrap();

        {
            let mut guard = room.write().await;
            let deliveries = crate::logic::apply_client_message(
                &mut guard,
                a,
                ClientMessage::AddUndoPoint {
                    room_id: room_id.clone(),
                    undo_point: "s0".into(),
                },
            );
            deliver(&guard, a, &deliveries);
        }

        leave_room(&state, &room_id, &room, a).await;
        assert!(get_room(&state, &room_id).await.is_none());

        // A rejoin under the same id starts from scratch.
        let (tx_b, _rx_b) = channel();
        let (_, fresh) = join_room(&state, &tx_b, Uuid::new_v4(), "room-1", "bob", true)
            .await
            .unwrap();
        assert!(fresh.read().await.undo_points.is_empty());
        assert!(!Arc::ptr_eq(&fresh, &room));
    }

    #[tokio::test]
    async fn racing_join_and_last_leave_never_orphan_the_room() {
        let state = AppState::default();
        for _ in 0..100 {
            let (tx_a, _rx_a) = channel();
            let a = Uuid::new_v4();
            let (room_id, room_a) = join_room(&state, &tx_a, a, "room-1", "ada", true)
                .await
                .unwrap();

            let leave_state = state.clone();
            let room_for_leave = room_a.clone();
            let leave = tokio::spawn(async move {
                leave_room(&leave_state, "room-1", &room_for_leave, a).await;
            });
            let join_state = state.clone();
            let join = tokio::spawn(async move {
                let (tx_b, rx_b) = channel();
                let b = Uuid::new_v4();
                let (_, room_b) = join_room(&join_state, &tx_b, b, "room-1", "bob", true)
                    .await
                    .unwrap();
                (b, room_b, rx_b)
            });
            leave.await.unwrap();
            let (b, room_b, _rx_b) = join.await.unwrap();

            // Whichever side of the leave the join landed on, b must be in
            // the room the registry maps to.
            let mapped = get_room(&state, &room_id)
                .await
                .expect("room reclaimed with a member inside");
            assert!(Arc::ptr_eq(&mapped, &room_b));
            assert!(room_b
                .read()
                .await
                .members
                .iter()
                .any(|member| member.id == b));

            leave_room(&state, &room_id, &room_b, b).await;
            assert!(get_room(&state, &room_id).await.is_none());
        }
    }

    #[tokio::test]
    async fn leave_is_idempotent_and_keeps_survivors() {
        let state = AppState::default();
        let (tx_a, _rx_a) = channel();
        let (tx_b, mut rx_b) = channel();
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let (room_id, room) = join_room(&state, &tx_a, a, "room-1", "ada", true)
            .await
            .unwrap();
        join_room(&state, &tx_b, b, "room-1", "bob", false)
            .await
            .unwrap();

        leave_room(&state, &room_id, &room, a).await;
        leave_room(&state, &room_id, &room, a).await;

        assert!(get_room(&state, &room_id).await.is_some());
        let mut saw_solo_update = false;
        while let Ok(message) = rx_b.try_recv() {
            if let ServerMessage::UpdateMembers { members } = message {
                if members.len() == 1 {
                    assert_eq!(members[0].username, "bob");
                    saw_solo_update = true;
                }
            }
        }
        assert!(saw_solo_update);

        leave_room(&state, &room_id, &room, b).await;
        assert!(get_room(&state, &room_id).await.is_none());
    }
}

use std::collections::HashMap;
use std::sync::Arc;

use sketchparty_shared::{ServerMessage, User};
use tokio::sync::{mpsc, RwLock};
use uuid::Uuid;

pub const MAX_ROOM_ID_LEN: usize = 64;
pub const MAX_USERNAME_LEN: usize = 32;
pub const MAX_SNAPSHOT_BYTES: usize = 4 * 1024 * 1024;
pub const MAX_UNDO_POINTS: usize = 128;

#[derive(Clone, Default)]
pub struct AppState {
    pub rooms: Arc<RwLock<HashMap<String, Arc<RwLock<Room>>>>>,
}

pub struct Member {
    pub id: Uuid,
    pub username: String,
    pub tx: mpsc::UnboundedSender<ServerMessage>,
}

/// A join in progress: `joiner` is waiting for `source` to answer a
/// get-canvas-state request.
pub struct PendingBootstrap {
    pub joiner: Uuid,
    pub source: Uuid,
    pub retried: bool,
}

#[derive(Default)]
pub struct Room {
    pub members: Vec<Member>,
    pub undo_points: Vec<String>,
    pub pending_bootstraps: Vec<PendingBootstrap>,
}

impl Room {
    // Join order, which is also the bootstrap source preference order.
    pub fn users(&self, room_id: &str) -> Vec<User> {
        self.members
            .iter()
            .map(|member| User {
                id: member.id.to_string(),
                username: member.username.clone(),
                room_id: room_id.to_string(),
            })
            .collect()
    }
}

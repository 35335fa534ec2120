use bincode::{Decode, Encode};
use serde::{Deserialize, Serialize};

#[derive(Serialize, Deserialize, Encode, Decode, Clone, Copy, Debug, PartialEq)]
pub struct Point {
    pub x: f32,
    pub y: f32,
}

/// One incremental stroke segment. A missing `prev_point` marks the first
/// segment of a stroke.
#[derive(Serialize, Deserialize, Encode, Decode, Clone, Debug)]
#[serde(rename_all = "camelCase")]
pub struct DrawOptions {
    pub current_point: Point,
    pub prev_point: Option<Point>,
    pub stroke_color: String,
    pub stroke_width: f32,
    pub dash_gap: Vec<f32>,
}

#[derive(Serialize, Deserialize, Encode, Decode, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: String,
    pub username: String,
    pub room_id: String,
}

#[derive(Serialize, Deserialize, Encode, Decode, Clone, Debug)]
#[serde(tag = "type")]
pub enum ClientMessage {
    #[serde(rename = "create-room", rename_all = "camelCase")]
    CreateRoom { room_id: String, username: String },
    #[serde(rename = "join-room", rename_all = "camelCase")]
    JoinRoom { room_id: String, username: String },
    #[serde(rename = "client-ready", rename_all = "camelCase")]
    ClientReady { room_id: String },
    #[serde(rename = "send-canvas-state", rename_all = "camelCase")]
    SendCanvasState { canvas_state: String, room_id: String },
    #[serde(rename = "draw", rename_all = "camelCase")]
    Draw {
        draw_options: DrawOptions,
        room_id: String,
    },
    #[serde(rename = "add-undo-point", rename_all = "camelCase")]
    AddUndoPoint { room_id: String, undo_point: String },
    #[serde(rename = "get-last-undo-point", rename_all = "camelCase")]
    GetLastUndoPoint { room_id: String },
    #[serde(rename = "delete-last-undo-point", rename_all = "camelCase")]
    DeleteLastUndoPoint { room_id: String },
    #[serde(rename = "undo", rename_all = "camelCase")]
    Undo { canvas_state: String, room_id: String },
    #[serde(rename = "clear-canvas", rename_all = "camelCase")]
    ClearCanvas { room_id: String },
    #[serde(rename = "leave-room")]
    LeaveRoom,
}

#[derive(Serialize, Deserialize, Encode, Decode, Clone, Debug)]
#[serde(tag = "type")]
pub enum ServerMessage {
    #[serde(rename = "room-joined", rename_all = "camelCase")]
    RoomJoined {
        user: User,
        members: Vec<User>,
        room_id: String,
    },
    #[serde(rename = "room-not-found")]
    RoomNotFound { message: String },
    #[serde(rename = "invalid-data")]
    InvalidData { message: String },
    #[serde(rename = "update-members")]
    UpdateMembers { members: Vec<User> },
    #[serde(rename = "get-canvas-state")]
    GetCanvasState,
    #[serde(rename = "canvas-state-from-server", rename_all = "camelCase")]
    CanvasStateFromServer { canvas_state: String },
    #[serde(rename = "update-canvas-state", rename_all = "camelCase")]
    UpdateCanvasState { draw_options: DrawOptions },
    #[serde(rename = "last-undo-point-from-server", rename_all = "camelCase")]
    LastUndoPointFromServer { undo_point: Option<String> },
    #[serde(rename = "undo-canvas", rename_all = "camelCase")]
    UndoCanvas { canvas_state: String },
    #[serde(rename = "clear-canvas")]
    ClearCanvas,
    #[serde(rename = "send-notification")]
    SendNotification { title: String, message: String },
    #[serde(rename = "client-loaded")]
    ClientLoaded,
}

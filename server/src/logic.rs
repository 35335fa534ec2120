use sketchparty_shared::{ClientMessage, DrawOptions, Point, ServerMessage};
use uuid::Uuid;

use crate::state::{PendingBootstrap, Room, MAX_SNAPSHOT_BYTES, MAX_UNDO_POINTS};

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Scope {
    All,
    Others,
    Member(Uuid),
}

pub struct Delivery {
    pub scope: Scope,
    pub message: ServerMessage,
}

impl Delivery {
    pub fn to(member: Uuid, message: ServerMessage) -> Self {
        Self {
            scope: Scope::Member(member),
            message,
        }
    }

    pub fn room(message: ServerMessage) -> Self {
        Self {
            scope: broadcast_scope(&message),
            message,
        }
    }
}

// Fan-out policy per event kind. Draw updates skip the author, who already
// rendered the segment locally; undo results and presence are authoritative
// on the server side and go to everyone.
fn broadcast_scope(message: &ServerMessage) -> Scope {
    match message {
        ServerMessage::UpdateCanvasState { .. } | ServerMessage::ClearCanvas => Scope::Others,
        ServerMessage::UndoCanvas { .. }
        | ServerMessage::UpdateMembers { .. }
        | ServerMessage::SendNotification { .. } => Scope::All,
        _ => Scope::Others,
    }
}

/// Applies one in-room message and returns what to send where. The caller
/// holds the room's write lock across both the call and the sends, which is
/// what makes the per-room delivery order match the acceptance order.
pub fn apply_client_message(
    room: &mut Room,
    sender: Uuid,
    message: ClientMessage,
) -> Vec<Delivery> {
    match message {
        ClientMessage::Draw { draw_options, .. } => {
            let Some(draw_options) = sanitize_draw_options(draw_options) else {
                return Vec::new();
            };
            vec![Delivery::room(ServerMessage::UpdateCanvasState {
                draw_options,
            })]
        }
        ClientMessage::ClientReady { .. } => {
            let source = room
                .members
                .iter()
                .map(|member| member.id)
                .find(|id| *id != sender);
            let Some(source) = source else {
                // Sole member, a blank canvas is the correct initial state.
                return vec![Delivery::to(sender, ServerMessage::ClientLoaded)];
            };
            room.pending_bootstraps.push(PendingBootstrap {
                joiner: sender,
                source,
                retried: false,
            });
            vec![Delivery::to(source, ServerMessage::GetCanvasState)]
        }
        ClientMessage::SendCanvasState { canvas_state, .. } => {
            let Some(canvas_state) = sanitize_snapshot(canvas_state) else {
                return Vec::new();
            };
            let joiners = room
                .pending_bootstraps
                .iter()
                .filter(|pending| pending.source == sender)
                .map(|pending| pending.joiner)
                .collect::<Vec<_>>();
            room.pending_bootstraps
                .retain(|pending| pending.source != sender);
            // Unsolicited canvas states fan out to nobody.
            joiners
                .into_iter()
                .map(|joiner| {
                    Delivery::to(
                        joiner,
                        ServerMessage::CanvasStateFromServer {
                            canvas_state: canvas_state.clone(),
                        },
                    )
                })
                .collect()
        }
        ClientMessage::AddUndoPoint { undo_point, .. } => {
            let Some(undo_point) = sanitize_snapshot(undo_point) else {
                return Vec::new();
            };
            room.undo_points.push(undo_point);
            let overflow = room.undo_points.len().saturating_sub(MAX_UNDO_POINTS);
            if overflow > 0 {
                room.undo_points.drain(0..overflow);
            }
            Vec::new()
        }
        ClientMessage::GetLastUndoPoint { .. } => {
            vec![Delivery::to(
                sender,
                ServerMessage::LastUndoPointFromServer {
                    undo_point: room.undo_points.last().cloned(),
                },
            )]
        }
        ClientMessage::DeleteLastUndoPoint { .. } => {
            room.undo_points.pop();
            Vec::new()
        }
        ClientMessage::Undo { .. } => {
            // The popped snapshot is the authority, not the client payload.
            match room.undo_points.pop() {
                Some(canvas_state) => {
                    vec![Delivery::room(ServerMessage::UndoCanvas { canvas_state })]
                }
                None => Vec::new(),
            }
        }
        ClientMessage::ClearCanvas { .. } => {
            vec![Delivery::room(ServerMessage::ClearCanvas)]
        }
        // Membership changes are handled by the connection task, not here.
        ClientMessage::CreateRoom { .. }
        | ClientMessage::JoinRoom { .. }
        | ClientMessage::LeaveRoom => Vec::new(),
    }
}

/// Sends each delivery to the members its scope selects, in member join
/// order. A closed channel means that member's connection task is already
/// tearing down, so the send is skipped and cleanup is left to that task.
pub fn deliver(room: &Room, sender: Uuid, deliveries: &[Delivery]) {
    for delivery in deliveries {
        for member in &room.members {
            let wanted = match delivery.scope {
                Scope::All => true,
                Scope::Others => member.id != sender,
                Scope::Member(id) => member.id == id,
            };
            if wanted {
                let _ = member.tx.send(delivery.message.clone());
            }
        }
    }
}

/// Re-targets bootstraps whose source member went away. Called after the
/// member has been removed from the room. Each bootstrap is retried at most
/// once; after that, or when no other member remains, the joiner is released
/// with a blank canvas instead of waiting forever.
pub fn reassign_bootstrap_sources(room: &mut Room, lost: Uuid) -> Vec<Delivery> {
    let mut deliveries = Vec::new();
    let mut keep = Vec::new();
    for mut pending in std::mem::take(&mut room.pending_bootstraps) {
        if pending.source != lost {
            keep.push(pending);
            continue;
        }
        let next = if pending.retried {
            None
        } else {
            room.members
                .iter()
                .map(|member| member.id)
                .find(|id| *id != pending.joiner)
        };
        match next {
            Some(source) => {
                pending.source = source;
                pending.retried = true;
                deliveries.push(Delivery::to(source, ServerMessage::GetCanvasState));
                keep.push(pending);
            }
            None => deliveries.push(Delivery::to(pending.joiner, ServerMessage::ClientLoaded)),
        }
    }
    room.pending_bootstraps = keep;
    deliveries
}

fn normalize_point(point: Point) -> Option<Point> {
    if !point.x.is_finite() || !point.y.is_finite() {
        return None;
    }
    Some(point)
}

fn sanitize_color(mut color: String) -> String {
    if color.is_empty() {
        return "#000000".to_string();
    }
    if color.len() > 32 {
        // truncate only at a char boundary, the cap may split a multibyte char
        let mut end = 32;
        while !color.is_char_boundary(end) {
            end -= 1;
        }
        color.truncate(end);
    }
    color
}

fn sanitize_width(width: f32) -> f32 {
    let width = if width.is_finite() { width } else { 5.0 };
    width.max(1.0).min(60.0)
}

fn sanitize_draw_options(mut options: DrawOptions) -> Option<DrawOptions> {
    options.current_point = normalize_point(options.current_point)?;
    options.prev_point = match options.prev_point {
        Some(point) => Some(normalize_point(point)?),
        None => None,
    };
    options.stroke_color = sanitize_color(options.stroke_color);
    options.stroke_width = sanitize_width(options.stroke_width);
    options.dash_gap.retain(|gap| gap.is_finite() && *gap >= 0.0);
    Some(options)
}

fn sanitize_snapshot(snapshot: String) -> Option<String> {
    if snapshot.is_empty() || snapshot.len() > MAX_SNAPSHOT_BYTES {
        return None;
    }
    Some(snapshot)
}

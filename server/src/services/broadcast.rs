//! Update broadcaster: room-scoped fan-out with per-room sequencing.
//!
//! DESIGN
//! ======
//! Sequence assignment and enqueue both happen inside the room's map-entry
//! critical section, which makes delivery order per room deterministic:
//! any two updates reach every shared recipient in sequence order. The
//! sends themselves are non-blocking `try_send`s onto bounded queues, so
//! the critical section never waits on a slow consumer.
//!
//! ERROR HANDLING
//! ==============
//! Delivery is best-effort per recipient. A closed outbound queue means
//! the recipient's socket task is gone: the recipient is evicted through
//! the registry, never retried, and delivery to the remaining members
//! proceeds. A full queue drops only that recipient's copy of the event.

use tracing::warn;
use uuid::Uuid;

use crate::services::{presence, registry};
use crate::state::AppState;
use wire::{ErrorCode, RoomId, ServerEvent};

#[derive(Debug, thiserror::Error)]
pub enum PublishError {
    #[error("not a member of room {0}")]
    NotAMember(RoomId),
}

impl ErrorCode for PublishError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::NotAMember(_) => wire::codes::NOT_A_MEMBER,
        }
    }
}

/// Publish an opaque payload to a room on behalf of a member connection.
///
/// Assigns the room's next sequence number and fans the update out to all
/// members except the sender (unless `self_echo`). Publishing counts as
/// presence activity, so the sender's liveness entry is refreshed too.
/// Returns the assigned sequence number.
///
/// # Errors
///
/// [`PublishError::NotAMember`] when the sender is not currently joined;
/// the room sees no side effect in that case.
pub fn publish(
    state: &AppState,
    sender_conn: Uuid,
    room: &RoomId,
    payload: serde_json::Value,
    self_echo: bool,
) -> Result<u64, PublishError> {
    let mut closed = Vec::new();
    let (seq, sender_user, now) = {
        let Some(mut room_state) = state.rooms.get_mut(room) else {
            return Err(PublishError::NotAMember(room.clone()));
        };
        let Some(sender) = room_state.members.get(&sender_conn) else {
            return Err(PublishError::NotAMember(room.clone()));
        };
        let sender_user = sender.user_id;
        let seq = room_state.assign_seq();
        let now = wire::now_ms();
        let event = ServerEvent::Update {
            room: room.clone(),
            sender: sender_user,
            seq,
            payload,
            ts: now,
        };

        for (conn_id, member) in &room_state.members {
            if !self_echo && *conn_id == sender_conn {
                continue;
            }
            deliver(&member.outbound, &event, *conn_id, room, &mut closed);
        }
        (seq, sender_user, now)
    };

    // Any inbound room event is presence activity; a user publishing for
    // longer than the liveness window must not be expired as silent.
    presence::touch(state, room, sender_user, None, now);

    for conn_id in closed {
        registry::disconnect(state, conn_id, "outbound queue closed");
    }
    Ok(seq)
}

/// Refresh the sender's presence in a room and announce it to peers.
/// Silently ignored when the connection is not a member; cursor traffic
/// racing a leave is routine, not an error.
pub fn presence_touch(state: &AppState, sender_conn: Uuid, room: &RoomId, position: Option<serde_json::Value>) {
    let Some(room_state) = state.rooms.get(room) else {
        return;
    };
    let Some(sender) = room_state.members.get(&sender_conn) else {
        return;
    };
    let user_id = sender.user_id;
    drop(room_state);

    let now = wire::now_ms();
    presence::touch(state, room, user_id, position.clone(), now);

    // Peers see the move; the sender's own other connections do too
    // (multi-tab presence), only the publishing socket is excluded.
    let _ = fan_out(
        state,
        room,
        &ServerEvent::Presence { room: room.clone(), user_id, position, ts: now },
        Some(sender_conn),
    );
}

/// Deliver an event to every member of a room except `exclude_conn`.
/// Returns the connection ids whose outbound queues were closed; callers
/// on non-eviction paths may ignore them (the heartbeat sweep catches up).
pub fn fan_out(state: &AppState, room: &RoomId, event: &ServerEvent, exclude_conn: Option<Uuid>) -> Vec<Uuid> {
    let mut closed = Vec::new();
    let Some(room_state) = state.rooms.get(room) else {
        return closed;
    };
    for (conn_id, member) in &room_state.members {
        if exclude_conn == Some(*conn_id) {
            continue;
        }
        deliver(&member.outbound, event, *conn_id, room, &mut closed);
    }
    closed
}

fn deliver(
    outbound: &tokio::sync::mpsc::Sender<ServerEvent>,
    event: &ServerEvent,
    conn_id: Uuid,
    room: &RoomId,
    closed: &mut Vec<Uuid>,
) {
    use tokio::sync::mpsc::error::TrySendError;

    match outbound.try_send(event.clone()) {
        Ok(()) => {}
        Err(TrySendError::Full(_)) => {
            warn!(%conn_id, room = %room, "outbound queue full; dropping event for this recipient");
        }
        Err(TrySendError::Closed(_)) => {
            closed.push(conn_id);
        }
    }
}

#[cfg(test)]
#[path = "broadcast_test.rs"]
mod tests;

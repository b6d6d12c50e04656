//! Room directory: membership with lazy create and atomic tear-down.
//!
//! DESIGN
//! ======
//! Rooms exist only while they have members. Creation happens inside the
//! first join's map-entry critical section and removal inside the last
//! leave's (`remove_if`), so a concurrent join can never be lost to a room
//! being torn down: either it lands before the emptiness check and keeps
//! the room alive, or it re-creates the entry afterwards.
//!
//! Membership is mirrored on the connection record (`Connection::rooms`);
//! the two sides are mutated together and re-checked when a disconnect
//! races a join.

use tracing::info;
use uuid::Uuid;

use crate::services::{broadcast, presence};
use crate::state::{AppState, Member};
use wire::{ErrorCode, PresenceState, RoomId, ServerEvent};

#[derive(Debug, thiserror::Error)]
pub enum JoinError {
    #[error("workspace scope does not cover room {0}")]
    Forbidden(RoomId),
    #[error("unknown connection")]
    UnknownConnection,
}

impl ErrorCode for JoinError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::Forbidden(_) => wire::codes::ROOM_FORBIDDEN,
            Self::UnknownConnection => wire::codes::INTERNAL,
        }
    }
}

/// Result of dropping one connection from one room.
pub(crate) struct MembershipChange {
    /// The connection was actually a member (false makes leave a no-op).
    pub was_member: bool,
    /// No other connection of the same user remains in the room.
    pub user_gone: bool,
}

/// Join a room. Idempotent; seeds the joiner's presence entry, announces
/// the newcomer to peers, and returns the room's presence snapshot.
///
/// # Errors
///
/// [`JoinError::Forbidden`] when the connection's workspace scope does not
/// cover the room; [`JoinError::UnknownConnection`] if the connection
/// disappeared before membership could be recorded.
pub fn join(state: &AppState, connection_id: Uuid, room: &RoomId) -> Result<Vec<PresenceState>, JoinError> {
    let Some(conn) = state.conns.get(&connection_id) else {
        return Err(JoinError::UnknownConnection);
    };
    if room.workspace() != conn.workspace {
        return Err(JoinError::Forbidden(room.clone()));
    }
    let user_id = conn.user_id;
    let outbound = conn.outbound.clone();
    drop(conn);

    let newly_joined = {
        let mut room_state = state.rooms.entry(room.clone()).or_default();
        room_state
            .members
            .insert(connection_id, Member { user_id, outbound })
            .is_none()
    };

    // Mirror membership on the connection record. If a disconnect raced us
    // the record is gone; undo the room side to restore symmetry.
    match state.conns.get_mut(&connection_id) {
        Some(mut conn) => {
            conn.rooms.insert(room.clone());
        }
        None => {
            remove_member(state, room, connection_id, user_id);
            return Err(JoinError::UnknownConnection);
        }
    }

    let now = wire::now_ms();
    presence::touch(state, room, user_id, None, now);

    if newly_joined {
        info!(%connection_id, user_id = %user_id, room = %room, "joined room");
        let _ = broadcast::fan_out(
            state,
            room,
            &ServerEvent::Presence { room: room.clone(), user_id, position: None, ts: now },
            Some(connection_id),
        );
    }

    Ok(presence::snapshot(state, room))
}

/// Leave a room. No-op when the connection is not a member. Peers receive
/// `member-left` once the user's last connection is out.
pub fn leave(state: &AppState, connection_id: Uuid, room: &RoomId) {
    let Some(mut conn) = state.conns.get_mut(&connection_id) else {
        return;
    };
    conn.rooms.remove(room);
    let user_id = conn.user_id;
    drop(conn);

    let change = remove_member(state, room, connection_id, user_id);
    if change.was_member {
        info!(%connection_id, user_id = %user_id, room = %room, "left room");
    }
    if change.was_member && change.user_gone {
        presence::clear(state, room, user_id);
        let _ = broadcast::fan_out(
            state,
            room,
            &ServerEvent::MemberLeft { room: room.clone(), user_id },
            None,
        );
    }
}

/// Current member connection ids of a room. Internal to the hub; this is
/// fan-out plumbing, never exposed on the wire.
#[must_use]
pub fn members(state: &AppState, room: &RoomId) -> Vec<Uuid> {
    state
        .rooms
        .get(room)
        .map(|r| r.members.keys().copied().collect())
        .unwrap_or_default()
}

/// Drop one connection from one room and tear the room down if it emptied.
pub(crate) fn remove_member(state: &AppState, room: &RoomId, connection_id: Uuid, user_id: Uuid) -> MembershipChange {
    let mut change = MembershipChange { was_member: false, user_gone: true };
    if let Some(mut room_state) = state.rooms.get_mut(room) {
        change.was_member = room_state.members.remove(&connection_id).is_some();
        change.user_gone = !room_state.has_user(user_id);
    }
    // Atomic with the emptiness check: a join landing now either wins the
    // entry lock first (non-empty, kept) or recreates the room after.
    let removed = state.rooms.remove_if(room, |_, r| r.members.is_empty());
    if removed.is_some() {
        state.presence.remove(room);
        info!(room = %room, "room torn down");
    }
    change
}

#[cfg(test)]
#[path = "rooms_test.rs"]
mod tests;

//! Presence tracker: per-room liveness and cursor state with expiry.
//!
//! DESIGN
//! ======
//! Entries are keyed (room, user) and stored as a `BTreeMap` per room so
//! snapshots come out ordered by user id. Every inbound event from a user
//! in a room refreshes that entry's liveness; `expire` is the convergence
//! path for ungraceful disconnects: crashed tabs and dead networks never
//! send a leave, so silence past the liveness window is treated as one.
//!
//! The expiry sweep holds each room's entry lock only long enough to
//! collect and drop that room's stale users; it never spans the whole map.

use uuid::Uuid;

use crate::state::{AppState, PresenceEntry};
use wire::{PresenceState, RoomId};

/// Update or create the (room, user) entry and reset its liveness timer.
/// A `None` position refreshes liveness without moving the cursor.
pub fn touch(state: &AppState, room: &RoomId, user_id: Uuid, position: Option<serde_json::Value>, now_ms: i64) {
    let mut entries = state.presence.entry(room.clone()).or_default();
    let entry = entries
        .entry(user_id)
        .or_insert(PresenceEntry { position: None, last_seen_ms: now_ms });
    entry.last_seen_ms = now_ms;
    if position.is_some() {
        entry.position = position;
    }
}

/// Current presence of a room, ordered by user id. Late joiners use this
/// to reconstruct room state.
#[must_use]
pub fn snapshot(state: &AppState, room: &RoomId) -> Vec<PresenceState> {
    state
        .presence
        .get(room)
        .map(|entries| {
            entries
                .iter()
                .map(|(user_id, e)| PresenceState {
                    user_id: *user_id,
                    position: e.position.clone(),
                    last_seen_ms: e.last_seen_ms,
                })
                .collect()
        })
        .unwrap_or_default()
}

/// Remove the (room, user) entry. Returns whether one existed.
pub fn clear(state: &AppState, room: &RoomId, user_id: Uuid) -> bool {
    let removed = state
        .presence
        .get_mut(room)
        .map(|mut entries| entries.remove(&user_id).is_some())
        .unwrap_or(false);
    state.presence.remove_if(room, |_, entries| entries.is_empty());
    removed
}

/// Drop every entry whose last activity is older than the liveness window
/// and return the expired (room, user) pairs so the caller can emit the
/// synthetic `member-left` notifications.
#[must_use]
pub fn expire(state: &AppState, now_ms: i64, liveness_window_ms: u64) -> Vec<(RoomId, Uuid)> {
    let cutoff = now_ms.saturating_sub(i64::try_from(liveness_window_ms).unwrap_or(i64::MAX));
    let mut expired = Vec::new();

    for mut room_entry in state.presence.iter_mut() {
        let room = room_entry.key().clone();
        let stale: Vec<Uuid> = room_entry
            .value()
            .iter()
            .filter(|(_, e)| e.last_seen_ms < cutoff)
            .map(|(user_id, _)| *user_id)
            .collect();
        for user_id in stale {
            room_entry.value_mut().remove(&user_id);
            expired.push((room.clone(), user_id));
        }
    }

    state.presence.retain(|_, entries| !entries.is_empty());
    expired
}

#[cfg(test)]
#[path = "presence_test.rs"]
mod tests;

//! Shared hub state.
//!
//! DESIGN
//! ======
//! `AppState` is injected into Axum handlers via the `State` extractor.
//! It holds three keyed maps (connections, rooms, presence), each a
//! `DashMap` so unrelated keys never contend on one lock. Entities refer
//! to each other by identifier only; the maps are the single owners.
//!
//! LOCKING
//! =======
//! The only nested acquisition order is room entry → connection entry
//! (fan-out resolves senders stored inside the room, so in practice even
//! that rarely happens). Never hold a connection guard while touching the
//! rooms map. Sweeps collect ids under short per-entry locks and act
//! afterwards.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::config::Config;
use crate::services::auth::TokenVerifier;
use wire::{RoomId, ServerEvent};

// =============================================================================
// CONNECTION
// =============================================================================

/// One live admitted connection. Exclusively owned by the connection map;
/// rooms and presence hold only its identifier.
pub struct Connection {
    pub user_id: Uuid,
    /// Workspace scope resolved at admission; join checks compare against it.
    pub workspace: String,
    /// Rooms this connection is currently joined to (mirror of room member
    /// sets; the two are mutated together).
    pub rooms: HashSet<RoomId>,
    /// Milliseconds since epoch of the last inbound event on this socket.
    pub last_seen_ms: i64,
    /// Outbound queue consumed by this connection's socket task.
    pub outbound: mpsc::Sender<ServerEvent>,
}

// =============================================================================
// ROOM
// =============================================================================

/// A room member as seen by the fan-out path: identity plus a clone of the
/// member's outbound sender, so broadcasting never touches the connection map.
#[derive(Clone)]
pub struct Member {
    pub user_id: Uuid,
    pub outbound: mpsc::Sender<ServerEvent>,
}

/// Per-room live state. Created on first join, removed atomically with the
/// last leave so empty rooms never accumulate.
#[derive(Default)]
pub struct RoomState {
    /// Members keyed by connection id.
    pub members: HashMap<Uuid, Member>,
    /// Next sequence number to assign. Incremented only inside this room's
    /// map entry, which serializes ordering per room.
    pub next_seq: u64,
}

impl RoomState {
    /// Assign the next sequence number for this room.
    pub fn assign_seq(&mut self) -> u64 {
        self.next_seq += 1;
        self.next_seq
    }

    /// Whether any connection of `user_id` remains a member.
    #[must_use]
    pub fn has_user(&self, user_id: Uuid) -> bool {
        self.members.values().any(|m| m.user_id == user_id)
    }
}

// =============================================================================
// PRESENCE
// =============================================================================

/// Transient liveness/position state for one (room, user) pair.
#[derive(Debug, Clone)]
pub struct PresenceEntry {
    pub position: Option<serde_json::Value>,
    pub last_seen_ms: i64,
}

// =============================================================================
// APP STATE
// =============================================================================

/// Shared hub state. Clone is required by Axum; all fields are Arc-wrapped.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub verifier: Arc<dyn TokenVerifier>,
    /// Live connections keyed by connection id.
    pub conns: Arc<DashMap<Uuid, Connection>>,
    /// Live rooms keyed by room id.
    pub rooms: Arc<DashMap<RoomId, RoomState>>,
    /// Presence entries keyed by room, ordered by user id inside each room
    /// so snapshots come out sorted without extra work.
    pub presence: Arc<DashMap<RoomId, BTreeMap<Uuid, PresenceEntry>>>,
}

impl AppState {
    #[must_use]
    pub fn new(config: Config, verifier: Arc<dyn TokenVerifier>) -> Self {
        Self {
            config: Arc::new(config),
            verifier,
            conns: Arc::new(DashMap::new()),
            rooms: Arc::new(DashMap::new()),
            presence: Arc::new(DashMap::new()),
        }
    }
}

// =============================================================================
// TEST HELPERS
// =============================================================================


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn room_state_assigns_gapless_increasing_seqs() {
        let mut room = RoomState::default();
        assert_eq!(room.assign_seq(), 1);
        assert_eq!(room.assign_seq(), 2);
        assert_eq!(room.assign_seq(), 3);
    }

    #[test]
    fn room_state_has_user_matches_any_connection() {
        let user = Uuid::new_v4();
        let (tx, _rx) = mpsc::channel(1);
        let mut room = RoomState::default();
        room.members.insert(Uuid::new_v4(), Member { user_id: user, outbound: tx });

        assert!(room.has_user(user));
        assert!(!room.has_user(Uuid::new_v4()));
    }
}

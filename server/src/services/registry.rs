//! Connection registry: admission, lookup, liveness touch, teardown.
//!
//! DESIGN
//! ======
//! Admission validates the identity token through the external verifier,
//! then creates the connection record and its bounded outbound queue. The
//! registry is the only owner of `Connection`; every other component works
//! with connection ids.
//!
//! Teardown (`disconnect`) is idempotent so duplicate disconnect signals
//! (socket close racing a heartbeat eviction racing a delivery failure)
//! collapse into one cleanup.

use tokio::sync::mpsc;
use tracing::info;
use uuid::Uuid;

use crate::services::auth::{AuthError, Identity};
use crate::services::{broadcast, presence, rooms};
use crate::state::{AppState, Connection};
use wire::ServerEvent;

/// Outcome of a successful admission.
#[derive(Debug)]
pub struct Admitted {
    pub connection_id: Uuid,
    pub identity: Identity,
    /// Receiving end of the connection's outbound queue; owned by the
    /// socket task for the life of the connection.
    pub outbound_rx: mpsc::Receiver<ServerEvent>,
}

/// Lightweight connection view for callers that only need identity.
#[derive(Debug, Clone)]
pub struct ConnInfo {
    pub user_id: Uuid,
    pub workspace: String,
}

/// Admit a connection after verifying its identity token.
///
/// # Errors
///
/// [`AuthError::Rejected`] for bad tokens or unresolvable workspace scope,
/// [`AuthError::Unreachable`] when the auth collaborator is down.
pub async fn admit(state: &AppState, token: &str) -> Result<Admitted, AuthError> {
    let identity = state.verifier.verify(token).await?;

    let (tx, rx) = mpsc::channel(state.config.outbound_queue_capacity);
    let connection_id = Uuid::new_v4();
    state.conns.insert(
        connection_id,
        Connection {
            user_id: identity.user_id,
            workspace: identity.workspace.clone(),
            rooms: std::collections::HashSet::new(),
            last_seen_ms: wire::now_ms(),
            outbound: tx,
        },
    );

    info!(%connection_id, user_id = %identity.user_id, workspace = %identity.workspace, "connection admitted");
    Ok(Admitted { connection_id, identity, outbound_rx: rx })
}

/// Look up a connection's identity.
#[must_use]
pub fn lookup(state: &AppState, connection_id: Uuid) -> Option<ConnInfo> {
    state
        .conns
        .get(&connection_id)
        .map(|c| ConnInfo { user_id: c.user_id, workspace: c.workspace.clone() })
}

/// Refresh a connection's last-seen timestamp. Called on every inbound event.
pub fn touch(state: &AppState, connection_id: Uuid) {
    if let Some(mut conn) = state.conns.get_mut(&connection_id) {
        conn.last_seen_ms = wire::now_ms();
    }
}

/// Remove a connection and clean up everything that referenced it: room
/// memberships, presence entries, and peers' views (`member-left`).
///
/// Idempotent: disconnecting an unknown or already-removed connection is
/// a no-op. Returns whether a live connection was actually removed.
pub fn disconnect(state: &AppState, connection_id: Uuid, reason: &str) -> bool {
    let Some((_, conn)) = state.conns.remove(&connection_id) else {
        return false;
    };
    info!(%connection_id, user_id = %conn.user_id, reason, "connection removed");

    for room in &conn.rooms {
        let change = rooms::remove_member(state, room, connection_id, conn.user_id);
        if change.was_member && change.user_gone {
            presence::clear(state, room, conn.user_id);
            // Closed peers discovered here are left for their own teardown
            // paths; evicting them from inside an eviction would recurse.
            let _ = broadcast::fan_out(
                state,
                room,
                &ServerEvent::MemberLeft { room: room.clone(), user_id: conn.user_id },
                None,
            );
        }
    }
    true
}

#[cfg(test)]
#[path = "registry_test.rs"]
mod tests;

//! Heartbeat / liveness monitor.
//!
//! DESIGN
//! ======
//! A fixed-interval background task decouples "socket still open" from
//! "client still present": transport keepalive can outlive an unresponsive
//! tab. Each sweep expires stale presence entries (emitting the synthetic
//! `member-left`s that keep peers' views converging), pings every live
//! connection, and evicts connections that have been silent past the ping
//! timeout.
//!
//! Sweeps collect victims under short per-entry locks and evict afterwards
//! so a scan never starves publishers.

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::info;
use uuid::Uuid;

use crate::services::{broadcast, presence, registry};
use crate::state::AppState;
use wire::ServerEvent;

/// Spawn the monitor task. Returns a handle for shutdown.
pub fn spawn_monitor_task(state: AppState) -> JoinHandle<()> {
    let interval = state.config.heartbeat_interval();
    info!(
        heartbeat_interval_ms = state.config.heartbeat_interval_ms,
        liveness_window_ms = state.config.liveness_window_ms,
        ping_timeout_ms = state.config.ping_timeout_ms,
        "liveness monitor configured"
    );
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            ticker.tick().await;
            sweep(&state);
        }
    })
}

/// One monitor pass: presence expiry, pings, stale-connection eviction.
pub fn sweep(state: &AppState) {
    let now = wire::now_ms();

    let expired = presence::expire(state, now, state.config.liveness_window_ms);
    for (room, user_id) in expired {
        info!(user_id = %user_id, room = %room, "presence expired");
        let _ = broadcast::fan_out(
            state,
            &room,
            &ServerEvent::MemberLeft { room: room.clone(), user_id },
            None,
        );
    }

    // PHASE: COLLECT STALE + PING LIVE
    // Pings go out through the same bounded queues as everything else;
    // eviction happens after the iteration so no entry lock spans it.
    let cutoff = now.saturating_sub(i64::try_from(state.config.ping_timeout_ms).unwrap_or(i64::MAX));
    let mut stale: Vec<Uuid> = Vec::new();
    for entry in state.conns.iter() {
        if entry.last_seen_ms < cutoff {
            stale.push(*entry.key());
        } else {
            let _ = entry.outbound.try_send(ServerEvent::Ping);
        }
    }

    for conn_id in stale {
        registry::disconnect(state, conn_id, "liveness timeout");
    }
}

#[cfg(test)]
#[path = "monitor_test.rs"]
mod tests;

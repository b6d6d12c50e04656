//! WebSocket handler: admission handshake and bidirectional event relay.
//!
//! LIFECYCLE
//! =========
//! 1. Upgrade → client must send `connect(token)` within the connect timeout
//! 2. Admission → `connected(connection_id)` or `rejected(reason)` + close
//! 3. `select!` loop: inbound client events → dispatch; queued fan-out
//!    events from peers → forward to the socket
//! 4. Close / transport error → registry teardown (rooms, presence, peers)
//!
//! DESIGN
//! ======
//! `handle_event` is pure dispatch: it mutates hub state through the
//! services and returns only the events owed to the sender. Fan-out to
//! peers happens inside the services, through each peer's outbound queue;
//! no handler ever writes to another connection's socket.

use axum::extract::State;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::response::Response;
use tokio::time::{Instant, timeout_at};
use tracing::{info, warn};
use uuid::Uuid;

use crate::services::registry::{self, Admitted};
use crate::services::{broadcast, rooms};
use crate::state::AppState;
use wire::{ClientEvent, ServerEvent};

pub async fn handle_ws(State(state): State<AppState>, ws: WebSocketUpgrade) -> Response {
    ws.on_upgrade(move |socket| run_ws(socket, state))
}

// =============================================================================
// CONNECTION
// =============================================================================

async fn run_ws(mut socket: WebSocket, state: AppState) {
    let Some(admitted) = admission(&mut socket, &state).await else {
        return;
    };
    let Admitted { connection_id, identity, mut outbound_rx } = admitted;

    let welcome = ServerEvent::Connected { connection_id, user_id: identity.user_id };
    if send_event(&mut socket, &welcome).await.is_err() {
        registry::disconnect(&state, connection_id, "welcome send failed");
        return;
    }

    'session: loop {
        tokio::select! {
            msg = socket.recv() => {
                let Some(Ok(msg)) = msg else { break };
                match msg {
                    Message::Text(text) => {
                        registry::touch(&state, connection_id);
                        let replies = match wire::decode_client(&text) {
                            Ok(event) => handle_event(&state, connection_id, event),
                            Err(e) => {
                                warn!(%connection_id, error = %e, "ws: malformed inbound event");
                                vec![ServerEvent::Error {
                                    code: wire::codes::BAD_EVENT.to_owned(),
                                    message: e.to_string(),
                                }]
                            }
                        };
                        for reply in replies {
                            if send_event(&mut socket, &reply).await.is_err() {
                                break 'session;
                            }
                        }
                    }
                    Message::Close(_) => break,
                    _ => {}
                }
            }
            maybe_event = outbound_rx.recv() => {
                // Queue closed means the registry already evicted us.
                let Some(event) = maybe_event else { break };
                if send_event(&mut socket, &event).await.is_err() {
                    break;
                }
            }
        }
    }

    registry::disconnect(&state, connection_id, "socket closed");
}

/// Await and process the `connect` handshake. Returns `None` when the
/// socket was rejected or went away; a rejection event is sent first.
///
/// The deadline is fixed at entry: transport frames trickling in must not
/// keep an unadmitted socket alive past the connect timeout.
async fn admission(socket: &mut WebSocket, state: &AppState) -> Option<Admitted> {
    let deadline = Instant::now() + state.config.connect_timeout();
    let token = loop {
        let msg = timeout_at(deadline, socket.recv()).await.ok()??.ok()?;
        match msg {
            Message::Text(text) => match wire::decode_client(&text) {
                Ok(ClientEvent::Connect { token }) => break token,
                Ok(_) | Err(_) => {
                    let rejected = ServerEvent::Rejected {
                        code: wire::codes::BAD_EVENT.to_owned(),
                        message: "first event must be connect".to_owned(),
                    };
                    let _ = send_event(socket, &rejected).await;
                    return None;
                }
            },
            Message::Close(_) => return None,
            // Transport-level frames before the handshake are tolerated.
            _ => {}
        }
    };

    match registry::admit(state, &token).await {
        Ok(admitted) => Some(admitted),
        Err(e) => {
            info!(error = %e, "ws: admission rejected");
            let _ = send_event(socket, &ServerEvent::rejected(&e)).await;
            None
        }
    }
}

// =============================================================================
// EVENT DISPATCH
// =============================================================================

/// Dispatch one decoded client event. Returns the events owed to the
/// sender; peer-facing effects ride the services' fan-out paths.
pub(crate) fn handle_event(state: &AppState, connection_id: Uuid, event: ClientEvent) -> Vec<ServerEvent> {
    match event {
        ClientEvent::Connect { .. } => vec![ServerEvent::Error {
            code: wire::codes::BAD_EVENT.to_owned(),
            message: "already connected".to_owned(),
        }],

        ClientEvent::JoinRoom { room } => match rooms::join(state, connection_id, &room) {
            Ok(presence) => vec![ServerEvent::Joined { room, presence }],
            Err(e) => {
                // Scope mismatches are logged but not fatal: the connection
                // stays alive for rooms it is allowed into.
                warn!(%connection_id, room = %room, error = %e, "ws: join rejected");
                vec![ServerEvent::rejected(&e)]
            }
        },

        ClientEvent::LeaveRoom { room } => {
            rooms::leave(state, connection_id, &room);
            vec![ServerEvent::Left { room }]
        }

        ClientEvent::Publish { room, payload, self_echo } => {
            match broadcast::publish(state, connection_id, &room, payload, self_echo) {
                Ok(_seq) => vec![],
                Err(e) => vec![ServerEvent::error(&e)],
            }
        }

        ClientEvent::PresenceTouch { room, position } => {
            broadcast::presence_touch(state, connection_id, &room, position);
            vec![]
        }

        // The touch in the socket loop already refreshed last-seen.
        ClientEvent::Pong => vec![],
    }
}

// =============================================================================
// HELPERS
// =============================================================================

async fn send_event(socket: &mut WebSocket, event: &ServerEvent) -> Result<(), ()> {
    let json = match wire::encode(event) {
        Ok(j) => j,
        Err(e) => {
            warn!(error = %e, "ws: failed to serialize event");
            return Err(());
        }
    };
    socket.send(Message::Text(json.into())).await.map_err(|_| ())
}

#[cfg(test)]
#[path = "ws_test.rs"]
mod tests;

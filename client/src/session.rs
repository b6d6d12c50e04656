//! Hub session task.
//!
//! LIFECYCLE
//! =========
//! 1. Dial the hub, send `connect(token)`, await `connected`
//! 2. Relay: commands out, hub events in as `Notification`s; `ping` is
//!    answered with `pong` without surfacing to the caller
//! 3. On drop, back off per policy and redial; desired rooms are re-joined
//!    after every successful handshake
//! 4. An `unauthorized` rejection or exhausted reconnect budget ends the
//!    task for good
//!
//! While disconnected, join/leave commands still edit the desired-room set
//! (they take effect at the next handshake); publishes and presence touches
//! are dropped with a warning since stale edits are worse than lost ones.

use std::collections::HashSet;

use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use thiserror::Error;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::backoff::ReconnectPolicy;
use crate::reconnect::{Action, Controller, Phase};
use wire::{ClientEvent, PresenceState, RoomId, ServerEvent};

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

const COMMAND_QUEUE: usize = 64;
const NOTIFY_QUEUE: usize = 256;

#[derive(Debug, Error)]
pub enum ClientError {
    /// The background task has ended (gave up, was rejected, or was shut
    /// down); the client handle is no longer usable.
    #[error("client session has ended")]
    Closed,
}

// =============================================================================
// CALLER-FACING TYPES
// =============================================================================

/// Requests from the caller to the session task.
#[derive(Debug, Clone)]
pub enum Command {
    Join(RoomId),
    Leave(RoomId),
    Publish { room: RoomId, payload: Value, self_echo: bool },
    PresenceTouch { room: RoomId, position: Option<Value> },
}

/// Everything the caller learns from the hub, plus lifecycle markers.
#[derive(Debug, Clone, PartialEq)]
pub enum Notification {
    Connected { connection_id: Uuid, user_id: Uuid },
    Joined { room: RoomId, snapshot: Vec<PresenceState> },
    Left { room: RoomId },
    Update { room: RoomId, sender: Uuid, seq: u64, payload: Value },
    Presence { room: RoomId, user_id: Uuid, position: Option<Value> },
    MemberLeft { room: RoomId, user_id: Uuid },
    /// A request was refused; `code` is one of the hub's `E_*` codes.
    Rejected { code: String, message: String },
    HubError { code: String, message: String },
    /// The session dropped; the task is backing off to reconnect.
    Disconnected,
    /// The reconnect budget is exhausted; no further notifications follow.
    GaveUp,
}

// =============================================================================
// CLIENT HANDLE
// =============================================================================

/// Handle to a running hub session. Dropping it (or calling [`shutdown`])
/// tears the background task down.
///
/// [`shutdown`]: RoomClient::shutdown
pub struct RoomClient {
    commands: mpsc::Sender<Command>,
    notifications: mpsc::Receiver<Notification>,
    task: JoinHandle<()>,
}

impl RoomClient {
    /// Spawn the session task against `url` (a `ws://.../api/ws` endpoint).
    #[must_use]
    pub fn spawn(url: String, token: String, policy: ReconnectPolicy) -> Self {
        let (cmd_tx, cmd_rx) = mpsc::channel(COMMAND_QUEUE);
        let (notify_tx, notify_rx) = mpsc::channel(NOTIFY_QUEUE);
        let task = tokio::spawn(session_loop(url, token, policy, cmd_rx, notify_tx));
        Self { commands: cmd_tx, notifications: notify_rx, task }
    }

    /// Next notification, or `None` once the session has ended.
    pub async fn next(&mut self) -> Option<Notification> {
        self.notifications.recv().await
    }

    /// # Errors
    /// Fails with [`ClientError::Closed`] once the session has ended.
    pub async fn join(&self, room: RoomId) -> Result<(), ClientError> {
        self.send(Command::Join(room)).await
    }

    /// # Errors
    /// Fails with [`ClientError::Closed`] once the session has ended.
    pub async fn leave(&self, room: RoomId) -> Result<(), ClientError> {
        self.send(Command::Leave(room)).await
    }

    /// # Errors
    /// Fails with [`ClientError::Closed`] once the session has ended.
    pub async fn publish(&self, room: RoomId, payload: Value) -> Result<(), ClientError> {
        self.send(Command::Publish { room, payload, self_echo: false }).await
    }

    /// # Errors
    /// Fails with [`ClientError::Closed`] once the session has ended.
    pub async fn presence_touch(
        &self,
        room: RoomId,
        position: Option<Value>,
    ) -> Result<(), ClientError> {
        self.send(Command::PresenceTouch { room, position }).await
    }

    pub fn shutdown(self) {
        self.task.abort();
    }

    async fn send(&self, command: Command) -> Result<(), ClientError> {
        self.commands.send(command).await.map_err(|_| ClientError::Closed)
    }
}

impl Drop for RoomClient {
    fn drop(&mut self) {
        self.task.abort();
    }
}

// =============================================================================
// SESSION LOOP
// =============================================================================

enum SessionEnd {
    /// Do not reconnect: terminal rejection or caller hung up.
    Terminal,
    /// Dial failure or dropped connection; the policy decides what is next.
    Dropped,
}

async fn session_loop(
    url: String,
    token: String,
    policy: ReconnectPolicy,
    mut commands: mpsc::Receiver<Command>,
    notify: mpsc::Sender<Notification>,
) {
    let mut ctrl = Controller::new(policy);
    let mut desired: HashSet<RoomId> = HashSet::new();

    loop {
        ctrl.dial();
        let end = run_session(&url, &token, &mut ctrl, &mut desired, &mut commands, &notify).await;
        let was_connected = ctrl.phase() == Phase::Connected;

        if matches!(end, SessionEnd::Terminal) {
            return;
        }
        if was_connected {
            let _ = notify.send(Notification::Disconnected).await;
        }

        match ctrl.lost() {
            Action::Backoff(delay) => {
                debug!(delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX), "reconnecting after backoff");
                if !idle_backoff(delay, &mut commands, &mut desired).await {
                    return;
                }
            }
            Action::GiveUp => {
                warn!("reconnect budget exhausted, giving up");
                let _ = notify.send(Notification::GaveUp).await;
                return;
            }
            Action::Idle => return,
        }
    }
}

/// One dial-to-drop session.
async fn run_session(
    url: &str,
    token: &str,
    ctrl: &mut Controller,
    desired: &mut HashSet<RoomId>,
    commands: &mut mpsc::Receiver<Command>,
    notify: &mpsc::Sender<Notification>,
) -> SessionEnd {
    let mut socket = match connect_async(url).await {
        Ok((ws, _)) => ws,
        Err(e) => {
            debug!(error = %e, "dial failed");
            return SessionEnd::Dropped;
        }
    };

    let connect = ClientEvent::Connect { token: token.to_owned() };
    if send_event(&mut socket, &connect).await.is_err() {
        return SessionEnd::Dropped;
    }

    loop {
        tokio::select! {
            msg = socket.next() => {
                let Some(Ok(msg)) = msg else { return SessionEnd::Dropped };
                let Message::Text(text) = msg else { continue };
                let event = match wire::decode_server(&text) {
                    Ok(event) => event,
                    Err(e) => {
                        warn!(error = %e, "malformed event from hub");
                        continue;
                    }
                };
                match apply_server_event(event, ctrl, desired, notify, &mut socket).await {
                    Ok(()) => {}
                    Err(end) => return end,
                }
            }
            cmd = commands.recv() => {
                let Some(cmd) = cmd else { return SessionEnd::Terminal };
                if forward_command(cmd, desired, &mut socket).await.is_err() {
                    return SessionEnd::Dropped;
                }
            }
        }
    }
}

/// Apply one hub event: update local state, notify the caller, answer pings.
async fn apply_server_event(
    event: ServerEvent,
    ctrl: &mut Controller,
    desired: &HashSet<RoomId>,
    notify: &mpsc::Sender<Notification>,
    socket: &mut Socket,
) -> Result<(), SessionEnd> {
    match event {
        ServerEvent::Connected { connection_id, user_id } => {
            ctrl.established();
            info!(%connection_id, "admitted by hub");
            let _ = notify.send(Notification::Connected { connection_id, user_id }).await;
            // Replay desired membership from before the drop.
            for room in desired {
                let join = ClientEvent::JoinRoom { room: room.clone() };
                if send_event(socket, &join).await.is_err() {
                    return Err(SessionEnd::Dropped);
                }
            }
        }
        ServerEvent::Rejected { code, message } => {
            let terminal = code == wire::codes::UNAUTHORIZED;
            let _ = notify.send(Notification::Rejected { code, message }).await;
            if terminal {
                warn!("admission rejected, not retrying");
                return Err(SessionEnd::Terminal);
            }
        }
        ServerEvent::Joined { room, presence } => {
            let _ = notify.send(Notification::Joined { room, snapshot: presence }).await;
        }
        ServerEvent::Left { room } => {
            let _ = notify.send(Notification::Left { room }).await;
        }
        ServerEvent::Update { room, sender, seq, payload, .. } => {
            let _ = notify.send(Notification::Update { room, sender, seq, payload }).await;
        }
        ServerEvent::Presence { room, user_id, position, .. } => {
            let _ = notify.send(Notification::Presence { room, user_id, position }).await;
        }
        ServerEvent::MemberLeft { room, user_id } => {
            let _ = notify.send(Notification::MemberLeft { room, user_id }).await;
        }
        ServerEvent::Ping => {
            if send_event(socket, &ClientEvent::Pong).await.is_err() {
                return Err(SessionEnd::Dropped);
            }
        }
        ServerEvent::Error { code, message } => {
            warn!(%code, %message, "hub reported an error");
            let _ = notify.send(Notification::HubError { code, message }).await;
        }
    }
    Ok(())
}

/// Forward one caller command onto the wire, tracking desired membership.
async fn forward_command(
    command: Command,
    desired: &mut HashSet<RoomId>,
    socket: &mut Socket,
) -> Result<(), ()> {
    let event = match command {
        Command::Join(room) => {
            desired.insert(room.clone());
            ClientEvent::JoinRoom { room }
        }
        Command::Leave(room) => {
            desired.remove(&room);
            ClientEvent::LeaveRoom { room }
        }
        Command::Publish { room, payload, self_echo } => {
            ClientEvent::Publish { room, payload, self_echo }
        }
        Command::PresenceTouch { room, position } => {
            ClientEvent::PresenceTouch { room, position }
        }
    };
    send_event(socket, &event).await
}

/// Sleep out the backoff while still honoring membership edits. Returns
/// `false` when the caller hung up.
async fn idle_backoff(
    delay: std::time::Duration,
    commands: &mut mpsc::Receiver<Command>,
    desired: &mut HashSet<RoomId>,
) -> bool {
    let sleep = tokio::time::sleep(delay);
    tokio::pin!(sleep);
    loop {
        tokio::select! {
            () = &mut sleep => return true,
            cmd = commands.recv() => match cmd {
                None => return false,
                Some(Command::Join(room)) => {
                    desired.insert(room);
                }
                Some(Command::Leave(room)) => {
                    desired.remove(&room);
                }
                Some(dropped) => {
                    warn!(command = ?dropped, "dropping command while disconnected");
                }
            },
        }
    }
}

async fn send_event(socket: &mut Socket, event: &ClientEvent) -> Result<(), ()> {
    let json = match wire::encode(event) {
        Ok(j) => j,
        Err(e) => {
            warn!(error = %e, "failed to serialize event");
            return Err(());
        }
    };
    socket.send(Message::text(json)).await.map_err(|_| ())
}

#[cfg(test)]
#[path = "session_test.rs"]
mod tests;

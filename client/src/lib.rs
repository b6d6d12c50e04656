//! Native client for the realtime hub.
//!
//! ARCHITECTURE
//! ============
//! `RoomClient` owns a background task running the connection lifecycle:
//! dial, `connect` handshake, event relay, reconnect with bounded jittered
//! backoff. Callers talk to it through a command channel and consume a
//! notification stream; they never see the socket. Desired room membership
//! is tracked client-side and replayed after every reconnect, so a caller
//! that joined `document:acme/doc-1` stays joined across hub restarts.

pub mod backoff;
pub mod reconnect;
pub mod session;

pub use backoff::ReconnectPolicy;
pub use reconnect::{Action, Controller, Phase};
pub use session::{ClientError, Command, Notification, RoomClient};

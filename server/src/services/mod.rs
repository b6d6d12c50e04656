//! Domain services behind the websocket endpoint.
//!
//! ARCHITECTURE
//! ============
//! Service modules own admission, membership, presence, and fan-out logic
//! so the websocket route stays focused on transport and event decoding.

pub mod auth;
pub mod broadcast;
pub mod monitor;
pub mod presence;
pub mod registry;
pub mod rooms;

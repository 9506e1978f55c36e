//! WebSocket Voice Sessions
//!
//! - `protocol`: the JSON control messages exchanged with the client.
//! - `session`: connection lifecycle, from upgrade to disconnect.

pub mod protocol;
pub mod session;

pub use session::ws_handler;

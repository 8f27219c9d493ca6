//! Shared wire types for the VU display-wall watchdog.
//!
//! Everything that crosses the message bus lives here: telemetry records,
//! health payloads, events, command/ack envelopes, the lease record, the
//! streaming status, and the WebRTC signaling messages. Each payload carries
//! an explicit `schema` string (`vu.watchdog.<kind>.v1`) so subscribers can
//! version-gate.

pub mod command;
pub mod event;
pub mod health;
pub mod lease;
pub mod status;
pub mod telemetry;
pub mod topics;
pub mod webrtc;

/// Crate version, stamped into status payloads.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Current time as integer milliseconds since the Unix epoch.
///
/// All timestamps on the wire use this representation.
pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

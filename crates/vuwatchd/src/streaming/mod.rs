//! Screen-streaming subsystem: media-engine supervision and the WebRTC
//! signaling bridge that shuttles SDP/ICE between bus viewers and the
//! engine's HTTP control API.

pub mod bridge;
pub mod engine;
pub mod supervisor;
pub mod turn;

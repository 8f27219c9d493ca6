//! WebRTC signaling payloads carried over the bus.
//!
//! The bridge publishes the retained "ready" announcement and targeted
//! offers/candidates; viewers publish join/leave, answers, and their own
//! candidates. Targeting uses plain `to`/`from` ids inside the payload, not
//! per-viewer topics.

use serde::{Deserialize, Serialize};

/// One entry of an RTCIceServer configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IceServer {
    pub urls: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credential: Option<String>,
}

impl IceServer {
    pub fn stun(url: impl Into<String>) -> Self {
        Self { urls: vec![url.into()], username: None, credential: None }
    }
}

/// SDP description, `type` is `"offer"` or `"answer"`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionDescription {
    #[serde(rename = "type")]
    pub kind: String,
    pub sdp: String,
}

/// Retained announcement on the offer channel: the publisher is live and
/// viewers may join with this ICE configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadyAnnouncement {
    #[serde(rename = "type")]
    pub kind: String,
    pub from: String,
    pub wall_id: String,
    pub ice_servers: Vec<IceServer>,
}

impl ReadyAnnouncement {
    pub fn new(publisher_id: &str, wall_id: &str, ice_servers: Vec<IceServer>) -> Self {
        Self {
            kind: "ready".to_string(),
            from: publisher_id.to_string(),
            wall_id: wall_id.to_string(),
            ice_servers,
        }
    }
}

/// Targeted SDP offer to one viewer.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OfferMessage {
    #[serde(rename = "type")]
    pub kind: String,
    pub description: SessionDescription,
    pub ice_servers: Vec<IceServer>,
    pub to: String,
    pub from: String,
}

impl OfferMessage {
    pub fn new(
        description: SessionDescription,
        ice_servers: Vec<IceServer>,
        viewer_id: &str,
        publisher_id: &str,
    ) -> Self {
        Self {
            kind: "offer".to_string(),
            description,
            ice_servers,
            to: viewer_id.to_string(),
            from: publisher_id.to_string(),
        }
    }
}

/// Inbound SDP answer from a viewer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnswerMessage {
    pub description: SessionDescription,
    pub to: String,
    pub from: String,
}

/// A single ICE candidate, either direction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IceCandidate {
    pub candidate: String,
    #[serde(rename = "sdpMid", default)]
    pub sdp_mid: Option<String>,
    #[serde(rename = "sdpMLineIndex", default)]
    pub sdp_mline_index: Option<u32>,
}

impl IceCandidate {
    /// De-duplication key: candidate line plus its media association.
    pub fn dedup_key(&self) -> String {
        format!(
            "{}|{}|{}",
            self.candidate,
            self.sdp_mid.as_deref().unwrap_or(""),
            self.sdp_mline_index.map(|i| i.to_string()).unwrap_or_default()
        )
    }
}

/// Candidate envelope carried over the bus.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CandidateMessage {
    pub candidate: IceCandidate,
    pub to: String,
    pub from: String,
}

/// Viewer join request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JoinMessage {
    pub from: String,
}

/// Viewer leave notification.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LeaveMessage {
    pub from: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_candidate_field_names() {
        let message = CandidateMessage {
            candidate: IceCandidate {
                candidate: "candidate:1 1 UDP 2122252543 10.0.0.5 51472 typ host".to_string(),
                sdp_mid: Some("0".to_string()),
                sdp_mline_index: Some(0),
            },
            to: "v1".to_string(),
            from: "pub-a".to_string(),
        };
        let json = serde_json::to_string(&message).unwrap();
        // Browser-facing capitalization must be preserved.
        assert!(json.contains("\"sdpMid\":\"0\""));
        assert!(json.contains("\"sdpMLineIndex\":0"));
    }

    #[test]
    fn test_dedup_key_distinguishes_mline() {
        let a = IceCandidate {
            candidate: "candidate:1".to_string(),
            sdp_mid: Some("0".to_string()),
            sdp_mline_index: Some(0),
        };
        let mut b = a.clone();
        b.sdp_mline_index = Some(1);
        assert_ne!(a.dedup_key(), b.dedup_key());
        assert_eq!(a.dedup_key(), a.clone().dedup_key());
    }

    #[test]
    fn test_ready_round_trip() {
        let ready = ReadyAnnouncement::new(
            "pub-1",
            "wall-4",
            vec![IceServer::stun("stun:stun.l.google.com:19302")],
        );
        let json = serde_json::to_string(&ready).unwrap();
        assert!(json.contains("\"type\":\"ready\""));
        assert!(json.contains("\"iceServers\""));
        let back: ReadyAnnouncement = serde_json::from_str(&json).unwrap();
        assert_eq!(back.ice_servers.len(), 1);
    }
}

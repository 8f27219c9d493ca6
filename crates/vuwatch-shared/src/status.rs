//! Agent presence and streaming status payloads.

use serde::{Deserialize, Serialize};

/// Online/offline marker on the retained status topic. The offline variant
/// is registered as the broker's Last-Will payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Presence {
    Online,
    Offline,
}

/// Retained status payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusPayload {
    pub status: Presence,
    pub wall_id: String,
    pub timestamp: i64,
    pub version: String,
    pub stream: StreamSummary,
}

impl StatusPayload {
    pub fn online(wall_id: &str, stream_status: StreamStatus) -> Self {
        Self {
            status: Presence::Online,
            wall_id: wall_id.to_string(),
            timestamp: crate::now_ms(),
            version: crate::VERSION.to_string(),
            stream: StreamSummary { status: stream_status },
        }
    }

    pub fn offline(wall_id: &str) -> Self {
        Self {
            status: Presence::Offline,
            wall_id: wall_id.to_string(),
            timestamp: crate::now_ms(),
            version: crate::VERSION.to_string(),
            stream: StreamSummary { status: StreamStatus::Stopped },
        }
    }
}

/// Stream summary embedded in the status payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamSummary {
    pub status: StreamStatus,
}

/// Media-engine lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum StreamStatus {
    #[default]
    Stopped,
    Starting,
    Running,
    Error,
}

/// Full streaming status, published retained on `stream/status`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamStatusPayload {
    pub status: StreamStatus,
    #[serde(default)]
    pub pid: Option<u32>,
    #[serde(default)]
    pub port: Option<u16>,
    #[serde(default)]
    pub started_at: Option<i64>,
    #[serde(default)]
    pub viewer_url: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub monitor: u32,
    #[serde(default)]
    pub quality: Option<StreamQuality>,
    pub available: bool,
}

/// Capture/encode quality settings.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamQuality {
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    /// Target bitrate in kbit/s.
    pub bitrate: u32,
}

impl StreamQuality {
    pub fn preset_low() -> Self {
        Self { width: 1280, height: 720, fps: 15, bitrate: 1_500 }
    }

    pub fn preset_medium() -> Self {
        Self { width: 1920, height: 1080, fps: 30, bitrate: 4_000 }
    }

    pub fn preset_high() -> Self {
        Self { width: 1920, height: 1080, fps: 60, bitrate: 8_000 }
    }
}

impl Default for StreamQuality {
    fn default() -> Self {
        Self::preset_medium()
    }
}

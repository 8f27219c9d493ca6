//! Edge-triggered event records.

use serde::{Deserialize, Serialize};

/// Schema tag carried by every event record.
pub const EVENT_SCHEMA: &str = "vu.watchdog.event.v1";

/// Event severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Severity {
    Info,
    Warn,
    Error,
    Critical,
}

/// A single event on the event topic. Emitted only on edge transitions and
/// lifecycle markers, never on steady state.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventRecord {
    pub schema: String,
    pub ts: i64,
    pub wall_id: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub severity: Severity,
    #[serde(default)]
    pub details: serde_json::Value,
}

impl EventRecord {
    pub fn new(
        wall_id: &str,
        kind: impl Into<String>,
        severity: Severity,
        details: serde_json::Value,
    ) -> Self {
        Self {
            schema: EVENT_SCHEMA.to_string(),
            ts: crate::now_ms(),
            wall_id: wall_id.to_string(),
            kind: kind.into(),
            severity,
            details,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_serialization() {
        let event = EventRecord::new(
            "wall-3",
            "VUOS_DOWN_ON",
            Severity::Critical,
            serde_json::json!({"pid": null}),
        );
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"type\":\"VUOS_DOWN_ON\""));
        assert!(json.contains("\"severity\":\"CRITICAL\""));
        assert!(json.contains(EVENT_SCHEMA));
    }
}

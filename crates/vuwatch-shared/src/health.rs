//! Health summary payload and the operational mode enumeration.

use serde::{Deserialize, Serialize};

use crate::telemetry::TelemetryRecord;

/// Schema tag carried by every health payload.
pub const HEALTH_SCHEMA: &str = "vu.watchdog.health.v1";

/// Severity class of a health condition.
///
/// Ordering is total: `Critical > Degraded`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConditionLevel {
    Degraded,
    Critical,
}

/// Single-valued health summary derived from the active conditions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OperationalMode {
    Starting,
    Ready,
    Degraded,
    Critical,
    ShuttingDown,
}

impl std::fmt::Display for OperationalMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Starting => "STARTING",
            Self::Ready => "READY",
            Self::Degraded => "DEGRADED",
            Self::Critical => "CRITICAL",
            Self::ShuttingDown => "SHUTTING_DOWN",
        };
        write!(f, "{}", s)
    }
}

/// Bounded health snapshot, published retained on every tick.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthPayload {
    pub schema: String,
    pub ts: i64,
    pub wall_id: String,
    pub mode: OperationalMode,
    /// Active condition ids, sorted lexicographically for stable output.
    pub conditions: Vec<String>,
    pub system: SystemSummary,
    pub network: NetworkSummary,
    pub app: AppSummary,
}

/// Compact system summary suitable for retained publication.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SystemSummary {
    pub cpu_percent: f32,
    pub ram_percent: f32,
    pub disk_percent: f32,
    pub thermal_throttling: bool,
}

/// Compact network summary.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkSummary {
    pub internet: bool,
    #[serde(default)]
    pub latency_ms: Option<u64>,
    pub peer_count: u32,
}

/// Compact application summary.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppSummary {
    pub vuos_running: bool,
    pub server_running: bool,
    pub crash_count_today: u32,
}

impl HealthPayload {
    /// Build a health payload from a telemetry record plus the evaluated
    /// mode and active condition ids. Condition ids are sorted here so the
    /// retained payload is byte-stable for identical states.
    pub fn from_record(
        record: &TelemetryRecord,
        mode: OperationalMode,
        mut conditions: Vec<String>,
    ) -> Self {
        conditions.sort();
        Self {
            schema: HEALTH_SCHEMA.to_string(),
            ts: record.timestamp,
            wall_id: record.wall_id.clone(),
            mode,
            conditions,
            system: SystemSummary {
                cpu_percent: record.system.cpu_percent,
                ram_percent: record.system.ram_percent,
                disk_percent: record.system.disk_percent,
                thermal_throttling: record.system.thermal_throttling,
            },
            network: NetworkSummary {
                internet: record.network.internet,
                latency_ms: record.network.latency_ms,
                peer_count: record.network.peer_count,
            },
            app: AppSummary {
                vuos_running: record.app.vuos_running,
                server_running: record.app.server_running,
                crash_count_today: record.app.crash_count_today,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::telemetry::{AppTelemetry, NetworkTelemetry, SystemTelemetry};

    fn record() -> TelemetryRecord {
        TelemetryRecord {
            timestamp: 42,
            wall_id: "wall-1".to_string(),
            system: SystemTelemetry::default(),
            network: NetworkTelemetry::default(),
            app: AppTelemetry::default(),
        }
    }

    #[test]
    fn test_level_ordering() {
        assert!(ConditionLevel::Critical > ConditionLevel::Degraded);
    }

    #[test]
    fn test_mode_serialization() {
        let json = serde_json::to_string(&OperationalMode::ShuttingDown).unwrap();
        assert_eq!(json, "\"SHUTTING_DOWN\"");
    }

    #[test]
    fn test_conditions_sorted() {
        let payload = HealthPayload::from_record(
            &record(),
            OperationalMode::Degraded,
            vec!["LATENCY_HIGH".into(), "DISK_HIGH".into()],
        );
        assert_eq!(payload.conditions, vec!["DISK_HIGH", "LATENCY_HIGH"]);
        assert_eq!(payload.schema, HEALTH_SCHEMA);
    }
}

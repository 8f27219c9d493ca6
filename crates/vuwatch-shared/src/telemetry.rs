//! Telemetry record assembled once per publish tick.
//!
//! The record is an immutable snapshot of the collector caches. It is built
//! by the assembler, published unretained, and not kept in memory beyond the
//! current tick.

use serde::{Deserialize, Serialize};

/// Full per-tick telemetry snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TelemetryRecord {
    pub timestamp: i64,
    pub wall_id: String,
    pub system: SystemTelemetry,
    pub network: NetworkTelemetry,
    pub app: AppTelemetry,
}

/// Machine-level metrics.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SystemTelemetry {
    pub cpu_percent: f32,
    pub cpu_model: String,
    pub cpu_cores: u32,
    pub ram_total_mb: u64,
    pub ram_used_mb: u64,
    pub ram_percent: f32,
    #[serde(default)]
    pub gpu: Option<GpuTelemetry>,
    pub disk_total_gb: f64,
    pub disk_used_gb: f64,
    pub disk_percent: f32,
    pub disk_io: DiskIoTelemetry,
    pub thermal_throttling: bool,
    pub pending_updates: u32,
    pub event_log: EventLogSummary,
    pub uptime_seconds: u64,
}

/// GPU metrics; absent while no probe strategy has succeeded.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GpuTelemetry {
    pub name: String,
    #[serde(default)]
    pub usage_percent: Option<f32>,
    #[serde(default)]
    pub vram_used_mb: Option<u64>,
    #[serde(default)]
    pub vram_total_mb: Option<u64>,
    #[serde(default)]
    pub temperature_c: Option<f32>,
}

/// Aggregate disk throughput in MB/s across all fixed drives.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiskIoTelemetry {
    pub read_mb_s: f64,
    pub write_mb_s: f64,
}

/// Recent OS event-log errors (count within the window plus last message).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventLogSummary {
    pub recent_count: u32,
    #[serde(default)]
    pub last_message: Option<String>,
}

/// Connectivity metrics.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkTelemetry {
    pub internet: bool,
    #[serde(default)]
    pub latency_ms: Option<u64>,
    pub local_server: bool,
    pub peer_count: u32,
}

/// Target application and supporting server state.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppTelemetry {
    pub vuos_running: bool,
    pub server_running: bool,
    #[serde(default)]
    pub server_version: Option<String>,
    #[serde(default)]
    pub vuos_memory_mb: Option<u64>,
    pub crash_count_today: u32,
    #[serde(default)]
    pub lock: Option<LockFileStatus>,
    pub log: LogSummary,
}

/// Server lock-file record with derived heartbeat health.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LockFileStatus {
    pub pid: u32,
    pub start_time: i64,
    pub last_heartbeat: i64,
    pub heartbeat_age_ms: i64,
    pub healthy: bool,
}

/// Application error-log summary.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogSummary {
    pub recent_count: u32,
    #[serde(default)]
    pub last_message: Option<String>,
    #[serde(default)]
    pub last_time: Option<i64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_round_trip() {
        let record = TelemetryRecord {
            timestamp: 1_700_000_000_000,
            wall_id: "wall-7".to_string(),
            system: SystemTelemetry {
                cpu_percent: 12.5,
                cpu_model: "Intel i7".to_string(),
                cpu_cores: 8,
                ram_total_mb: 16_384,
                ram_used_mb: 4_096,
                ram_percent: 25.0,
                gpu: Some(GpuTelemetry {
                    name: "NVIDIA RTX A2000".to_string(),
                    usage_percent: Some(31.0),
                    vram_used_mb: Some(1_200),
                    vram_total_mb: Some(6_144),
                    temperature_c: Some(54.0),
                }),
                ..Default::default()
            },
            network: NetworkTelemetry {
                internet: true,
                latency_ms: Some(23),
                local_server: true,
                peer_count: 3,
            },
            app: AppTelemetry::default(),
        };

        let json = serde_json::to_string(&record).unwrap();
        assert!(json.contains("\"wallId\":\"wall-7\""));
        assert!(json.contains("\"cpuPercent\""));
        let back: TelemetryRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(back.network.latency_ms, Some(23));
        assert_eq!(back.system.gpu.unwrap().name, "NVIDIA RTX A2000");
    }

    #[test]
    fn test_optional_fields_default() {
        // Old producers may omit gpu/lock/log details entirely.
        let json = r#"{
            "timestamp": 1, "wallId": "w",
            "system": {"cpuPercent":0,"cpuModel":"","cpuCores":0,"ramTotalMb":0,
                       "ramUsedMb":0,"ramPercent":0,"diskTotalGb":0,"diskUsedGb":0,
                       "diskPercent":0,"diskIo":{"readMbS":0,"writeMbS":0},
                       "thermalThrottling":false,"pendingUpdates":0,
                       "eventLog":{"recentCount":0},"uptimeSeconds":0},
            "network": {"internet":false,"localServer":false,"peerCount":0},
            "app": {"vuosRunning":false,"serverRunning":false,
                    "crashCountToday":0,"log":{"recentCount":0}}
        }"#;
        let record: TelemetryRecord = serde_json::from_str(json).unwrap();
        assert!(record.system.gpu.is_none());
        assert!(record.network.latency_ms.is_none());
        assert!(record.app.lock.is_none());
    }
}

//! The fixed condition table.

use vuwatch_shared::event::Severity;
use vuwatch_shared::health::ConditionLevel;
use vuwatch_shared::telemetry::TelemetryRecord;

use crate::collectors::app::LOCK_STALE_MS;

/// Static condition definition. Predicates are pure over the record.
pub struct ConditionDef {
    pub id: &'static str,
    pub level: ConditionLevel,
    pub debounce_ms: i64,
    pub predicate: fn(&TelemetryRecord) -> bool,
}

/// The condition set, fixed at startup.
pub fn condition_table() -> &'static [ConditionDef] {
    &CONDITIONS
}

static CONDITIONS: [ConditionDef; 10] = [
    ConditionDef {
        id: "VUOS_DOWN",
        level: ConditionLevel::Critical,
        debounce_ms: 10_000,
        predicate: |r| !r.app.vuos_running,
    },
    ConditionDef {
        id: "SERVER_DOWN",
        level: ConditionLevel::Critical,
        debounce_ms: 10_000,
        predicate: |r| !r.app.server_running,
    },
    ConditionDef {
        id: "DISK_FULL",
        level: ConditionLevel::Critical,
        debounce_ms: 0,
        predicate: |r| r.system.disk_percent >= 97.0,
    },
    ConditionDef {
        id: "THERMAL_THROTTLING",
        level: ConditionLevel::Critical,
        debounce_ms: 0,
        predicate: |r| r.system.thermal_throttling,
    },
    ConditionDef {
        id: "LOCK_STALE",
        level: ConditionLevel::Critical,
        debounce_ms: 0,
        predicate: |r| {
            r.app
                .lock
                .as_ref()
                .map(|l| !l.healthy && l.heartbeat_age_ms > LOCK_STALE_MS)
                .unwrap_or(false)
        },
    },
    ConditionDef {
        id: "INTERNET_OFFLINE",
        level: ConditionLevel::Degraded,
        debounce_ms: 30_000,
        predicate: |r| !r.network.internet,
    },
    ConditionDef {
        id: "LATENCY_HIGH",
        level: ConditionLevel::Degraded,
        debounce_ms: 60_000,
        // Null latency reads as 0, so offline never doubles as high latency.
        predicate: |r| r.network.latency_ms.unwrap_or(0) > 250,
    },
    ConditionDef {
        id: "DISK_HIGH",
        level: ConditionLevel::Degraded,
        debounce_ms: 0,
        predicate: |r| r.system.disk_percent >= 90.0 && r.system.disk_percent < 97.0,
    },
    ConditionDef {
        id: "GPU_PROBE_FAILED",
        level: ConditionLevel::Degraded,
        // The debounce doubles as the probe warm-up window.
        debounce_ms: 60_000,
        predicate: |r| r.system.gpu.is_none(),
    },
    ConditionDef {
        id: "ERRORS_HIGH",
        level: ConditionLevel::Degraded,
        debounce_ms: 0,
        predicate: |r| r.app.log.recent_count >= 5,
    },
];

/// Event severity for a condition's `_ON` edge. Unknown ids default to WARN.
pub fn severity_for(condition_id: &str) -> Severity {
    match condition_id {
        "VUOS_DOWN" | "SERVER_DOWN" | "DISK_FULL" | "LOCK_STALE" => Severity::Critical,
        "THERMAL_THROTTLING" => Severity::Error,
        "INTERNET_OFFLINE" | "LATENCY_HIGH" | "DISK_HIGH" | "GPU_PROBE_FAILED"
        | "ERRORS_HIGH" => Severity::Warn,
        _ => Severity::Warn,
    }
}

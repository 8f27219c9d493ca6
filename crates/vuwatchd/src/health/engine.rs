//! Condition evaluation with debounce, and mode derivation.

use vuwatch_shared::health::{ConditionLevel, OperationalMode};
use vuwatch_shared::telemetry::TelemetryRecord;

use super::conditions::{condition_table, ConditionDef};

/// Warm-up window after process start during which the mode is STARTING.
const STARTING_WINDOW_MS: i64 = 5_000;

/// Mutable per-condition state.
///
/// Invariants: `active` implies `raw_active` and an elapsed duration of at
/// least the debounce while continuously triggered; a non-triggered
/// evaluation clears everything.
#[derive(Debug, Clone, Default)]
struct ConditionState {
    raw_active: bool,
    active: bool,
    active_since: Option<i64>,
}

/// One condition's evaluated result for this tick.
#[derive(Debug, Clone)]
pub struct ConditionSnapshot {
    pub id: &'static str,
    pub level: ConditionLevel,
    pub active: bool,
}

/// Result of one evaluation pass.
#[derive(Debug, Clone)]
pub struct HealthEvaluation {
    pub mode: OperationalMode,
    pub conditions: Vec<ConditionSnapshot>,
}

impl HealthEvaluation {
    /// Ids of active conditions, sorted for stable output.
    pub fn active_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .conditions
            .iter()
            .filter(|c| c.active)
            .map(|c| c.id.to_string())
            .collect();
        ids.sort();
        ids
    }
}

pub struct HealthEngine {
    defs: &'static [ConditionDef],
    states: Vec<ConditionState>,
    started_at_ms: i64,
    shutting_down: bool,
}

impl HealthEngine {
    pub fn new(started_at_ms: i64) -> Self {
        let defs = condition_table();
        Self {
            defs,
            states: defs.iter().map(|_| ConditionState::default()).collect(),
            started_at_ms,
            shutting_down: false,
        }
    }

    pub fn set_shutting_down(&mut self) {
        self.shutting_down = true;
    }

    /// Evaluate every condition against the record at `now_ms` and derive
    /// the operational mode.
    pub fn evaluate(&mut self, record: &TelemetryRecord, now_ms: i64) -> HealthEvaluation {
        for (def, state) in self.defs.iter().zip(self.states.iter_mut()) {
            let triggered = (def.predicate)(record);
            if triggered {
                if !state.raw_active {
                    state.raw_active = true;
                    state.active_since = Some(now_ms);
                }
                let since = state.active_since.unwrap_or(now_ms);
                if now_ms - since >= def.debounce_ms {
                    state.active = true;
                }
            } else {
                state.raw_active = false;
                state.active = false;
                state.active_since = None;
            }
        }

        let conditions = self
            .defs
            .iter()
            .zip(self.states.iter())
            .map(|(def, state)| ConditionSnapshot {
                id: def.id,
                level: def.level,
                active: state.active,
            })
            .collect::<Vec<_>>();

        let mode = derive_mode(
            self.shutting_down,
            now_ms - self.started_at_ms,
            &conditions,
        );
        HealthEvaluation { mode, conditions }
    }
}

/// Pure mode derivation from (shutting-down flag, uptime, condition states).
pub fn derive_mode(
    shutting_down: bool,
    uptime_ms: i64,
    conditions: &[ConditionSnapshot],
) -> OperationalMode {
    if shutting_down {
        return OperationalMode::ShuttingDown;
    }
    if uptime_ms < STARTING_WINDOW_MS {
        return OperationalMode::Starting;
    }
    let mut worst: Option<ConditionLevel> = None;
    for condition in conditions.iter().filter(|c| c.active) {
        worst = Some(match worst {
            Some(level) => level.max(condition.level),
            None => condition.level,
        });
    }
    match worst {
        Some(ConditionLevel::Critical) => OperationalMode::Critical,
        Some(ConditionLevel::Degraded) => OperationalMode::Degraded,
        None => OperationalMode::Ready,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vuwatch_shared::telemetry::{AppTelemetry, NetworkTelemetry, SystemTelemetry};

    fn nominal() -> TelemetryRecord {
        TelemetryRecord {
            timestamp: 0,
            wall_id: "w".to_string(),
            system: SystemTelemetry {
                gpu: Some(vuwatch_shared::telemetry::GpuTelemetry {
                    name: "gpu".to_string(),
                    usage_percent: None,
                    vram_used_mb: None,
                    vram_total_mb: None,
                    temperature_c: None,
                }),
                ..Default::default()
            },
            network: NetworkTelemetry {
                internet: true,
                latency_ms: Some(20),
                local_server: true,
                peer_count: 0,
            },
            app: AppTelemetry {
                vuos_running: true,
                server_running: true,
                ..Default::default()
            },
        }
    }

    fn active_ids(evaluation: &HealthEvaluation) -> Vec<String> {
        evaluation.active_ids()
    }

    #[test]
    fn test_nominal_is_ready_after_warmup() {
        let mut engine = HealthEngine::new(0);
        let record = nominal();
        let evaluation = engine.evaluate(&record, 6_000);
        assert_eq!(evaluation.mode, OperationalMode::Ready);
        assert!(active_ids(&evaluation).is_empty());
    }

    #[test]
    fn test_starting_window_boundary() {
        let mut engine = HealthEngine::new(0);
        let record = nominal();
        assert_eq!(engine.evaluate(&record, 4_999).mode, OperationalMode::Starting);
        assert_eq!(engine.evaluate(&record, 5_001).mode, OperationalMode::Ready);
    }

    #[test]
    fn test_debounce_delays_activation() {
        let mut engine = HealthEngine::new(0);
        let mut record = nominal();
        record.app.vuos_running = false;

        // Raw-active immediately, but VUOS_DOWN debounces for 10 s.
        let evaluation = engine.evaluate(&record, 10_000);
        assert!(!active_ids(&evaluation).contains(&"VUOS_DOWN".to_string()));

        let evaluation = engine.evaluate(&record, 19_999);
        assert!(!active_ids(&evaluation).contains(&"VUOS_DOWN".to_string()));

        let evaluation = engine.evaluate(&record, 20_000);
        assert!(active_ids(&evaluation).contains(&"VUOS_DOWN".to_string()));
        assert_eq!(evaluation.mode, OperationalMode::Critical);
    }

    #[test]
    fn test_recovery_resets_debounce() {
        let mut engine = HealthEngine::new(0);
        let mut record = nominal();
        record.app.vuos_running = false;
        engine.evaluate(&record, 10_000);

        // Process comes back before the debounce elapses.
        record.app.vuos_running = true;
        let evaluation = engine.evaluate(&record, 15_000);
        assert!(active_ids(&evaluation).is_empty());

        // Down again: the clock starts over.
        record.app.vuos_running = false;
        engine.evaluate(&record, 16_000);
        let evaluation = engine.evaluate(&record, 25_999);
        assert!(active_ids(&evaluation).is_empty());
        let evaluation = engine.evaluate(&record, 26_000);
        assert!(active_ids(&evaluation).contains(&"VUOS_DOWN".to_string()));
    }

    #[test]
    fn test_zero_debounce_is_instant() {
        let mut engine = HealthEngine::new(0);
        let mut record = nominal();
        record.system.disk_percent = 97.5;
        let evaluation = engine.evaluate(&record, 10_000);
        assert!(active_ids(&evaluation).contains(&"DISK_FULL".to_string()));
        assert_eq!(evaluation.mode, OperationalMode::Critical);
    }

    #[test]
    fn test_degraded_vs_critical_tiebreak() {
        let mut engine = HealthEngine::new(0);
        let mut record = nominal();
        record.system.disk_percent = 91.0; // DISK_HIGH (degraded)
        let evaluation = engine.evaluate(&record, 10_000);
        assert_eq!(evaluation.mode, OperationalMode::Degraded);

        record.system.thermal_throttling = true; // critical, instant
        let evaluation = engine.evaluate(&record, 12_000);
        assert_eq!(evaluation.mode, OperationalMode::Critical);
    }

    #[test]
    fn test_shutting_down_dominates() {
        let mut engine = HealthEngine::new(0);
        let mut record = nominal();
        record.system.disk_percent = 99.0;
        engine.set_shutting_down();
        let evaluation = engine.evaluate(&record, 10_000);
        assert_eq!(evaluation.mode, OperationalMode::ShuttingDown);
    }

    #[test]
    fn test_mode_is_pure() {
        // Identical inputs yield identical outputs (twice, without time
        // advancing).
        let conditions = vec![ConditionSnapshot {
            id: "DISK_HIGH",
            level: ConditionLevel::Degraded,
            active: true,
        }];
        let a = derive_mode(false, 60_000, &conditions);
        let b = derive_mode(false, 60_000, &conditions);
        assert_eq!(a, b);
        assert_eq!(a, OperationalMode::Degraded);
    }

    #[test]
    fn test_active_ids_sorted() {
        let mut engine = HealthEngine::new(0);
        let mut record = nominal();
        record.system.disk_percent = 91.0;
        record.network.latency_ms = Some(10_000);
        // LATENCY_HIGH debounces 60 s; hold it triggered.
        engine.evaluate(&record, 10_000);
        let evaluation = engine.evaluate(&record, 70_001);
        assert_eq!(
            active_ids(&evaluation),
            vec!["DISK_HIGH".to_string(), "LATENCY_HIGH".to_string()]
        );
    }
}

//! Edge-triggered event emission.
//!
//! Consumes successive condition evaluations and mode values, emitting
//! `_ON`/`_OFF`/`_REMINDER` and `MODE_CHANGED` events only on transitions.
//! Lifecycle markers (startup, broker switches, crash detections, command
//! receipt) are emitted imperatively.

use std::collections::HashMap;

use vuwatch_shared::event::{EventRecord, Severity};
use vuwatch_shared::health::OperationalMode;

use crate::health::{severity_for, ConditionSnapshot};

/// Interval between reminder events while a condition stays active.
const REMINDER_INTERVAL_MS: i64 = 600_000;

pub struct EventEmitter {
    wall_id: String,
    previous_active: HashMap<&'static str, bool>,
    last_reminder: HashMap<&'static str, i64>,
    previous_mode: Option<OperationalMode>,
}

impl EventEmitter {
    pub fn new(wall_id: &str) -> Self {
        Self {
            wall_id: wall_id.to_string(),
            previous_active: HashMap::new(),
            last_reminder: HashMap::new(),
            previous_mode: None,
        }
    }

    /// Compare this tick's condition states against the previous tick and
    /// return the events to publish.
    pub fn observe_conditions(
        &mut self,
        conditions: &[ConditionSnapshot],
        now_ms: i64,
    ) -> Vec<EventRecord> {
        let mut events = Vec::new();
        for condition in conditions {
            let prev = self
                .previous_active
                .get(condition.id)
                .copied()
                .unwrap_or(false);

            match (prev, condition.active) {
                (false, true) => {
                    events.push(self.make(
                        format!("{}_ON", condition.id),
                        severity_for(condition.id),
                        serde_json::json!({"condition": condition.id}),
                        now_ms,
                    ));
                    self.last_reminder.insert(condition.id, now_ms);
                }
                (true, false) => {
                    events.push(self.make(
                        format!("{}_OFF", condition.id),
                        Severity::Info,
                        serde_json::json!({"condition": condition.id}),
                        now_ms,
                    ));
                    self.last_reminder.remove(condition.id);
                }
                (true, true) => {
                    let last = self.last_reminder.get(condition.id).copied().unwrap_or(now_ms);
                    if now_ms - last >= REMINDER_INTERVAL_MS {
                        events.push(self.make(
                            format!("{}_REMINDER", condition.id),
                            severity_for(condition.id),
                            serde_json::json!({"condition": condition.id, "sinceMs": now_ms - last}),
                            now_ms,
                        ));
                        self.last_reminder.insert(condition.id, now_ms);
                    }
                }
                (false, false) => {}
            }
            self.previous_active.insert(condition.id, condition.active);
        }
        events
    }

    /// Emit a `MODE_CHANGED` event when the mode moved.
    pub fn observe_mode(&mut self, mode: OperationalMode, now_ms: i64) -> Option<EventRecord> {
        let previous = self.previous_mode.replace(mode);
        match previous {
            Some(prev) if prev == mode => None,
            Some(prev) => Some(self.make(
                "MODE_CHANGED".to_string(),
                mode_severity(mode),
                serde_json::json!({"from": prev.to_string(), "to": mode.to_string()}),
                now_ms,
            )),
            // First observation establishes the baseline without an event.
            None => None,
        }
    }

    /// One-shot lifecycle marker.
    pub fn lifecycle(
        &self,
        kind: &str,
        severity: Severity,
        details: serde_json::Value,
    ) -> EventRecord {
        EventRecord::new(&self.wall_id, kind, severity, details)
    }

    fn make(
        &self,
        kind: String,
        severity: Severity,
        details: serde_json::Value,
        now_ms: i64,
    ) -> EventRecord {
        let mut event = EventRecord::new(&self.wall_id, kind, severity, details);
        event.ts = now_ms;
        event
    }
}

fn mode_severity(mode: OperationalMode) -> Severity {
    match mode {
        OperationalMode::Ready | OperationalMode::Starting | OperationalMode::ShuttingDown => {
            Severity::Info
        }
        OperationalMode::Degraded => Severity::Warn,
        OperationalMode::Critical => Severity::Critical,
    }
}

//! Health condition engine and operational-mode derivation.
//!
//! The condition set is fixed at startup; evaluation is pure over the
//! telemetry record plus wall-clock time, with per-condition debounce.

mod conditions;
mod engine;

pub use conditions::{condition_table, severity_for, ConditionDef};
pub use engine::{derive_mode, ConditionSnapshot, HealthEngine, HealthEvaluation};

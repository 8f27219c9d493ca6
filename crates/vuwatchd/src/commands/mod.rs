//! Command admission, idempotency, and acknowledgement lifecycle.
//!
//! The processor is split in two phases so the invariants stay testable
//! without I/O: `admit` performs idempotency / TTL / registry / lease
//! checks and yields either a terminal ack or a dispatch decision;
//! `complete` records the handler outcome and builds the terminal ack.
//! The orchestrator publishes every ack it is handed.

pub mod handlers;

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use rand::distributions::Alphanumeric;
use rand::Rng;

use vuwatch_shared::command::{
    is_known_kind, AckEnvelope, AckStatus, Command, CommandEnvelope,
};

use crate::lease::{LeaseDecision, LeaseManager};

/// Idempotency entry lifetime.
pub const IDEMPOTENCY_TTL_MS: i64 = 60_000;

/// Synthetic client id for locally originated commands.
pub const LOCAL_CLIENT_ID: &str = "local-api";

/// TTL applied to locally originated commands.
pub const LOCAL_TTL_MS: i64 = 15_000;

/// Per-command policy flags.
#[derive(Debug, Clone, Copy)]
pub struct CommandSpec {
    pub requires_lease: bool,
    pub local_bypass: bool,
}

/// Policy registry: destructive commands require the lease (with local
/// bypass); queries and streaming controls do not.
pub fn spec_for(command: &Command) -> CommandSpec {
    match command {
        Command::RestartVuos
        | Command::StartVuos
        | Command::StopVuos
        | Command::QuitWatchdog
        | Command::SwitchBroker(_) => CommandSpec { requires_lease: true, local_bypass: true },
        Command::RequestTelemetry
        | Command::RequestConfig
        | Command::StartStream(_)
        | Command::StopStream
        | Command::SetStreamQuality(_) => {
            CommandSpec { requires_lease: false, local_bypass: false }
        }
    }
}

/// Admission decision for one inbound envelope.
#[derive(Debug)]
pub enum Admission {
    /// Duplicate `command_id` within the idempotency window; re-emit the
    /// stored terminal ack without dispatching.
    Duplicate(AckEnvelope),
    /// TTL elapsed before processing.
    Expired(AckEnvelope),
    /// Unknown type, malformed args, or lease denial.
    Rejected(AckEnvelope),
    /// Dispatch the handler. `received` must be published first.
    Dispatch {
        received: AckEnvelope,
        command: Command,
        local_override: bool,
    },
}

#[derive(Debug, Clone)]
struct IdempotencyEntry {
    terminal_ack: AckEnvelope,
    expires_at: i64,
}

#[derive(Default)]
pub struct CommandProcessor {
    idempotency: HashMap<String, IdempotencyEntry>,
    local_seq: AtomicU64,
}

impl CommandProcessor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Steps 2–6 of the inbound path. The caller has already emitted the
    /// `COMMAND_RECEIVED` lifecycle event.
    pub fn admit(
        &mut self,
        envelope: &CommandEnvelope,
        client_id: &str,
        is_local: bool,
        lease: &LeaseManager,
        now_ms: i64,
    ) -> Admission {
        if let Some(entry) = self.idempotency.get(&envelope.command_id) {
            if entry.expires_at > now_ms {
                return Admission::Duplicate(entry.terminal_ack.clone());
            }
        }

        if envelope.is_expired(now_ms) {
            return Admission::Expired(AckEnvelope::new(
                &envelope.command_id,
                AckStatus::Expired,
                format!("Command expired (ttl {} ms)", envelope.ttl_ms),
            ));
        }

        let command = match envelope.decode() {
            Ok(command) => command,
            Err(_) if is_known_kind(&envelope.kind) => {
                return Admission::Rejected(AckEnvelope::new(
                    &envelope.command_id,
                    AckStatus::Rejected,
                    format!("Invalid arguments for {}", envelope.kind),
                ));
            }
            Err(_) => {
                return Admission::Rejected(AckEnvelope::new(
                    &envelope.command_id,
                    AckStatus::Rejected,
                    "Unknown command",
                ));
            }
        };

        let spec = spec_for(&command);
        let local_override = match lease.validate(
            client_id,
            is_local,
            spec.requires_lease,
            spec.local_bypass,
            now_ms,
        ) {
            LeaseDecision::Allow => false,
            LeaseDecision::AllowLocalBypass => true,
            LeaseDecision::Deny { reason } => {
                return Admission::Rejected(AckEnvelope::new(
                    &envelope.command_id,
                    AckStatus::Rejected,
                    reason,
                ));
            }
        };

        Admission::Dispatch {
            received: AckEnvelope::new(&envelope.command_id, AckStatus::Received, "Processing"),
            command,
            local_override,
        }
    }

    /// Step 7: record the handler outcome and build the terminal ack.
    /// `APPLIED` acks are cached for duplicate suppression; `FAILED` acks
    /// are not, so the issuer may retry with a fresh command id.
    pub fn complete(
        &mut self,
        command_id: &str,
        outcome: anyhow::Result<handlers::HandlerOutcome>,
        now_ms: i64,
    ) -> AckEnvelope {
        match outcome {
            Ok(result) => {
                let ack = AckEnvelope::new(command_id, AckStatus::Applied, result.message)
                    .with_details(result.details);
                self.idempotency.insert(
                    command_id.to_string(),
                    IdempotencyEntry {
                        terminal_ack: ack.clone(),
                        expires_at: now_ms + IDEMPOTENCY_TTL_MS,
                    },
                );
                ack
            }
            Err(e) => AckEnvelope::new(command_id, AckStatus::Failed, e.to_string()),
        }
    }

    /// Evict idempotency entries whose TTL elapsed. Runs on a 30 s timer.
    pub fn sweep(&mut self, now_ms: i64) -> usize {
        let before = self.idempotency.len();
        self.idempotency.retain(|_, entry| entry.expires_at > now_ms);
        before - self.idempotency.len()
    }

    /// Build an envelope for a locally originated command (dashboard HTTP /
    /// WebSocket surface). It flows through the same `admit` path with
    /// `client_id = "local-api"` and `is_local = true`.
    pub fn synthesize_local(&self, command: &Command) -> CommandEnvelope {
        let seq = self.local_seq.fetch_add(1, Ordering::Relaxed);
        let suffix: String = rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(6)
            .map(char::from)
            .collect();
        CommandEnvelope::from_command(format!("local-{}-{}", seq, suffix), LOCAL_TTL_MS, command)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vuwatch_shared::lease::LeasePayload;

    fn envelope(command_id: &str, ts: i64, ttl_ms: i64, command: &Command) -> CommandEnvelope {
        let mut envelope = CommandEnvelope::from_command(command_id, ttl_ms, command);
        envelope.ts = ts;
        envelope
    }

    fn outcome(message: &str) -> anyhow::Result<handlers::HandlerOutcome> {
        Ok(handlers::HandlerOutcome {
            message: message.to_string(),
            details: serde_json::Value::Null,
        })
    }

    #[test]
    fn test_dispatch_then_applied() {
        let mut processor = CommandProcessor::new();
        let lease = LeaseManager::new();
        let envelope = envelope("abc", 1_000, 15_000, &Command::RequestTelemetry);

        match processor.admit(&envelope, "ops-1", false, &lease, 1_100) {
            Admission::Dispatch { received, command, local_override } => {
                assert_eq!(received.status, AckStatus::Received);
                assert_eq!(command, Command::RequestTelemetry);
                assert!(!local_override);
            }
            other => panic!("expected dispatch, got {:?}", other),
        }

        let ack = processor.complete("abc", outcome("telemetry published"), 1_200);
        assert_eq!(ack.status, AckStatus::Applied);
    }

    #[test]
    fn test_duplicate_replays_terminal_ack_without_dispatch() {
        let mut processor = CommandProcessor::new();
        let lease = LeaseManager::new();
        let first = envelope("abc", 1_000, 15_000, &Command::RequestTelemetry);

        assert!(matches!(
            processor.admit(&first, "ops-1", false, &lease, 1_100),
            Admission::Dispatch { .. }
        ));
        let terminal = processor.complete("abc", outcome("done"), 1_200);

        // Same command id 500 ms later: the stored ack comes back verbatim.
        let second = envelope("abc", 1_500, 15_000, &Command::RequestTelemetry);
        match processor.admit(&second, "ops-1", false, &lease, 1_700) {
            Admission::Duplicate(ack) => {
                assert_eq!(ack.status, AckStatus::Applied);
                assert_eq!(ack.message, terminal.message);
                assert_eq!(ack.ts, terminal.ts);
            }
            other => panic!("expected duplicate, got {:?}", other),
        }
    }

    #[test]
    fn test_failed_is_not_cached() {
        let mut processor = CommandProcessor::new();
        let lease = LeaseManager::new();
        let first = envelope("r1", 1_000, 15_000, &Command::StartStream(Default::default()));

        assert!(matches!(
            processor.admit(&first, "ops-1", false, &lease, 1_100),
            Admission::Dispatch { .. }
        ));
        let ack = processor.complete("r1", Err(anyhow::anyhow!("spawn failed")), 1_200);
        assert_eq!(ack.status, AckStatus::Failed);

        // A retry with the same id dispatches again.
        assert!(matches!(
            processor.admit(&first, "ops-1", false, &lease, 1_300),
            Admission::Dispatch { .. }
        ));
    }

    #[test]
    fn test_expired_ttl() {
        let mut processor = CommandProcessor::new();
        let lease = LeaseManager::new();
        // ttl 0 at ts == now is already expired.
        let stale = envelope("t0", 5_000, 0, &Command::RequestConfig);
        match processor.admit(&stale, "ops-1", false, &lease, 5_000) {
            Admission::Expired(ack) => assert_eq!(ack.status, AckStatus::Expired),
            other => panic!("expected expired, got {:?}", other),
        }
    }

    #[test]
    fn test_unknown_command_rejected() {
        let mut processor = CommandProcessor::new();
        let lease = LeaseManager::new();
        let mut envelope = envelope("u1", 1_000, 15_000, &Command::RequestConfig);
        envelope.kind = "FORMAT_DISK".to_string();

        match processor.admit(&envelope, "ops-1", false, &lease, 1_100) {
            Admission::Rejected(ack) => {
                assert_eq!(ack.status, AckStatus::Rejected);
                assert_eq!(ack.message, "Unknown command");
            }
            other => panic!("expected rejection, got {:?}", other),
        }
    }

    #[test]
    fn test_malformed_args_rejected_with_specific_message() {
        let mut processor = CommandProcessor::new();
        let lease = LeaseManager::new();
        let mut envelope = envelope("m1", 1_000, 15_000, &Command::RequestConfig);
        envelope.kind = "SWITCH_BROKER".to_string();
        envelope.args = serde_json::json!({"broker": 42});

        match processor.admit(&envelope, "ops-1", false, &lease, 1_100) {
            Admission::Rejected(ack) => assert!(ack.message.contains("SWITCH_BROKER")),
            other => panic!("expected rejection, got {:?}", other),
        }
    }

    #[test]
    fn test_lease_denial_without_dispatch() {
        let mut processor = CommandProcessor::new();
        let lease = LeaseManager::new();
        let envelope = envelope("r1", 1_000, 15_000, &Command::RestartVuos);

        match processor.admit(&envelope, "ops-42", false, &lease, 1_100) {
            Admission::Rejected(ack) => {
                assert_eq!(ack.status, AckStatus::Rejected);
                assert_eq!(ack.message, "No active lease");
            }
            other => panic!("expected rejection, got {:?}", other),
        }
    }

    #[test]
    fn test_lease_holder_allowed() {
        let mut processor = CommandProcessor::new();
        let mut lease = LeaseManager::new();
        lease.apply_update(
            &LeasePayload {
                schema: String::new(),
                ts: 0,
                owner: Some("ops-1".to_string()),
                expires_ts: 60_000,
            },
            0,
        );

        let envelope = envelope("r2", 1_000, 15_000, &Command::RestartVuos);
        assert!(matches!(
            processor.admit(&envelope, "ops-1", false, &lease, 1_100),
            Admission::Dispatch { local_override: false, .. }
        ));
    }

    #[test]
    fn test_local_override() {
        let mut processor = CommandProcessor::new();
        let lease = LeaseManager::new();
        let envelope = envelope("l1", 1_000, 15_000, &Command::RestartVuos);

        match processor.admit(&envelope, LOCAL_CLIENT_ID, true, &lease, 1_100) {
            Admission::Dispatch { local_override, .. } => assert!(local_override),
            other => panic!("expected dispatch, got {:?}", other),
        }
    }

    #[test]
    fn test_sweep_evicts_expired_entries() {
        let mut processor = CommandProcessor::new();
        let lease = LeaseManager::new();
        let envelope = envelope("s1", 1_000, 15_000, &Command::RequestTelemetry);
        assert!(matches!(
            processor.admit(&envelope, "ops-1", false, &lease, 1_100),
            Admission::Dispatch { .. }
        ));
        processor.complete("s1", outcome("ok"), 1_200);

        assert_eq!(processor.sweep(1_300), 0);
        assert_eq!(processor.sweep(1_200 + IDEMPOTENCY_TTL_MS), 1);

        // After eviction the same id dispatches again.
        assert!(matches!(
            processor.admit(&envelope, "ops-1", false, &lease, 1_200 + IDEMPOTENCY_TTL_MS + 1),
            Admission::Expired(_)
        ));
    }

    #[test]
    fn test_synthesize_local_ids_are_unique() {
        let processor = CommandProcessor::new();
        let a = processor.synthesize_local(&Command::RequestTelemetry);
        let b = processor.synthesize_local(&Command::RequestTelemetry);
        assert_ne!(a.command_id, b.command_id);
        assert!(a.command_id.starts_with("local-"));
        assert_eq!(a.ttl_ms, LOCAL_TTL_MS);
    }
}

//! Command and acknowledgement envelopes.
//!
//! The envelope keeps `type`/`args` in raw form so an unknown command type
//! still yields a parseable envelope (the processor must ack `REJECTED`
//! rather than drop the message). `decode()` turns the raw pair into the
//! typed [`Command`] variant with its args struct.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::status::StreamQuality;

/// Schema tag for command envelopes.
pub const COMMAND_SCHEMA: &str = "vu.watchdog.command.v1";
/// Schema tag for ack envelopes.
pub const ACK_SCHEMA: &str = "vu.watchdog.ack.v1";

/// Inbound command envelope. `command_id` is client-chosen and unique per
/// intended effect; it is the idempotency key.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandEnvelope {
    #[serde(default = "default_command_schema")]
    pub schema: String,
    pub ts: i64,
    pub command_id: String,
    pub ttl_ms: i64,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub args: Value,
}

fn default_command_schema() -> String {
    COMMAND_SCHEMA.to_string()
}

impl CommandEnvelope {
    /// Build an envelope from a typed command.
    pub fn from_command(command_id: impl Into<String>, ttl_ms: i64, command: &Command) -> Self {
        let tagged = serde_json::to_value(command).unwrap_or(Value::Null);
        let (kind, args) = match tagged {
            Value::Object(mut map) => {
                let kind = map
                    .remove("type")
                    .and_then(|v| v.as_str().map(String::from))
                    .unwrap_or_default();
                (kind, map.remove("args").unwrap_or(Value::Null))
            }
            _ => (String::new(), Value::Null),
        };
        Self {
            schema: COMMAND_SCHEMA.to_string(),
            ts: crate::now_ms(),
            command_id: command_id.into(),
            ttl_ms,
            kind,
            args,
        }
    }

    /// Decode the raw `type`/`args` pair into a typed command.
    ///
    /// An absent or empty args object is dropped so argument-less commands
    /// tolerate clients that send `"args": {}`.
    pub fn decode(&self) -> Result<Command, serde_json::Error> {
        let mut map = serde_json::Map::new();
        map.insert("type".to_string(), Value::String(self.kind.clone()));
        let empty_args = self.args.is_null()
            || self.args.as_object().map(|m| m.is_empty()).unwrap_or(false);
        if !empty_args {
            map.insert("args".to_string(), self.args.clone());
        }
        serde_json::from_value(Value::Object(map))
    }

    /// True when the envelope's TTL window has elapsed. Validity requires
    /// `now` strictly before `ts + ttl_ms`, so `ttl_ms = 0` with `ts = now`
    /// is already expired.
    pub fn is_expired(&self, now_ms: i64) -> bool {
        now_ms >= self.ts + self.ttl_ms
    }
}

/// The command palette. Each variant carries a typed args struct where the
/// command takes arguments.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "args", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Command {
    RestartVuos,
    StartVuos,
    StopVuos,
    QuitWatchdog,
    SwitchBroker(SwitchBrokerArgs),
    RequestTelemetry,
    RequestConfig,
    StartStream(StartStreamArgs),
    StopStream,
    SetStreamQuality(StreamQualityArgs),
}

impl Command {
    /// Wire name of the command type.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::RestartVuos => "RESTART_VUOS",
            Self::StartVuos => "START_VUOS",
            Self::StopVuos => "STOP_VUOS",
            Self::QuitWatchdog => "QUIT_WATCHDOG",
            Self::SwitchBroker(_) => "SWITCH_BROKER",
            Self::RequestTelemetry => "REQUEST_TELEMETRY",
            Self::RequestConfig => "REQUEST_CONFIG",
            Self::StartStream(_) => "START_STREAM",
            Self::StopStream => "STOP_STREAM",
            Self::SetStreamQuality(_) => "SET_STREAM_QUALITY",
        }
    }
}

/// All wire-level command type names.
pub const KNOWN_KINDS: &[&str] = &[
    "RESTART_VUOS",
    "START_VUOS",
    "STOP_VUOS",
    "QUIT_WATCHDOG",
    "SWITCH_BROKER",
    "REQUEST_TELEMETRY",
    "REQUEST_CONFIG",
    "START_STREAM",
    "STOP_STREAM",
    "SET_STREAM_QUALITY",
];

/// Whether a raw type string names a command at all (as opposed to naming
/// one with malformed args).
pub fn is_known_kind(kind: &str) -> bool {
    KNOWN_KINDS.contains(&kind)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SwitchBrokerArgs {
    pub broker_id: String,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartStreamArgs {
    /// Zero-based monitor index to capture.
    #[serde(default)]
    pub monitor: u32,
    #[serde(default)]
    pub quality: Option<StreamQuality>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamQualityArgs {
    #[serde(flatten)]
    pub quality: StreamQuality,
}

/// Acknowledgement status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AckStatus {
    Received,
    Accepted,
    Applied,
    Rejected,
    Failed,
    Expired,
}

impl AckStatus {
    /// Terminal acks close out a command lifecycle.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Received | Self::Accepted)
    }
}

/// Acknowledgement envelope, published to `ack/{clientId}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AckEnvelope {
    #[serde(default = "default_ack_schema")]
    pub schema: String,
    pub ts: i64,
    pub command_id: String,
    pub status: AckStatus,
    pub message: String,
    #[serde(default)]
    pub details: Value,
}

fn default_ack_schema() -> String {
    ACK_SCHEMA.to_string()
}

impl AckEnvelope {
    pub fn new(command_id: &str, status: AckStatus, message: impl Into<String>) -> Self {
        Self {
            schema: ACK_SCHEMA.to_string(),
            ts: crate::now_ms(),
            command_id: command_id.to_string(),
            status,
            message: message.into(),
            details: Value::Null,
        }
    }

    pub fn with_details(mut self, details: Value) -> Self {
        self.details = details;
        self
    }
}

/// Legacy `control` topic envelope, kept for transitional compatibility.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LegacyControl {
    pub action: String,
    #[serde(default)]
    pub args: Value,
}

/// Fixed action→command translation for the legacy shim. Unknown actions
/// return `None` and are logged and dropped by the caller. The map is not
/// expanded; new callers target `command/{clientId}`.
pub fn map_legacy_action(action: &str) -> Option<Command> {
    match action {
        "restart" => Some(Command::RestartVuos),
        "start" => Some(Command::StartVuos),
        "stop" => Some(Command::StopVuos),
        "quit" => Some(Command::QuitWatchdog),
        "telemetry" => Some(Command::RequestTelemetry),
        "config" => Some(Command::RequestConfig),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_unit_command() {
        let json = r#"{"schema":"vu.watchdog.command.v1","ts":1,"commandId":"abc",
                       "ttlMs":15000,"type":"REQUEST_TELEMETRY"}"#;
        let envelope: CommandEnvelope = serde_json::from_str(json).unwrap();
        assert_eq!(envelope.decode().unwrap(), Command::RequestTelemetry);
    }

    #[test]
    fn test_decode_tolerates_empty_args() {
        let json = r#"{"ts":1,"commandId":"abc","ttlMs":15000,
                       "type":"STOP_STREAM","args":{}}"#;
        let envelope: CommandEnvelope = serde_json::from_str(json).unwrap();
        assert_eq!(envelope.decode().unwrap(), Command::StopStream);
    }

    #[test]
    fn test_decode_typed_args() {
        let json = r#"{"ts":1,"commandId":"s1","ttlMs":15000,
                       "type":"SWITCH_BROKER","args":{"brokerId":"backup"}}"#;
        let envelope: CommandEnvelope = serde_json::from_str(json).unwrap();
        match envelope.decode().unwrap() {
            Command::SwitchBroker(args) => assert_eq!(args.broker_id, "backup"),
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_decode_unknown_type_fails() {
        let json = r#"{"ts":1,"commandId":"x","ttlMs":1000,"type":"FORMAT_DISK"}"#;
        let envelope: CommandEnvelope = serde_json::from_str(json).unwrap();
        assert!(envelope.decode().is_err());
        // The envelope itself still parsed, so the processor can ack it.
        assert_eq!(envelope.command_id, "x");
    }

    #[test]
    fn test_from_command_round_trip() {
        let command = Command::StartStream(StartStreamArgs {
            monitor: 1,
            quality: Some(StreamQuality::preset_high()),
        });
        let envelope = CommandEnvelope::from_command("c-9", 15_000, &command);
        assert_eq!(envelope.kind, "START_STREAM");
        assert_eq!(envelope.decode().unwrap(), command);
    }

    #[test]
    fn test_ttl_boundary() {
        let mut envelope = CommandEnvelope::from_command("t", 0, &Command::RequestConfig);
        envelope.ts = 1_000;
        // ttl 0 with ts == now is already expired.
        assert!(envelope.is_expired(1_000));

        envelope.ttl_ms = 500;
        assert!(!envelope.is_expired(1_499));
        assert!(envelope.is_expired(1_500));
    }

    #[test]
    fn test_legacy_map() {
        assert_eq!(map_legacy_action("restart"), Some(Command::RestartVuos));
        assert_eq!(map_legacy_action("telemetry"), Some(Command::RequestTelemetry));
        assert_eq!(map_legacy_action("reboot_host"), None);
    }

    #[test]
    fn test_ack_terminal() {
        assert!(!AckStatus::Received.is_terminal());
        assert!(AckStatus::Applied.is_terminal());
        assert!(AckStatus::Expired.is_terminal());
    }
}

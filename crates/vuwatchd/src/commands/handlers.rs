//! Handlers for the standard command set.

use std::sync::Arc;

use anyhow::{bail, Context, Result};
use sysinfo::{ProcessesToUpdate, System};
use tokio_util::sync::CancellationToken;
use tracing::info;

use vuwatch_shared::command::Command;

use crate::broker::BrokerClient;
use crate::config::WatchdogConfig;
use crate::snapshot::Assembler;
use crate::streaming::bridge::SignalingBridge;
use crate::streaming::supervisor::StreamSupervisor;

/// Successful handler result; becomes the `APPLIED` ack body.
#[derive(Debug, Clone)]
pub struct HandlerOutcome {
    pub message: String,
    pub details: serde_json::Value,
}

impl HandlerOutcome {
    pub fn new(message: impl Into<String>) -> Self {
        Self { message: message.into(), details: serde_json::Value::Null }
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = details;
        self
    }
}

/// Everything a handler may touch. Handed to `execute` by the orchestrator.
pub struct HandlerContext {
    pub config: Arc<WatchdogConfig>,
    pub broker: Arc<BrokerClient>,
    pub assembler: Arc<Assembler>,
    pub supervisor: Arc<StreamSupervisor>,
    pub bridge: Arc<SignalingBridge>,
    /// Cancelled by `QUIT_WATCHDOG`; the orchestrator observes it.
    pub shutdown: CancellationToken,
}

/// Dispatch one decoded command.
pub async fn execute(command: &Command, ctx: &HandlerContext) -> Result<HandlerOutcome> {
    match command {
        Command::RestartVuos => {
            let killed = kill_process_by_name(&ctx.config.app.vuos_process);
            if killed > 0 {
                // Give the old instance a moment to release its resources.
                tokio::time::sleep(std::time::Duration::from_millis(1_500)).await;
            }
            start_vuos(&ctx.config).await?;
            Ok(HandlerOutcome::new("Target app restarted")
                .with_details(serde_json::json!({"killed": killed})))
        }
        Command::StartVuos => {
            start_vuos(&ctx.config).await?;
            Ok(HandlerOutcome::new("Target app started"))
        }
        Command::StopVuos => {
            let killed = kill_process_by_name(&ctx.config.app.vuos_process);
            if killed == 0 {
                bail!("Target app is not running");
            }
            Ok(HandlerOutcome::new("Target app stopped")
                .with_details(serde_json::json!({"killed": killed})))
        }
        Command::QuitWatchdog => {
            info!("QUIT_WATCHDOG received, beginning shutdown");
            ctx.shutdown.cancel();
            Ok(HandlerOutcome::new("Watchdog shutting down"))
        }
        Command::SwitchBroker(args) => {
            let switch = ctx.broker.switch(&args.broker_id).await?;
            Ok(HandlerOutcome::new(format!("Switched broker to {}", switch.to))
                .with_details(serde_json::json!({"from": switch.from, "to": switch.to})))
        }
        Command::RequestTelemetry => {
            let record = ctx.assembler.assemble().await;
            ctx.broker.publish_telemetry(&record).await;
            Ok(HandlerOutcome::new("Telemetry published"))
        }
        Command::RequestConfig => {
            ctx.broker.publish_config(&ctx.config.public_payload()).await;
            Ok(HandlerOutcome::new("Config published"))
        }
        Command::StartStream(args) => {
            let quality = args.quality.unwrap_or_default();
            let status = ctx.supervisor.start(args.monitor, quality).await?;
            ctx.bridge.start().await?;
            Ok(HandlerOutcome::new("Stream started").with_details(serde_json::json!({
                "port": status.port,
                "pid": status.pid,
                "monitor": status.monitor,
            })))
        }
        Command::StopStream => {
            ctx.bridge.stop().await;
            let was_running = ctx.supervisor.stop().await?;
            if !was_running {
                return Ok(HandlerOutcome::new("Stream was not running"));
            }
            Ok(HandlerOutcome::new("Stream stopped"))
        }
        Command::SetStreamQuality(args) => {
            // Destructive restart: viewers disconnect and rejoin. The ack
            // goes out only once the restarted engine is healthy.
            let bridge_was_connected = ctx.bridge.is_connected();
            if bridge_was_connected {
                ctx.bridge.stop().await;
            }
            let status = ctx.supervisor.restart_with_quality(args.quality).await?;
            if bridge_was_connected {
                ctx.bridge.start().await?;
            }
            Ok(HandlerOutcome::new("Stream quality updated")
                .with_details(serde_json::json!({
                    "quality": args.quality,
                    "port": status.port,
                })))
        }
    }
}

async fn start_vuos(config: &WatchdogConfig) -> Result<()> {
    let command_line = &config.app.vuos_start_command;
    let program = command_line
        .first()
        .context("vuos_start_command is empty")?;
    let mut command = tokio::process::Command::new(program);
    command.args(&command_line[1..]);
    command
        .spawn()
        .with_context(|| format!("failed to spawn {}", program))?;
    info!("Spawned target app via {}", program);
    Ok(())
}

/// Kill every process matching the configured name. Returns the number of
/// processes signalled.
fn kill_process_by_name(name: &str) -> usize {
    let mut system = System::new();
    system.refresh_processes(ProcessesToUpdate::All, true);
    let mut killed = 0;
    for process in system.processes().values() {
        if process.name().to_string_lossy() == name && process.kill() {
            killed += 1;
        }
    }
    killed
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outcome_builder() {
        let outcome = HandlerOutcome::new("done")
            .with_details(serde_json::json!({"port": 8000}));
        assert_eq!(outcome.message, "done");
        assert_eq!(outcome.details["port"], 8000);
    }

    #[test]
    fn test_kill_unknown_process_is_zero() {
        assert_eq!(kill_process_by_name("definitely-not-a-real-process-name"), 0);
    }
}

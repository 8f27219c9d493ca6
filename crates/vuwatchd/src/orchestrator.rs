//! Component wiring and the main loop.
//!
//! Startup: single-instance guard, collectors, ~3 s cache warm-up, broker
//! connect, handler registration, initial publishes. Main loop: 2 s tick
//! (telemetry, health, events, mode) plus the 60 s retained-config
//! republish, the 30 s idempotency sweep, inbound bus dispatch, and the
//! shutdown path.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use tokio::sync::{mpsc, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use vuwatch_shared::command::{map_legacy_action, CommandEnvelope, LegacyControl};
use vuwatch_shared::event::{EventRecord, Severity};
use vuwatch_shared::health::HealthPayload;
use vuwatch_shared::lease::LeasePayload;
use vuwatch_shared::status::{StatusPayload, StreamStatusPayload};
use vuwatch_shared::topics::InboundTopic;

use crate::broker::{BrokerClient, BusEvent};
use crate::collectors::CollectorSet;
use crate::commands::handlers::{self, HandlerContext};
use crate::commands::{Admission, CommandProcessor, LOCAL_CLIENT_ID};
use crate::config::WatchdogConfig;
use crate::events::EventEmitter;
use crate::feed::LocalFeed;
use crate::health::HealthEngine;
use crate::lease::LeaseManager;
use crate::snapshot::Assembler;
use crate::streaming::bridge::SignalingBridge;
use crate::streaming::supervisor::StreamSupervisor;

/// Publish tick.
const TICK_INTERVAL: Duration = Duration::from_secs(2);

/// Retained config republish cadence.
const CONFIG_INTERVAL: Duration = Duration::from_secs(60);

/// Idempotency sweep cadence.
const SWEEP_INTERVAL: Duration = Duration::from_secs(30);

/// Collector cache warm-up before the first publish.
const WARMUP: Duration = Duration::from_secs(3);

/// TTL assigned to shimmed legacy commands.
const LEGACY_TTL_MS: i64 = 15_000;

/// Run the agent until shutdown. Only startup failures are fatal.
pub async fn run(config: WatchdogConfig) -> Result<()> {
    single_instance_guard(config.dashboard_port).await?;
    let config = Arc::new(config);

    let collectors = CollectorSet::new();
    let collector_handles = collectors.spawn_all(&config);
    info!("Collectors started, warming caches...");
    tokio::time::sleep(WARMUP).await;

    let stream_state = Arc::new(RwLock::new(StreamStatusPayload::default()));
    let (inbound_tx, mut inbound_rx) = mpsc::unbounded_channel();
    let broker = Arc::new(
        BrokerClient::connect(
            &config.wall_id,
            config.brokers.clone(),
            Arc::clone(&stream_state),
            inbound_tx,
        )
        .await
        .context("initial broker connect failed")?,
    );

    let assembler = Arc::new(Assembler::new(&config.wall_id, collectors.clone()));
    let supervisor = Arc::new(StreamSupervisor::new(
        config.streaming.clone(),
        stream_state,
        Arc::clone(&broker),
    ));
    let bridge = Arc::new(SignalingBridge::new(
        &config.wall_id,
        Arc::clone(&broker),
        Arc::clone(&supervisor),
        config.turn.clone(),
    ));

    let shutdown = CancellationToken::new();
    spawn_signal_listener(shutdown.clone());

    let mut runtime = Runtime {
        config: Arc::clone(&config),
        collectors,
        broker: Arc::clone(&broker),
        feed: LocalFeed::new(64),
        engine: HealthEngine::new(vuwatch_shared::now_ms()),
        emitter: EventEmitter::new(&config.wall_id),
        lease: LeaseManager::new(),
        processor: CommandProcessor::new(),
        handler_ctx: HandlerContext {
            config: Arc::clone(&config),
            broker: Arc::clone(&broker),
            assembler: Arc::clone(&assembler),
            supervisor: Arc::clone(&supervisor),
            bridge: Arc::clone(&bridge),
            shutdown: shutdown.clone(),
        },
        assembler,
        bridge: Arc::clone(&bridge),
        supervisor: Arc::clone(&supervisor),
    };

    runtime
        .emit(runtime.emitter.lifecycle(
            "WATCHDOG_STARTED",
            Severity::Info,
            serde_json::json!({"version": vuwatch_shared::VERSION}),
        ))
        .await;
    let record = runtime.assembler.assemble().await;
    broker.publish_telemetry(&record).await;
    broker.publish_config(&config.public_payload()).await;
    info!("Entering main loop (wall {})", config.wall_id);

    let mut tick = tokio::time::interval(TICK_INTERVAL);
    let mut config_tick = tokio::time::interval(CONFIG_INTERVAL);
    let mut sweep_tick = tokio::time::interval(SWEEP_INTERVAL);

    loop {
        tokio::select! {
            _ = tick.tick() => runtime.tick().await,
            _ = config_tick.tick() => {
                runtime.broker.publish_config(&runtime.config.public_payload()).await;
            }
            _ = sweep_tick.tick() => {
                let evicted = runtime.processor.sweep(vuwatch_shared::now_ms());
                if evicted > 0 {
                    debug!("Idempotency sweep evicted {} entries", evicted);
                }
            }
            event = inbound_rx.recv() => match event {
                Some(event) => runtime.handle_bus_event(event).await,
                None => {
                    warn!("Bus channel closed");
                    break;
                }
            },
            _ = shutdown.cancelled() => break,
        }
    }

    runtime.shutdown_sequence().await;
    for handle in collector_handles {
        handle.abort();
    }
    info!("Watchdog stopped");
    Ok(())
}

struct Runtime {
    config: Arc<WatchdogConfig>,
    collectors: CollectorSet,
    broker: Arc<BrokerClient>,
    assembler: Arc<Assembler>,
    supervisor: Arc<StreamSupervisor>,
    bridge: Arc<SignalingBridge>,
    feed: LocalFeed,
    engine: HealthEngine,
    emitter: EventEmitter,
    lease: LeaseManager,
    processor: CommandProcessor,
    handler_ctx: HandlerContext,
}

impl Runtime {
    /// Publish an event to the bus and the local feed.
    async fn emit(&self, event: EventRecord) {
        self.broker.publish_event(&event).await;
        self.feed.publish_event(event);
    }

    /// One publish tick: assemble, evaluate, edge-trigger, publish.
    async fn tick(&mut self) {
        let record = self.assembler.assemble().await;
        let now_ms = vuwatch_shared::now_ms();

        if let Some(crash) = self.collectors.app.write().await.take_crash() {
            let event = self.emitter.lifecycle(
                "VUOS_CRASHED",
                Severity::Error,
                serde_json::json!({
                    "oldPid": crash.old_pid,
                    "newPid": crash.new_pid,
                    "crashCountToday": record.app.crash_count_today,
                }),
            );
            self.emit(event).await;
        }

        let evaluation = self.engine.evaluate(&record, now_ms);
        for event in self.emitter.observe_conditions(&evaluation.conditions, now_ms) {
            self.emit(event).await;
        }
        if let Some(event) = self.emitter.observe_mode(evaluation.mode, now_ms) {
            info!(
                "Mode transition: {} -> {}",
                event.details["from"].as_str().unwrap_or("?"),
                event.details["to"].as_str().unwrap_or("?")
            );
            self.emit(event).await;
        }

        let health =
            HealthPayload::from_record(&record, evaluation.mode, evaluation.active_ids());
        self.broker.publish_telemetry(&record).await;
        self.broker.publish_health(&health).await;
        self.feed.publish_telemetry(record);
        self.feed.publish_health(health);
    }

    async fn handle_bus_event(&mut self, event: BusEvent) {
        match event {
            BusEvent::Connected { broker_id } => {
                let event = self.emitter.lifecycle(
                    "BROKER_CONNECTED",
                    Severity::Info,
                    serde_json::json!({"brokerId": broker_id}),
                );
                self.emit(event).await;
            }
            BusEvent::Disconnected { broker_id } => {
                warn!("Broker {} disconnected, client is retrying", broker_id);
            }
            BusEvent::Message { topic, payload } => self.dispatch(&topic, &payload).await,
        }
    }

    /// Route one inbound bus message by topic.
    async fn dispatch(&mut self, topic: &str, payload: &[u8]) {
        let Some(inbound) = self.broker.topics().parse(topic) else {
            debug!("message on unrouted topic {} dropped", topic);
            return;
        };
        match inbound {
            InboundTopic::Command { client_id } => {
                match serde_json::from_slice::<CommandEnvelope>(payload) {
                    Ok(envelope) => {
                        self.handle_command(envelope, &client_id, false).await;
                    }
                    Err(e) => warn!("malformed command envelope from {}: {}", client_id, e),
                }
            }
            InboundTopic::Lease => match serde_json::from_slice::<LeasePayload>(payload) {
                Ok(lease) => {
                    self.lease.apply_update(&lease, vuwatch_shared::now_ms());
                }
                Err(e) => warn!("malformed lease payload: {}", e),
            },
            InboundTopic::Control => self.handle_legacy(payload).await,
            InboundTopic::WebrtcJoin => match serde_json::from_slice(payload) {
                Ok(join) => self.bridge.handle_join(join).await,
                Err(e) => debug!("malformed join payload: {}", e),
            },
            InboundTopic::WebrtcAnswer => match serde_json::from_slice(payload) {
                Ok(answer) => self.bridge.handle_answer(answer).await,
                Err(e) => debug!("malformed answer payload: {}", e),
            },
            InboundTopic::WebrtcIce => match serde_json::from_slice(payload) {
                Ok(candidate) => self.bridge.handle_remote_ice(candidate).await,
                Err(e) => debug!("malformed candidate payload: {}", e),
            },
            InboundTopic::WebrtcLeave => match serde_json::from_slice(payload) {
                Ok(leave) => self.bridge.handle_leave(leave).await,
                Err(e) => debug!("malformed leave payload: {}", e),
            },
        }
    }

    /// Legacy `control` shim: fixed action map, unknown actions dropped.
    async fn handle_legacy(&mut self, payload: &[u8]) {
        let control: LegacyControl = match serde_json::from_slice(payload) {
            Ok(control) => control,
            Err(e) => {
                warn!("malformed legacy control payload: {}", e);
                return;
            }
        };
        let Some(command) = map_legacy_action(&control.action) else {
            warn!("unknown legacy action {:?} dropped", control.action);
            return;
        };
        let envelope = CommandEnvelope::from_command(
            format!("legacy-{}", Uuid::new_v4().simple()),
            LEGACY_TTL_MS,
            &command,
        );
        self.handle_command(envelope, "legacy", false).await;
    }

    /// Full inbound command path: lifecycle event, admission, dispatch,
    /// acks. Every ack goes to `ack/{clientId}` and the local feed.
    async fn handle_command(
        &mut self,
        envelope: CommandEnvelope,
        client_id: &str,
        is_local: bool,
    ) {
        let now_ms = vuwatch_shared::now_ms();
        let event = self.emitter.lifecycle(
            "COMMAND_RECEIVED",
            Severity::Info,
            serde_json::json!({
                "type": envelope.kind,
                "commandId": envelope.command_id,
                "clientId": client_id,
                "isLocal": is_local,
            }),
        );
        self.emit(event).await;

        let admission = self
            .processor
            .admit(&envelope, client_id, is_local, &self.lease, now_ms);
        match admission {
            Admission::Duplicate(ack) => {
                debug!("duplicate command {} replayed", envelope.command_id);
                self.send_ack(client_id, ack).await;
            }
            Admission::Expired(ack) | Admission::Rejected(ack) => {
                self.send_ack(client_id, ack).await;
            }
            Admission::Dispatch { received, command, local_override } => {
                if local_override {
                    let event = self.emitter.lifecycle(
                        "LOCAL_OVERRIDE_USED",
                        Severity::Warn,
                        serde_json::json!({
                            "type": command.kind(),
                            "commandId": envelope.command_id,
                        }),
                    );
                    self.emit(event).await;
                }
                self.send_ack(client_id, received).await;
                self.broker.publish_command_echo(&envelope).await;

                let was_switch = matches!(
                    command,
                    vuwatch_shared::command::Command::SwitchBroker(_)
                );
                let outcome = handlers::execute(&command, &self.handler_ctx).await;
                let terminal = self.processor.complete(
                    &envelope.command_id,
                    outcome,
                    vuwatch_shared::now_ms(),
                );
                let applied =
                    terminal.status == vuwatch_shared::command::AckStatus::Applied;
                if was_switch && applied {
                    // The event lands on the new broker, naming both ends.
                    let event = self.emitter.lifecycle(
                        "BROKER_SWITCHED",
                        Severity::Warn,
                        serde_json::json!({
                            "from": terminal.details["from"],
                            "to": terminal.details["to"],
                            "reason": format!("command from {}", client_id),
                        }),
                    );
                    self.emit(event).await;
                }
                self.send_ack(client_id, terminal).await;
            }
        }
    }

    /// Submit a locally originated command (dashboard HTTP / WebSocket
    /// surfaces call this). Shares the full inbound path.
    #[allow(dead_code)]
    pub async fn submit_local(&mut self, command: vuwatch_shared::command::Command) {
        let envelope = self.processor.synthesize_local(&command);
        self.handle_command(envelope, LOCAL_CLIENT_ID, true).await;
    }

    async fn send_ack(&self, client_id: &str, ack: vuwatch_shared::command::AckEnvelope) {
        self.broker.publish_ack(client_id, &ack).await;
        self.feed.publish_ack(ack);
    }

    /// Ordered teardown: announce, flip the mode, stop streaming, publish
    /// the retained offline status, then disconnect cleanly.
    async fn shutdown_sequence(&mut self) {
        info!("Shutting down...");
        self.engine.set_shutting_down();
        let event = self.emitter.lifecycle(
            "WATCHDOG_STOPPING",
            Severity::Info,
            serde_json::Value::Null,
        );
        self.emit(event).await;

        let record = self.assembler.assemble().await;
        let now_ms = vuwatch_shared::now_ms();
        let evaluation = self.engine.evaluate(&record, now_ms);
        if let Some(event) = self.emitter.observe_mode(evaluation.mode, now_ms) {
            self.emit(event).await;
        }
        let health =
            HealthPayload::from_record(&record, evaluation.mode, evaluation.active_ids());
        self.broker.publish_health(&health).await;

        self.bridge.stop().await;
        if let Err(e) = self.supervisor.stop().await {
            warn!("media engine stop failed: {}", e);
        }

        // A clean disconnect suppresses the Last-Will, so the offline
        // status is published explicitly first.
        self.broker
            .publish_status(&StatusPayload::offline(&self.config.wall_id))
            .await;
        self.broker.disconnect().await;
    }
}

/// Single-instance guard: a response on the dashboard port means another
/// watchdog owns this host.
async fn single_instance_guard(dashboard_port: u16) -> Result<()> {
    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(1))
        .build()?;
    let url = format!("http://127.0.0.1:{}/", dashboard_port);
    if client.get(&url).send().await.is_ok() {
        bail!("another watchdog instance is already running on port {}", dashboard_port);
    }
    Ok(())
}

/// Cancel the shutdown token on SIGINT or SIGTERM.
fn spawn_signal_listener(shutdown: CancellationToken) {
    tokio::spawn(async move {
        #[cfg(unix)]
        {
            let mut sigterm = match tokio::signal::unix::signal(
                tokio::signal::unix::SignalKind::terminate(),
            ) {
                Ok(signal) => signal,
                Err(e) => {
                    warn!("SIGTERM listener failed: {}", e);
                    return;
                }
            };
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {}
                _ = sigterm.recv() => {}
            }
        }
        #[cfg(not(unix))]
        {
            let _ = tokio::signal::ctrl_c().await;
        }
        info!("Shutdown signal received");
        shutdown.cancel();
    });
}

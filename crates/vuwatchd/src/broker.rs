//! Message-bus client.
//!
//! One logical connection to the active broker out of the configured list.
//! On establish: publish a retained online status, register the offline
//! Last-Will, subscribe to the inbound topic set. Publishes while
//! disconnected are silent no-ops so a broker outage cannot fan out into a
//! tight error loop. Reconnection is driven by re-polling the event loop
//! with a fixed retry pause; every ConnAck re-subscribes and republishes
//! the online status.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use rumqttc::{AsyncClient, Event, LastWill, MqttOptions, Packet, QoS};
use tokio::sync::{mpsc, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use vuwatch_shared::command::{AckEnvelope, CommandEnvelope};
use vuwatch_shared::event::EventRecord;
use vuwatch_shared::health::HealthPayload;
use vuwatch_shared::status::{StatusPayload, StreamStatusPayload};
use vuwatch_shared::telemetry::TelemetryRecord;
use vuwatch_shared::topics::TopicSet;

use crate::config::BrokerConfig;

/// Time allowed for the initial CONNACK.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(15);

/// Pause before re-polling a failed event loop.
const RECONNECT_PAUSE: Duration = Duration::from_secs(5);

/// Everything the orchestrator receives from the bus.
#[derive(Debug)]
pub enum BusEvent {
    Message { topic: String, payload: Vec<u8> },
    Connected { broker_id: String },
    Disconnected { broker_id: String },
}

/// Result of a broker switch, for the `BROKER_SWITCHED` event.
#[derive(Debug, Clone)]
pub struct BrokerSwitch {
    pub from: String,
    pub to: String,
}

struct ActiveBroker {
    id: String,
    client: AsyncClient,
    connected: Arc<AtomicBool>,
    cancel: CancellationToken,
}

pub struct BrokerClient {
    wall_id: String,
    topics: TopicSet,
    brokers: Vec<BrokerConfig>,
    stream_state: Arc<RwLock<StreamStatusPayload>>,
    inbound_tx: mpsc::UnboundedSender<BusEvent>,
    active: RwLock<Option<ActiveBroker>>,
}

impl BrokerClient {
    /// Connect to the first configured broker.
    pub async fn connect(
        wall_id: &str,
        brokers: Vec<BrokerConfig>,
        stream_state: Arc<RwLock<StreamStatusPayload>>,
        inbound_tx: mpsc::UnboundedSender<BusEvent>,
    ) -> Result<Self> {
        let client = Self {
            wall_id: wall_id.to_string(),
            topics: TopicSet::new(wall_id),
            brokers,
            stream_state,
            inbound_tx,
            active: RwLock::new(None),
        };
        let first = client
            .brokers
            .first()
            .context("broker list is empty")?
            .clone();
        let active = client.establish(&first).await?;
        *client.active.write().await = Some(active);
        Ok(client)
    }

    /// Switch to another configured broker. No synthetic offline status is
    /// published; Last-Will semantics are the contract for abrupt absence.
    pub async fn switch(&self, broker_id: &str) -> Result<BrokerSwitch> {
        let target = self
            .brokers
            .iter()
            .find(|b| b.id == broker_id)
            .with_context(|| format!("unknown broker id: {}", broker_id))?
            .clone();

        {
            let active = self.active.read().await;
            if let Some(active) = active.as_ref() {
                if active.id == broker_id && active.connected.load(Ordering::SeqCst) {
                    bail!("broker {} is already active", broker_id);
                }
            }
        }

        let previous = self.active.write().await.take();
        let from = match previous {
            Some(previous) => {
                // Let the event loop flush the DISCONNECT before stopping it.
                let _ = previous.client.disconnect().await;
                tokio::time::sleep(Duration::from_millis(100)).await;
                previous.cancel.cancel();
                previous.id
            }
            None => String::new(),
        };

        info!("Switching broker {} -> {}", from, target.id);
        let active = self.establish(&target).await?;
        let to = active.id.clone();
        *self.active.write().await = Some(active);
        Ok(BrokerSwitch { from, to })
    }

    /// Graceful disconnect (shutdown path). The caller publishes the
    /// retained offline status first; a clean DISCONNECT suppresses the
    /// Last-Will.
    pub async fn disconnect(&self) {
        if let Some(active) = self.active.write().await.take() {
            let _ = active.client.disconnect().await;
            tokio::time::sleep(Duration::from_millis(100)).await;
            active.cancel.cancel();
        }
    }

    pub async fn is_connected(&self) -> bool {
        self.active
            .read()
            .await
            .as_ref()
            .map(|a| a.connected.load(Ordering::SeqCst))
            .unwrap_or(false)
    }

    pub fn topics(&self) -> &TopicSet {
        &self.topics
    }

    async fn establish(&self, config: &BrokerConfig) -> Result<ActiveBroker> {
        let (host, port) = parse_mqtt_url(&config.url)?;
        let client_id = format!("vuwatch-{}", self.wall_id);

        let mut options = MqttOptions::new(client_id, host, port);
        options.set_keep_alive(Duration::from_secs(15));
        if let (Some(username), Some(password)) = (&config.username, &config.password) {
            options.set_credentials(username.clone(), password.clone());
        }
        let offline = serde_json::to_vec(&StatusPayload::offline(&self.wall_id))?;
        options.set_last_will(LastWill::new(
            self.topics.status(),
            offline,
            QoS::AtLeastOnce,
            true,
        ));

        let (client, mut eventloop) = AsyncClient::new(options, 64);
        let connected = Arc::new(AtomicBool::new(false));
        let cancel = CancellationToken::new();

        let task_client = client.clone();
        let task_connected = Arc::clone(&connected);
        let task_cancel = cancel.clone();
        let task_tx = self.inbound_tx.clone();
        let task_topics = self.topics.clone();
        let task_wall_id = self.wall_id.clone();
        let task_broker_id = config.id.clone();
        let task_stream = Arc::clone(&self.stream_state);

        tokio::spawn(async move {
            let mut was_connected = false;
            loop {
                let event = tokio::select! {
                    _ = task_cancel.cancelled() => break,
                    event = eventloop.poll() => event,
                };
                match event {
                    Ok(Event::Incoming(Packet::ConnAck(_))) => {
                        task_connected.store(true, Ordering::SeqCst);
                        was_connected = true;
                        on_connected(
                            &task_client,
                            &task_topics,
                            &task_wall_id,
                            &task_stream,
                        )
                        .await;
                        let _ = task_tx.send(BusEvent::Connected {
                            broker_id: task_broker_id.clone(),
                        });
                    }
                    Ok(Event::Incoming(Packet::Publish(publish))) => {
                        let _ = task_tx.send(BusEvent::Message {
                            topic: publish.topic.clone(),
                            payload: publish.payload.to_vec(),
                        });
                    }
                    Ok(_) => {}
                    Err(e) => {
                        task_connected.store(false, Ordering::SeqCst);
                        if was_connected {
                            was_connected = false;
                            warn!("Broker connection lost: {}", e);
                            let _ = task_tx.send(BusEvent::Disconnected {
                                broker_id: task_broker_id.clone(),
                            });
                        } else {
                            debug!("Broker connect attempt failed: {}", e);
                        }
                        tokio::select! {
                            _ = task_cancel.cancelled() => break,
                            _ = tokio::time::sleep(RECONNECT_PAUSE) => {}
                        }
                    }
                }
            }
        });

        // Wait for the first CONNACK before declaring the broker active.
        let deadline = tokio::time::Instant::now() + CONNECT_TIMEOUT;
        while !connected.load(Ordering::SeqCst) {
            if tokio::time::Instant::now() >= deadline {
                cancel.cancel();
                let _ = client.disconnect().await;
                bail!("broker {} connect timed out", config.id);
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
        info!("Connected to broker {} ({})", config.id, config.url);

        Ok(ActiveBroker { id: config.id.clone(), client, connected, cancel })
    }

    /// Raw publish; silent no-op while disconnected.
    pub async fn publish(&self, topic: &str, payload: Vec<u8>, qos: QoS, retain: bool) {
        let active = self.active.read().await;
        let Some(active) = active.as_ref() else {
            debug!("publish to {} dropped: no active broker", topic);
            return;
        };
        if !active.connected.load(Ordering::SeqCst) {
            debug!("publish to {} dropped: broker disconnected", topic);
            return;
        }
        if let Err(e) = active.client.publish(topic, qos, retain, payload).await {
            debug!("publish to {} failed: {}", topic, e);
        }
    }

    pub async fn publish_json<T: serde::Serialize>(
        &self,
        topic: &str,
        value: &T,
        qos: QoS,
        retain: bool,
    ) {
        match serde_json::to_vec(value) {
            Ok(payload) => self.publish(topic, payload, qos, retain).await,
            Err(e) => warn!("serialize for {} failed: {}", topic, e),
        }
    }

    pub async fn publish_telemetry(&self, record: &TelemetryRecord) {
        self.publish_json(&self.topics.telemetry(), record, QoS::AtMostOnce, false)
            .await;
    }

    pub async fn publish_health(&self, payload: &HealthPayload) {
        self.publish_json(&self.topics.health(), payload, QoS::AtLeastOnce, true)
            .await;
    }

    pub async fn publish_event(&self, event: &EventRecord) {
        self.publish_json(&self.topics.event(), event, QoS::AtLeastOnce, false)
            .await;
    }

    pub async fn publish_status(&self, status: &StatusPayload) {
        self.publish_json(&self.topics.status(), status, QoS::AtLeastOnce, true)
            .await;
    }

    pub async fn publish_config(&self, payload: &serde_json::Value) {
        self.publish_json(&self.topics.config(), payload, QoS::AtMostOnce, true)
            .await;
    }

    pub async fn publish_ack(&self, client_id: &str, ack: &AckEnvelope) {
        self.publish_json(&self.topics.ack(client_id), ack, QoS::AtLeastOnce, false)
            .await;
    }

    /// Realtime echo of an accepted command for passive observers.
    pub async fn publish_command_echo(&self, envelope: &CommandEnvelope) {
        self.publish_json(&self.topics.commands(), envelope, QoS::AtMostOnce, false)
            .await;
    }

    pub async fn publish_stream_status(&self, status: &StreamStatusPayload) {
        self.publish_json(&self.topics.stream_status(), status, QoS::AtLeastOnce, true)
            .await;
    }

    /// Clear a retained topic by publishing an empty retained payload.
    pub async fn clear_retained(&self, topic: &str) {
        self.publish(topic, Vec::new(), QoS::AtLeastOnce, true).await;
    }
}

/// On every CONNACK: retained online status, then the inbound subscriptions.
async fn on_connected(
    client: &AsyncClient,
    topics: &TopicSet,
    wall_id: &str,
    stream_state: &Arc<RwLock<StreamStatusPayload>>,
) {
    let stream_status = stream_state.read().await.status;
    let online = StatusPayload::online(wall_id, stream_status);
    match serde_json::to_vec(&online) {
        Ok(payload) => {
            if let Err(e) = client
                .publish(topics.status(), QoS::AtLeastOnce, true, payload)
                .await
            {
                warn!("online status publish failed: {}", e);
            }
        }
        Err(e) => warn!("online status serialize failed: {}", e),
    }

    let subscriptions = [
        topics.command_wildcard(),
        topics.lease(),
        topics.control(),
        topics.webrtc_join(),
        topics.webrtc_answer(),
        topics.webrtc_ice(),
        topics.webrtc_leave(),
    ];
    for topic in subscriptions {
        if let Err(e) = client.subscribe(topic.clone(), QoS::AtLeastOnce).await {
            warn!("subscribe {} failed: {}", topic, e);
        }
    }
}

/// Accepts `mqtt://host:port`, `tcp://host:port`, or bare `host:port`;
/// the port defaults to 1883.
fn parse_mqtt_url(url: &str) -> Result<(String, u16)> {
    let stripped = url
        .strip_prefix("mqtt://")
        .or_else(|| url.strip_prefix("tcp://"))
        .unwrap_or(url);
    if stripped.is_empty() {
        bail!("empty broker url");
    }
    match stripped.rsplit_once(':') {
        Some((host, port)) => {
            let port: u16 = port
                .parse()
                .with_context(|| format!("invalid broker port in {}", url))?;
            Ok((host.to_string(), port))
        }
        None => Ok((stripped.to_string(), 1883)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_mqtt_url() {
        assert_eq!(
            parse_mqtt_url("mqtt://broker.example:1884").unwrap(),
            ("broker.example".to_string(), 1884)
        );
        assert_eq!(
            parse_mqtt_url("tcp://10.0.0.2:1883").unwrap(),
            ("10.0.0.2".to_string(), 1883)
        );
        assert_eq!(
            parse_mqtt_url("broker.local").unwrap(),
            ("broker.local".to_string(), 1883)
        );
        assert!(parse_mqtt_url("mqtt://broker:notaport").is_err());
        assert!(parse_mqtt_url("").is_err());
    }
}

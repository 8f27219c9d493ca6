//! Local observer feed.
//!
//! Everything published to the bus is mirrored onto in-process broadcast
//! channels so embedding surfaces (dashboard, tray) can subscribe without
//! touching the broker. Send errors just mean nobody is listening.

use tokio::sync::broadcast;

use vuwatch_shared::command::AckEnvelope;
use vuwatch_shared::event::EventRecord;
use vuwatch_shared::health::HealthPayload;
use vuwatch_shared::telemetry::TelemetryRecord;

#[derive(Clone)]
pub struct LocalFeed {
    telemetry: broadcast::Sender<TelemetryRecord>,
    health: broadcast::Sender<HealthPayload>,
    events: broadcast::Sender<EventRecord>,
    acks: broadcast::Sender<AckEnvelope>,
}

impl LocalFeed {
    pub fn new(capacity: usize) -> Self {
        let (telemetry, _) = broadcast::channel(capacity);
        let (health, _) = broadcast::channel(capacity);
        let (events, _) = broadcast::channel(capacity);
        let (acks, _) = broadcast::channel(capacity);
        Self { telemetry, health, events, acks }
    }

    pub fn publish_telemetry(&self, record: TelemetryRecord) {
        let _ = self.telemetry.send(record);
    }

    pub fn publish_health(&self, payload: HealthPayload) {
        let _ = self.health.send(payload);
    }

    pub fn publish_event(&self, event: EventRecord) {
        let _ = self.events.send(event);
    }

    pub fn publish_ack(&self, ack: AckEnvelope) {
        let _ = self.acks.send(ack);
    }

    pub fn subscribe_telemetry(&self) -> broadcast::Receiver<TelemetryRecord> {
        self.telemetry.subscribe()
    }

    pub fn subscribe_health(&self) -> broadcast::Receiver<HealthPayload> {
        self.health.subscribe()
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<EventRecord> {
        self.events.subscribe()
    }

    pub fn subscribe_acks(&self) -> broadcast::Receiver<AckEnvelope> {
        self.acks.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vuwatch_shared::command::AckStatus;
    use vuwatch_shared::event::Severity;

    #[tokio::test]
    async fn test_subscribers_receive_published_items() {
        let feed = LocalFeed::new(8);
        let mut events = feed.subscribe_events();
        let mut acks = feed.subscribe_acks();

        feed.publish_event(EventRecord::new(
            "wall-1",
            "WATCHDOG_STARTED",
            Severity::Info,
            serde_json::Value::Null,
        ));
        feed.publish_ack(AckEnvelope::new("c1", AckStatus::Applied, "ok"));

        assert_eq!(events.recv().await.unwrap().kind, "WATCHDOG_STARTED");
        assert_eq!(acks.recv().await.unwrap().command_id, "c1");
    }

    #[test]
    fn test_publish_without_subscribers_is_fine() {
        let feed = LocalFeed::new(8);
        feed.publish_ack(AckEnvelope::new("c1", AckStatus::Rejected, "no"));
    }
}

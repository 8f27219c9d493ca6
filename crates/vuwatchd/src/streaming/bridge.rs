//! WebRTC signaling bridge.
//!
//! Converts the single local media engine into N independent viewer
//! sessions by shuttling SDP and ICE over the bus. Per viewer: fetch an
//! offer from the engine, publish it targeted at the viewer, poll the
//! engine for local candidates until a leave / stop / 30 s cap, latch the
//! first answer, and forward remote candidates. Answers and candidates
//! from unknown viewers are logged and dropped.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use rumqttc::QoS;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use vuwatch_shared::status::StreamStatus;
use vuwatch_shared::webrtc::{
    AnswerMessage, CandidateMessage, IceServer, JoinMessage, LeaveMessage, OfferMessage,
    ReadyAnnouncement, SessionDescription,
};

use crate::broker::BrokerClient;
use crate::config::TurnConfig;

use super::engine::MediaEngineClient;
use super::supervisor::StreamSupervisor;
use super::turn;

/// Rapid re-joins inside this window are ignored.
const JOIN_DEBOUNCE_MS: i64 = 2_000;

/// Offer fetch attempts against the engine.
const OFFER_ATTEMPTS: u32 = 3;

/// Pause between offer attempts.
const OFFER_BACKOFF: Duration = Duration::from_millis(500);

/// Local ICE polling cadence.
const ICE_POLL_INTERVAL: Duration = Duration::from_millis(150);

/// Safety cap on a viewer's ICE polling.
const ICE_POLL_CAP: Duration = Duration::from_secs(30);

/// One attached viewer.
struct ViewerConnection {
    peer_id: String,
    connected_at: i64,
    /// Latched on the first answer; later answers are discarded.
    answer_received: bool,
    /// Owns the ICE polling task.
    cancel: CancellationToken,
}

impl ViewerConnection {
    fn cancel_polling(&self) {
        self.cancel.cancel();
    }
}

/// Viewer bookkeeping, separated so the join/answer/leave invariants are
/// testable without any I/O.
#[derive(Default)]
struct ViewerRegistry {
    viewers: HashMap<String, ViewerConnection>,
    last_join: HashMap<String, i64>,
}

/// Outcome of an answer arrival.
#[derive(Debug, PartialEq, Eq)]
enum AnswerLatch {
    Unknown,
    AlreadyAnswered,
    First { peer_id: String },
}

impl ViewerRegistry {
    /// True when this join should be ignored (rapid re-join).
    fn join_debounced(&mut self, viewer_id: &str, now_ms: i64) -> bool {
        if let Some(last) = self.last_join.get(viewer_id) {
            if now_ms - last < JOIN_DEBOUNCE_MS {
                return true;
            }
        }
        self.last_join.insert(viewer_id.to_string(), now_ms);
        false
    }

    /// Insert a connection; a previous connection for the same viewer is
    /// returned so the caller can clean it up (re-join supersedes).
    fn insert(&mut self, viewer_id: &str, connection: ViewerConnection) -> Option<ViewerConnection> {
        self.viewers.insert(viewer_id.to_string(), connection)
    }

    fn latch_answer(&mut self, viewer_id: &str) -> AnswerLatch {
        match self.viewers.get_mut(viewer_id) {
            None => AnswerLatch::Unknown,
            Some(viewer) if viewer.answer_received => AnswerLatch::AlreadyAnswered,
            Some(viewer) => {
                viewer.answer_received = true;
                AnswerLatch::First { peer_id: viewer.peer_id.clone() }
            }
        }
    }

    fn peer_id(&self, viewer_id: &str) -> Option<String> {
        self.viewers.get(viewer_id).map(|v| v.peer_id.clone())
    }

    fn remove(&mut self, viewer_id: &str) -> Option<ViewerConnection> {
        self.last_join.remove(viewer_id);
        self.viewers.remove(viewer_id)
    }

    fn drain(&mut self) -> Vec<ViewerConnection> {
        self.last_join.clear();
        self.viewers.drain().map(|(_, v)| v).collect()
    }

    fn len(&self) -> usize {
        self.viewers.len()
    }
}

struct BridgeInner {
    publisher_id: Option<String>,
    ice_servers: Vec<IceServer>,
    engine: Option<MediaEngineClient>,
    registry: ViewerRegistry,
}

pub struct SignalingBridge {
    wall_id: String,
    broker: Arc<BrokerClient>,
    supervisor: Arc<StreamSupervisor>,
    turn_config: TurnConfig,
    connected: AtomicBool,
    inner: Mutex<BridgeInner>,
}

impl SignalingBridge {
    pub fn new(
        wall_id: &str,
        broker: Arc<BrokerClient>,
        supervisor: Arc<StreamSupervisor>,
        turn_config: TurnConfig,
    ) -> Self {
        Self {
            wall_id: wall_id.to_string(),
            broker,
            supervisor,
            turn_config,
            connected: AtomicBool::new(false),
            inner: Mutex::new(BridgeInner {
                publisher_id: None,
                ice_servers: Vec::new(),
                engine: None,
                registry: ViewerRegistry::default(),
            }),
        }
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// Go live: requires the engine running, fetches TURN credentials, and
    /// publishes the retained ready announcement viewers key off.
    pub async fn start(&self) -> Result<()> {
        if self.is_connected() {
            return Ok(());
        }
        let status = self.supervisor.status().await;
        if status.status != StreamStatus::Running {
            bail!("streaming is not running");
        }
        let engine = self
            .supervisor
            .engine_client()
            .await
            .context("media engine has no control port")?;

        let publisher_id = format!("pub-{}", Uuid::new_v4().simple());
        let ice_servers = turn::discover_ice_servers(&self.turn_config).await;

        let ready = ReadyAnnouncement::new(&publisher_id, &self.wall_id, ice_servers.clone());
        self.broker
            .publish_json(
                &self.broker.topics().webrtc_offer(),
                &ready,
                QoS::AtLeastOnce,
                true,
            )
            .await;

        let mut inner = self.inner.lock().await;
        inner.publisher_id = Some(publisher_id.clone());
        inner.ice_servers = ice_servers;
        inner.engine = Some(engine);
        self.connected.store(true, Ordering::SeqCst);
        info!("Signaling bridge connected as {}", publisher_id);
        Ok(())
    }

    /// Tear down: clear the retained offer so no new joiners are attracted,
    /// hang up every viewer, and stop all polling.
    pub async fn stop(&self) {
        if !self.connected.swap(false, Ordering::SeqCst) {
            return;
        }

        let (viewers, engine) = {
            let mut inner = self.inner.lock().await;
            let viewers = inner.registry.drain();
            let engine = inner.engine.take();
            inner.publisher_id = None;
            inner.ice_servers.clear();
            (viewers, engine)
        };

        self.broker
            .clear_retained(&self.broker.topics().webrtc_offer())
            .await;

        for viewer in &viewers {
            viewer.cancel_polling();
        }
        if let Some(engine) = engine {
            for viewer in &viewers {
                if let Err(e) = engine.hangup(&viewer.peer_id).await {
                    debug!("hangup {} failed: {}", viewer.peer_id, e);
                }
            }
        }
        info!("Signaling bridge disconnected ({} viewers dropped)", viewers.len());
    }

    pub async fn viewer_count(&self) -> usize {
        self.inner.lock().await.registry.len()
    }

    /// Viewer join: debounce, supersede any prior session, fetch an offer
    /// with retry, publish it targeted, then start ICE polling.
    pub async fn handle_join(&self, join: JoinMessage) {
        if !self.is_connected() {
            debug!("join from {} dropped: bridge not connected", join.from);
            return;
        }
        let viewer_id = join.from;
        let now_ms = vuwatch_shared::now_ms();

        // Phase 1 under the lock: debounce and supersede.
        let (engine, publisher_id, ice_servers, superseded) = {
            let mut inner = self.inner.lock().await;
            if inner.registry.join_debounced(&viewer_id, now_ms) {
                debug!("join from {} debounced", viewer_id);
                return;
            }
            let Some(engine) = inner.engine.clone() else {
                return;
            };
            let Some(publisher_id) = inner.publisher_id.clone() else {
                return;
            };
            let superseded = inner.registry.remove(&viewer_id);
            // The remove above also dropped the fresh join stamp; restore it.
            inner.registry.last_join.insert(viewer_id.clone(), now_ms);
            (engine, publisher_id, inner.ice_servers.clone(), superseded)
        };
        if let Some(previous) = superseded {
            previous.cancel_polling();
            let _ = engine.hangup(&previous.peer_id).await;
        }

        // Phase 2 without the lock: the offer fetch can take seconds.
        let peer_id = format!("{}-{}", viewer_id, now_ms);
        let capture_url = self.supervisor.capture_url().await;
        let offer = match fetch_offer_with_retry(&engine, &peer_id, &capture_url).await {
            Ok(offer) => offer,
            Err(e) => {
                warn!("offer fetch for viewer {} failed: {}", viewer_id, e);
                return;
            }
        };

        let message = OfferMessage::new(offer, ice_servers, &viewer_id, &publisher_id);
        self.broker
            .publish_json(
                &self.broker.topics().webrtc_offer(),
                &message,
                QoS::AtLeastOnce,
                false,
            )
            .await;

        let cancel = CancellationToken::new();
        self.spawn_ice_poller(
            engine.clone(),
            peer_id.clone(),
            viewer_id.clone(),
            publisher_id,
            cancel.clone(),
        );

        let connection = ViewerConnection {
            peer_id,
            connected_at: now_ms,
            answer_received: false,
            cancel,
        };
        let replaced = {
            let mut inner = self.inner.lock().await;
            inner.registry.insert(&viewer_id, connection)
        };
        if let Some(replaced) = replaced {
            // Lost a race with a concurrent join for the same viewer.
            replaced.cancel_polling();
        }
        info!("Viewer {} joined", viewer_id);
    }

    /// First answer per viewer only; forward it to the engine.
    pub async fn handle_answer(&self, answer: AnswerMessage) {
        if !self.is_connected() {
            return;
        }
        let (latch, engine) = {
            let mut inner = self.inner.lock().await;
            if inner.publisher_id.as_deref() != Some(answer.to.as_str()) {
                debug!("answer addressed to {} dropped", answer.to);
                return;
            }
            (inner.registry.latch_answer(&answer.from), inner.engine.clone())
        };
        match latch {
            AnswerLatch::Unknown => {
                debug!("answer from unknown viewer {} dropped", answer.from);
            }
            AnswerLatch::AlreadyAnswered => {
                debug!("duplicate answer from {} discarded", answer.from);
            }
            AnswerLatch::First { peer_id } => {
                let Some(engine) = engine else { return };
                if let Err(e) = engine.set_answer(&peer_id, &answer.description).await {
                    warn!("setAnswer for {} failed: {}", answer.from, e);
                } else {
                    info!("Answer applied for viewer {}", answer.from);
                }
            }
        }
    }

    /// Forward a viewer's candidate to the engine.
    pub async fn handle_remote_ice(&self, message: CandidateMessage) {
        if !self.is_connected() {
            return;
        }
        let (peer_id, engine) = {
            let inner = self.inner.lock().await;
            // Our own published candidates echo back on the same topic.
            if inner.publisher_id.as_deref() == Some(message.from.as_str()) {
                return;
            }
            (inner.registry.peer_id(&message.from), inner.engine.clone())
        };
        let Some(peer_id) = peer_id else {
            debug!("candidate from unknown viewer {} dropped", message.from);
            return;
        };
        let Some(engine) = engine else { return };
        if let Err(e) = engine.add_ice_candidate(&peer_id, &message.candidate).await {
            debug!("addIceCandidate for {} failed: {}", message.from, e);
        }
    }

    /// Viewer leave: stop polling, hang up, drop the connection.
    pub async fn handle_leave(&self, leave: LeaveMessage) {
        let (removed, engine) = {
            let mut inner = self.inner.lock().await;
            (inner.registry.remove(&leave.from), inner.engine.clone())
        };
        let Some(removed) = removed else {
            debug!("leave from unknown viewer {} ignored", leave.from);
            return;
        };
        removed.cancel_polling();
        if let Some(engine) = engine {
            if let Err(e) = engine.hangup(&removed.peer_id).await {
                debug!("hangup {} failed: {}", removed.peer_id, e);
            }
        }
        info!(
            "Viewer {} left after {} ms",
            leave.from,
            vuwatch_shared::now_ms() - removed.connected_at
        );
    }

    /// Poll the engine for local candidates and publish each new one,
    /// de-duplicated, targeted at the viewer. Stops on cancel or the cap.
    fn spawn_ice_poller(
        &self,
        engine: MediaEngineClient,
        peer_id: String,
        viewer_id: String,
        publisher_id: String,
        cancel: CancellationToken,
    ) {
        let broker = Arc::clone(&self.broker);
        let ice_topic = self.broker.topics().webrtc_ice();
        tokio::spawn(async move {
            let mut sent: HashSet<String> = HashSet::new();
            let deadline = tokio::time::Instant::now() + ICE_POLL_CAP;
            let mut interval = tokio::time::interval(ICE_POLL_INTERVAL);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = interval.tick() => {
                        if tokio::time::Instant::now() >= deadline {
                            debug!("ICE polling cap reached for {}", viewer_id);
                            break;
                        }
                        let candidates = match engine.get_ice_candidates(&peer_id).await {
                            Ok(candidates) => candidates,
                            Err(e) => {
                                debug!("ICE poll for {} failed: {}", viewer_id, e);
                                continue;
                            }
                        };
                        for candidate in candidates {
                            if !sent.insert(candidate.dedup_key()) {
                                continue;
                            }
                            let message = CandidateMessage {
                                candidate,
                                to: viewer_id.clone(),
                                from: publisher_id.clone(),
                            };
                            broker
                                .publish_json(&ice_topic, &message, QoS::AtLeastOnce, false)
                                .await;
                        }
                    }
                }
            }
        });
    }
}

/// Offer fetch with bounded retry: 3 attempts, 2 s per attempt (enforced by
/// the engine client), 500 ms backoff.
async fn fetch_offer_with_retry(
    engine: &MediaEngineClient,
    peer_id: &str,
    capture_url: &str,
) -> Result<SessionDescription> {
    let mut last_error = None;
    for attempt in 1..=OFFER_ATTEMPTS {
        match engine.create_offer(peer_id, capture_url).await {
            Ok(offer) => return Ok(offer),
            Err(e) => {
                debug!("createOffer attempt {}/{} failed: {}", attempt, OFFER_ATTEMPTS, e);
                last_error = Some(e);
                if attempt < OFFER_ATTEMPTS {
                    tokio::time::sleep(OFFER_BACKOFF).await;
                }
            }
        }
    }
    Err(last_error.unwrap_or_else(|| anyhow::anyhow!("offer fetch failed")))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn connection(peer_id: &str) -> ViewerConnection {
        ViewerConnection {
            peer_id: peer_id.to_string(),
            connected_at: 0,
            answer_received: false,
            cancel: CancellationToken::new(),
        }
    }

    #[test]
    fn test_join_debounce() {
        let mut registry = ViewerRegistry::default();
        assert!(!registry.join_debounced("v1", 1_000));
        // Rapid re-join inside the window is ignored.
        assert!(registry.join_debounced("v1", 2_500));
        // Past the window it is accepted again.
        assert!(!registry.join_debounced("v1", 3_100));
        // Independent viewers do not interfere.
        assert!(!registry.join_debounced("v2", 2_500));
    }

    #[test]
    fn test_rejoin_supersedes() {
        let mut registry = ViewerRegistry::default();
        assert!(registry.insert("v1", connection("p1")).is_none());
        let previous = registry.insert("v1", connection("p2")).unwrap();
        assert_eq!(previous.peer_id, "p1");
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.peer_id("v1").unwrap(), "p2");
    }

    #[test]
    fn test_answer_latches_once() {
        let mut registry = ViewerRegistry::default();
        registry.insert("v1", connection("p1"));

        assert_eq!(
            registry.latch_answer("v1"),
            AnswerLatch::First { peer_id: "p1".to_string() }
        );
        // A second answer from the same viewer is discarded.
        assert_eq!(registry.latch_answer("v1"), AnswerLatch::AlreadyAnswered);
        // Unknown viewers are dropped.
        assert_eq!(registry.latch_answer("v9"), AnswerLatch::Unknown);
    }

    #[test]
    fn test_drain_returns_everything() {
        let mut registry = ViewerRegistry::default();
        registry.join_debounced("v1", 0);
        registry.insert("v1", connection("p1"));
        registry.insert("v2", connection("p2"));

        let drained = registry.drain();
        assert_eq!(drained.len(), 2);
        assert_eq!(registry.len(), 0);
        // The join stamps are gone too, so an immediate re-join is allowed.
        assert!(!registry.join_debounced("v1", 100));
    }

    #[test]
    fn test_remove_cancels_ownership() {
        let mut registry = ViewerRegistry::default();
        registry.insert("v1", connection("p1"));
        let removed = registry.remove("v1").unwrap();
        removed.cancel_polling();
        assert!(removed.cancel.is_cancelled());
        assert!(registry.remove("v1").is_none());
    }

    #[tokio::test]
    async fn test_cancel_stops_poll_loop() {
        // The polling select loop must observe cancellation promptly.
        let cancel = CancellationToken::new();
        let task_cancel = cancel.clone();
        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_millis(10));
            loop {
                tokio::select! {
                    _ = task_cancel.cancelled() => break,
                    _ = interval.tick() => {}
                }
            }
        });
        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("poll loop did not stop after cancel")
            .unwrap();
    }
}

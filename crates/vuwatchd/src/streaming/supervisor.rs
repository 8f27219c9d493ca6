//! Media-engine subprocess supervision.
//!
//! Owns the engine child process and the retained streaming status. Start
//! terminates any pre-existing instance, picks a free HTTP port from the
//! candidate list, spawns the engine, and polls its control API until it
//! answers (10 s cap). An exit watcher reverts the status to `stopped` when
//! the process dies underneath us.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use sysinfo::{ProcessesToUpdate, System};
use tokio::process::{Child, Command};
use tokio::sync::{Mutex, RwLock};
use tracing::{info, warn};

use vuwatch_shared::status::{StreamQuality, StreamStatus, StreamStatusPayload};

use crate::broker::BrokerClient;
use crate::config::StreamingConfig;

use super::engine::MediaEngineClient;

/// Cap on the post-spawn readiness poll.
const READY_TIMEOUT: Duration = Duration::from_secs(10);

/// Readiness poll cadence.
const READY_POLL: Duration = Duration::from_millis(250);

/// Settle time after terminating a pre-existing instance.
const PORT_RELEASE_PAUSE: Duration = Duration::from_millis(1_500);

/// Grace given to the child between terminate and forceful kill.
const STOP_GRACE: Duration = Duration::from_secs(5);

pub struct StreamSupervisor {
    config: StreamingConfig,
    state: Arc<RwLock<StreamStatusPayload>>,
    broker: Arc<BrokerClient>,
    child: Arc<Mutex<Option<Child>>>,
}

impl StreamSupervisor {
    pub fn new(
        config: StreamingConfig,
        state: Arc<RwLock<StreamStatusPayload>>,
        broker: Arc<BrokerClient>,
    ) -> Self {
        Self { config, state, broker, child: Arc::new(Mutex::new(None)) }
    }

    pub async fn status(&self) -> StreamStatusPayload {
        self.state.read().await.clone()
    }

    /// Engine control client for the currently running instance.
    pub async fn engine_client(&self) -> Option<MediaEngineClient> {
        let state = self.state.read().await;
        if state.status != StreamStatus::Running {
            return None;
        }
        state.port.and_then(|port| MediaEngineClient::new(port).ok())
    }

    /// Capture URL for the running monitor, including quality parameters.
    pub async fn capture_url(&self) -> String {
        let state = self.state.read().await;
        build_capture_url(state.monitor, state.quality.as_ref())
    }

    /// Start the engine. Idempotent in effect: a running instance is torn
    /// down first.
    pub async fn start(&self, monitor: u32, quality: StreamQuality) -> Result<StreamStatusPayload> {
        self.stop().await?;
        if kill_stray_engines(&self.config.engine_binary) > 0 {
            // Give the orphan time to release its listen ports.
            tokio::time::sleep(PORT_RELEASE_PAUSE).await;
        }

        let port = pick_port(&self.config.port_candidates)
            .context("no free port among the streaming candidates")?;

        self.transition(|state| {
            *state = StreamStatusPayload {
                status: StreamStatus::Starting,
                monitor,
                quality: Some(quality),
                ..Default::default()
            };
        })
        .await;

        let capture_url = build_capture_url(monitor, Some(&quality));
        let mut command = Command::new(&self.config.engine_binary);
        command
            .arg("-H")
            .arg(format!("0.0.0.0:{}", port))
            .arg("-s")
            .arg(&self.config.stun_server)
            .arg("-n")
            .arg(&self.config.stream_name)
            .arg("-u")
            .arg(&capture_url)
            .stdout(std::process::Stdio::null())
            .stderr(std::process::Stdio::null());
        if let Some(turn_bind) = &self.config.turn_bind {
            command.arg("-T").arg(turn_bind);
        }

        let child = match command.spawn() {
            Ok(child) => child,
            Err(e) => {
                self.transition(|state| {
                    state.status = StreamStatus::Error;
                    state.error = Some(format!("spawn failed: {}", e));
                })
                .await;
                return Err(e).context("failed to spawn media engine");
            }
        };
        let pid = child.id();
        *self.child.lock().await = Some(child);

        if let Err(e) = self.wait_ready(port).await {
            self.kill_child().await;
            self.transition(|state| {
                state.status = StreamStatus::Error;
                state.error = Some(e.to_string());
            })
            .await;
            return Err(e);
        }

        let status = self
            .transition(|state| {
                state.status = StreamStatus::Running;
                state.pid = pid;
                state.port = Some(port);
                state.started_at = Some(vuwatch_shared::now_ms());
                state.viewer_url = Some(format!("http://127.0.0.1:{}/", port));
                state.error = None;
                state.available = true;
            })
            .await;
        info!("Media engine running (pid {:?}, port {})", pid, port);

        self.spawn_exit_watcher(pid);
        Ok(status)
    }

    /// Stop the engine if running. Returns whether an instance was stopped.
    pub async fn stop(&self) -> Result<bool> {
        let had_child = {
            let guard = self.child.lock().await;
            guard.is_some()
        };
        if !had_child {
            return Ok(false);
        }
        self.kill_child().await;
        self.transition(|state| {
            *state = StreamStatusPayload::default();
        })
        .await;
        info!("Media engine stopped");
        Ok(true)
    }

    /// Quality change is a destructive restart: the engine re-encodes from
    /// scratch and viewers must rejoin.
    pub async fn restart_with_quality(&self, quality: StreamQuality) -> Result<StreamStatusPayload> {
        let monitor = self.state.read().await.monitor;
        self.start(monitor, quality).await
    }

    async fn kill_child(&self) {
        let child = self.child.lock().await.take();
        if let Some(mut child) = child {
            let _ = child.start_kill();
            match tokio::time::timeout(STOP_GRACE, child.wait()).await {
                Ok(_) => {}
                Err(_) => {
                    warn!("media engine ignored terminate, killing");
                    let _ = child.kill().await;
                }
            }
        }
    }

    async fn wait_ready(&self, port: u16) -> Result<()> {
        let client = MediaEngineClient::new(port)?;
        let deadline = tokio::time::Instant::now() + READY_TIMEOUT;
        loop {
            if client.media_list().await.is_ok() {
                return Ok(());
            }
            if tokio::time::Instant::now() >= deadline {
                bail!("media engine did not become ready within 10 s");
            }
            tokio::time::sleep(READY_POLL).await;
        }
    }

    /// Watch for the child exiting on its own and revert the status.
    fn spawn_exit_watcher(&self, pid: Option<u32>) {
        let child = Arc::clone(&self.child);
        let state = Arc::clone(&self.state);
        let broker = Arc::clone(&self.broker);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(1));
            loop {
                interval.tick().await;
                let mut guard = child.lock().await;
                let Some(current) = guard.as_mut() else {
                    // Stopped through the supervisor; nothing to watch.
                    return;
                };
                if current.id() != pid {
                    // A newer instance took over; this watcher is stale.
                    return;
                }
                match current.try_wait() {
                    Ok(Some(exit)) => {
                        warn!("media engine exited unexpectedly: {}", exit);
                        *guard = None;
                        drop(guard);
                        let payload = {
                            let mut state = state.write().await;
                            *state = StreamStatusPayload::default();
                            state.clone()
                        };
                        broker.publish_stream_status(&payload).await;
                        return;
                    }
                    Ok(None) => {}
                    Err(e) => {
                        warn!("media engine wait failed: {}", e);
                        return;
                    }
                }
            }
        });
    }

    /// Apply a state mutation and publish the retained streaming status.
    async fn transition<F: FnOnce(&mut StreamStatusPayload)>(&self, f: F) -> StreamStatusPayload {
        let payload = {
            let mut state = self.state.write().await;
            f(&mut state);
            state.clone()
        };
        self.broker.publish_stream_status(&payload).await;
        payload
    }
}

/// Resolve a free port by ephemeral listen attempts over the static list.
fn pick_port(candidates: &[u16]) -> Option<u16> {
    for port in candidates {
        if std::net::TcpListener::bind(("127.0.0.1", *port)).is_ok() {
            return Some(*port);
        }
    }
    None
}

/// Terminate stray engine instances left over from a previous run. Returns
/// the number of processes signalled.
fn kill_stray_engines(engine_binary: &str) -> usize {
    let binary_name = std::path::Path::new(engine_binary)
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| engine_binary.to_string());

    let mut system = System::new();
    system.refresh_processes(ProcessesToUpdate::All, true);
    let mut killed = 0;
    for process in system.processes().values() {
        if process.name().to_string_lossy() == binary_name && process.kill() {
            killed += 1;
        }
    }
    killed
}

/// Capture URL handed to the engine, carrying the quality parameters.
fn build_capture_url(monitor: u32, quality: Option<&StreamQuality>) -> String {
    match quality {
        Some(q) => format!(
            "screen://{}?width={}&height={}&fps={}&bitrate={}",
            monitor, q.width, q.height, q.fps, q.bitrate
        ),
        None => format!("screen://{}", monitor),
    }
}

//! Configuration for the watchdog daemon.
//!
//! Wall identity and service ports come from `/etc/vuwatch/config.toml`
//! (falling back to `./vuwatch.toml`, then defaults). Broker URLs and
//! credentials come from the process environment so secrets never live in
//! the config file.

use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use tracing::{info, warn};

/// Primary config file path.
pub const CONFIG_PATH: &str = "/etc/vuwatch/config.toml";

/// Fallback config file path for development setups.
pub const FALLBACK_CONFIG_PATH: &str = "./vuwatch.toml";

/// One message-broker endpoint. Exactly one broker is active at a time;
/// switching is an explicit operation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrokerConfig {
    pub id: String,
    pub label: String,
    pub url: String,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
}

/// Target application and supporting server settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Process name of the target display application.
    #[serde(default = "default_vuos_process")]
    pub vuos_process: String,

    /// Process name of the supporting local server.
    #[serde(default = "default_server_process")]
    pub server_process: String,

    /// Command line used to (re)start the target application.
    #[serde(default = "default_vuos_start_command")]
    pub vuos_start_command: Vec<String>,

    /// Server lock file (JSON with pid/startTime/lastHeartbeat).
    #[serde(default = "default_lock_file")]
    pub lock_file: String,

    /// Application error log to summarize.
    #[serde(default = "default_app_log")]
    pub log_file: String,

    /// Local server probe endpoint (peer list).
    #[serde(default = "default_local_server_url")]
    pub local_server_url: String,
}

fn default_vuos_process() -> String {
    "vuos".to_string()
}

fn default_server_process() -> String {
    "vu-server".to_string()
}

fn default_vuos_start_command() -> Vec<String> {
    vec!["/opt/vuos/bin/vuos".to_string()]
}

fn default_lock_file() -> String {
    "/var/run/vu-server/server.lock".to_string()
}

fn default_app_log() -> String {
    "/var/log/vuos/error.log".to_string()
}

fn default_local_server_url() -> String {
    "http://127.0.0.1:3200/api/peers".to_string()
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            vuos_process: default_vuos_process(),
            server_process: default_server_process(),
            vuos_start_command: default_vuos_start_command(),
            lock_file: default_lock_file(),
            log_file: default_app_log(),
            local_server_url: default_local_server_url(),
        }
    }
}

/// Media-engine (external WebRTC capture/encode server) settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamingConfig {
    /// Path to the media-engine binary.
    #[serde(default = "default_engine_binary")]
    pub engine_binary: String,

    /// Stream name announced by the engine.
    #[serde(default = "default_stream_name")]
    pub stream_name: String,

    /// STUN server passed to the engine.
    #[serde(default = "default_stun_server")]
    pub stun_server: String,

    /// Optional TURN listener bind passed to the engine.
    #[serde(default)]
    pub turn_bind: Option<String>,

    /// HTTP ports to try, in order.
    #[serde(default = "default_port_candidates")]
    pub port_candidates: Vec<u16>,
}

fn default_engine_binary() -> String {
    "/opt/vuwatch/webrtc-streamer".to_string()
}

fn default_stream_name() -> String {
    "wall".to_string()
}

fn default_stun_server() -> String {
    "stun.l.google.com:19302".to_string()
}

fn default_port_candidates() -> Vec<u16> {
    vec![8000, 8001, 8002, 8003, 8080, 8888]
}

impl Default for StreamingConfig {
    fn default() -> Self {
        Self {
            engine_binary: default_engine_binary(),
            stream_name: default_stream_name(),
            stun_server: default_stun_server(),
            turn_bind: None,
            port_candidates: default_port_candidates(),
        }
    }
}

/// Short-lived TURN credential providers, tried in order before falling back
/// to the public relay.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TurnConfig {
    #[serde(default)]
    pub primary_url: Option<String>,
    #[serde(default)]
    pub fallback_url: Option<String>,
}

/// Network probe endpoints.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkProbeConfig {
    /// Endpoint for the timed internet-reachability HEAD request.
    #[serde(default = "default_internet_probe_url")]
    pub internet_probe_url: String,
}

fn default_internet_probe_url() -> String {
    "http://connectivitycheck.gstatic.com/generate_204".to_string()
}

impl Default for NetworkProbeConfig {
    fn default() -> Self {
        Self { internet_probe_url: default_internet_probe_url() }
    }
}

/// Full daemon configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatchdogConfig {
    /// Display-endpoint identity; scopes every bus topic.
    #[serde(default)]
    pub wall_id: String,

    /// Local dashboard port, used only for the single-instance guard.
    #[serde(default = "default_dashboard_port")]
    pub dashboard_port: u16,

    #[serde(default)]
    pub app: AppConfig,

    #[serde(default)]
    pub streaming: StreamingConfig,

    #[serde(default)]
    pub turn: TurnConfig,

    #[serde(default)]
    pub network: NetworkProbeConfig,

    /// Populated from the environment at load time, never from the file.
    #[serde(skip)]
    pub brokers: Vec<BrokerConfig>,
}

fn default_dashboard_port() -> u16 {
    7700
}

impl Default for WatchdogConfig {
    fn default() -> Self {
        Self {
            wall_id: String::new(),
            dashboard_port: default_dashboard_port(),
            app: AppConfig::default(),
            streaming: StreamingConfig::default(),
            turn: TurnConfig::default(),
            network: NetworkProbeConfig::default(),
            brokers: Vec::new(),
        }
    }
}

impl WatchdogConfig {
    /// Load config from file (primary, then fallback, then defaults), apply
    /// environment overrides, and resolve the broker list. Fails when no
    /// wall id or no broker can be resolved.
    pub fn load() -> Result<Self> {
        let mut config = Self::load_from_path(CONFIG_PATH)
            .or_else(|_| Self::load_from_path(FALLBACK_CONFIG_PATH))
            .unwrap_or_else(|e| {
                warn!("Config file not found, using defaults: {}", e);
                Self::default()
            });

        if let Ok(wall_id) = std::env::var("VUWATCH_WALL_ID") {
            config.wall_id = wall_id;
        }
        config.brokers = brokers_from_env();
        config.validate()?;
        Ok(config)
    }

    fn load_from_path(path: &str) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)?;
        info!("Loaded config from {}", path);
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.wall_id.is_empty() {
            bail!("wall_id is required (config file or VUWATCH_WALL_ID)");
        }
        if self.brokers.is_empty() {
            bail!("no broker configured (set VUWATCH_BROKER_PRIMARY_URL)");
        }
        Ok(())
    }

    /// Look up a broker by id.
    pub fn broker(&self, id: &str) -> Option<&BrokerConfig> {
        self.brokers.iter().find(|b| b.id == id)
    }

    /// The retained config payload published on the config topic.
    pub fn public_payload(&self) -> serde_json::Value {
        serde_json::json!({
            "wallId": self.wall_id,
            "version": vuwatch_shared::VERSION,
            "brokers": self.brokers.iter().map(|b| serde_json::json!({
                "id": b.id,
                "label": b.label,
            })).collect::<Vec<_>>(),
            "streaming": {
                "streamName": self.streaming.stream_name,
                "ports": self.streaming.port_candidates,
            },
        })
    }
}

/// Resolve the two preconfigured brokers from the environment:
/// `VUWATCH_BROKER_PRIMARY_URL` / `_USERNAME` / `_PASSWORD`, and the same
/// with `BACKUP`. Absent entries are skipped.
fn brokers_from_env() -> Vec<BrokerConfig> {
    let mut brokers = Vec::new();
    for (id, label) in [("primary", "PRIMARY"), ("backup", "BACKUP")] {
        let url_var = format!("VUWATCH_BROKER_{}_URL", label);
        if let Ok(url) = std::env::var(&url_var) {
            brokers.push(BrokerConfig {
                id: id.to_string(),
                label: label.to_string(),
                url,
                username: std::env::var(format!("VUWATCH_BROKER_{}_USERNAME", label)).ok(),
                password: std::env::var(format!("VUWATCH_BROKER_{}_PASSWORD", label)).ok(),
            });
        }
    }
    brokers
}

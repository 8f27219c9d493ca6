//! Network collectors: internet reachability with latency, and the local
//! server probe (peer count plus server version).

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tracing::debug;

use vuwatch_shared::telemetry::NetworkTelemetry;

use crate::config::WatchdogConfig;

use super::{INTERNET_INTERVAL, LOCAL_SERVER_INTERVAL};

#[derive(Debug, Clone, Default)]
pub struct NetworkCache {
    pub internet: bool,
    pub latency_ms: Option<u64>,
    pub local_server: bool,
    pub peer_count: u32,
    pub server_version: Option<String>,
    pub probe_failures: u32,
}

impl NetworkCache {
    pub fn to_telemetry(&self) -> NetworkTelemetry {
        NetworkTelemetry {
            internet: self.internet,
            latency_ms: self.latency_ms,
            local_server: self.local_server,
            peer_count: self.peer_count,
        }
    }
}

pub fn spawn(cache: Arc<RwLock<NetworkCache>>, config: &WatchdogConfig) -> Vec<JoinHandle<()>> {
    vec![
        spawn_internet_loop(Arc::clone(&cache), config.network.internet_probe_url.clone()),
        spawn_local_server_loop(cache, config.app.local_server_url.clone()),
    ]
}

fn spawn_internet_loop(cache: Arc<RwLock<NetworkCache>>, probe_url: String) -> JoinHandle<()> {
    tokio::spawn(async move {
        let client = match reqwest::Client::builder()
            .timeout(Duration::from_secs(3))
            .build()
        {
            Ok(c) => c,
            Err(e) => {
                debug!("internet probe client build failed: {}", e);
                return;
            }
        };
        let mut interval = tokio::time::interval(INTERNET_INTERVAL);
        loop {
            interval.tick().await;
            let started = Instant::now();
            let reachable = client
                .head(&probe_url)
                .send()
                .await
                .map(|r| r.status().is_success() || r.status().is_redirection())
                .unwrap_or(false);
            let latency = started.elapsed().as_millis() as u64;

            let mut c = cache.write().await;
            c.internet = reachable;
            c.latency_ms = if reachable { Some(latency) } else { None };
        }
    })
}

fn spawn_local_server_loop(cache: Arc<RwLock<NetworkCache>>, server_url: String) -> JoinHandle<()> {
    tokio::spawn(async move {
        let client = match reqwest::Client::builder()
            .timeout(Duration::from_secs(2))
            .build()
        {
            Ok(c) => c,
            Err(e) => {
                debug!("local server probe client build failed: {}", e);
                return;
            }
        };
        let mut interval = tokio::time::interval(LOCAL_SERVER_INTERVAL);
        loop {
            interval.tick().await;
            let response = client.get(&server_url).send().await;
            match response {
                Ok(r) if r.status().is_success() => {
                    let body = r.json::<serde_json::Value>().await.ok();
                    let mut c = cache.write().await;
                    c.local_server = true;
                    if let Some(value) = body {
                        let (peers, version) = parse_peer_response(&value);
                        c.peer_count = peers;
                        if version.is_some() {
                            c.server_version = version;
                        }
                    }
                }
                _ => {
                    let mut c = cache.write().await;
                    c.local_server = false;
                    c.peer_count = 0;
                }
            }
        }
    })
}

/// The local server answers either a bare peer array or an object carrying
/// `peers` plus a `version` string.
fn parse_peer_response(value: &serde_json::Value) -> (u32, Option<String>) {
    if let Some(array) = value.as_array() {
        return (array.len() as u32, None);
    }
    let peers = value
        .get("peers")
        .and_then(|p| p.as_array())
        .map(|a| a.len() as u32)
        .unwrap_or(0);
    let version = value
        .get("version")
        .and_then(|v| v.as_str())
        .map(String::from);
    (peers, version)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_bare_array() {
        let value = serde_json::json!(["peer-a", "peer-b", "peer-c"]);
        assert_eq!(parse_peer_response(&value), (3, None));
    }

    #[test]
    fn test_parse_object_with_version() {
        let value = serde_json::json!({"version": "2.4.1", "peers": [{"id": 1}]});
        let (peers, version) = parse_peer_response(&value);
        assert_eq!(peers, 1);
        assert_eq!(version.as_deref(), Some("2.4.1"));
    }

    #[test]
    fn test_parse_empty_object() {
        let value = serde_json::json!({});
        assert_eq!(parse_peer_response(&value), (0, None));
    }
}

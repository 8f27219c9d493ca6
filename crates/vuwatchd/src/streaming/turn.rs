//! Short-lived TURN credential discovery.
//!
//! The bridge asks a primary and then a fallback provider before publishing
//! the ready announcement; on all failures the public relay is used so
//! viewers always get a usable ICE configuration.

use std::time::Duration;

use anyhow::{bail, Result};
use tracing::{debug, info};

use vuwatch_shared::webrtc::IceServer;

use crate::config::TurnConfig;

/// Public relay fallback.
pub const PUBLIC_STUN: &str = "stun:stun.l.google.com:19302";

/// Per-provider fetch deadline.
const FETCH_TIMEOUT: Duration = Duration::from_secs(5);

/// Resolve the ICE server list embedded in the retained ready message.
pub async fn discover_ice_servers(config: &TurnConfig) -> Vec<IceServer> {
    let client = match reqwest::Client::builder().timeout(FETCH_TIMEOUT).build() {
        Ok(client) => client,
        Err(_) => return vec![IceServer::stun(PUBLIC_STUN)],
    };

    for url in [&config.primary_url, &config.fallback_url].into_iter().flatten() {
        match fetch_provider(&client, url).await {
            Ok(servers) if !servers.is_empty() => {
                info!("TURN credentials fetched from {}", url);
                return servers;
            }
            Ok(_) => debug!("TURN provider {} returned no servers", url),
            Err(e) => debug!("TURN provider {} failed: {}", url, e),
        }
    }

    vec![IceServer::stun(PUBLIC_STUN)]
}

async fn fetch_provider(client: &reqwest::Client, url: &str) -> Result<Vec<IceServer>> {
    let response = client.get(url).send().await?;
    if !response.status().is_success() {
        bail!("provider returned {}", response.status());
    }
    let value: serde_json::Value = response.json().await?;
    Ok(parse_ice_response(&value))
}

/// Providers answer `{"iceServers": [...]}` or a bare server array.
fn parse_ice_response(value: &serde_json::Value) -> Vec<IceServer> {
    let list = value
        .get("iceServers")
        .and_then(|v| v.as_array())
        .or_else(|| value.as_array());
    let Some(list) = list else {
        return Vec::new();
    };
    list.iter()
        .filter_map(|item| serde_json::from_value(item.clone()).ok())
        .collect()
}

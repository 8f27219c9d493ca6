//! HTTP client for the external media engine's control API.
//!
//! The engine is a prebuilt WebRTC capture/encode server; this client only
//! consumes its surface. Every call carries an explicit deadline.

use std::time::Duration;

use anyhow::{bail, Context, Result};

use vuwatch_shared::webrtc::{IceCandidate, SessionDescription};

/// Deadline for offer creation (per attempt; the bridge retries).
const OFFER_TIMEOUT: Duration = Duration::from_secs(2);

/// Deadline for the remaining control calls.
const CONTROL_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone)]
pub struct MediaEngineClient {
    base: String,
    http: reqwest::Client,
}

impl MediaEngineClient {
    pub fn new(port: u16) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(CONTROL_TIMEOUT)
            .build()
            .context("media engine http client")?;
        Ok(Self { base: format!("http://127.0.0.1:{}", port), http })
    }

    /// Readiness probe; the engine answers its media list once it is up.
    pub async fn media_list(&self) -> Result<serde_json::Value> {
        let response = self
            .http
            .get(format!("{}/api/getMediaList", self.base))
            .send()
            .await?;
        if !response.status().is_success() {
            bail!("getMediaList returned {}", response.status());
        }
        Ok(response.json().await?)
    }

    /// Ask the engine for an SDP offer for one peer session.
    pub async fn create_offer(&self, peer_id: &str, url: &str) -> Result<SessionDescription> {
        let response = self
            .http
            .get(format!("{}/api/createOffer", self.base))
            .query(&[("peerid", peer_id), ("url", url)])
            .timeout(OFFER_TIMEOUT)
            .send()
            .await?;
        if !response.status().is_success() {
            bail!("createOffer returned {}", response.status());
        }
        let description: SessionDescription = response.json().await?;
        if description.sdp.is_empty() {
            bail!("createOffer returned an empty SDP");
        }
        Ok(description)
    }

    /// Forward a viewer's SDP answer.
    pub async fn set_answer(&self, peer_id: &str, description: &SessionDescription) -> Result<()> {
        let response = self
            .http
            .post(format!("{}/api/setAnswer", self.base))
            .query(&[("peerid", peer_id)])
            .json(description)
            .send()
            .await?;
        if !response.status().is_success() {
            bail!("setAnswer returned {}", response.status());
        }
        Ok(())
    }

    /// Fetch the engine's pending local ICE candidates for a peer.
    pub async fn get_ice_candidates(&self, peer_id: &str) -> Result<Vec<IceCandidate>> {
        let response = self
            .http
            .get(format!("{}/api/getIceCandidate", self.base))
            .query(&[("peerid", peer_id)])
            .send()
            .await?;
        if !response.status().is_success() {
            bail!("getIceCandidate returned {}", response.status());
        }
        let value: serde_json::Value = response.json().await?;
        Ok(parse_candidates(value))
    }

    /// Forward a viewer's remote ICE candidate to the engine.
    pub async fn add_ice_candidate(&self, peer_id: &str, candidate: &IceCandidate) -> Result<()> {
        let response = self
            .http
            .post(format!("{}/api/addIceCandidate", self.base))
            .query(&[("peerid", peer_id)])
            .json(candidate)
            .send()
            .await?;
        if !response.status().is_success() {
            bail!("addIceCandidate returned {}", response.status());
        }
        Ok(())
    }

    /// Tear down one peer session.
    pub async fn hangup(&self, peer_id: &str) -> Result<()> {
        let response = self
            .http
            .post(format!("{}/api/hangup", self.base))
            .query(&[("peerid", peer_id)])
            .send()
            .await?;
        if !response.status().is_success() {
            bail!("hangup returned {}", response.status());
        }
        Ok(())
    }
}

/// The engine answers either a bare candidate array or a single object.
fn parse_candidates(value: serde_json::Value) -> Vec<IceCandidate> {
    match value {
        serde_json::Value::Array(items) => items
            .into_iter()
            .filter_map(|item| serde_json::from_value(item).ok())
            .collect(),
        object @ serde_json::Value::Object(_) => serde_json::from_value(object)
            .map(|c| vec![c])
            .unwrap_or_default(),
        _ => Vec::new(),
    }
}

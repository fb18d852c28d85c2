// Peer control HTTP client
//
// Wraps `reqwest::Client` with the handful of GET endpoints a sibling
// tally light exposes. Every call is bounded by the transport timeout;
// a request that exceeds it surfaces as `Error::Timeout` and is abandoned.

use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use serde::de::DeserializeOwned;
use tracing::debug;
use url::Url;

use super::models::{
    DiscoResponse, DiscoverResponse, FanOutResponse, StatusResponse, TestResponse,
    clamp_disco_duration,
};
use crate::error::Error;
use crate::transport::TransportConfig;
use crate::tsl::TallyState;

/// Longest response body echoed back inside an error.
const ERROR_BODY_LIMIT: usize = 256;

/// HTTP client for a sibling's control surface.
///
/// Cheap to clone. One client serves every peer; each call takes the
/// peer's base URL.
#[derive(Debug, Clone)]
pub struct PeerClient {
    http: reqwest::Client,
    timeout: Duration,
}

impl PeerClient {
    pub fn new(transport: &TransportConfig) -> Result<Self, Error> {
        Ok(Self {
            http: transport.build_client()?,
            timeout: transport.timeout,
        })
    }

    /// Create a client around a pre-built `reqwest::Client`.
    pub fn with_client(http: reqwest::Client, timeout: Duration) -> Self {
        Self { http, timeout }
    }

    /// Base URL for a peer at `ip:port`.
    pub fn base_url(ip: IpAddr, port: u16) -> Result<Url, Error> {
        Ok(Url::parse(&format!("http://{}/", SocketAddr::new(ip, port)))?)
    }

    // ── Endpoints ────────────────────────────────────────────────────

    pub async fn status(&self, base: &Url) -> Result<StatusResponse, Error> {
        self.get(base.join("status")?).await
    }

    pub async fn set_test_state(
        &self,
        base: &Url,
        state: TallyState,
    ) -> Result<TestResponse, Error> {
        let mut url = base.join("test")?;
        url.query_pairs_mut()
            .append_pair("state", &state.code().to_string());
        self.get(url).await
    }

    pub async fn start_disco(&self, base: &Url, duration_secs: u64) -> Result<DiscoResponse, Error> {
        let mut url = base.join("disco")?;
        url.query_pairs_mut().append_pair(
            "duration",
            &clamp_disco_duration(duration_secs).to_string(),
        );
        self.get(url).await
    }

    pub async fn stop_disco(&self, base: &Url) -> Result<DiscoResponse, Error> {
        self.get(base.join("disco-stop")?).await
    }

    /// Ask a peer to run its own scan and return what it found.
    pub async fn discover(&self, base: &Url) -> Result<DiscoverResponse, Error> {
        self.get(base.join("discover")?).await
    }

    /// The device's cached peer list, without a new scan.
    pub async fn peers(&self, base: &Url) -> Result<DiscoverResponse, Error> {
        self.get(base.join("peers")?).await
    }

    // ── Operator fan-out ─────────────────────────────────────────────

    /// Have the device set a test state on itself and all its peers.
    pub async fn test_all(&self, base: &Url, state: TallyState) -> Result<FanOutResponse, Error> {
        let mut url = base.join("test-all")?;
        url.query_pairs_mut()
            .append_pair("state", &state.code().to_string());
        self.get(url).await
    }

    pub async fn disco_all(&self, base: &Url, duration_secs: u64) -> Result<FanOutResponse, Error> {
        let mut url = base.join("disco-all")?;
        url.query_pairs_mut().append_pair(
            "duration",
            &clamp_disco_duration(duration_secs).to_string(),
        );
        self.get(url).await
    }

    pub async fn disco_stop_all(&self, base: &Url) -> Result<FanOutResponse, Error> {
        self.get(base.join("disco-stop-all")?).await
    }

    // ── Request helpers ──────────────────────────────────────────────

    async fn get<T: DeserializeOwned>(&self, url: Url) -> Result<T, Error> {
        debug!("GET {}", url);

        let resp = self.http.get(url).send().await.map_err(|e| {
            if e.is_timeout() {
                Error::Timeout {
                    timeout_secs: self.timeout.as_secs(),
                }
            } else {
                Error::Transport(e)
            }
        })?;

        let status = resp.status();
        let body = resp.text().await.map_err(Error::Transport)?;

        if !status.is_success() {
            return Err(Error::PeerRejected {
                status: status.as_u16(),
                message: truncate(&body),
            });
        }

        serde_json::from_str(&body).map_err(|e| Error::Deserialization {
            message: e.to_string(),
            body: truncate(&body),
        })
    }
}

fn truncate(body: &str) -> String {
    body.chars().take(ERROR_BODY_LIMIT).collect()
}

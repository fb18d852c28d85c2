// ── Peer domain types ──

use std::net::IpAddr;

use chrono::{DateTime, Utc};
use serde::Serialize;

use tally_api::PeerSummary;

/// A sibling tally light found through service discovery.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PeerDevice {
    pub hostname: String,
    pub ip: IpAddr,
    /// Port of the peer's control surface.
    pub port: u16,
    /// Advertised TSL address, when the peer publishes one.
    pub tsl_address: Option<u8>,
    pub last_seen: DateTime<Utc>,
}

impl From<&PeerDevice> for PeerSummary {
    fn from(peer: &PeerDevice) -> Self {
        Self {
            hostname: peer.hostname.clone(),
            ip: peer.ip.to_string(),
            tsl_address: peer.tsl_address,
        }
    }
}

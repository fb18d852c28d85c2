// ── Peer control payloads ──
//
// Shared by the client and the daemon's HTTP handlers so both ends of the
// wire agree on field names. Optional fields default so older peers that
// omit them still parse.

use serde::{Deserialize, Serialize};

/// Shortest disco session a peer accepts.
pub const DISCO_MIN_SECS: u64 = 1;

/// Longest disco session a peer accepts.
pub const DISCO_MAX_SECS: u64 = 60;

/// Clamp a requested disco duration into the accepted range.
pub fn clamp_disco_duration(secs: u64) -> u64 {
    secs.clamp(DISCO_MIN_SECS, DISCO_MAX_SECS)
}

/// `GET /status`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusResponse {
    /// Tally state name, e.g. `"Program"`.
    pub tally: String,
    /// Current display label (empty when none received yet).
    pub text: String,
    /// Active address of the device.
    pub ip: String,
    /// Connection summary, e.g. `"Ethernet + WiFi"`.
    pub connection: String,
    #[serde(default)]
    pub brightness: u8,
    #[serde(default)]
    pub tsl_address: Option<u8>,
    #[serde(default)]
    pub hostname: String,
    #[serde(default)]
    pub disco: bool,
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub packets: PacketCounters,
}

/// TSL listener counters since boot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PacketCounters {
    pub received: u64,
    pub applied: u64,
    pub ignored: u64,
    pub malformed: u64,
}

/// `GET /test?state=N`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestResponse {
    pub tally: String,
    #[serde(default)]
    pub state: Option<u8>,
}

/// `GET /disco?duration=N` and `GET /disco-stop`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscoResponse {
    pub active: bool,
    #[serde(default)]
    pub remaining_secs: u64,
}

/// One sibling as reported by `GET /discover`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerSummary {
    pub hostname: String,
    pub ip: String,
    #[serde(default)]
    pub tsl_address: Option<u8>,
}

/// `GET /discover` and `GET /peers`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscoverResponse {
    pub peers: Vec<PeerSummary>,
}

/// `GET /test-all`, `/disco-all` and `/disco-stop-all`
///
/// Aggregate only: which peers failed is logged on the device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FanOutResponse {
    pub command: String,
    pub attempted: usize,
    pub succeeded: usize,
}

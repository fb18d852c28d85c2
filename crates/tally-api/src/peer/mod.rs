// Peer control surface: the small HTTP API every tally light exposes to
// its siblings, plus the client used to drive it.

mod client;
mod models;

pub use client::PeerClient;
pub use models::{
    DISCO_MAX_SECS, DISCO_MIN_SECS, DiscoResponse, DiscoverResponse, FanOutResponse,
    PacketCounters, PeerSummary, StatusResponse, TestResponse, clamp_disco_duration,
};

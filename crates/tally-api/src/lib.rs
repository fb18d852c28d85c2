// tally-api: wire formats and the peer control client for TSL tally lights.

pub mod dns;
pub mod error;
pub mod peer;
pub mod transport;
pub mod tsl;

pub use error::Error;
pub use peer::{
    DiscoResponse, DiscoverResponse, FanOutResponse, PacketCounters, PeerClient, PeerSummary,
    StatusResponse, TestResponse,
};
pub use transport::TransportConfig;
pub use tsl::{DecodeError, Label, TallyCommand, TallyState};

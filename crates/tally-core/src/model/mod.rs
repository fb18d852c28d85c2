// ── Domain model ──
//
// Canonical types shared by the listener, the connectivity manager,
// the peer directory and whatever renders status for an operator.

pub mod color;
pub mod network;
pub mod peer;
pub mod tally;

// ── Re-exports ──────────────────────────────────────────────────────

pub use tally_api::{Label, TallyCommand, TallyState};

pub use color::Rgb;
pub use network::{AccessPointInfo, ConnectivityState, ConnectivitySummary, Interface};
pub use peer::PeerDevice;
pub use tally::{DiscoSession, TallySnapshot, TallySource};

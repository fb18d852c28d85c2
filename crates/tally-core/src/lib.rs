//! Device logic for a networked TSL tally light.
//!
//! This crate owns everything between the wire formats in `tally-api`
//! and the daemon binary:
//!
//! - **[`Appliance`]**: Central facade. [`start()`](Appliance::start)
//!   arbitrates a network path (wired, then wireless, then a local access
//!   point), then keeps the TSL listener and the mDNS record in step with
//!   connectivity and refreshes the peer directory in the background.
//!
//! - **[`DeviceState`]**: `watch`-channel store for the tally snapshot,
//!   the connectivity summary and the disco session. Written from the
//!   listener thread and the control plane; readers get whole snapshots.
//!
//! - **[`TallyListener`]**: Receives TSL datagrams on its own OS thread
//!   so that control-plane work can never delay decoding.
//!
//! - **[`PeerDirectory`]** / **[`BroadcastCoordinator`]**: Bounded list of
//!   sibling devices found over DNS-SD, and best-effort fan-out of test,
//!   disco and disco-stop commands to all of them.
//!
//! - **[`Renderer`]**: Maps state onto an [`Indicator`] sink: palette
//!   colors for tally states, disco frames, and boot status patterns.

pub mod appliance;
pub mod broadcast;
pub mod config;
pub mod connectivity;
pub mod control;
pub mod disco;
pub mod error;
pub mod indicator;
pub mod listener;
pub mod model;
pub mod peers;
pub mod state;

// ── Primary re-exports ──────────────────────────────────────────────
pub use appliance::{Appliance, Platform};
pub use broadcast::{BroadcastCoordinator, FanOutReport};
pub use config::{
    AccessPointConfig, Addressing, ApplianceConfig, ConnectivityConfig, DiscoveryConfig,
    ListenerConfig, Palette, StaticAddressing, StationConfig, WiredConfig,
};
pub use connectivity::{
    CaptivePortal, ConnectivityManager, LinkEvent, LinkEventKind, NetworkDriver,
};
pub use control::{ControlCommand, LocalControl};
pub use disco::DiscoController;
pub use error::CoreError;
pub use indicator::{Indicator, Renderer};
pub use listener::{ListenerCounters, ListenerHandle, TallyListener};
pub use peers::{DiscoveredService, DiscoveryProvider, MdnsAdvertiser, MdnsDiscovery, PeerDirectory};
pub use state::DeviceState;

pub use model::{
    AccessPointInfo, ConnectivityState, ConnectivitySummary, DiscoSession, Interface, Label,
    PeerDevice, Rgb, TallyCommand, TallySnapshot, TallySource, TallyState,
};

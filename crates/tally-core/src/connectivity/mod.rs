// ── Connectivity ──
//
// Interface arbitration between wired, wireless client and a local
// access point, plus the captive portal policy that applies while the
// access point is the only path.

mod driver;
mod manager;
pub mod portal;

pub use driver::{LinkEvent, LinkEventKind, NetworkDriver, access_point_ssid};
pub use manager::ConnectivityManager;
pub use portal::CaptivePortal;

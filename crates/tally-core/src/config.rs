// ── Runtime appliance configuration ──
//
// These types describe how the appliance should behave once running.
// They never touch disk: the daemon builds an `ApplianceConfig` from the
// persisted settings and hands it in.

use std::net::Ipv4Addr;
use std::time::Duration;

use secrecy::SecretString;
use serde::{Deserialize, Serialize};

use crate::model::{Rgb, TallyState};

pub const DEFAULT_TSL_PORT: u16 = 8901;
pub const DEFAULT_MULTICAST_GROUP: Ipv4Addr = Ipv4Addr::new(239, 1, 2, 3);
pub const DEFAULT_MAX_BRIGHTNESS: u8 = 50;
pub const DEFAULT_HTTP_PORT: u16 = 80;
pub const SERVICE_TYPE: &str = "_tsl-tally._tcp.local.";
pub const PEER_CAPACITY: usize = 16;

// ── Tally feed ───────────────────────────────────────────────────────

/// How the TSL listener binds and filters.
#[derive(Debug, Clone)]
pub struct ListenerConfig {
    /// This device's TSL address, `0..=126`.
    pub address: u8,
    /// Multicast group to join. A non-multicast address makes the
    /// listener bind to it directly as a unicast receiver.
    pub group: Ipv4Addr,
    pub port: u16,
    /// Local interface for the multicast join; unspecified lets the OS pick.
    pub interface: Ipv4Addr,
    /// Full-scale brightness that level 3 maps to.
    pub max_brightness: u8,
    /// Upper bound on how long a stop request can go unnoticed.
    pub poll_interval: Duration,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            address: 0,
            group: DEFAULT_MULTICAST_GROUP,
            port: DEFAULT_TSL_PORT,
            interface: Ipv4Addr::UNSPECIFIED,
            max_brightness: DEFAULT_MAX_BRIGHTNESS,
            poll_interval: Duration::from_millis(50),
        }
    }
}

// ── Network arbitration ──────────────────────────────────────────────

/// Static IPv4 settings for the wired interface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StaticAddressing {
    pub ip: Ipv4Addr,
    pub gateway: Ipv4Addr,
    pub subnet: Ipv4Addr,
    pub dns: Ipv4Addr,
}

impl StaticAddressing {
    /// Prefix length of the subnet mask (`255.255.255.0` -> 24).
    pub fn prefix_len(&self) -> u32 {
        u32::from(self.subnet).leading_ones()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Addressing {
    #[default]
    Dhcp,
    Static(StaticAddressing),
}

#[derive(Debug, Clone, Default)]
pub struct WiredConfig {
    /// OS interface name; `None` lets the driver choose.
    pub interface: Option<String>,
    pub addressing: Addressing,
}

/// Wireless client credentials.
#[derive(Debug, Clone)]
pub struct StationConfig {
    pub ssid: String,
    pub password: SecretString,
}

#[derive(Debug, Clone)]
pub struct AccessPointConfig {
    /// The SSID is `{prefix}-XXXXXX` with the last three hardware id bytes.
    pub ssid_prefix: String,
    pub password: SecretString,
}

impl Default for AccessPointConfig {
    fn default() -> Self {
        Self {
            ssid_prefix: "TSL-Tally".into(),
            password: SecretString::from("tallytally".to_string()),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ConnectivityConfig {
    pub hostname: String,
    pub wired: WiredConfig,
    /// `None` when wireless is disabled or has no SSID.
    pub station: Option<StationConfig>,
    pub access_point: AccessPointConfig,
    pub wired_timeout: Duration,
    pub station_timeout: Duration,
    pub access_point_timeout: Duration,
    /// How long every path may stay down before arbitration runs again.
    pub rearbitrate_after: Duration,
}

impl Default for ConnectivityConfig {
    fn default() -> Self {
        Self {
            hostname: "ESP-TSL-Tally".into(),
            wired: WiredConfig::default(),
            station: None,
            access_point: AccessPointConfig::default(),
            wired_timeout: Duration::from_secs(10),
            station_timeout: Duration::from_secs(10),
            access_point_timeout: Duration::from_secs(10),
            rearbitrate_after: Duration::from_secs(15),
        }
    }
}

// ── Peers ────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct DiscoveryConfig {
    pub service_type: String,
    /// Port peers serve their control surface on. Advertised in our own
    /// record and used for every relayed command.
    pub http_port: u16,
    pub capacity: usize,
    /// How long one mDNS browse collects answers.
    pub browse_timeout: Duration,
    /// Minimum age of the directory before an on-demand scan runs again.
    pub on_demand_interval: Duration,
    /// Background scan period; zero disables it.
    pub background_interval: Duration,
    /// Bound on every relayed peer command.
    pub peer_timeout: Duration,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            service_type: SERVICE_TYPE.into(),
            http_port: DEFAULT_HTTP_PORT,
            capacity: PEER_CAPACITY,
            browse_timeout: Duration::from_secs(3),
            on_demand_interval: Duration::from_secs(10),
            background_interval: Duration::from_secs(60),
            peer_timeout: Duration::from_secs(5),
        }
    }
}

// ── Rendering ────────────────────────────────────────────────────────

/// Indicator color for each tally state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Palette {
    pub off: Rgb,
    pub program: Rgb,
    pub preview: Rgb,
    pub unselected: Rgb,
}

impl Default for Palette {
    fn default() -> Self {
        Self {
            off: Rgb::BLACK,
            program: Rgb::GREEN,
            preview: Rgb::RED,
            unselected: Rgb::YELLOW,
        }
    }
}

impl Palette {
    pub fn color(&self, state: TallyState) -> Rgb {
        match state {
            TallyState::Off => self.off,
            TallyState::Program => self.program,
            TallyState::Preview => self.preview,
            TallyState::Unselected => self.unselected,
        }
    }
}

// ── Appliance ────────────────────────────────────────────────────────

/// Everything the appliance needs at boot.
#[derive(Debug, Clone, Default)]
pub struct ApplianceConfig {
    pub listener: ListenerConfig,
    pub connectivity: ConnectivityConfig,
    pub discovery: DiscoveryConfig,
    pub palette: Palette,
}

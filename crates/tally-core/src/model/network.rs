// ── Network domain types ──

use std::net::Ipv4Addr;

use serde::Serialize;
use strum::{Display, IntoStaticStr};

/// A network path the appliance can use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Display, IntoStaticStr)]
pub enum Interface {
    #[strum(serialize = "Ethernet")]
    Wired,
    #[strum(serialize = "WiFi")]
    Wireless,
    #[strum(serialize = "AP")]
    AccessPoint,
}

/// Authoritative networking state.
///
/// Wired and wireless may both be up at once; this reports the one that
/// wins for "active network" purposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Display)]
pub enum ConnectivityState {
    Unconfigured,
    WiredUp,
    WirelessUp,
    AccessPointUp,
    Disconnected,
}

/// The locally hosted access point.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AccessPointInfo {
    pub ssid: String,
    pub address: Ipv4Addr,
}

/// Per-interface view of the network, as published by the
/// connectivity manager.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ConnectivitySummary {
    /// Set once the boot-time arbitration has finished.
    pub configured: bool,
    pub wired: Option<Ipv4Addr>,
    pub wireless: Option<Ipv4Addr>,
    pub access_point: Option<AccessPointInfo>,
}

impl ConnectivitySummary {
    pub fn state(&self) -> ConnectivityState {
        if self.wired.is_some() {
            ConnectivityState::WiredUp
        } else if self.wireless.is_some() {
            ConnectivityState::WirelessUp
        } else if self.access_point.is_some() {
            ConnectivityState::AccessPointUp
        } else if self.configured {
            ConnectivityState::Disconnected
        } else {
            ConnectivityState::Unconfigured
        }
    }

    /// Address of an interface, if it currently holds one.
    pub fn address(&self, interface: Interface) -> Option<Ipv4Addr> {
        match interface {
            Interface::Wired => self.wired,
            Interface::Wireless => self.wireless,
            Interface::AccessPoint => self.access_point.as_ref().map(|ap| ap.address),
        }
    }

    /// Wired first, then wireless, then the access point, else `0.0.0.0`.
    pub fn active_ip(&self) -> Ipv4Addr {
        self.wired
            .or(self.wireless)
            .or(self.access_point.as_ref().map(|ap| ap.address))
            .unwrap_or(Ipv4Addr::UNSPECIFIED)
    }

    /// Whether a client network (wired or wireless) is available. The tally
    /// feed is only received over one of these.
    pub fn has_uplink(&self) -> bool {
        self.wired.is_some() || self.wireless.is_some()
    }

    /// Whether any path is up, the access point included.
    pub fn is_reachable(&self) -> bool {
        self.has_uplink() || self.access_point.is_some()
    }

    /// The access point address, only while the device is acting as one.
    pub fn captive_address(&self) -> Option<Ipv4Addr> {
        self.access_point.as_ref().map(|ap| ap.address)
    }

    /// Human-readable summary, e.g. `Ethernet + WiFi` or `Disconnected`.
    pub fn label(&self) -> String {
        let parts: Vec<&'static str> = [
            (self.wired.is_some(), Interface::Wired),
            (self.wireless.is_some(), Interface::Wireless),
            (self.access_point.is_some(), Interface::AccessPoint),
        ]
        .into_iter()
        .filter(|(up, _)| *up)
        .map(|(_, interface)| interface.into())
        .collect();

        if parts.is_empty() {
            "Disconnected".into()
        } else {
            parts.join(" + ")
        }
    }
}

// ── Network driver seam ──
//
// The platform side of arbitration. Driver calls only kick off an
// operation; progress is reported back as `LinkEvent`s on the channel the
// driver was built with.

use std::net::Ipv4Addr;

use secrecy::SecretString;

use crate::config::{StationConfig, WiredConfig};
use crate::error::CoreError;
use crate::model::Interface;

/// Adapter event delivered to the connectivity manager.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkEvent {
    pub interface: Interface,
    pub kind: LinkEventKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkEventKind {
    LinkUp,
    LinkDown,
    GotAddress(Ipv4Addr),
    LostAddress,
    ApStarted(Ipv4Addr),
    ApStopped,
}

impl LinkEvent {
    pub fn new(interface: Interface, kind: LinkEventKind) -> Self {
        Self { interface, kind }
    }
}

/// Controls the host's network adapters.
///
/// Methods must return quickly; anything slow (DHCP, association) runs
/// in the background and finishes with a [`LinkEvent`].
pub trait NetworkDriver: Send + Sync {
    /// Stable hardware identity, typically the primary MAC address.
    fn hardware_id(&self) -> [u8; 6];

    fn start_wired(&self, config: &WiredConfig, hostname: &str) -> Result<(), CoreError>;
    fn stop_wired(&self);

    fn start_station(&self, config: &StationConfig, hostname: &str) -> Result<(), CoreError>;
    fn stop_station(&self);

    fn start_access_point(&self, ssid: &str, password: &SecretString) -> Result<(), CoreError>;
    fn stop_access_point(&self);
}

/// Access point name for a device: `{prefix}-XXXXXX` from the last three
/// bytes of its hardware id. Stable across reboots and distinct per device.
pub fn access_point_ssid(prefix: &str, hardware_id: [u8; 6]) -> String {
    let [.., a, b, c] = hardware_id;
    format!("{prefix}-{a:02X}{b:02X}{c:02X}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ssid_uses_last_three_bytes() {
        let ssid = access_point_ssid("TSL-Tally", [0x24, 0x0a, 0xc4, 0x1b, 0x2c, 0x3d]);
        assert_eq!(ssid, "TSL-Tally-1B2C3D");
    }

    #[test]
    fn ssid_differs_between_devices() {
        let a = access_point_ssid("TSL-Tally", [0, 0, 0, 0, 0, 1]);
        let b = access_point_ssid("TSL-Tally", [0, 0, 0, 0, 0, 2]);
        assert_ne!(a, b);
    }
}

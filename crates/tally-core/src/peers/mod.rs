// ── Peer discovery ──
//
// Sibling tally lights advertise a DNS-SD service. The directory keeps a
// bounded list of them, rebuilt in full on every scan.

mod directory;
mod mdns;

use std::net::IpAddr;
use std::time::Duration;

use crate::error::CoreError;

pub use directory::PeerDirectory;
pub use mdns::{MdnsAdvertiser, MdnsDiscovery};

/// One resolved service record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredService {
    pub instance: String,
    pub hostname: String,
    pub addresses: Vec<IpAddr>,
    pub port: u16,
    /// Value of the `tsl` TXT property, when present and valid.
    pub tsl_address: Option<u8>,
    pub version: Option<String>,
}

/// A blocking service-discovery backend.
///
/// `browse` collects answers for at most `timeout` and returns them in
/// the order they were resolved. Called from a blocking task.
pub trait DiscoveryProvider: Send + Sync {
    fn browse(
        &self,
        service_type: &str,
        timeout: Duration,
    ) -> Result<Vec<DiscoveredService>, CoreError>;
}

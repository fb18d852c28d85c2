// ── mDNS backend ──

use std::net::Ipv4Addr;
use std::time::{Duration, Instant};

use mdns_sd::{ServiceDaemon, ServiceEvent, ServiceInfo};
use tracing::{debug, info, trace};

use super::{DiscoveredService, DiscoveryProvider};
use crate::error::CoreError;

/// TXT keys published by every device.
pub const TXT_TSL_ADDRESS: &str = "tsl";
pub const TXT_VERSION: &str = "version";
pub const TXT_HOSTNAME: &str = "hostname";

/// Browses for sibling devices with an `mdns-sd` daemon.
#[derive(Clone)]
pub struct MdnsDiscovery {
    daemon: ServiceDaemon,
}

impl MdnsDiscovery {
    pub fn new() -> Result<Self, CoreError> {
        Ok(Self {
            daemon: ServiceDaemon::new()?,
        })
    }

    /// The shared daemon, for advertising on the same responder.
    pub fn daemon(&self) -> &ServiceDaemon {
        &self.daemon
    }

    pub fn shutdown(&self) {
        if let Err(e) = self.daemon.shutdown() {
            debug!(error = %e, "mDNS daemon shutdown failed");
        }
    }
}

impl DiscoveryProvider for MdnsDiscovery {
    fn browse(
        &self,
        service_type: &str,
        timeout: Duration,
    ) -> Result<Vec<DiscoveredService>, CoreError> {
        let receiver = self.daemon.browse(service_type)?;
        let deadline = Instant::now() + timeout;
        let mut found = Vec::new();

        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break;
            }
            match receiver.recv_timeout(remaining) {
                Ok(ServiceEvent::ServiceResolved(info)) => {
                    trace!(name = info.get_fullname(), "service resolved");
                    found.push(service_from_info(&info));
                }
                Ok(event) => trace!(?event, "browse event"),
                Err(_) => break,
            }
        }

        if let Err(e) = self.daemon.stop_browse(service_type) {
            debug!(error = %e, "stop_browse failed");
        }
        Ok(found)
    }
}

fn service_from_info(info: &ServiceInfo) -> DiscoveredService {
    let hostname = info
        .get_property_val_str(TXT_HOSTNAME)
        .map_or_else(|| bare_hostname(info.get_hostname()), str::to_owned);

    DiscoveredService {
        instance: info.get_fullname().to_owned(),
        hostname,
        addresses: info.get_addresses().iter().copied().collect(),
        port: info.get_port(),
        tsl_address: info
            .get_property_val_str(TXT_TSL_ADDRESS)
            .and_then(|v| v.trim().parse().ok())
            .filter(|a| *a <= tally_api::tsl::MAX_ADDRESS),
        version: info.get_property_val_str(TXT_VERSION).map(str::to_owned),
    }
}

/// `tally-5.local.` -> `tally-5`
fn bare_hostname(host: &str) -> String {
    let host = host.trim_end_matches('.');
    host.strip_suffix(".local").unwrap_or(host).to_owned()
}

// ── Advertisement ────────────────────────────────────────────────────

/// Our own service record, withdrawn on drop.
pub struct MdnsAdvertiser {
    daemon: ServiceDaemon,
    fullname: String,
}

impl MdnsAdvertiser {
    /// Publish this device under `instance` with its TSL address in TXT.
    pub fn register(
        daemon: &ServiceDaemon,
        service_type: &str,
        instance: &str,
        hostname: &str,
        address: Ipv4Addr,
        port: u16,
        tsl_address: u8,
    ) -> Result<Self, CoreError> {
        let host = format!("{instance}.local.");
        let properties = [
            (TXT_TSL_ADDRESS, tsl_address.to_string()),
            (TXT_VERSION, env!("CARGO_PKG_VERSION").to_owned()),
            (TXT_HOSTNAME, hostname.to_owned()),
        ];
        let info = ServiceInfo::new(
            service_type,
            instance,
            &host,
            address.to_string().as_str(),
            port,
            &properties[..],
        )?;
        let fullname = info.get_fullname().to_owned();
        daemon.register(info)?;

        info!(%fullname, %address, port, tsl_address, "advertising via mDNS");
        Ok(Self {
            daemon: daemon.clone(),
            fullname,
        })
    }

    pub fn fullname(&self) -> &str {
        &self.fullname
    }
}

impl Drop for MdnsAdvertiser {
    fn drop(&mut self) {
        if let Err(e) = self.daemon.unregister(&self.fullname) {
            debug!(error = %e, fullname = %self.fullname, "mDNS unregister failed");
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::net::IpAddr;

    use super::*;
    use crate::config::SERVICE_TYPE;

    fn info(properties: &[(&str, &str)]) -> ServiceInfo {
        ServiceInfo::new(
            SERVICE_TYPE,
            "tally-7",
            "tally-7.local.",
            "10.0.0.7",
            80,
            properties,
        )
        .unwrap()
    }

    #[test]
    fn reads_txt_properties() {
        let svc = service_from_info(&info(&[
            ("tsl", "7"),
            ("version", "0.1.0"),
            ("hostname", "Camera Seven"),
        ]));
        assert_eq!(svc.hostname, "Camera Seven");
        assert_eq!(svc.tsl_address, Some(7));
        assert_eq!(svc.version.as_deref(), Some("0.1.0"));
        assert_eq!(svc.addresses, vec![IpAddr::from([10, 0, 0, 7])]);
        assert_eq!(svc.port, 80);
    }

    #[test]
    fn falls_back_to_record_hostname() {
        let svc = service_from_info(&info(&[("tsl", "200")]));
        assert_eq!(svc.hostname, "tally-7");
        assert_eq!(svc.tsl_address, None);
        assert_eq!(svc.version, None);
    }

    #[test]
    fn strips_local_suffix() {
        assert_eq!(bare_hostname("tally-5.local."), "tally-5");
        assert_eq!(bare_hostname("tally-5"), "tally-5");
    }
}

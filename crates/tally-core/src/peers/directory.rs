// ── Peer directory ──
//
// Bounded, lock-free snapshot of sibling devices. Each refresh replaces
// the whole list; there is no incremental expiry. The directory itself
// never rate-limits; callers check `age()` against their own interval.

use std::collections::HashSet;
use std::net::IpAddr;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use arc_swap::ArcSwap;
use chrono::Utc;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::{DiscoveredService, DiscoveryProvider};
use crate::config::DiscoveryConfig;
use crate::error::CoreError;
use crate::model::{ConnectivitySummary, PeerDevice};
use crate::state::DeviceState;

pub struct PeerDirectory {
    provider: Arc<dyn DiscoveryProvider>,
    state: Arc<DeviceState>,
    service_type: String,
    capacity: usize,
    browse_timeout: Duration,
    peers: ArcSwap<Vec<PeerDevice>>,
    last_refresh: Mutex<Option<Instant>>,
    /// Serialises scans so concurrent callers don't browse twice at once.
    scanning: tokio::sync::Mutex<()>,
}

impl PeerDirectory {
    pub fn new(
        provider: Arc<dyn DiscoveryProvider>,
        state: Arc<DeviceState>,
        config: &DiscoveryConfig,
    ) -> Self {
        Self {
            provider,
            state,
            service_type: config.service_type.clone(),
            capacity: config.capacity,
            browse_timeout: config.browse_timeout,
            peers: ArcSwap::from_pointee(Vec::new()),
            last_refresh: Mutex::new(None),
            scanning: tokio::sync::Mutex::new(()),
        }
    }

    /// Current peers, in discovery order.
    pub fn peers(&self) -> Arc<Vec<PeerDevice>> {
        self.peers.load_full()
    }

    pub fn len(&self) -> usize {
        self.peers.load().len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.load().is_empty()
    }

    /// Time since the last completed refresh, `None` if never refreshed.
    pub fn age(&self) -> Option<Duration> {
        self.last_refresh
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .map(|at| at.elapsed())
    }

    /// Whether the list is older than `min_interval` (or was never built).
    pub fn is_stale(&self, min_interval: Duration) -> bool {
        self.age().is_none_or(|age| age >= min_interval)
    }

    /// Scan for peers and replace the list with the result.
    ///
    /// On failure the list is emptied; the caller may retry later.
    pub async fn refresh(&self) -> Result<usize, CoreError> {
        let _scan = self.scanning.lock().await;

        let provider = Arc::clone(&self.provider);
        let service_type = self.service_type.clone();
        let timeout = self.browse_timeout;
        let result = tokio::task::spawn_blocking(move || provider.browse(&service_type, timeout))
            .await
            .map_err(|e| CoreError::Internal(format!("discovery task failed: {e}")))
            .and_then(|r| r);

        self.mark_refreshed();
        match result {
            Ok(services) => {
                let peers = self.build(services, &self.state.connectivity());
                let count = peers.len();
                self.peers.store(Arc::new(peers));
                info!(count, "peer directory refreshed");
                Ok(count)
            }
            Err(e) => {
                warn!(error = %e, "peer discovery failed");
                self.peers.store(Arc::new(Vec::new()));
                Err(e)
            }
        }
    }

    fn mark_refreshed(&self) {
        *self
            .last_refresh
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(Instant::now());
    }

    /// Turn raw records into the bounded peer list: self excluded,
    /// one entry per IP, first-discovered order kept.
    fn build(&self, services: Vec<DiscoveredService>, own: &ConnectivitySummary) -> Vec<PeerDevice> {
        let own_ips: HashSet<IpAddr> = [own.wired, own.wireless, own.captive_address()]
            .into_iter()
            .flatten()
            .map(IpAddr::V4)
            .collect();
        let now = Utc::now();
        let mut peers: Vec<PeerDevice> = Vec::with_capacity(self.capacity);

        for service in services {
            if service.addresses.iter().any(|ip| own_ips.contains(ip)) {
                debug!(instance = %service.instance, "skipping own record");
                continue;
            }
            let Some(ip) = preferred_address(&service.addresses) else {
                continue;
            };

            if let Some(existing) = peers.iter_mut().find(|p| p.ip == ip) {
                existing.hostname = service.hostname;
                existing.port = service.port;
                existing.tsl_address = service.tsl_address.or(existing.tsl_address);
                existing.last_seen = now;
                continue;
            }
            if peers.len() >= self.capacity {
                debug!(instance = %service.instance, "peer directory full");
                continue;
            }
            peers.push(PeerDevice {
                hostname: service.hostname,
                ip,
                port: service.port,
                tsl_address: service.tsl_address,
                last_seen: now,
            });
        }
        peers
    }
}

/// IPv4 first; link-local IPv6 is a poor target for plain HTTP.
fn preferred_address(addresses: &[IpAddr]) -> Option<IpAddr> {
    addresses
        .iter()
        .find(|ip| ip.is_ipv4())
        .or_else(|| addresses.first())
        .copied()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::net::Ipv4Addr;

    use pretty_assertions::assert_eq;

    use super::*;

    const OWN_IP: Ipv4Addr = Ipv4Addr::new(10, 0, 0, 5);

    struct FakeProvider {
        services: Mutex<Result<Vec<DiscoveredService>, String>>,
    }

    impl FakeProvider {
        fn new(services: Vec<DiscoveredService>) -> Arc<Self> {
            Arc::new(Self {
                services: Mutex::new(Ok(services)),
            })
        }

        fn fail(&self) {
            *self.services.lock().unwrap() = Err("no multicast route".into());
        }
    }

    impl DiscoveryProvider for FakeProvider {
        fn browse(&self, _ty: &str, _timeout: Duration) -> Result<Vec<DiscoveredService>, CoreError> {
            self.services
                .lock()
                .unwrap()
                .clone()
                .map_err(|message| CoreError::Discovery { message })
        }
    }

    fn service(n: u8, tsl: Option<u8>) -> DiscoveredService {
        DiscoveredService {
            instance: format!("tally-{n}._tsl-tally._tcp.local."),
            hostname: format!("tally-{n}"),
            addresses: vec![IpAddr::from([10, 0, 0, n])],
            port: 80,
            tsl_address: tsl,
            version: Some("0.1.0".into()),
        }
    }

    fn directory(provider: Arc<FakeProvider>) -> PeerDirectory {
        let state = Arc::new(DeviceState::new());
        state.update_connectivity(|c| c.wired = Some(OWN_IP));
        PeerDirectory::new(provider, state, &DiscoveryConfig::default())
    }

    #[tokio::test]
    async fn excludes_self_and_keeps_order() {
        let dir = directory(FakeProvider::new(vec![
            service(7, Some(7)),
            service(5, Some(5)),
            service(9, None),
        ]));

        assert_eq!(dir.refresh().await.unwrap(), 2);
        let peers = dir.peers();
        let ips: Vec<IpAddr> = peers.iter().map(|p| p.ip).collect();
        assert_eq!(ips, vec![IpAddr::from([10, 0, 0, 7]), IpAddr::from([10, 0, 0, 9])]);
        assert!(peers.iter().all(|p| p.ip != IpAddr::V4(OWN_IP)));
        assert_eq!(peers[0].tsl_address, Some(7));
        assert_eq!(peers[1].tsl_address, None);
    }

    #[tokio::test]
    async fn duplicates_collapse_by_ip() {
        let mut again = service(7, None);
        again.hostname = "renamed".into();
        let dir = directory(FakeProvider::new(vec![service(7, Some(7)), again]));

        assert_eq!(dir.refresh().await.unwrap(), 1);
        let peer = &dir.peers()[0];
        assert_eq!(peer.hostname, "renamed");
        assert_eq!(peer.tsl_address, Some(7));
    }

    #[tokio::test]
    async fn bounded_to_capacity() {
        let services = (10..40).map(|n| service(n, Some(n))).collect();
        let dir = directory(FakeProvider::new(services));

        assert_eq!(dir.refresh().await.unwrap(), 16);
        assert_eq!(dir.peers()[0].ip, IpAddr::from([10, 0, 0, 10]));
        assert_eq!(dir.peers()[15].ip, IpAddr::from([10, 0, 0, 25]));
    }

    #[tokio::test]
    async fn failure_empties_directory() {
        let provider = FakeProvider::new(vec![service(7, Some(7))]);
        let dir = directory(provider.clone());
        tokio_test::assert_ok!(dir.refresh().await);
        assert_eq!(dir.len(), 1);

        provider.fail();
        assert!(matches!(dir.refresh().await, Err(CoreError::Discovery { .. })));
        assert!(dir.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn staleness_is_tracked_for_callers() {
        let dir = directory(FakeProvider::new(Vec::new()));
        assert!(dir.is_stale(Duration::from_secs(10)));

        dir.refresh().await.unwrap();
        assert!(!dir.is_stale(Duration::from_secs(10)));

        tokio::time::advance(Duration::from_secs(11)).await;
        assert!(dir.is_stale(Duration::from_secs(10)));
    }

    #[test]
    fn prefers_ipv4() {
        let addrs = vec![
            "fe80::1".parse::<IpAddr>().unwrap(),
            IpAddr::from([10, 0, 0, 3]),
        ];
        assert_eq!(preferred_address(&addrs), Some(IpAddr::from([10, 0, 0, 3])));
    }
}

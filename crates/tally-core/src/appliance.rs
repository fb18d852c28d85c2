// ── Appliance abstraction ──
//
// Boot and lifecycle for one tally light. Establishes a network path,
// then keeps the TSL listener and the mDNS record in step with
// connectivity and refreshes the peer directory in the background.

use std::net::{Ipv4Addr, SocketAddr};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use mdns_sd::ServiceDaemon;
use tally_api::{PacketCounters, StatusResponse};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::broadcast::BroadcastCoordinator;
use crate::config::ApplianceConfig;
use crate::connectivity::{
    CaptivePortal, ConnectivityManager, LinkEvent, NetworkDriver, access_point_ssid,
};
use crate::control::LocalControl;
use crate::disco::DiscoController;
use crate::error::CoreError;
use crate::indicator::{Indicator, Renderer};
use crate::listener::{ListenerCounters, ListenerHandle, ListenerStats, TallyListener};
use crate::model::{ConnectivityState, ConnectivitySummary, PeerDevice};
use crate::peers::{DiscoveryProvider, MdnsAdvertiser, PeerDirectory};
use crate::state::DeviceState;

/// Host integrations the appliance drives.
pub struct Platform {
    pub indicator: Arc<dyn Indicator>,
    pub network: Arc<dyn NetworkDriver>,
    /// Events produced by `network`.
    pub link_events: mpsc::UnboundedReceiver<LinkEvent>,
    pub discovery: Arc<dyn DiscoveryProvider>,
    /// Responder used to advertise this device; `None` skips advertising.
    pub mdns: Option<ServiceDaemon>,
}

// ── Appliance ────────────────────────────────────────────────────────

/// The running device.
///
/// Cheaply cloneable via `Arc<ApplianceInner>`. Call
/// [`start()`](Self::start) once to bring networking up and spawn the
/// background tasks, and [`shutdown()`](Self::shutdown) to stop them.
#[derive(Clone)]
pub struct Appliance {
    inner: Arc<ApplianceInner>,
}

struct ApplianceInner {
    config: ApplianceConfig,
    state: Arc<DeviceState>,
    renderer: Renderer,
    control: LocalControl,
    directory: Arc<PeerDirectory>,
    broadcast: BroadcastCoordinator,
    mdns: Option<ServiceDaemon>,
    /// `{hostname}-XXXXXX`, the mDNS instance name.
    instance: String,
    ap_ssid: String,
    manager: Mutex<Option<ConnectivityManager>>,
    listener_stats: Arc<ListenerStats>,
    listener: Mutex<Option<RunningListener>>,
    advertiser: Mutex<Option<Advertisement>>,
    cancel: CancellationToken,
    task_handles: tokio::sync::Mutex<Vec<JoinHandle<()>>>,
}

struct RunningListener {
    handle: ListenerHandle,
    interface: Ipv4Addr,
}

struct Advertisement {
    _record: MdnsAdvertiser,
    address: Ipv4Addr,
}

impl Appliance {
    /// Wire up every component. Does not touch the network; call
    /// [`start()`](Self::start) for that.
    pub fn new(config: ApplianceConfig, platform: Platform) -> Result<Self, CoreError> {
        let state = Arc::new(DeviceState::new());
        let renderer = Renderer::new(
            platform.indicator,
            Arc::clone(&state),
            config.palette,
            config.listener.max_brightness,
        );
        let disco = Arc::new(DiscoController::new(Arc::clone(&state), renderer.clone()));
        let control = LocalControl::new(Arc::clone(&state), renderer.clone(), disco);
        let directory = Arc::new(PeerDirectory::new(
            platform.discovery,
            Arc::clone(&state),
            &config.discovery,
        ));
        let broadcast = BroadcastCoordinator::new(
            Arc::clone(&directory),
            control.clone(),
            config.discovery.peer_timeout,
        )?;

        let hardware_id = platform.network.hardware_id();
        let instance = access_point_ssid(&config.connectivity.hostname, hardware_id);
        let manager = ConnectivityManager::new(
            config.connectivity.clone(),
            platform.network,
            platform.link_events,
            Arc::clone(&state),
            renderer.clone(),
        );
        let ap_ssid = manager.access_point_ssid().to_owned();

        Ok(Self {
            inner: Arc::new(ApplianceInner {
                config,
                state,
                renderer,
                control,
                directory,
                broadcast,
                mdns: platform.mdns,
                instance,
                ap_ssid,
                manager: Mutex::new(Some(manager)),
                listener_stats: Arc::default(),
                listener: Mutex::new(None),
                advertiser: Mutex::new(None),
                cancel: CancellationToken::new(),
                task_handles: tokio::sync::Mutex::new(Vec::new()),
            }),
        })
    }

    pub fn config(&self) -> &ApplianceConfig {
        &self.inner.config
    }

    pub fn state(&self) -> &Arc<DeviceState> {
        &self.inner.state
    }

    pub fn renderer(&self) -> &Renderer {
        &self.inner.renderer
    }

    /// Operations on this device only.
    pub fn control(&self) -> &LocalControl {
        &self.inner.control
    }

    /// Operations mirrored to every peer.
    pub fn broadcast(&self) -> &BroadcastCoordinator {
        &self.inner.broadcast
    }

    pub fn directory(&self) -> &Arc<PeerDirectory> {
        &self.inner.directory
    }

    pub fn hostname(&self) -> &str {
        &self.inner.config.connectivity.hostname
    }

    pub fn access_point_ssid(&self) -> &str {
        &self.inner.ap_ssid
    }

    pub fn connectivity(&self) -> ConnectivitySummary {
        self.inner.state.connectivity()
    }

    /// The captive portal, while the access point is up.
    pub fn captive_portal(&self) -> Option<CaptivePortal> {
        CaptivePortal::from_summary(&self.connectivity())
    }

    /// Totals across every listener run since boot.
    pub fn listener_counters(&self) -> ListenerCounters {
        self.inner.listener_stats.snapshot()
    }

    pub fn listener_addr(&self) -> Option<SocketAddr> {
        lock(&self.inner.listener)
            .as_ref()
            .map(|running| running.handle.local_addr())
    }

    // ── Lifecycle ────────────────────────────────────────────────────

    /// Bring networking up and spawn the background tasks.
    ///
    /// Returns the path arbitration landed on. Fails only if the access
    /// point, the last fallback, could not be started.
    pub async fn start(&self) -> Result<ConnectivityState, CoreError> {
        let Some(mut manager) = lock(&self.inner.manager).take() else {
            return Err(CoreError::Internal("appliance already started".into()));
        };

        let path = manager.establish().await?;
        if path != ConnectivityState::AccessPointUp {
            self.inner.renderer.render_tally();
        }
        self.reconcile(&self.connectivity());

        let cancel = &self.inner.cancel;
        let mut handles = self.inner.task_handles.lock().await;
        handles.push(tokio::spawn(manager.run(cancel.child_token())));
        handles.push(tokio::spawn(supervise_task(self.clone(), cancel.child_token())));

        let period = self.inner.config.discovery.background_interval;
        if !period.is_zero() {
            handles.push(tokio::spawn(discovery_task(
                self.clone(),
                period,
                cancel.child_token(),
            )));
        }

        info!(
            hostname = self.hostname(),
            path = %path,
            ip = %self.connectivity().active_ip(),
            "appliance started"
        );
        Ok(path)
    }

    /// Stop background tasks, the listener and the mDNS record.
    pub async fn shutdown(&self) {
        self.inner.cancel.cancel();

        let mut handles = self.inner.task_handles.lock().await;
        for handle in handles.drain(..) {
            let _ = handle.await;
        }

        let running = lock(&self.inner.listener).take();
        if let Some(running) = running {
            if retire_listener(running.handle).await.is_err() {
                warn!("listener join task failed");
            }
        }
        lock(&self.inner.advertiser).take();
        self.inner.control.stop_disco();
        info!("appliance stopped");
    }

    /// Start, restart or stop the listener and the mDNS record to match
    /// `summary`. Both run only while a client path is up.
    fn reconcile(&self, summary: &ConnectivitySummary) {
        let uplink = summary.wired.or(summary.wireless);
        self.reconcile_listener(uplink);
        self.reconcile_advertisement(uplink);
    }

    fn reconcile_listener(&self, uplink: Option<Ipv4Addr>) {
        let mut listener = lock(&self.inner.listener);
        if listener.as_ref().map(|l| l.interface) == uplink {
            return;
        }
        if let Some(running) = listener.take() {
            drop(retire_listener(running.handle));
        }
        let Some(interface) = uplink else {
            info!("no client network path, TSL listener idle");
            return;
        };

        let config = crate::config::ListenerConfig {
            interface,
            ..self.inner.config.listener.clone()
        };
        let tally = TallyListener::with_stats(
            config,
            Arc::clone(&self.inner.state),
            self.inner.renderer.clone(),
            Arc::clone(&self.inner.listener_stats),
        );
        match tally.start() {
            Ok(handle) => *listener = Some(RunningListener { handle, interface }),
            Err(e) => warn!(error = %e, %interface, "TSL listener failed to start"),
        }
    }

    fn reconcile_advertisement(&self, uplink: Option<Ipv4Addr>) {
        let Some(daemon) = self.inner.mdns.as_ref() else {
            return;
        };
        let mut advertiser = lock(&self.inner.advertiser);
        if advertiser.as_ref().map(|a| a.address) == uplink {
            return;
        }
        advertiser.take();
        let Some(address) = uplink else {
            return;
        };

        let config = &self.inner.config;
        match MdnsAdvertiser::register(
            daemon,
            &config.discovery.service_type,
            &self.inner.instance,
            &config.connectivity.hostname,
            address,
            config.discovery.http_port,
            config.listener.address,
        ) {
            Ok(record) => {
                *advertiser = Some(Advertisement {
                    _record: record,
                    address,
                });
            }
            Err(e) => warn!(error = %e, %address, "mDNS advertisement failed"),
        }
    }

    // ── Queries ──────────────────────────────────────────────────────

    /// Peers, rescanning first if the list is older than the on-demand
    /// interval.
    pub async fn discover(&self) -> Result<Arc<Vec<PeerDevice>>, CoreError> {
        let directory = &self.inner.directory;
        if directory.is_stale(self.inner.config.discovery.on_demand_interval) {
            directory.refresh().await?;
        } else {
            debug!(age = ?directory.age(), "serving cached peer list");
        }
        Ok(directory.peers())
    }

    /// Machine-readable status, as served to peers.
    pub fn status(&self) -> StatusResponse {
        let tally = self.inner.state.tally();
        let summary = self.connectivity();
        let counters = self.listener_counters();
        StatusResponse {
            tally: tally.state.to_string(),
            text: tally.text.as_str().to_owned(),
            ip: summary.active_ip().to_string(),
            connection: summary.label(),
            brightness: tally.brightness,
            tsl_address: Some(self.inner.config.listener.address),
            hostname: self.hostname().to_owned(),
            disco: self.inner.state.disco().active,
            version: env!("CARGO_PKG_VERSION").to_owned(),
            packets: PacketCounters {
                received: counters.received,
                applied: counters.applied,
                ignored: counters.ignored,
                malformed: counters.malformed,
            },
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Cancel the listener now and join its thread on the blocking pool.
fn retire_listener(handle: ListenerHandle) -> JoinHandle<()> {
    handle.cancel();
    tokio::task::spawn_blocking(move || handle.stop())
}

// ── Background tasks ─────────────────────────────────────────────────

/// Follow connectivity changes for the lifetime of the appliance.
async fn supervise_task(appliance: Appliance, cancel: CancellationToken) {
    let mut changes = appliance.inner.state.subscribe_connectivity();

    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            changed = changes.changed() => {
                if changed.is_err() {
                    break;
                }
                let summary = changes.borrow_and_update().clone();
                appliance.reconcile(&summary);
            }
        }
    }
}

/// Periodically rescan for peers while a client path is up.
async fn discovery_task(appliance: Appliance, period: Duration, cancel: CancellationToken) {
    let mut interval = tokio::time::interval(period);

    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            _ = interval.tick() => {
                if !appliance.connectivity().has_uplink() {
                    continue;
                }
                if let Err(e) = appliance.inner.directory.refresh().await {
                    debug!(error = %e, "background discovery failed");
                }
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::net::UdpSocket;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Instant;

    use pretty_assertions::assert_eq;
    use secrecy::SecretString;

    use super::*;
    use crate::config::{ListenerConfig, StationConfig, WiredConfig};
    use crate::connectivity::LinkEventKind;
    use crate::indicator::testing::RecordingIndicator;
    use crate::model::{Interface, TallyCommand, TallyState};
    use crate::peers::DiscoveredService;

    const WIRED_IP: Ipv4Addr = Ipv4Addr::new(10, 0, 0, 2);
    const AP_IP: Ipv4Addr = Ipv4Addr::new(192, 168, 4, 1);

    struct StubDriver {
        tx: mpsc::UnboundedSender<LinkEvent>,
        wired: bool,
    }

    impl NetworkDriver for StubDriver {
        fn hardware_id(&self) -> [u8; 6] {
            [0, 0, 0, 0xab, 0xcd, 0xef]
        }

        fn start_wired(&self, _config: &WiredConfig, _hostname: &str) -> Result<(), CoreError> {
            if self.wired {
                let _ = self.tx.send(LinkEvent::new(
                    Interface::Wired,
                    LinkEventKind::GotAddress(WIRED_IP),
                ));
            }
            Ok(())
        }

        fn stop_wired(&self) {}

        fn start_station(&self, _config: &StationConfig, _hostname: &str) -> Result<(), CoreError> {
            Ok(())
        }

        fn stop_station(&self) {}

        fn start_access_point(&self, _ssid: &str, _pw: &SecretString) -> Result<(), CoreError> {
            let _ = self.tx.send(LinkEvent::new(
                Interface::AccessPoint,
                LinkEventKind::ApStarted(AP_IP),
            ));
            Ok(())
        }

        fn stop_access_point(&self) {}
    }

    #[derive(Default)]
    struct CountingProvider {
        browses: AtomicUsize,
    }

    impl DiscoveryProvider for CountingProvider {
        fn browse(&self, _ty: &str, _timeout: Duration) -> Result<Vec<DiscoveredService>, CoreError> {
            self.browses.fetch_add(1, Ordering::SeqCst);
            Ok(vec![DiscoveredService {
                instance: "tally-9".into(),
                hostname: "tally-9".into(),
                addresses: vec![[10, 0, 0, 9].into()],
                port: 80,
                tsl_address: Some(9),
                version: None,
            }])
        }
    }

    struct Harness {
        appliance: Appliance,
        tx: mpsc::UnboundedSender<LinkEvent>,
        provider: Arc<CountingProvider>,
    }

    fn harness(wired: bool) -> Harness {
        let (tx, rx) = mpsc::unbounded_channel();
        let provider = Arc::new(CountingProvider::default());
        let mut config = ApplianceConfig {
            listener: ListenerConfig {
                address: 4,
                group: Ipv4Addr::LOCALHOST,
                port: 0,
                ..ListenerConfig::default()
            },
            ..ApplianceConfig::default()
        };
        config.discovery.background_interval = Duration::ZERO;
        let platform = Platform {
            indicator: Arc::new(RecordingIndicator::default()),
            network: Arc::new(StubDriver {
                tx: tx.clone(),
                wired,
            }),
            link_events: rx,
            discovery: provider.clone(),
            mdns: None,
        };
        Harness {
            appliance: Appliance::new(config, platform).unwrap(),
            tx,
            provider,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn wired_boot_runs_listener() {
        let h = harness(true);
        assert_eq!(h.appliance.start().await.unwrap(), ConnectivityState::WiredUp);

        let addr = h.appliance.listener_addr().unwrap();
        let packet = TallyCommand::new(4, TallyState::Preview, 3, "CAM 4").encode();
        UdpSocket::bind("127.0.0.1:0")
            .unwrap()
            .send_to(&packet, addr)
            .unwrap();

        let deadline = Instant::now() + Duration::from_secs(2);
        while h.appliance.listener_counters().applied < 1 && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(5));
        }
        let status = h.appliance.status();
        assert_eq!(status.tally, "Preview");
        assert_eq!(status.text, "CAM 4");
        assert_eq!(status.ip, "10.0.0.2");
        assert_eq!(status.connection, "Ethernet");
        assert_eq!(status.tsl_address, Some(4));
        assert_eq!(status.packets.applied, 1);
        assert!(h.appliance.captive_portal().is_none());

        h.appliance.shutdown().await;
        assert!(h.appliance.listener_addr().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn access_point_mode_has_no_listener() {
        let h = harness(false);
        assert_eq!(
            h.appliance.start().await.unwrap(),
            ConnectivityState::AccessPointUp
        );

        assert!(h.appliance.listener_addr().is_none());
        let portal = h.appliance.captive_portal().unwrap();
        assert_eq!(portal.address(), AP_IP);
        assert_eq!(h.appliance.status().connection, "AP");
        assert_eq!(h.appliance.access_point_ssid(), "TSL-Tally-ABCDEF");
        h.appliance.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn listener_follows_link_loss() {
        let h = harness(true);
        h.appliance.start().await.unwrap();
        assert!(h.appliance.listener_addr().is_some());

        h.tx
            .send(LinkEvent::new(Interface::Wired, LinkEventKind::LostAddress))
            .unwrap();
        for _ in 0..50 {
            if h.appliance.listener_addr().is_none() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(h.appliance.listener_addr().is_none());
        h.appliance.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn listener_restarts_when_link_returns() {
        let h = harness(true);
        h.appliance.start().await.unwrap();

        h.tx
            .send(LinkEvent::new(Interface::Wired, LinkEventKind::LostAddress))
            .unwrap();
        for _ in 0..50 {
            if h.appliance.listener_addr().is_none() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(h.appliance.listener_addr().is_none());

        h.tx
            .send(LinkEvent::new(
                Interface::Wired,
                LinkEventKind::GotAddress(WIRED_IP),
            ))
            .unwrap();
        for _ in 0..50 {
            if h.appliance.listener_addr().is_some() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(h.appliance.listener_addr().is_some());
        assert_eq!(h.appliance.status().connection, "Ethernet");

        h.appliance.shutdown().await;
        assert!(h.appliance.listener_addr().is_none());
    }

    #[tokio::test]
    async fn retiring_a_listener_does_not_block_the_caller() {
        let state = Arc::new(DeviceState::new());
        let renderer = Renderer::new(
            Arc::new(RecordingIndicator::default()),
            Arc::clone(&state),
            crate::config::Palette::default(),
            50,
        );
        let config = ListenerConfig {
            group: Ipv4Addr::LOCALHOST,
            port: 0,
            poll_interval: Duration::from_millis(200),
            ..ListenerConfig::default()
        };
        let handle = TallyListener::new(config, state, renderer).start().unwrap();

        let started = Instant::now();
        let joined = retire_listener(handle);
        assert!(started.elapsed() < Duration::from_millis(100));
        tokio::time::timeout(Duration::from_secs(2), joined)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn start_runs_once() {
        let h = harness(true);
        h.appliance.start().await.unwrap();
        assert!(matches!(
            h.appliance.start().await,
            Err(CoreError::Internal(_))
        ));
        h.appliance.shutdown().await;
    }

    #[tokio::test]
    async fn on_demand_discovery_is_rate_limited() {
        let h = harness(true);
        let peers = h.appliance.discover().await.unwrap();
        assert_eq!(peers.len(), 1);
        assert_eq!(peers[0].hostname, "tally-9");

        h.appliance.discover().await.unwrap();
        assert_eq!(h.provider.browses.load(Ordering::SeqCst), 1);
    }
}

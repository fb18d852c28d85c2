// ── Connectivity manager ──
//
// Wired first, then wireless client, then a local access point. Waits
// are event-driven with deadlines; adapter events arrive on an mpsc
// channel and are folded into the device's connectivity summary.

use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::driver::{LinkEvent, LinkEventKind, NetworkDriver, access_point_ssid};
use crate::config::ConnectivityConfig;
use crate::error::CoreError;
use crate::indicator::Renderer;
use crate::model::{AccessPointInfo, ConnectivityState, Interface, Rgb};
use crate::state::DeviceState;

const BLINK_PERIOD: Duration = Duration::from_millis(300);

/// Owns interface selection and reacts to adapter events.
pub struct ConnectivityManager {
    config: ConnectivityConfig,
    driver: Arc<dyn NetworkDriver>,
    events: mpsc::UnboundedReceiver<LinkEvent>,
    state: Arc<DeviceState>,
    renderer: Renderer,
    ap_ssid: String,
}

impl ConnectivityManager {
    pub fn new(
        config: ConnectivityConfig,
        driver: Arc<dyn NetworkDriver>,
        events: mpsc::UnboundedReceiver<LinkEvent>,
        state: Arc<DeviceState>,
        renderer: Renderer,
    ) -> Self {
        let ap_ssid = access_point_ssid(&config.access_point.ssid_prefix, driver.hardware_id());
        Self {
            config,
            driver,
            events,
            state,
            renderer,
            ap_ssid,
        }
    }

    /// SSID the access point uses when it is started.
    pub fn access_point_ssid(&self) -> &str {
        &self.ap_ssid
    }

    // ── Arbitration ──────────────────────────────────────────────────

    /// Run the fallback sequence once and report where it landed.
    ///
    /// Always terminates: every wait is bounded, and when neither client
    /// path comes up the access point is started. Only a failed access
    /// point start is returned as an error.
    pub async fn establish(&mut self) -> Result<ConnectivityState, CoreError> {
        info!(hostname = %self.config.hostname, "establishing network path");
        let outcome = self.arbitrate().await;
        self.state.update_connectivity(|c| c.configured = true);

        let summary = self.state.connectivity();
        outcome?;
        info!(
            state = %summary.state(),
            connection = %summary.label(),
            ip = %summary.active_ip(),
            "network path established"
        );
        Ok(summary.state())
    }

    async fn arbitrate(&mut self) -> Result<(), CoreError> {
        match self.acquire_wired().await {
            Ok(ip) => {
                info!(%ip, "Ethernet connected");
                // Dual-homed: wireless failure never affects the wired path.
                if self.config.station.is_some() {
                    match self.acquire_station().await {
                        Ok(ip) => info!(%ip, "WiFi connected alongside Ethernet"),
                        Err(e) => warn!(error = %e, "WiFi unavailable, continuing on Ethernet"),
                    }
                }
                Ok(())
            }
            Err(e) => {
                warn!(error = %e, "Ethernet unavailable, trying WiFi");
                self.driver.stop_wired();
                self.forget(Interface::Wired);

                match self.acquire_station().await {
                    Ok(ip) => {
                        info!(%ip, "WiFi connected");
                        Ok(())
                    }
                    Err(e) => {
                        warn!(error = %e, "WiFi unavailable, starting access point");
                        self.start_access_point().await.map(|_| ())
                    }
                }
            }
        }
    }

    async fn acquire_wired(&mut self) -> Result<Ipv4Addr, CoreError> {
        self.driver
            .start_wired(&self.config.wired, &self.config.hostname)?;
        self.await_address(Interface::Wired, self.config.wired_timeout, Some(Rgb::GREEN))
            .await
    }

    async fn acquire_station(&mut self) -> Result<Ipv4Addr, CoreError> {
        let Some(station) = self.config.station.as_ref() else {
            return Err(CoreError::NotConfigured {
                interface: Interface::Wireless,
            });
        };
        info!(ssid = %station.ssid, "connecting to WiFi");
        self.driver.start_station(station, &self.config.hostname)?;

        let result = self
            .await_address(
                Interface::Wireless,
                self.config.station_timeout,
                Some(Rgb::PURPLE),
            )
            .await;
        if result.is_err() {
            self.driver.stop_station();
            self.forget(Interface::Wireless);
        }
        result
    }

    async fn start_access_point(&mut self) -> Result<Ipv4Addr, CoreError> {
        info!(ssid = %self.ap_ssid, "starting access point");
        self.renderer.access_point_starting().await;
        self.driver.stop_station();

        if let Err(e) = self
            .driver
            .start_access_point(&self.ap_ssid, &self.config.access_point.password)
        {
            return self.access_point_failed(e.to_string()).await;
        }

        match self
            .await_address(
                Interface::AccessPoint,
                self.config.access_point_timeout,
                None,
            )
            .await
        {
            Ok(ip) => {
                info!(ssid = %self.ap_ssid, %ip, "access point started");
                self.renderer.access_point_ready().await;
                Ok(ip)
            }
            Err(e) => {
                self.driver.stop_access_point();
                self.access_point_failed(e.to_string()).await
            }
        }
    }

    async fn access_point_failed(
        &self,
        reason: String,
    ) -> Result<Ipv4Addr, CoreError> {
        error!(ssid = %self.ap_ssid, %reason, "access point failed to start");
        self.renderer.access_point_failed().await;
        Err(CoreError::AccessPointStart { reason })
    }

    /// Wait until `interface` holds an address or the deadline passes,
    /// handling every event that arrives meanwhile.
    async fn await_address(
        &mut self,
        interface: Interface,
        timeout: Duration,
        blink: Option<Rgb>,
    ) -> Result<Ipv4Addr, CoreError> {
        let expiry = tokio::time::sleep_until(Instant::now() + timeout);
        tokio::pin!(expiry);
        let mut blink_timer = tokio::time::interval(BLINK_PERIOD);
        blink_timer.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut lit = false;

        let result = loop {
            if let Some(ip) = self.state.connectivity().address(interface) {
                break Ok(ip);
            }
            tokio::select! {
                biased;
                event = self.events.recv() => match event {
                    Some(event) => self.handle_event(&event),
                    None => break Err(CoreError::Adapter {
                        message: "link event channel closed".into(),
                    }),
                },
                () = &mut expiry => break Err(CoreError::AcquisitionFailed {
                    interface,
                    timeout_secs: timeout.as_secs(),
                }),
                _ = blink_timer.tick(), if blink.is_some() => {
                    lit = !lit;
                    if let Some(color) = blink {
                        self.renderer.blink(color, lit);
                    }
                }
            }
        };

        if blink.is_some() {
            self.renderer.blink(Rgb::BLACK, false);
        }
        result
    }

    // ── Events ───────────────────────────────────────────────────────

    /// Fold one adapter event into the connectivity summary.
    pub fn handle_event(&self, event: &LinkEvent) {
        use LinkEventKind as K;

        match (event.interface, event.kind) {
            (Interface::AccessPoint, K::ApStarted(address) | K::GotAddress(address)) => {
                let ssid = self.ap_ssid.clone();
                info!(%ssid, %address, "AP started");
                self.state.update_connectivity(|c| {
                    c.access_point = Some(AccessPointInfo { ssid, address });
                });
            }
            (Interface::AccessPoint, K::ApStopped | K::LinkDown | K::LostAddress) => {
                info!("AP stopped");
                self.forget(Interface::AccessPoint);
            }
            (interface, K::GotAddress(ip)) => {
                info!(%interface, %ip, "got address");
                self.state.update_connectivity(|c| match interface {
                    Interface::Wired => c.wired = Some(ip),
                    _ => c.wireless = Some(ip),
                });
            }
            (interface, K::LostAddress | K::LinkDown) => {
                info!(%interface, kind = ?event.kind, "lost address");
                self.forget(interface);
            }
            (interface, kind) => debug!(%interface, ?kind, "link event"),
        }
    }

    fn forget(&self, interface: Interface) {
        self.state.update_connectivity(|c| match interface {
            Interface::Wired => c.wired = None,
            Interface::Wireless => c.wireless = None,
            Interface::AccessPoint => c.access_point = None,
        });
    }

    // ── Supervision ──────────────────────────────────────────────────

    /// Keep handling adapter events after boot. When every path, the access
    /// point included, has been down for `rearbitrate_after`, the fallback
    /// sequence runs again. A device serving its access point stays there
    /// until restarted.
    pub async fn run(mut self, cancel: CancellationToken) {
        let mut down_since = (!self.state.connectivity().is_reachable()).then(Instant::now);

        loop {
            let deadline = down_since.map(|since| since + self.config.rearbitrate_after);
            let rearbitrate = async move {
                match deadline {
                    Some(at) => tokio::time::sleep_until(at).await,
                    None => std::future::pending::<()>().await,
                }
            };

            tokio::select! {
                biased;
                () = cancel.cancelled() => break,
                event = self.events.recv() => {
                    let Some(event) = event else {
                        warn!("link event channel closed, connectivity supervision ends");
                        break;
                    };
                    self.handle_event(&event);
                    let reachable = self.state.connectivity().is_reachable();
                    down_since = match (reachable, down_since) {
                        (true, _) => None,
                        (false, None) => {
                            warn!("all network paths lost");
                            Some(Instant::now())
                        }
                        (false, since) => since,
                    };
                }
                () = rearbitrate => {
                    info!("re-running network arbitration");
                    tokio::select! {
                        biased;
                        () = cancel.cancelled() => break,
                        result = self.establish() => if let Err(e) = result {
                            error!(error = %e, "network arbitration failed");
                        },
                    }
                    down_since = (!self.state.connectivity().is_reachable()).then(Instant::now);
                }
            }
        }
        debug!("connectivity manager stopped");
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicBool, Ordering};

    use secrecy::SecretString;

    use super::*;
    use crate::config::{Palette, StationConfig, WiredConfig};
    use crate::indicator::testing::RecordingIndicator;

    const WIRED_IP: Ipv4Addr = Ipv4Addr::new(10, 0, 0, 2);
    const WIFI_IP: Ipv4Addr = Ipv4Addr::new(10, 0, 1, 2);
    const AP_IP: Ipv4Addr = Ipv4Addr::new(192, 168, 4, 1);

    /// Answers start calls with events according to its switches.
    struct FakeDriver {
        tx: mpsc::UnboundedSender<LinkEvent>,
        wired: AtomicBool,
        wireless: AtomicBool,
        access_point: AtomicBool,
        calls: Mutex<Vec<&'static str>>,
    }

    impl FakeDriver {
        fn new(tx: mpsc::UnboundedSender<LinkEvent>, wired: bool, wireless: bool) -> Self {
            Self {
                tx,
                wired: AtomicBool::new(wired),
                wireless: AtomicBool::new(wireless),
                access_point: AtomicBool::new(true),
                calls: Mutex::new(Vec::new()),
            }
        }

        fn record(&self, call: &'static str) {
            self.calls.lock().unwrap().push(call);
        }

        fn calls(&self) -> Vec<&'static str> {
            self.calls.lock().unwrap().clone()
        }

        fn emit(&self, interface: Interface, kind: LinkEventKind) {
            let _ = self.tx.send(LinkEvent::new(interface, kind));
        }
    }

    impl NetworkDriver for FakeDriver {
        fn hardware_id(&self) -> [u8; 6] {
            [0x24, 0x0a, 0xc4, 0xa1, 0xb2, 0xc3]
        }

        fn start_wired(&self, _config: &WiredConfig, _hostname: &str) -> Result<(), CoreError> {
            self.record("start_wired");
            if self.wired.load(Ordering::SeqCst) {
                self.emit(Interface::Wired, LinkEventKind::LinkUp);
                self.emit(Interface::Wired, LinkEventKind::GotAddress(WIRED_IP));
            }
            Ok(())
        }

        fn stop_wired(&self) {
            self.record("stop_wired");
        }

        fn start_station(&self, _config: &StationConfig, _hostname: &str) -> Result<(), CoreError> {
            self.record("start_station");
            if self.wireless.load(Ordering::SeqCst) {
                self.emit(Interface::Wireless, LinkEventKind::GotAddress(WIFI_IP));
            }
            Ok(())
        }

        fn stop_station(&self) {
            self.record("stop_station");
        }

        fn start_access_point(&self, _ssid: &str, _pw: &SecretString) -> Result<(), CoreError> {
            self.record("start_access_point");
            if self.access_point.load(Ordering::SeqCst) {
                self.emit(Interface::AccessPoint, LinkEventKind::ApStarted(AP_IP));
                Ok(())
            } else {
                Err(CoreError::Adapter {
                    message: "radio unavailable".into(),
                })
            }
        }

        fn stop_access_point(&self) {
            self.record("stop_access_point");
        }
    }

    struct Harness {
        manager: ConnectivityManager,
        driver: Arc<FakeDriver>,
        state: Arc<DeviceState>,
        indicator: Arc<RecordingIndicator>,
    }

    fn harness(wired: bool, wireless_configured: bool, wireless_up: bool) -> Harness {
        let (tx, rx) = mpsc::unbounded_channel();
        let driver = Arc::new(FakeDriver::new(tx, wired, wireless_up));
        let state = Arc::new(DeviceState::new());
        let indicator = Arc::new(RecordingIndicator::default());
        let renderer = Renderer::new(indicator.clone(), state.clone(), Palette::default(), 50);
        let config = ConnectivityConfig {
            station: wireless_configured.then(|| StationConfig {
                ssid: "studio".into(),
                password: SecretString::from("hunter22".to_string()),
            }),
            ..ConnectivityConfig::default()
        };
        let manager =
            ConnectivityManager::new(config, driver.clone(), rx, state.clone(), renderer);
        Harness {
            manager,
            driver,
            state,
            indicator,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn wired_wins_and_wireless_is_added_when_configured() {
        let mut h = harness(true, true, true);
        let state = h.manager.establish().await.unwrap();

        assert_eq!(state, ConnectivityState::WiredUp);
        let summary = h.state.connectivity();
        assert_eq!(summary.wired, Some(WIRED_IP));
        assert_eq!(summary.wireless, Some(WIFI_IP));
        assert_eq!(summary.label(), "Ethernet + WiFi");
        assert_eq!(h.driver.calls(), vec!["start_wired", "start_station"]);
    }

    #[tokio::test(start_paused = true)]
    async fn wireless_failure_does_not_affect_wired() {
        let mut h = harness(true, true, false);
        let state = h.manager.establish().await.unwrap();

        assert_eq!(state, ConnectivityState::WiredUp);
        assert!(h.state.connectivity().wireless.is_none());
        assert!(h.state.connectivity().access_point.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn falls_back_to_wireless_after_wired_timeout() {
        let mut h = harness(false, true, true);
        let started = Instant::now();
        let state = h.manager.establish().await.unwrap();

        assert_eq!(state, ConnectivityState::WirelessUp);
        assert!(started.elapsed() >= Duration::from_secs(10));
        assert_eq!(
            h.driver.calls(),
            vec!["start_wired", "stop_wired", "start_station"]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn establish_always_lands_on_a_path() {
        for wired in [true, false] {
            for configured in [true, false] {
                for wireless_up in [true, false] {
                    let mut h = harness(wired, configured, wireless_up);
                    let state = h.manager.establish().await.unwrap();
                    assert!(
                        matches!(
                            state,
                            ConnectivityState::WiredUp
                                | ConnectivityState::WirelessUp
                                | ConnectivityState::AccessPointUp
                        ),
                        "wired={wired} configured={configured} up={wireless_up}: {state}"
                    );
                }
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn access_point_uses_hardware_derived_ssid() {
        let mut h = harness(false, false, false);
        let state = h.manager.establish().await.unwrap();

        assert_eq!(state, ConnectivityState::AccessPointUp);
        let ap = h.state.connectivity().access_point.unwrap();
        assert_eq!(ap.ssid, "TSL-Tally-A1B2C3");
        assert_eq!(ap.address, AP_IP);
        assert_eq!(
            h.indicator.last(),
            Some((Rgb::CYAN, crate::indicator::ACCESS_POINT_BRIGHTNESS))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn access_point_failure_is_fatal_and_visible() {
        let mut h = harness(false, false, false);
        h.driver.access_point.store(false, Ordering::SeqCst);

        let err = h.manager.establish().await.unwrap_err();
        assert!(err.is_fatal());
        assert_eq!(h.state.connectivity().state(), ConnectivityState::Disconnected);
        let reds = h
            .indicator
            .frames()
            .iter()
            .filter(|(c, _)| *c == Rgb::RED)
            .count();
        assert!(reds >= 5);
    }

    #[tokio::test(start_paused = true)]
    async fn link_loss_after_boot_rearbitrates() {
        let mut h = harness(true, false, false);
        h.manager.establish().await.unwrap();

        let cancel = CancellationToken::new();
        let driver = h.driver.clone();
        let state = h.state.clone();
        let task = tokio::spawn(h.manager.run(cancel.clone()));

        // Cable pulled: the next attempt finds no wired link.
        driver.wired.store(false, Ordering::SeqCst);
        driver.emit(Interface::Wired, LinkEventKind::LinkDown);
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(state.connectivity().state(), ConnectivityState::Disconnected);

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(state.connectivity().state(), ConnectivityState::AccessPointUp);

        cancel.cancel();
        task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn brief_outage_does_not_rearbitrate() {
        let mut h = harness(true, false, false);
        h.manager.establish().await.unwrap();

        let cancel = CancellationToken::new();
        let driver = h.driver.clone();
        let task = tokio::spawn(h.manager.run(cancel.clone()));

        driver.emit(Interface::Wired, LinkEventKind::LostAddress);
        tokio::time::sleep(Duration::from_secs(2)).await;
        driver.emit(Interface::Wired, LinkEventKind::GotAddress(WIRED_IP));
        tokio::time::sleep(Duration::from_secs(60)).await;

        assert_eq!(driver.calls(), vec!["start_wired"]);
        cancel.cancel();
        task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn access_point_fallback_is_kept_after_rearbitration() {
        let mut h = harness(true, false, false);
        h.manager.establish().await.unwrap();

        let cancel = CancellationToken::new();
        let driver = h.driver.clone();
        let state = h.state.clone();
        let task = tokio::spawn(h.manager.run(cancel.clone()));

        driver.wired.store(false, Ordering::SeqCst);
        driver.emit(Interface::Wired, LinkEventKind::LinkDown);
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(state.connectivity().state(), ConnectivityState::AccessPointUp);
        let wired_attempts = || {
            driver
                .calls()
                .iter()
                .filter(|call| **call == "start_wired")
                .count()
        };
        assert_eq!(wired_attempts(), 2);

        // Cable back in: the access point keeps the device reachable, so no
        // further arbitration is attempted.
        driver.wired.store(true, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_secs(120)).await;
        assert_eq!(state.connectivity().state(), ConnectivityState::AccessPointUp);
        assert_eq!(wired_attempts(), 2);

        cancel.cancel();
        task.await.unwrap();
    }
}

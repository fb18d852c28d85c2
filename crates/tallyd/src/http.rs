// ── Control surface ──
//
// The HTTP API every device serves: the settings page, the peer control
// endpoints siblings call during a fan-out, the operator fan-out
// endpoints, and the captive-portal fallback while the access point is up.
// Query parameters parse like a microcontroller form handler: a missing or
// malformed number reads as 0.

use std::collections::HashMap;
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Query, State};
use axum::http::{StatusCode, Uri, header};
use axum::response::{Html, IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Form, Json, Router};
use tally_api::{
    DiscoResponse, DiscoverResponse, FanOutResponse, PeerSummary, StatusResponse, TallyState,
    TestResponse,
};
use tally_config::{Settings, clamp_brightness, clamp_port};
use tally_core::{Appliance, CaptivePortal, ControlCommand, DiscoSession, FanOutReport};
use tokio::net::TcpListener;
use tokio::sync::Notify;
use tracing::{debug, info, warn};

mod page;

/// Time for the save confirmation to reach the browser before restarting.
const RESTART_DELAY: Duration = Duration::from_millis(500);

type Params = HashMap<String, String>;

// ── State ────────────────────────────────────────────────────────────

#[derive(Clone)]
pub struct AppState {
    appliance: Appliance,
    /// Settings the running appliance was built from.
    settings: Arc<Settings>,
    settings_path: Arc<PathBuf>,
    restart: Arc<Notify>,
}

impl AppState {
    pub fn new(
        appliance: Appliance,
        settings: Settings,
        settings_path: PathBuf,
        restart: Arc<Notify>,
    ) -> Self {
        Self {
            appliance,
            settings: Arc::new(settings),
            settings_path: Arc::new(settings_path),
            restart,
        }
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/status", get(status))
        .route("/test", get(test_display))
        .route("/disco", get(disco))
        .route("/disco-stop", get(disco_stop))
        .route("/discover", get(discover))
        .route("/peers", get(peers))
        .route("/test-all", get(test_all))
        .route("/disco-all", get(disco_all))
        .route("/disco-stop-all", get(disco_stop_all))
        .route("/save", post(save))
        .fallback(fallback)
        .with_state(state)
}

/// Serve until `shutdown` resolves.
pub async fn serve(
    listener: TcpListener,
    state: AppState,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> std::io::Result<()> {
    if let Ok(addr) = listener.local_addr() {
        info!(%addr, "control surface listening");
    }
    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown)
        .await
}

// ── Parameter parsing ────────────────────────────────────────────────

/// Leading optional sign and decimal digits; anything else reads as 0.
fn to_int(text: &str) -> i64 {
    let text = text.trim_start();
    let (sign, digits) = match text.strip_prefix('-') {
        Some(rest) => (-1, rest),
        None => (1, text.strip_prefix('+').unwrap_or(text)),
    };
    let magnitude = digits
        .bytes()
        .take_while(u8::is_ascii_digit)
        .fold(0i64, |acc, d| {
            acc.saturating_mul(10).saturating_add(i64::from(d - b'0'))
        });
    sign * magnitude
}

fn int_param(params: &Params, key: &str) -> i64 {
    params.get(key).map_or(0, |v| to_int(v))
}

/// Codes outside 0-3 show as Off.
fn state_param(params: &Params) -> TallyState {
    u8::try_from(int_param(params, "state")).map_or(TallyState::Off, TallyState::from_code)
}

/// Negative durations read as 0; the disco controller clamps the rest.
fn duration_param(params: &Params) -> u64 {
    u64::try_from(int_param(params, "duration")).unwrap_or(0)
}

// ── Local control ────────────────────────────────────────────────────

async fn index(State(state): State<AppState>) -> Html<String> {
    Html(page::index(&state.appliance, &state.settings))
}

async fn status(State(state): State<AppState>) -> Json<StatusResponse> {
    Json(state.appliance.status())
}

async fn test_display(
    State(state): State<AppState>,
    Query(params): Query<Params>,
) -> Json<TestResponse> {
    let control = state.appliance.control();
    if !params.contains_key("state") {
        return Json(TestResponse {
            tally: control.state().tally().state.to_string(),
            state: None,
        });
    }
    let snapshot = control.set_test_state(state_param(&params));
    Json(TestResponse {
        tally: snapshot.state.to_string(),
        state: Some(snapshot.state.code()),
    })
}

async fn disco(
    State(state): State<AppState>,
    Query(params): Query<Params>,
) -> Json<DiscoResponse> {
    let session = state.appliance.control().start_disco(duration_param(&params));
    Json(disco_response(session))
}

async fn disco_stop(State(state): State<AppState>) -> Json<DiscoResponse> {
    let control = state.appliance.control();
    control.stop_disco();
    Json(disco_response(control.disco().session()))
}

fn disco_response(session: DiscoSession) -> DiscoResponse {
    DiscoResponse {
        active: session.active,
        remaining_secs: session.remaining_secs(tokio::time::Instant::now()),
    }
}

// ── Peers ────────────────────────────────────────────────────────────

async fn discover(State(state): State<AppState>) -> Json<DiscoverResponse> {
    match state.appliance.discover().await {
        Ok(peers) => Json(DiscoverResponse {
            peers: peers.iter().map(PeerSummary::from).collect(),
        }),
        Err(e) => {
            warn!(error = %e, "peer discovery failed");
            Json(DiscoverResponse::default())
        }
    }
}

async fn peers(State(state): State<AppState>) -> Json<DiscoverResponse> {
    let peers = state.appliance.directory().peers();
    Json(DiscoverResponse {
        peers: peers.iter().map(PeerSummary::from).collect(),
    })
}

// ── Operator fan-out ─────────────────────────────────────────────────

async fn fan_out(state: &AppState, command: ControlCommand) -> Json<FanOutResponse> {
    // Refresh a stale directory first; an empty one still reaches this device.
    if let Err(e) = state.appliance.discover().await {
        debug!(error = %e, "discovery before fan-out failed");
    }
    let FanOutReport {
        attempted,
        succeeded,
    } = state.appliance.broadcast().fan_out(command).await;
    Json(FanOutResponse {
        command: command.name().to_owned(),
        attempted,
        succeeded,
    })
}

async fn test_all(
    State(state): State<AppState>,
    Query(params): Query<Params>,
) -> Json<FanOutResponse> {
    let command = ControlCommand::SetTestState {
        state: state_param(&params),
    };
    fan_out(&state, command).await
}

async fn disco_all(
    State(state): State<AppState>,
    Query(params): Query<Params>,
) -> Json<FanOutResponse> {
    let command = ControlCommand::StartDisco {
        duration_secs: tally_api::peer::clamp_disco_duration(duration_param(&params)),
    };
    fan_out(&state, command).await
}

async fn disco_stop_all(State(state): State<AppState>) -> Json<FanOutResponse> {
    fan_out(&state, ControlCommand::StopDisco).await
}

// ── Settings ─────────────────────────────────────────────────────────

/// Fold the settings form into `settings`. Absent fields keep their value.
fn apply_form(settings: &mut Settings, form: &Params) {
    let text = |key: &str| form.get(key).map(|v| v.trim().to_owned());
    let flag = |key: &str| form.get(key).map(|v| v == "1");

    if let Some(v) = form.get("tslAddr") {
        settings.tsl.address = u8::try_from(to_int(v).max(0)).unwrap_or(u8::MAX);
    }
    if let Some(v) = text("tslMcast") {
        settings.tsl.multicast = v;
    }
    if let Some(v) = form.get("tslPort") {
        settings.tsl.port = clamp_port(to_int(v));
    }
    if let Some(v) = form.get("maxBright") {
        settings.tsl.max_brightness = clamp_brightness(to_int(v));
    }
    if let Some(v) = text("hostname") {
        settings.network.hostname = v;
    }
    if let Some(v) = flag("dhcp") {
        settings.network.dhcp = v;
    }
    if let Some(v) = text("ip") {
        settings.network.static_ip = v;
    }
    if let Some(v) = text("gw") {
        settings.network.gateway = v;
    }
    if let Some(v) = text("sn") {
        settings.network.subnet = v;
    }
    if let Some(v) = text("dns") {
        settings.network.dns = v;
    }
    if let Some(v) = flag("wifiEn") {
        settings.wifi.enabled = v;
    }
    if let Some(v) = text("wifiSSID") {
        settings.wifi.ssid = v;
    }
    // Passwords keep surrounding spaces; an empty field keeps the stored one.
    if let Some(v) = form.get("wifiPass").filter(|v| !v.is_empty()) {
        settings.wifi.password.clone_from(v);
    }
}

async fn save(State(state): State<AppState>, Form(form): Form<Params>) -> Response {
    let mut settings = (*state.settings).clone();
    apply_form(&mut settings, &form);

    match tally_config::save_to(&settings, &state.settings_path) {
        Ok(saved) => {
            info!(
                path = %state.settings_path.display(),
                hostname = %saved.network.hostname,
                tsl_address = saved.tsl.address,
                "settings saved, restarting"
            );
            let restart = Arc::clone(&state.restart);
            tokio::spawn(async move {
                tokio::time::sleep(RESTART_DELAY).await;
                restart.notify_one();
            });
            Html(page::saved()).into_response()
        }
        Err(e) => {
            warn!(error = %e, "settings rejected");
            (StatusCode::BAD_REQUEST, Html(page::rejected(&e.to_string()))).into_response()
        }
    }
}

// ── Captive portal ───────────────────────────────────────────────────

async fn fallback(State(state): State<AppState>, uri: Uri) -> Response {
    let path = uri.path();
    let Some(portal) = state.appliance.captive_portal() else {
        return StatusCode::NOT_FOUND.into_response();
    };
    if CaptivePortal::is_probe(path) {
        debug!(%path, "connectivity probe");
    }
    match portal.redirect_for(path) {
        Some(target) => (StatusCode::FOUND, [(header::LOCATION, target)]).into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::net::{Ipv4Addr, SocketAddr};

    use pretty_assertions::assert_eq;
    use secrecy::SecretString;
    use tally_api::PeerClient;
    use tally_core::{
        AccessPointInfo, ApplianceConfig, CoreError, DiscoveredService, DiscoveryProvider,
        LinkEvent, NetworkDriver, Platform, StationConfig, WiredConfig,
    };
    use tempfile::TempDir;
    use tokio::sync::mpsc;
    use url::Url;

    use super::*;
    use crate::platform::LogIndicator;

    struct IdleDriver;

    impl NetworkDriver for IdleDriver {
        fn hardware_id(&self) -> [u8; 6] {
            [0, 0, 0, 1, 2, 3]
        }
        fn start_wired(&self, _: &WiredConfig, _: &str) -> Result<(), CoreError> {
            Ok(())
        }
        fn stop_wired(&self) {}
        fn start_station(&self, _: &StationConfig, _: &str) -> Result<(), CoreError> {
            Ok(())
        }
        fn stop_station(&self) {}
        fn start_access_point(&self, _: &str, _: &SecretString) -> Result<(), CoreError> {
            Ok(())
        }
        fn stop_access_point(&self) {}
    }

    struct NoPeers;

    impl DiscoveryProvider for NoPeers {
        fn browse(&self, _: &str, _: Duration) -> Result<Vec<DiscoveredService>, CoreError> {
            Ok(Vec::new())
        }
    }

    struct Server {
        base: Url,
        appliance: Appliance,
        restart: Arc<Notify>,
        dir: TempDir,
        _events: mpsc::UnboundedSender<LinkEvent>,
    }

    impl Server {
        fn settings_path(&self) -> PathBuf {
            self.dir.path().join("config.toml")
        }
    }

    async fn server() -> Server {
        let (tx, rx) = mpsc::unbounded_channel();
        let platform = Platform {
            indicator: Arc::new(LogIndicator::default()),
            network: Arc::new(IdleDriver),
            link_events: rx,
            discovery: Arc::new(NoPeers),
            mdns: None,
        };
        let appliance = Appliance::new(ApplianceConfig::default(), platform).unwrap();
        let dir = tempfile::tempdir().unwrap();
        let restart = Arc::new(Notify::new());
        let state = AppState::new(
            appliance.clone(),
            Settings::default(),
            dir.path().join("config.toml"),
            Arc::clone(&restart),
        );

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr: SocketAddr = listener.local_addr().unwrap();
        tokio::spawn(serve(listener, state, std::future::pending()));

        Server {
            base: PeerClient::base_url(addr.ip(), addr.port()).unwrap(),
            appliance,
            restart,
            dir,
            _events: tx,
        }
    }

    fn client() -> PeerClient {
        PeerClient::new(&tally_api::TransportConfig::default()).unwrap()
    }

    fn raw_client() -> reqwest::Client {
        reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .unwrap()
    }

    #[test]
    fn to_int_reads_leading_digits() {
        assert_eq!(to_int("42"), 42);
        assert_eq!(to_int(" -7"), -7);
        assert_eq!(to_int("+3"), 3);
        assert_eq!(to_int("12abc"), 12);
        assert_eq!(to_int("abc"), 0);
        assert_eq!(to_int(""), 0);
        assert_eq!(to_int("99999999999999999999999"), i64::MAX);
    }

    #[test]
    fn out_of_range_state_is_off() {
        let params: Params = [("state".to_owned(), "9".to_owned())].into();
        assert_eq!(state_param(&params), TallyState::Off);
        let params: Params = [("state".to_owned(), "-1".to_owned())].into();
        assert_eq!(state_param(&params), TallyState::Off);
        assert_eq!(state_param(&Params::new()), TallyState::Off);
    }

    #[test]
    fn form_fields_fold_into_settings() {
        let mut settings = Settings::default();
        let form: Params = [
            ("tslAddr", "12"),
            ("tslPort", "0"),
            ("maxBright", "900"),
            ("hostname", " cam-3 "),
            ("dhcp", "0"),
            ("wifiEn", "1"),
            ("wifiSSID", "Studio"),
            ("wifiPass", ""),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_owned(), v.to_owned()))
        .collect();

        apply_form(&mut settings, &form);

        assert_eq!(settings.tsl.address, 12);
        assert_eq!(settings.tsl.port, 1);
        assert_eq!(settings.tsl.max_brightness, 255);
        assert_eq!(settings.network.hostname, "cam-3");
        assert!(!settings.network.dhcp);
        assert!(settings.wifi.enabled);
        assert_eq!(settings.wifi.ssid, "Studio");
        assert_eq!(settings.wifi.password, "");
    }

    #[tokio::test]
    async fn status_reports_device() {
        let s = server().await;
        let status = client().status(&s.base).await.unwrap();
        assert_eq!(status.tally, "Off");
        assert_eq!(status.connection, "Disconnected");
        assert_eq!(status.hostname, "ESP-TSL-Tally");
        assert_eq!(status.version, env!("CARGO_PKG_VERSION"));
    }

    #[tokio::test]
    async fn test_endpoint_sets_state() {
        let s = server().await;
        let resp = client()
            .set_test_state(&s.base, TallyState::Preview)
            .await
            .unwrap();
        assert_eq!(resp.tally, "Preview");
        assert_eq!(resp.state, Some(2));
        assert_eq!(s.appliance.state().tally().state, TallyState::Preview);

        let url = s.base.join("test?state=banana").unwrap();
        let resp: TestResponse = raw_client().get(url).send().await.unwrap().json().await.unwrap();
        assert_eq!(resp.tally, "Off");
    }

    #[tokio::test]
    async fn test_without_state_reports_current() {
        let s = server().await;
        s.appliance.control().set_test_state(TallyState::Program);
        let url = s.base.join("test").unwrap();
        let resp: TestResponse = raw_client().get(url).send().await.unwrap().json().await.unwrap();
        assert_eq!(resp.tally, "Program");
        assert_eq!(resp.state, None);
    }

    #[tokio::test]
    async fn disco_clamps_and_stops() {
        let s = server().await;
        let url = s.base.join("disco?duration=600").unwrap();
        let resp: DiscoResponse = raw_client().get(url).send().await.unwrap().json().await.unwrap();
        assert!(resp.active);
        assert_eq!(resp.remaining_secs, 60);

        let resp = client().stop_disco(&s.base).await.unwrap();
        assert!(!resp.active);
        assert_eq!(resp.remaining_secs, 0);
    }

    #[tokio::test]
    async fn fan_out_without_peers_reaches_this_device() {
        let s = server().await;
        let report = client()
            .test_all(&s.base, TallyState::Unselected)
            .await
            .unwrap();
        assert_eq!(
            report,
            FanOutResponse {
                command: "test".into(),
                attempted: 1,
                succeeded: 1,
            }
        );
        assert_eq!(s.appliance.state().tally().state, TallyState::Unselected);
        assert!(client().peers(&s.base).await.unwrap().peers.is_empty());
    }

    #[tokio::test]
    async fn save_persists_and_requests_restart() {
        let s = server().await;
        let resp = raw_client()
            .post(s.base.join("save").unwrap())
            .form(&[("tslAddr", "7"), ("hostname", "studio-cam")])
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 200);

        let saved = tally_config::load_from(&s.settings_path()).unwrap();
        assert_eq!(saved.tsl.address, 7);
        assert_eq!(saved.network.hostname, "studio-cam");
        tokio::time::timeout(Duration::from_secs(3), s.restart.notified())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn invalid_save_is_rejected() {
        let s = server().await;
        let resp = raw_client()
            .post(s.base.join("save").unwrap())
            .form(&[("tslAddr", "200")])
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 400);
        assert!(!s.settings_path().exists());
    }

    #[tokio::test]
    async fn unknown_paths_redirect_only_in_access_point_mode() {
        let s = server().await;
        let probe = s.base.join("generate_204").unwrap();
        let resp = raw_client().get(probe.clone()).send().await.unwrap();
        assert_eq!(resp.status(), 404);

        s.appliance.state().update_connectivity(|c| {
            c.access_point = Some(AccessPointInfo {
                ssid: "TSL-Tally-010203".into(),
                address: Ipv4Addr::new(192, 168, 4, 1),
            });
        });
        let resp = raw_client().get(probe).send().await.unwrap();
        assert_eq!(resp.status(), 302);
        assert_eq!(resp.headers()[header::LOCATION.as_str()], "/");

        let page = raw_client().get(s.base.clone()).send().await.unwrap();
        assert_eq!(page.status(), 200);
        assert!(page.text().await.unwrap().contains("TSL-Tally-010203"));
    }
}

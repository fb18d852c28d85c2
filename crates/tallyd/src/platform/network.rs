// ── Host network driver ──
//
// Drives the host's adapters with iproute2 and NetworkManager. Every
// started interface gets a monitor task that polls its IPv4 address and
// reports changes as link events.

use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use secrecy::{ExposeSecret, SecretString};
use tally_core::{
    Addressing, CoreError, Interface, LinkEvent, LinkEventKind, NetworkDriver, StaticAddressing,
    StationConfig, WiredConfig,
};
use tokio::process::Command;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const SYS_NET: &str = "/sys/class/net";
const POLL_INTERVAL: Duration = Duration::from_millis(500);
/// NetworkManager connection name for the fallback hotspot.
const AP_CONNECTION: &str = "tallyd-ap";

/// One host command line. Arguments may hold secrets and are never logged.
struct HostCommand {
    program: &'static str,
    args: Vec<String>,
}

impl HostCommand {
    fn new(program: &'static str, args: &[&str]) -> Self {
        Self {
            program,
            args: args.iter().map(|a| (*a).to_owned()).collect(),
        }
    }

    async fn run(&self) -> Result<String, CoreError> {
        let output = Command::new(self.program)
            .args(&self.args)
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| CoreError::Adapter {
                message: format!("{}: {e}", self.program),
            })?;
        if output.status.success() {
            Ok(String::from_utf8_lossy(&output.stdout).into_owned())
        } else {
            Err(CoreError::Adapter {
                message: format!(
                    "{} exited with {}: {}",
                    self.program,
                    output.status,
                    String::from_utf8_lossy(&output.stderr).trim()
                ),
            })
        }
    }
}

// ── Driver ───────────────────────────────────────────────────────────

pub struct HostDriver {
    wired: Option<String>,
    wireless: Option<String>,
    hardware_id: [u8; 6],
    events: mpsc::UnboundedSender<LinkEvent>,
    monitors: Mutex<HashMap<Interface, CancellationToken>>,
}

impl HostDriver {
    /// Pick adapters from `/sys/class/net`. `wired` overrides the
    /// automatic choice of the first physical non-wireless adapter.
    pub fn new(wired: Option<String>) -> (Self, mpsc::UnboundedReceiver<LinkEvent>) {
        let root = Path::new(SYS_NET);
        let adapters = list_adapters(root);
        let wired = wired.or_else(|| {
            adapters
                .iter()
                .find(|a| a.physical && !a.wireless)
                .map(|a| a.name.clone())
        });
        let wireless = adapters.iter().find(|a| a.wireless).map(|a| a.name.clone());

        let hardware_id = wired
            .iter()
            .chain(wireless.iter())
            .find_map(|name| {
                std::fs::read_to_string(root.join(name).join("address"))
                    .ok()
                    .and_then(|mac| parse_mac(&mac))
            })
            .unwrap_or_else(|| {
                warn!("no adapter MAC address readable, access point name will not be unique");
                [0; 6]
            });

        info!(wired = ?wired, wireless = ?wireless, "network adapters");
        let (events, rx) = mpsc::unbounded_channel();
        (
            Self {
                wired,
                wireless,
                hardware_id,
                events,
                monitors: Mutex::default(),
            },
            rx,
        )
    }

    fn monitors(&self) -> MutexGuard<'_, HashMap<Interface, CancellationToken>> {
        self.monitors.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn wireless(&self) -> Result<&str, CoreError> {
        self.wireless.as_deref().ok_or_else(|| CoreError::Adapter {
            message: "no wireless adapter".into(),
        })
    }

    /// Run `setup` in order, then report `device`'s address as `interface`
    /// until stopped.
    fn spawn_monitor(&self, interface: Interface, device: &str, setup: Vec<HostCommand>) {
        let cancel = CancellationToken::new();
        if let Some(previous) = self.monitors().insert(interface, cancel.clone()) {
            previous.cancel();
        }
        let events = self.events.clone();
        let device = device.to_owned();

        tokio::spawn(async move {
            for command in &setup {
                let result = tokio::select! {
                    biased;
                    () = cancel.cancelled() => return,
                    result = command.run() => result,
                };
                if let Err(e) = result {
                    warn!(%interface, %device, error = %e, "adapter setup failed");
                }
            }
            watch_address(interface, &device, &events, &cancel).await;
        });
    }

    /// Returns whether `interface` was being monitored.
    fn stop_monitor(&self, interface: Interface) -> bool {
        let Some(token) = self.monitors().remove(&interface) else {
            return false;
        };
        token.cancel();
        true
    }

    fn spawn_teardown(command: HostCommand) {
        tokio::spawn(async move {
            if let Err(e) = command.run().await {
                debug!(error = %e, "adapter teardown failed");
            }
        });
    }
}

impl Drop for HostDriver {
    fn drop(&mut self) {
        for (_, token) in self.monitors().drain() {
            token.cancel();
        }
    }
}

impl NetworkDriver for HostDriver {
    fn hardware_id(&self) -> [u8; 6] {
        self.hardware_id
    }

    fn start_wired(&self, config: &WiredConfig, hostname: &str) -> Result<(), CoreError> {
        let device = config
            .interface
            .as_deref()
            .or(self.wired.as_deref())
            .ok_or_else(|| CoreError::Adapter {
                message: "no wired adapter".into(),
            })?;

        let setup = match config.addressing {
            Addressing::Dhcp => Vec::new(),
            Addressing::Static(s) => {
                info!(
                    %device,
                    ip = %s.ip,
                    gateway = %s.gateway,
                    dns = %s.dns,
                    "applying static address"
                );
                static_commands(device, &s)
            }
        };
        debug!(%device, %hostname, "starting wired");
        self.spawn_monitor(Interface::Wired, device, setup);
        Ok(())
    }

    fn stop_wired(&self) {
        self.stop_monitor(Interface::Wired);
    }

    fn start_station(&self, config: &StationConfig, hostname: &str) -> Result<(), CoreError> {
        let device = self.wireless()?;
        debug!(%device, %hostname, ssid = %config.ssid, "starting wireless client");
        let connect = station_command(device, &config.ssid, &config.password);
        self.spawn_monitor(Interface::Wireless, device, vec![connect]);
        Ok(())
    }

    fn stop_station(&self) {
        if !self.stop_monitor(Interface::Wireless) {
            return;
        }
        if let Some(device) = self.wireless.as_deref() {
            Self::spawn_teardown(HostCommand::new("nmcli", &["device", "disconnect", device]));
        }
    }

    fn start_access_point(&self, ssid: &str, password: &SecretString) -> Result<(), CoreError> {
        let device = self.wireless().map_err(|e| CoreError::AccessPointStart {
            reason: e.to_string(),
        })?;
        let hotspot = HostCommand::new(
            "nmcli",
            &[
                "device",
                "wifi",
                "hotspot",
                "ifname",
                device,
                "con-name",
                AP_CONNECTION,
                "ssid",
                ssid,
                "password",
                password.expose_secret(),
            ],
        );
        self.spawn_monitor(Interface::AccessPoint, device, vec![hotspot]);
        Ok(())
    }

    fn stop_access_point(&self) {
        if !self.stop_monitor(Interface::AccessPoint) {
            return;
        }
        Self::spawn_teardown(HostCommand::new(
            "nmcli",
            &["connection", "down", AP_CONNECTION],
        ));
    }
}

/// Address, default route and resolver for a statically addressed device.
fn static_commands(device: &str, addressing: &StaticAddressing) -> Vec<HostCommand> {
    let cidr = format!("{}/{}", addressing.ip, addressing.prefix_len());
    let gateway = addressing.gateway.to_string();
    let dns = addressing.dns.to_string();
    vec![
        HostCommand::new("ip", &["addr", "replace", cidr.as_str(), "dev", device]),
        HostCommand::new(
            "ip",
            &["route", "replace", "default", "via", gateway.as_str(), "dev", device],
        ),
        HostCommand::new("resolvectl", &["dns", device, dns.as_str()]),
    ]
}

fn station_command(device: &str, ssid: &str, password: &SecretString) -> HostCommand {
    let password = password.expose_secret();
    let mut args = vec!["device", "wifi", "connect", ssid];
    if !password.is_empty() {
        args.extend(["password", password]);
    }
    args.extend(["ifname", device]);
    HostCommand::new("nmcli", &args)
}

// ── Address monitor ──────────────────────────────────────────────────

async fn watch_address(
    interface: Interface,
    device: &str,
    events: &mpsc::UnboundedSender<LinkEvent>,
    cancel: &CancellationToken,
) {
    let query = HostCommand::new("ip", &["-4", "-o", "addr", "show", "dev", device]);
    let mut current: Option<Ipv4Addr> = None;
    let mut ticker = tokio::time::interval(POLL_INTERVAL);

    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            _ = ticker.tick() => {
                let found = query.run().await.ok().and_then(|out| parse_inet(&out));
                if found != current {
                    current = found;
                    let kind = address_event(interface, found);
                    if events.send(LinkEvent::new(interface, kind)).is_err() {
                        break;
                    }
                }
            }
        }
    }
}

fn address_event(interface: Interface, address: Option<Ipv4Addr>) -> LinkEventKind {
    match (interface, address) {
        (Interface::AccessPoint, Some(ip)) => LinkEventKind::ApStarted(ip),
        (Interface::AccessPoint, None) => LinkEventKind::ApStopped,
        (_, Some(ip)) => LinkEventKind::GotAddress(ip),
        (_, None) => LinkEventKind::LostAddress,
    }
}

// ── Host inspection ──────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
struct Adapter {
    name: String,
    wireless: bool,
    /// Backed by a device rather than virtual (bridge, veth, tun).
    physical: bool,
}

/// Network adapters under `root`, loopback excluded, sorted by name.
fn list_adapters(root: &Path) -> Vec<Adapter> {
    let Ok(entries) = std::fs::read_dir(root) else {
        return Vec::new();
    };
    let mut adapters: Vec<Adapter> = entries
        .filter_map(Result::ok)
        .filter_map(|entry| {
            let name = entry.file_name().into_string().ok()?;
            (name != "lo").then(|| Adapter {
                wireless: entry.path().join("wireless").exists(),
                physical: entry.path().join("device").exists(),
                name,
            })
        })
        .collect();
    adapters.sort_by(|a, b| a.name.cmp(&b.name));
    adapters
}

/// First IPv4 address in `ip -4 -o addr show` output.
fn parse_inet(output: &str) -> Option<Ipv4Addr> {
    output.lines().find_map(|line| {
        let mut tokens = line.split_whitespace();
        tokens.find(|t| *t == "inet")?;
        tokens.next()?.split('/').next()?.parse().ok()
    })
}

fn parse_mac(text: &str) -> Option<[u8; 6]> {
    let mut mac = [0u8; 6];
    let mut parts = text.trim().split(':');
    for byte in &mut mac {
        *byte = u8::from_str_radix(parts.next()?, 16).ok()?;
    }
    parts.next().is_none().then_some(mac)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn parses_ip_addr_output() {
        let out = "2: eth0    inet 10.0.0.12/24 brd 10.0.0.255 scope global dynamic eth0\\       valid_lft 86000sec preferred_lft 86000sec\n";
        assert_eq!(parse_inet(out), Some(Ipv4Addr::new(10, 0, 0, 12)));
        assert_eq!(parse_inet(""), None);
    }

    #[test]
    fn parses_mac_address() {
        assert_eq!(
            parse_mac("dc:a6:32:0a:bc:ef\n"),
            Some([0xdc, 0xa6, 0x32, 0x0a, 0xbc, 0xef])
        );
        assert_eq!(parse_mac("dc:a6:32"), None);
        assert_eq!(parse_mac("dc:a6:32:0a:bc:ef:00"), None);
        assert_eq!(parse_mac("zz:a6:32:0a:bc:ef"), None);
    }

    #[test]
    fn lists_adapters_from_sysfs() {
        let root = tempfile::tempdir().unwrap();
        for (name, dirs) in [
            ("lo", &[][..]),
            ("wlan0", &["device", "wireless"][..]),
            ("eth0", &["device"][..]),
            ("docker0", &[][..]),
        ] {
            std::fs::create_dir(root.path().join(name)).unwrap();
            for dir in dirs {
                std::fs::create_dir(root.path().join(name).join(dir)).unwrap();
            }
        }

        let adapters = list_adapters(root.path());
        let names: Vec<_> = adapters.iter().map(|a| a.name.as_str()).collect();
        assert_eq!(names, vec!["docker0", "eth0", "wlan0"]);
        assert!(adapters[2].wireless);
        assert!(adapters[1].physical && !adapters[1].wireless);
        assert!(!adapters[0].physical);
    }

    #[test]
    fn open_network_omits_password() {
        let open = station_command("wlan0", "Studio", &SecretString::from(String::new()));
        assert!(!open.args.iter().any(|a| a == "password"));

        let secured = station_command("wlan0", "Studio", &SecretString::from("pw".to_owned()));
        assert_eq!(
            secured.args,
            ["device", "wifi", "connect", "Studio", "password", "pw", "ifname", "wlan0"]
        );
    }

    #[test]
    fn static_addressing_sets_resolver() {
        let addressing = StaticAddressing {
            ip: Ipv4Addr::new(192, 168, 1, 100),
            gateway: Ipv4Addr::new(192, 168, 1, 1),
            subnet: Ipv4Addr::new(255, 255, 255, 0),
            dns: Ipv4Addr::new(192, 168, 1, 53),
        };
        let commands = static_commands("eth0", &addressing);
        let programs: Vec<_> = commands.iter().map(|c| c.program).collect();
        assert_eq!(programs, ["ip", "ip", "resolvectl"]);
        assert_eq!(commands[0].args, ["addr", "replace", "192.168.1.100/24", "dev", "eth0"]);
        assert_eq!(commands[2].args, ["dns", "eth0", "192.168.1.53"]);
    }

    #[test]
    fn access_point_address_maps_to_ap_events() {
        let ip = Ipv4Addr::new(10, 42, 0, 1);
        assert_eq!(
            address_event(Interface::AccessPoint, Some(ip)),
            LinkEventKind::ApStarted(ip)
        );
        assert_eq!(
            address_event(Interface::Wired, None),
            LinkEventKind::LostAddress
        );
    }
}

//! Persisted settings for a tally light.
//!
//! One TOML file at the platform config dir, overlaid by `TALLY_*`
//! environment variables, validated on load and on save, and translated
//! to `tally_core::ApplianceConfig` for the running appliance.

use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use tally_core::config::{DEFAULT_HTTP_PORT, DEFAULT_MAX_BRIGHTNESS, DEFAULT_TSL_PORT};
use tally_core::{
    AccessPointConfig, Addressing, ApplianceConfig, ConnectivityConfig, DiscoveryConfig,
    ListenerConfig, Palette, StaticAddressing, StationConfig, WiredConfig,
};

/// Highest TSL receiver address.
pub const MAX_TSL_ADDRESS: u8 = 126;

// ── Error ───────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid {field}: {reason}")]
    Validation { field: String, reason: String },

    #[error("failed to serialize config: {0}")]
    Serialization(#[from] toml::ser::Error),

    #[error("config loading failed: {0}")]
    Figment(Box<figment::Error>),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        Self::Figment(Box::new(err))
    }
}

fn invalid(field: &str, reason: impl Into<String>) -> ConfigError {
    ConfigError::Validation {
        field: field.into(),
        reason: reason.into(),
    }
}

// ── TOML config structs ─────────────────────────────────────────────

/// Top-level settings file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct Settings {
    pub tsl: TslSettings,
    pub network: NetworkSettings,
    pub wifi: WifiSettings,
    pub access_point: AccessPointSettings,
    pub timeouts: TimeoutSettings,
    pub palette: Palette,
    pub http: HttpSettings,
    pub dns: DnsSettings,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct TslSettings {
    /// Receiver address, 0-126.
    pub address: u8,
    /// Multicast group, or a unicast address to listen on.
    pub multicast: String,
    pub port: u16,
    /// Brightness that TSL level 3 maps to.
    pub max_brightness: u8,
}

impl Default for TslSettings {
    fn default() -> Self {
        Self {
            address: 0,
            multicast: "239.1.2.3".into(),
            port: DEFAULT_TSL_PORT,
            max_brightness: DEFAULT_MAX_BRIGHTNESS,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct NetworkSettings {
    pub hostname: String,
    pub dhcp: bool,
    pub static_ip: String,
    pub gateway: String,
    pub subnet: String,
    pub dns: String,
    /// Wired interface name; unset lets the driver pick.
    pub interface: Option<String>,
}

impl Default for NetworkSettings {
    fn default() -> Self {
        Self {
            hostname: "ESP-TSL-Tally".into(),
            dhcp: true,
            static_ip: "192.168.1.100".into(),
            gateway: "192.168.1.1".into(),
            subnet: "255.255.255.0".into(),
            dns: "8.8.8.8".into(),
            interface: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct WifiSettings {
    pub enabled: bool,
    pub ssid: String,
    pub password: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct AccessPointSettings {
    pub ssid_prefix: String,
    pub password: String,
}

impl Default for AccessPointSettings {
    fn default() -> Self {
        Self {
            ssid_prefix: "TSL-Tally".into(),
            password: "tallytally".into(),
        }
    }
}

/// All durations in whole seconds.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct TimeoutSettings {
    pub wired: u64,
    pub wireless: u64,
    pub access_point: u64,
    pub rearbitrate: u64,
    pub peer_request: u64,
    pub discovery_browse: u64,
    pub discovery_min_interval: u64,
    /// Zero disables background discovery.
    pub discovery_background: u64,
}

impl Default for TimeoutSettings {
    fn default() -> Self {
        Self {
            wired: 10,
            wireless: 10,
            access_point: 10,
            rearbitrate: 15,
            peer_request: 5,
            discovery_browse: 3,
            discovery_min_interval: 10,
            discovery_background: 60,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct HttpSettings {
    pub port: u16,
}

impl Default for HttpSettings {
    fn default() -> Self {
        Self {
            port: DEFAULT_HTTP_PORT,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct DnsSettings {
    /// Captive DNS responder, active only in access point mode.
    pub enabled: bool,
    pub port: u16,
}

impl Default for DnsSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            port: 53,
        }
    }
}

// ── Clamping ────────────────────────────────────────────────────────

/// Clamp a form value into a port number, 1-65535.
pub fn clamp_port(value: i64) -> u16 {
    u16::try_from(value.clamp(1, i64::from(u16::MAX))).unwrap_or(u16::MAX)
}

/// Clamp a form value into a brightness, 1-255.
pub fn clamp_brightness(value: i64) -> u8 {
    u8::try_from(value.clamp(1, i64::from(u8::MAX))).unwrap_or(u8::MAX)
}

fn parse_ipv4(field: &str, value: &str) -> Result<Ipv4Addr, ConfigError> {
    value
        .trim()
        .parse()
        .map_err(|_| invalid(field, format!("not an IPv4 address: '{value}'")))
}

// ── Validation ──────────────────────────────────────────────────────

impl Settings {
    /// Clamp out-of-range numbers and reject values that cannot work.
    pub fn validated(mut self) -> Result<Self, ConfigError> {
        if self.tsl.address > MAX_TSL_ADDRESS {
            return Err(invalid(
                "tsl.address",
                format!("must be 0-{MAX_TSL_ADDRESS}, got {}", self.tsl.address),
            ));
        }
        self.tsl.port = self.tsl.port.max(1);
        self.tsl.max_brightness = self.tsl.max_brightness.max(1);
        self.http.port = self.http.port.max(1);
        self.dns.port = self.dns.port.max(1);

        parse_ipv4("tsl.multicast", &self.tsl.multicast)?;
        if !self.network.dhcp {
            parse_ipv4("network.static_ip", &self.network.static_ip)?;
            parse_ipv4("network.gateway", &self.network.gateway)?;
            parse_ipv4("network.subnet", &self.network.subnet)?;
            parse_ipv4("network.dns", &self.network.dns)?;
        }

        self.network.hostname = self.network.hostname.trim().to_owned();
        if self.network.hostname.is_empty() {
            return Err(invalid("network.hostname", "must not be empty"));
        }
        Ok(self)
    }

    /// The wireless client credentials, if wireless is enabled and named.
    pub fn station(&self) -> Option<StationConfig> {
        (self.wifi.enabled && !self.wifi.ssid.is_empty()).then(|| StationConfig {
            ssid: self.wifi.ssid.clone(),
            password: SecretString::from(self.wifi.password.clone()),
        })
    }

    /// Build the runtime appliance config.
    pub fn to_appliance_config(&self) -> Result<ApplianceConfig, ConfigError> {
        let secs = Duration::from_secs;
        let t = &self.timeouts;

        let addressing = if self.network.dhcp {
            Addressing::Dhcp
        } else {
            Addressing::Static(StaticAddressing {
                ip: parse_ipv4("network.static_ip", &self.network.static_ip)?,
                gateway: parse_ipv4("network.gateway", &self.network.gateway)?,
                subnet: parse_ipv4("network.subnet", &self.network.subnet)?,
                dns: parse_ipv4("network.dns", &self.network.dns)?,
            })
        };

        Ok(ApplianceConfig {
            listener: ListenerConfig {
                address: self.tsl.address,
                group: parse_ipv4("tsl.multicast", &self.tsl.multicast)?,
                port: self.tsl.port,
                max_brightness: self.tsl.max_brightness,
                ..ListenerConfig::default()
            },
            connectivity: ConnectivityConfig {
                hostname: self.network.hostname.clone(),
                wired: WiredConfig {
                    interface: self.network.interface.clone(),
                    addressing,
                },
                station: self.station(),
                access_point: AccessPointConfig {
                    ssid_prefix: self.access_point.ssid_prefix.clone(),
                    password: SecretString::from(self.access_point.password.clone()),
                },
                wired_timeout: secs(t.wired),
                station_timeout: secs(t.wireless),
                access_point_timeout: secs(t.access_point),
                rearbitrate_after: secs(t.rearbitrate),
            },
            discovery: DiscoveryConfig {
                http_port: self.http.port,
                browse_timeout: secs(t.discovery_browse),
                on_demand_interval: secs(t.discovery_min_interval),
                background_interval: secs(t.discovery_background),
                peer_timeout: secs(t.peer_request),
                ..DiscoveryConfig::default()
            },
            palette: self.palette,
        })
    }
}

// ── Config file path ────────────────────────────────────────────────

/// Resolve the settings file path via XDG / platform conventions.
pub fn config_path() -> PathBuf {
    ProjectDirs::from("tv", "videowalrus", "tallyd").map_or_else(
        || PathBuf::from("/etc/tallyd/config.toml"),
        |dirs| dirs.config_dir().join("config.toml"),
    )
}

// ── Loading ─────────────────────────────────────────────────────────

/// Load settings from the canonical path + environment.
pub fn load() -> Result<Settings, ConfigError> {
    load_from(&config_path())
}

/// Load settings from `path` + environment. A missing file yields defaults.
///
/// Nested keys use a double underscore: `TALLY_TSL__ADDRESS=5`.
pub fn load_from(path: &Path) -> Result<Settings, ConfigError> {
    let settings: Settings = Figment::new()
        .merge(Serialized::defaults(Settings::default()))
        .merge(Toml::file(path))
        .merge(Env::prefixed("TALLY_").split("__"))
        .extract()?;
    settings.validated()
}

// ── Saving ──────────────────────────────────────────────────────────

/// Validate and write settings to the canonical path.
pub fn save(settings: &Settings) -> Result<Settings, ConfigError> {
    save_to(settings, &config_path())
}

/// Validate and write settings to `path`, returning what was written.
pub fn save_to(settings: &Settings, path: &Path) -> Result<Settings, ConfigError> {
    let settings = settings.clone().validated()?;
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, toml::to_string_pretty(&settings)?)?;
    Ok(settings)
}

/// Factory reset: drop the settings file at the canonical path.
pub fn reset() -> Result<Settings, ConfigError> {
    reset_at(&config_path())
}

/// Factory reset for the file at `path`.
pub fn reset_at(path: &Path) -> Result<Settings, ConfigError> {
    match std::fs::remove_file(path) {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => return Err(e.into()),
    }
    Ok(Settings::default())
}

//! CLI error types with miette diagnostics.
//!
//! Maps core, config and client errors into user-facing errors with
//! actionable help text and a process exit code.

use miette::Diagnostic;
use thiserror::Error;

use tally_config::ConfigError;
use tally_core::CoreError;

pub mod exit_code {
    pub const GENERAL: i32 = 1;
    pub const USAGE: i32 = 2;
    pub const CONFIG: i32 = 3;
    pub const NETWORK: i32 = 4;
    pub const CONNECTION: i32 = 7;
    pub const TIMEOUT: i32 = 8;
}

#[derive(Debug, Error, Diagnostic)]
pub enum CliError {
    // ── Configuration ────────────────────────────────────────────────
    #[error("Invalid setting {field}: {reason}")]
    #[diagnostic(
        code(tallyd::invalid_setting),
        help(
            "Fix the value in {path}, or restore defaults with: tallyd config reset"
        )
    )]
    InvalidSetting {
        field: String,
        reason: String,
        path: String,
    },

    #[error("Could not read settings from {path}")]
    #[diagnostic(
        code(tallyd::config),
        help("Check the TOML syntax and any TALLY_* environment variables.")
    )]
    Config {
        path: String,
        #[source]
        source: ConfigError,
    },

    // ── Networking ───────────────────────────────────────────────────
    #[error("Access point failed to start: {reason}")]
    #[diagnostic(
        code(tallyd::access_point),
        help(
            "No network path is left. Check that a wireless adapter is present\n\
             and that NetworkManager can create hotspots (nmcli device wifi hotspot)."
        )
    )]
    AccessPoint { reason: String },

    #[error("Could not listen on {addr}")]
    #[diagnostic(
        code(tallyd::bind),
        help(
            "Another process may be using the port, or binding it needs privileges.\n\
             Set http.port in the settings file or TALLY_HTTP__PORT."
        )
    )]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Service discovery failed: {message}")]
    #[diagnostic(code(tallyd::discovery))]
    Discovery { message: String },

    // ── Device control surface ───────────────────────────────────────
    #[error("Could not reach device: {message}")]
    #[diagnostic(
        code(tallyd::connection),
        help("Check that tallyd is running there and the --daemon URL is right.")
    )]
    Connection { message: String },

    #[error("Device rejected the request (HTTP {status}): {message}")]
    #[diagnostic(code(tallyd::rejected))]
    Rejected { status: u16, message: String },

    #[error("Request timed out after {seconds}s")]
    #[diagnostic(
        code(tallyd::timeout),
        help("Increase --timeout or check device responsiveness.")
    )]
    Timeout { seconds: u64 },

    // ── Validation ───────────────────────────────────────────────────
    #[error("Invalid value for {field}: {reason}")]
    #[diagnostic(code(tallyd::validation))]
    Validation { field: String, reason: String },

    // ── IO / Serialization ───────────────────────────────────────────
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("Could not render output: {0}")]
    #[diagnostic(code(tallyd::json))]
    Json(#[from] serde_json::Error),

    #[error("Could not render settings: {0}")]
    #[diagnostic(code(tallyd::toml))]
    Toml(#[from] toml::ser::Error),

    #[error("Internal error: {0}")]
    #[diagnostic(code(tallyd::internal))]
    Internal(String),
}

impl CliError {
    /// Map this error to an exit code for process termination.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::InvalidSetting { .. } | Self::Config { .. } => exit_code::CONFIG,
            Self::AccessPoint { .. } | Self::Bind { .. } | Self::Discovery { .. } => {
                exit_code::NETWORK
            }
            Self::Connection { .. } | Self::Rejected { .. } => exit_code::CONNECTION,
            Self::Timeout { .. } => exit_code::TIMEOUT,
            Self::Validation { .. } => exit_code::USAGE,
            Self::Io(_) | Self::Json(_) | Self::Toml(_) | Self::Internal(_) => exit_code::GENERAL,
        }
    }

    /// Attach the settings file path to a config failure.
    pub fn config(err: ConfigError, path: &std::path::Path) -> Self {
        let path = path.display().to_string();
        match err {
            ConfigError::Validation { field, reason } => Self::InvalidSetting {
                field,
                reason,
                path,
            },
            source => Self::Config { path, source },
        }
    }
}

// ── CoreError → CliError mapping ─────────────────────────────────────

impl From<CoreError> for CliError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::AccessPointStart { reason } => CliError::AccessPoint { reason },
            CoreError::Discovery { message } => CliError::Discovery { message },
            CoreError::Timeout { timeout_secs } => CliError::Timeout {
                seconds: timeout_secs,
            },
            CoreError::PeerCommand { peer, message } => CliError::Connection {
                message: format!("{peer}: {message}"),
            },
            CoreError::Config { message } => CliError::Validation {
                field: "config".into(),
                reason: message,
            },
            other => CliError::Internal(other.to_string()),
        }
    }
}

impl From<tally_api::Error> for CliError {
    fn from(err: tally_api::Error) -> Self {
        match err {
            tally_api::Error::Timeout { timeout_secs } => CliError::Timeout {
                seconds: timeout_secs,
            },
            tally_api::Error::PeerRejected { status, message } => {
                CliError::Rejected { status, message }
            }
            tally_api::Error::InvalidUrl(e) => CliError::Validation {
                field: "daemon".into(),
                reason: e.to_string(),
            },
            other => CliError::Connection {
                message: other.to_string(),
            },
        }
    }
}

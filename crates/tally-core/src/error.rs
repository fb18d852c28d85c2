// ── Core error types ──
//
// Errors surfaced by tally-core. Most of them are absorbed where they
// occur and only logged; the appliance keeps running in a degraded but
// defined state. Access point start failure is the one fatal condition.

use thiserror::Error;

use crate::model::Interface;

/// Unified error type for the core crate.
#[derive(Debug, Error)]
pub enum CoreError {
    // ── Connectivity ─────────────────────────────────────────────────
    #[error("{interface} did not acquire an address within {timeout_secs}s")]
    AcquisitionFailed {
        interface: Interface,
        timeout_secs: u64,
    },

    #[error("{interface} is not configured")]
    NotConfigured { interface: Interface },

    #[error("Access point failed to start: {reason}")]
    AccessPointStart { reason: String },

    #[error("Network adapter error: {message}")]
    Adapter { message: String },

    // ── Tally feed ───────────────────────────────────────────────────
    #[error("Tally listener error: {message}")]
    Listener { message: String },

    // ── Peers ────────────────────────────────────────────────────────
    #[error("Peer discovery failed: {message}")]
    Discovery { message: String },

    #[error("Command to peer {peer} failed: {message}")]
    PeerCommand { peer: String, message: String },

    #[error("Peer request timed out after {timeout_secs}s")]
    Timeout { timeout_secs: u64 },

    // ── Configuration ────────────────────────────────────────────────
    #[error("Configuration error: {message}")]
    Config { message: String },

    // ── Internal ─────────────────────────────────────────────────────
    #[error("Internal error: {0}")]
    Internal(String),
}

impl CoreError {
    /// Whether the appliance has no way to recover networking on its own.
    ///
    /// Only a failed access point start qualifies; every other error
    /// leaves a usable fallback.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::AccessPointStart { .. })
    }
}

// ── Conversion from transport-layer errors ───────────────────────────

impl From<tally_api::Error> for CoreError {
    fn from(err: tally_api::Error) -> Self {
        match err {
            tally_api::Error::Timeout { timeout_secs } => CoreError::Timeout { timeout_secs },
            tally_api::Error::Transport(ref e) if e.is_timeout() => {
                CoreError::Timeout { timeout_secs: 0 }
            }
            tally_api::Error::Transport(ref e) => CoreError::PeerCommand {
                peer: e
                    .url()
                    .and_then(|u| u.host_str().map(str::to_owned))
                    .unwrap_or_else(|| "<unknown>".into()),
                message: err.to_string(),
            },
            tally_api::Error::InvalidUrl(e) => CoreError::Config {
                message: format!("Invalid peer URL: {e}"),
            },
            tally_api::Error::PeerRejected { status, message } => CoreError::PeerCommand {
                peer: "<unknown>".into(),
                message: format!("HTTP {status}: {message}"),
            },
            tally_api::Error::Deserialization { message, .. } => CoreError::PeerCommand {
                peer: "<unknown>".into(),
                message: format!("unreadable response: {message}"),
            },
        }
    }
}

impl From<mdns_sd::Error> for CoreError {
    fn from(err: mdns_sd::Error) -> Self {
        CoreError::Discovery {
            message: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_access_point_failure_is_fatal() {
        assert!(
            CoreError::AccessPointStart {
                reason: "radio busy".into()
            }
            .is_fatal()
        );
        assert!(
            !CoreError::AcquisitionFailed {
                interface: Interface::Wired,
                timeout_secs: 10
            }
            .is_fatal()
        );
        assert!(!CoreError::Discovery { message: "x".into() }.is_fatal());
    }

    #[test]
    fn api_timeout_maps_to_timeout() {
        let err: CoreError = tally_api::Error::Timeout { timeout_secs: 5 }.into();
        assert!(matches!(err, CoreError::Timeout { timeout_secs: 5 }));
    }

    #[test]
    fn acquisition_message_names_interface() {
        let err = CoreError::AcquisitionFailed {
            interface: Interface::Wireless,
            timeout_secs: 10,
        };
        assert_eq!(err.to_string(), "WiFi did not acquire an address within 10s");
    }
}

use thiserror::Error;

/// Top-level error type for the `tally-api` crate.
///
/// Covers the peer control surface. Codec failures have their own
/// [`DecodeError`](crate::tsl::DecodeError) because they are never
/// propagated past the listener.
#[derive(Debug, Error)]
pub enum Error {
    // ── Transport ───────────────────────────────────────────────────
    /// HTTP transport error (connection refused, unreachable host, etc.)
    #[error("HTTP transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// URL parsing error.
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// Request timed out.
    #[error("Request timed out after {timeout_secs}s")]
    Timeout { timeout_secs: u64 },

    // ── Peer ────────────────────────────────────────────────────────
    /// Peer answered with a non-success status.
    #[error("Peer rejected request (HTTP {status}): {message}")]
    PeerRejected { status: u16, message: String },

    // ── Data ────────────────────────────────────────────────────────
    /// JSON deserialization failed, with the raw body for debugging.
    #[error("Deserialization error: {message}")]
    Deserialization { message: String, body: String },
}

impl Error {
    /// Returns `true` if this is a transient error worth retrying later.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Transport(e) => e.is_timeout() || e.is_connect(),
            Self::Timeout { .. } => true,
            Self::PeerRejected { status, .. } => *status >= 500,
            _ => false,
        }
    }

    /// HTTP status reported by the peer, if any.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Transport(e) => e.status().map(|s| s.as_u16()),
            Self::PeerRejected { status, .. } => Some(*status),
            _ => None,
        }
    }
}

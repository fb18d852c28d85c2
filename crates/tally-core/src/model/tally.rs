// ── Tally domain types ──

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::time::Instant;

use tally_api::{Label, TallyState};

/// What last changed the tally state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum TallySource {
    /// Nothing has been received since boot.
    #[default]
    Boot,
    /// A TSL datagram addressed to this device.
    Remote,
    /// A local or relayed test request.
    Test,
}

/// The current tally state, text and rendering brightness.
///
/// The three display fields are always written together.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct TallySnapshot {
    pub state: TallyState,
    pub text: Label,
    pub brightness: u8,
    pub source: TallySource,
    pub updated_at: Option<DateTime<Utc>>,
}

impl TallySnapshot {
    /// Same display fields, ignoring provenance.
    pub fn same_display(&self, other: &Self) -> bool {
        self.state == other.state && self.text == other.text && self.brightness == other.brightness
    }
}

/// A timed color-cycling override of the indicator.
///
/// Never alters the stored tally state. `generation` identifies the
/// session so that an expiring session cannot end a newer one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DiscoSession {
    pub active: bool,
    pub ends_at: Option<Instant>,
    pub generation: u64,
}

impl DiscoSession {
    /// Whole seconds left, rounded up. Zero when inactive.
    pub fn remaining_secs(&self, now: Instant) -> u64 {
        match self.ends_at {
            Some(end) if self.active => {
                let left = end.saturating_duration_since(now);
                left.as_secs() + u64::from(left.subsec_nanos() > 0)
            }
            _ => 0,
        }
    }

    pub fn is_current(&self, generation: u64) -> bool {
        self.active && self.generation == generation
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[test]
    fn remaining_rounds_up() {
        let now = Instant::now();
        let session = DiscoSession {
            active: true,
            ends_at: Some(now + Duration::from_millis(2_100)),
            generation: 1,
        };
        assert_eq!(session.remaining_secs(now), 3);
        assert_eq!(session.remaining_secs(now + Duration::from_secs(5)), 0);
    }

    #[test]
    fn inactive_session_has_nothing_left() {
        let session = DiscoSession::default();
        assert_eq!(session.remaining_secs(Instant::now()), 0);
        assert!(!session.is_current(0));
    }
}

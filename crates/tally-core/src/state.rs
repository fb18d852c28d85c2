// ── Device state store ──
//
// Shared record read by the control surface and written by the TSL
// listener thread and local requests. Each field lives in a `watch`
// channel: writes replace the whole value under the channel's lock, so
// readers never observe a torn update and can subscribe to changes.

use chrono::Utc;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::trace;

use crate::model::{
    ConnectivitySummary, DiscoSession, TallyCommand, TallySnapshot, TallySource, TallyState,
};

/// Owned state container, shared as `Arc<DeviceState>`.
pub struct DeviceState {
    tally: watch::Sender<TallySnapshot>,
    connectivity: watch::Sender<ConnectivitySummary>,
    disco: watch::Sender<DiscoSession>,
}

impl Default for DeviceState {
    fn default() -> Self {
        Self::new()
    }
}

impl DeviceState {
    pub fn new() -> Self {
        let (tally, _) = watch::channel(TallySnapshot::default());
        let (connectivity, _) = watch::channel(ConnectivitySummary::default());
        let (disco, _) = watch::channel(DiscoSession::default());
        Self {
            tally,
            connectivity,
            disco,
        }
    }

    // ── Tally ────────────────────────────────────────────────────────

    pub fn tally(&self) -> TallySnapshot {
        self.tally.borrow().clone()
    }

    pub fn subscribe_tally(&self) -> watch::Receiver<TallySnapshot> {
        self.tally.subscribe()
    }

    /// Apply a decoded command if it is addressed to this device.
    ///
    /// State, text and brightness change together. Returns `false` for an
    /// address mismatch, which leaves the state untouched.
    pub fn apply(&self, cmd: &TallyCommand, configured_address: u8, max_brightness: u8) -> bool {
        if cmd.address != configured_address {
            trace!(
                address = cmd.address,
                configured_address, "ignoring command for another receiver"
            );
            return false;
        }

        self.write_tally(TallySnapshot {
            state: cmd.state,
            text: cmd.text,
            brightness: cmd.brightness(max_brightness),
            source: TallySource::Remote,
            updated_at: None,
        });
        true
    }

    /// Show a test state at full brightness. The display text is kept.
    pub fn set_test_state(&self, state: TallyState, max_brightness: u8) {
        let text = self.tally.borrow().text;
        self.write_tally(TallySnapshot {
            state,
            text,
            brightness: max_brightness,
            source: TallySource::Test,
            updated_at: None,
        });
    }

    /// Replace the snapshot, notifying subscribers only when the display
    /// actually changes.
    fn write_tally(&self, mut next: TallySnapshot) {
        self.tally.send_if_modified(|current| {
            if current.same_display(&next) && current.source == next.source {
                return false;
            }
            next.updated_at = Some(Utc::now());
            *current = next;
            true
        });
    }

    // ── Connectivity ─────────────────────────────────────────────────

    pub fn connectivity(&self) -> ConnectivitySummary {
        self.connectivity.borrow().clone()
    }

    pub fn subscribe_connectivity(&self) -> watch::Receiver<ConnectivitySummary> {
        self.connectivity.subscribe()
    }

    /// Mutate the connectivity summary in place.
    pub fn update_connectivity(&self, modify: impl FnOnce(&mut ConnectivitySummary)) {
        self.connectivity.send_if_modified(|summary| {
            let before = summary.clone();
            modify(summary);
            *summary != before
        });
    }

    // ── Disco ────────────────────────────────────────────────────────

    pub fn disco(&self) -> DiscoSession {
        *self.disco.borrow()
    }

    pub fn subscribe_disco(&self) -> watch::Receiver<DiscoSession> {
        self.disco.subscribe()
    }

    /// Start a new session ending at `ends_at`, replacing any running one.
    pub fn begin_disco(&self, ends_at: Instant) -> DiscoSession {
        let mut started = DiscoSession::default();
        self.disco.send_modify(|session| {
            *session = DiscoSession {
                active: true,
                ends_at: Some(ends_at),
                generation: session.generation.wrapping_add(1),
            };
            started = *session;
        });
        started
    }

    /// End the session `generation`. Returns `false` if it was already
    /// over or has been replaced by a newer one.
    pub fn end_disco(&self, generation: u64) -> bool {
        self.disco.send_if_modified(|session| {
            if !session.is_current(generation) {
                return false;
            }
            session.active = false;
            session.ends_at = None;
            true
        })
    }
}

// ── Disco sessions ──
//
// A timed override that cycles the indicator through a small fixed set
// of colors. The stored tally state is never touched; when the session
// expires or is stopped the renderer restores whatever is current then.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tally_api::peer::clamp_disco_duration;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::indicator::Renderer;
use crate::model::{DiscoSession, Rgb};
use crate::state::DeviceState;

/// Colors cycled during a session, in order. Neighbours always differ.
pub const DISCO_COLORS: [Rgb; 7] = [
    Rgb::RED,
    Rgb::GREEN,
    Rgb::BLUE,
    Rgb::YELLOW,
    Rgb::MAGENTA,
    Rgb::CYAN,
    Rgb::WHITE,
];

/// Time each color stays on.
pub const DISCO_FRAME: Duration = Duration::from_millis(120);

/// Starts and stops disco sessions for the local indicator.
pub struct DiscoController {
    state: Arc<DeviceState>,
    renderer: Renderer,
    running: Mutex<Option<CancellationToken>>,
}

impl DiscoController {
    pub fn new(state: Arc<DeviceState>, renderer: Renderer) -> Self {
        Self {
            state,
            renderer,
            running: Mutex::new(None),
        }
    }

    /// Start a session of `duration_secs` (clamped to 1..=60), replacing
    /// any session already running. Must be called within a Tokio runtime.
    pub fn start(&self, duration_secs: u64) -> DiscoSession {
        let secs = clamp_disco_duration(duration_secs);

        // Generation order and token order must agree, so the session is
        // begun and its task spawned under one lock.
        let mut running = self.lock_running();
        let session = self
            .state
            .begin_disco(Instant::now() + Duration::from_secs(secs));
        let cancel = CancellationToken::new();
        if let Some(previous) = running.replace(cancel.clone()) {
            previous.cancel();
        }
        tokio::spawn(disco_task(self.renderer.clone(), session, cancel));
        drop(running);

        info!(duration_secs = secs, generation = session.generation, "disco started");
        session
    }

    /// Stop the running session, if any, and restore the tally display.
    pub fn stop(&self) -> bool {
        let mut running = self.lock_running();
        if let Some(token) = running.take() {
            token.cancel();
        }
        let session = self.state.disco();
        let stopped = session.active && self.renderer.end_disco(session.generation);
        drop(running);

        if stopped {
            info!(generation = session.generation, "disco stopped");
        }
        stopped
    }

    pub fn session(&self) -> DiscoSession {
        self.state.disco()
    }

    fn lock_running(&self) -> MutexGuard<'_, Option<CancellationToken>> {
        self.running.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

async fn disco_task(renderer: Renderer, session: DiscoSession, cancel: CancellationToken) {
    let Some(ends_at) = session.ends_at else {
        return;
    };
    let mut frames = tokio::time::interval(DISCO_FRAME);
    frames.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let expiry = tokio::time::sleep_until(ends_at);
    tokio::pin!(expiry);

    let mut colors = DISCO_COLORS.iter().copied().cycle();
    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => return,
            () = &mut expiry => break,
            _ = frames.tick() => {
                let color = colors.next().unwrap_or(Rgb::WHITE);
                if !renderer.disco_frame(session.generation, color) {
                    debug!(generation = session.generation, "disco superseded");
                    return;
                }
            }
        }
    }

    if renderer.end_disco(session.generation) {
        info!(generation = session.generation, "disco finished");
    }
}

// ── Indicator rendering ──
//
// The physical light is an external sink that only knows "show this
// color at this brightness". `Renderer` decides what it shows: the
// current tally state, a disco frame, or a boot status pattern.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tracing::trace;

use crate::config::Palette;
use crate::model::Rgb;
use crate::state::DeviceState;

/// Brightness used for the steady "access point active" glow.
pub const ACCESS_POINT_BRIGHTNESS: u8 = 10;

/// A sink for the indicator driver.
///
/// Implementations must be cheap and non-blocking; the TSL listener calls
/// this from its own thread for every applied command.
pub trait Indicator: Send + Sync {
    fn show(&self, color: Rgb, brightness: u8);
}

/// Renders device state onto an [`Indicator`].
///
/// Cheap to clone. All output goes through one lock so that a disco
/// frame can never land after the session that produced it has ended.
#[derive(Clone)]
pub struct Renderer {
    inner: Arc<RendererInner>,
}

struct RendererInner {
    indicator: Arc<dyn Indicator>,
    state: Arc<DeviceState>,
    palette: Palette,
    max_brightness: u8,
    output: Mutex<()>,
}

impl Renderer {
    pub fn new(
        indicator: Arc<dyn Indicator>,
        state: Arc<DeviceState>,
        palette: Palette,
        max_brightness: u8,
    ) -> Self {
        Self {
            inner: Arc::new(RendererInner {
                indicator,
                state,
                palette,
                max_brightness,
                output: Mutex::new(()),
            }),
        }
    }

    pub fn max_brightness(&self) -> u8 {
        self.inner.max_brightness
    }

    pub fn palette(&self) -> &Palette {
        &self.inner.palette
    }

    fn locked<R>(&self, f: impl FnOnce(&dyn Indicator) -> R) -> R {
        let _guard = self
            .inner
            .output
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        f(self.inner.indicator.as_ref())
    }

    // ── Tally ────────────────────────────────────────────────────────

    /// Show the latest tally state, unless a disco session owns the light.
    ///
    /// Reads the state under the output lock, so the last caller always
    /// shows the newest value.
    pub fn render_tally(&self) {
        self.locked(|indicator| {
            if self.inner.state.disco().active {
                trace!("disco active, tally render deferred");
                return;
            }
            let snap = self.inner.state.tally();
            indicator.show(self.inner.palette.color(snap.state), snap.brightness);
        });
    }

    // ── Disco ────────────────────────────────────────────────────────

    /// Show one disco frame if session `generation` is still running.
    pub fn disco_frame(&self, generation: u64, color: Rgb) -> bool {
        self.locked(|indicator| {
            if !self.inner.state.disco().is_current(generation) {
                return false;
            }
            indicator.show(color, self.inner.max_brightness);
            true
        })
    }

    /// End session `generation` and restore the latest tally state.
    ///
    /// Returns `false` when the session had already ended or been
    /// replaced, in which case nothing is drawn.
    pub fn end_disco(&self, generation: u64) -> bool {
        self.locked(|indicator| {
            if !self.inner.state.end_disco(generation) {
                return false;
            }
            let snap = self.inner.state.tally();
            indicator.show(self.inner.palette.color(snap.state), snap.brightness);
            true
        })
    }

    // ── Status patterns ──────────────────────────────────────────────

    /// Raw output, used by status patterns while no tally is shown.
    pub fn show(&self, color: Rgb, brightness: u8) {
        self.locked(|indicator| indicator.show(color, brightness));
    }

    /// One half-period of an acquisition blink.
    pub fn blink(&self, color: Rgb, lit: bool) {
        let color = if lit { color } else { Rgb::BLACK };
        self.show(color, self.inner.max_brightness);
    }

    /// Flash `color` `times` times, ending dark.
    pub async fn flash(&self, color: Rgb, times: usize, period: Duration) {
        for _ in 0..times {
            self.show(color, self.inner.max_brightness);
            tokio::time::sleep(period).await;
            self.show(Rgb::BLACK, self.inner.max_brightness);
            tokio::time::sleep(period).await;
        }
    }

    /// White flash before the access point comes up.
    pub async fn access_point_starting(&self) {
        self.flash(Rgb::WHITE, 1, Duration::from_millis(100)).await;
    }

    /// Three cyan blinks, then a dim steady cyan while the AP is active.
    pub async fn access_point_ready(&self) {
        self.flash(Rgb::CYAN, 3, Duration::from_millis(200)).await;
        self.show(Rgb::CYAN, ACCESS_POINT_BRIGHTNESS);
    }

    /// Five red blinks, then a steady dim red: networking is dead.
    pub async fn access_point_failed(&self) {
        self.flash(Rgb::RED, 5, Duration::from_millis(100)).await;
        self.show(Rgb::RED, ACCESS_POINT_BRIGHTNESS);
    }
}

// ── Test support ─────────────────────────────────────────────────────


#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::time::Duration;

    use tokio::time::Instant;

    use super::testing::RecordingIndicator;
    use super::*;
    use crate::model::{TallyCommand, TallyState};

    fn renderer() -> (Renderer, Arc<DeviceState>, Arc<RecordingIndicator>) {
        let indicator = Arc::new(RecordingIndicator::default());
        let state = Arc::new(DeviceState::new());
        let renderer = Renderer::new(indicator.clone(), state.clone(), Palette::default(), 90);
        (renderer, state, indicator)
    }

    #[test]
    fn renders_tally_with_palette() {
        let (renderer, state, indicator) = renderer();
        state.apply(&TallyCommand::new(1, TallyState::Preview, 3, ""), 1, 90);
        renderer.render_tally();
        assert_eq!(indicator.last(), Some((Rgb::RED, 90)));
    }

    #[test]
    fn disco_suppresses_tally_and_restores_latest() {
        let (renderer, state, indicator) = renderer();
        state.apply(&TallyCommand::new(1, TallyState::Program, 3, ""), 1, 90);

        let session = state.begin_disco(Instant::now() + Duration::from_secs(5));
        assert!(renderer.disco_frame(session.generation, Rgb::MAGENTA));

        // A tally update lands mid-session: stored, not shown.
        state.apply(&TallyCommand::new(1, TallyState::Preview, 1, ""), 1, 90);
        renderer.render_tally();
        assert_eq!(indicator.last(), Some((Rgb::MAGENTA, 90)));

        assert!(renderer.end_disco(session.generation));
        assert_eq!(indicator.last(), Some((Rgb::RED, 30)));

        // Stale frames after the end are dropped.
        assert!(!renderer.disco_frame(session.generation, Rgb::BLUE));
        assert_eq!(indicator.last(), Some((Rgb::RED, 30)));
    }

    #[tokio::test(start_paused = true)]
    async fn access_point_ready_ends_dim_cyan() {
        let (renderer, _state, indicator) = renderer();
        renderer.access_point_ready().await;
        let frames = indicator.frames();
        assert_eq!(frames.len(), 7);
        assert_eq!(frames.last(), Some(&(Rgb::CYAN, ACCESS_POINT_BRIGHTNESS)));
    }
}

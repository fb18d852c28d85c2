// ── Log indicator ──
//
// Hosts without an addressable LED get the indicator as log lines.
// Repeats are suppressed so blinking does not flood the log.

use std::sync::{Mutex, PoisonError};

use tally_core::{Indicator, Rgb};
use tracing::{debug, trace};

#[derive(Debug, Default)]
pub struct LogIndicator {
    last: Mutex<Option<(Rgb, u8)>>,
}

impl LogIndicator {
    /// The color and brightness most recently shown.
    pub fn current(&self) -> Option<(Rgb, u8)> {
        *self.last.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Indicator for LogIndicator {
    fn show(&self, color: Rgb, brightness: u8) {
        let mut last = self.last.lock().unwrap_or_else(PoisonError::into_inner);
        if *last == Some((color, brightness)) {
            trace!(%color, brightness, "indicator unchanged");
            return;
        }
        *last = Some((color, brightness));
        debug!(%color, brightness, "indicator");
    }
}

// ── Local control ──
//
// The operations a person can trigger on this device directly, shared by
// the HTTP surface and the peer broadcast so both take the same path.

use std::sync::Arc;

use serde::Serialize;
use tracing::info;

use crate::disco::DiscoController;
use crate::indicator::Renderer;
use crate::model::{DiscoSession, TallySnapshot, TallyState};
use crate::state::DeviceState;

/// A command that can be run locally and mirrored to every peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum ControlCommand {
    SetTestState { state: TallyState },
    StartDisco { duration_secs: u64 },
    StopDisco,
}

impl ControlCommand {
    pub fn name(&self) -> &'static str {
        match self {
            Self::SetTestState { .. } => "test",
            Self::StartDisco { .. } => "disco",
            Self::StopDisco => "disco-stop",
        }
    }
}

#[derive(Clone)]
pub struct LocalControl {
    state: Arc<DeviceState>,
    renderer: Renderer,
    disco: Arc<DiscoController>,
}

impl LocalControl {
    pub fn new(state: Arc<DeviceState>, renderer: Renderer, disco: Arc<DiscoController>) -> Self {
        Self {
            state,
            renderer,
            disco,
        }
    }

    pub fn state(&self) -> &Arc<DeviceState> {
        &self.state
    }

    pub fn renderer(&self) -> &Renderer {
        &self.renderer
    }

    pub fn disco(&self) -> &Arc<DiscoController> {
        &self.disco
    }

    /// Force a tally state at full brightness, as if a switcher sent it.
    pub fn set_test_state(&self, state: TallyState) -> TallySnapshot {
        self.state
            .set_test_state(state, self.renderer.max_brightness());
        self.renderer.render_tally();
        info!(%state, "test state applied");
        self.state.tally()
    }

    pub fn start_disco(&self, duration_secs: u64) -> DiscoSession {
        self.disco.start(duration_secs)
    }

    pub fn stop_disco(&self) -> bool {
        self.disco.stop()
    }

    pub fn execute(&self, command: ControlCommand) {
        match command {
            ControlCommand::SetTestState { state } => {
                self.set_test_state(state);
            }
            ControlCommand::StartDisco { duration_secs } => {
                self.start_disco(duration_secs);
            }
            ControlCommand::StopDisco => {
                self.stop_disco();
            }
        }
    }
}

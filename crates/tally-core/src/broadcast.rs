// ── Peer broadcast ──
//
// Runs a control command locally, then mirrors it to every known peer
// concurrently. Peers are independent: one that is slow or down costs
// at most one timeout and never blocks or aborts the others.

use std::sync::Arc;
use std::time::Duration;

use futures_util::future::join_all;
use serde::Serialize;
use tally_api::PeerClient;
use tally_api::transport::TransportConfig;
use tracing::{debug, info, warn};

use crate::control::{ControlCommand, LocalControl};
use crate::error::CoreError;
use crate::model::PeerDevice;
use crate::peers::PeerDirectory;

/// Aggregate result of one fan-out. Individual peer failures are only
/// logged.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct FanOutReport {
    /// Devices targeted, this one included.
    pub attempted: usize,
    pub succeeded: usize,
}

impl FanOutReport {
    pub fn failed(&self) -> usize {
        self.attempted.saturating_sub(self.succeeded)
    }
}

pub struct BroadcastCoordinator {
    client: PeerClient,
    directory: Arc<PeerDirectory>,
    local: LocalControl,
    timeout: Duration,
}

impl BroadcastCoordinator {
    pub fn new(
        directory: Arc<PeerDirectory>,
        local: LocalControl,
        timeout: Duration,
    ) -> Result<Self, CoreError> {
        let client = PeerClient::new(&TransportConfig::default().with_timeout(timeout))?;
        Ok(Self::with_client(client, directory, local, timeout))
    }

    pub fn with_client(
        client: PeerClient,
        directory: Arc<PeerDirectory>,
        local: LocalControl,
        timeout: Duration,
    ) -> Self {
        Self {
            client,
            directory,
            local,
            timeout,
        }
    }

    pub fn directory(&self) -> &Arc<PeerDirectory> {
        &self.directory
    }

    /// Apply `command` here and on every peer currently in the directory.
    pub async fn fan_out(&self, command: ControlCommand) -> FanOutReport {
        let peers = self.directory.peers();
        self.fan_out_to(&peers, command).await
    }

    /// Apply `command` here and on `peers`.
    pub async fn fan_out_to(&self, peers: &[PeerDevice], command: ControlCommand) -> FanOutReport {
        self.local.execute(command);

        let results = join_all(peers.iter().map(|peer| self.send(peer, command))).await;
        let mut succeeded = 1;
        for (peer, result) in peers.iter().zip(&results) {
            match result {
                Ok(()) => succeeded += 1,
                Err(e) => warn!(
                    peer = %peer.hostname,
                    ip = %peer.ip,
                    command = command.name(),
                    error = %e,
                    "peer command failed"
                ),
            }
        }

        let report = FanOutReport {
            attempted: peers.len() + 1,
            succeeded,
        };
        info!(
            command = command.name(),
            attempted = report.attempted,
            succeeded = report.succeeded,
            "fan-out complete"
        );
        report
    }

    async fn send(&self, peer: &PeerDevice, command: ControlCommand) -> Result<(), CoreError> {
        let base = PeerClient::base_url(peer.ip, peer.port)?;
        debug!(peer = %peer.hostname, %base, command = command.name(), "sending to peer");

        let request = async {
            match command {
                ControlCommand::SetTestState { state } => {
                    self.client.set_test_state(&base, state).await.map(drop)
                }
                ControlCommand::StartDisco { duration_secs } => {
                    self.client.start_disco(&base, duration_secs).await.map(drop)
                }
                ControlCommand::StopDisco => self.client.stop_disco(&base).await.map(drop),
            }
        };

        match tokio::time::timeout(self.timeout, request).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(CoreError::PeerCommand {
                peer: peer.hostname.clone(),
                message: e.to_string(),
            }),
            Err(_) => Err(CoreError::Timeout {
                timeout_secs: self.timeout.as_secs(),
            }),
        }
    }
}

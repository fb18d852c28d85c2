//! Peer listing: browse mDNS directly, or ask a running device.

use std::sync::Arc;
use std::time::Duration;

use tabled::Tabled;
use tally_api::{PeerClient, PeerSummary, TransportConfig};
use tally_core::{DeviceState, DiscoveryConfig, MdnsDiscovery, PeerDirectory};
use tracing::debug;

use crate::cli::{GlobalOpts, PeersArgs};
use crate::error::CliError;
use crate::output;

#[derive(Tabled)]
struct PeerRow {
    #[tabled(rename = "Hostname")]
    hostname: String,
    #[tabled(rename = "IP")]
    ip: String,
    #[tabled(rename = "TSL")]
    tsl: String,
}

fn peer_row(peer: &PeerSummary) -> PeerRow {
    PeerRow {
        hostname: peer.hostname.clone(),
        ip: peer.ip.clone(),
        tsl: peer
            .tsl_address
            .map_or_else(|| "-".into(), |a| a.to_string()),
    }
}

pub async fn handle(args: PeersArgs, global: &GlobalOpts) -> Result<(), CliError> {
    let timeout = Duration::from_secs(args.timeout);
    let peers = match args.daemon {
        Some(base) => {
            let client = PeerClient::new(&TransportConfig::default().with_timeout(timeout))?;
            client.peers(&base).await?.peers
        }
        None => browse(timeout).await?,
    };
    debug!(count = peers.len(), "peers listed");

    let out = output::render_list(global.output, &peers, peer_row)?;
    output::print_output(&out, global.quiet);
    Ok(())
}

async fn browse(timeout: Duration) -> Result<Vec<PeerSummary>, CliError> {
    let mdns = MdnsDiscovery::new()?;
    let config = DiscoveryConfig {
        browse_timeout: timeout,
        ..DiscoveryConfig::default()
    };
    let directory = PeerDirectory::new(
        Arc::new(mdns.clone()),
        Arc::new(DeviceState::new()),
        &config,
    );
    let refreshed = directory.refresh().await;
    mdns.shutdown();
    refreshed?;
    Ok(directory.peers().iter().map(PeerSummary::from).collect())
}

//! Relay a test, disco or stop command through a running device.

use std::time::Duration;

use tally_api::{FanOutResponse, PeerClient, TransportConfig};
use tracing::info;

use crate::cli::{FanOutArgs, FanOutCommand, GlobalOpts};
use crate::error::CliError;
use crate::output;

pub async fn handle(args: FanOutArgs, global: &GlobalOpts) -> Result<(), CliError> {
    let transport = TransportConfig::default().with_timeout(Duration::from_secs(args.timeout));
    let client = PeerClient::new(&transport)?;
    let base = &args.daemon;

    let response = match args.command {
        FanOutCommand::Test { state } => client.test_all(base, state).await?,
        FanOutCommand::Disco { duration } => client.disco_all(base, duration).await?,
        FanOutCommand::Stop => client.disco_stop_all(base).await?,
    };
    info!(
        command = %response.command,
        attempted = response.attempted,
        succeeded = response.succeeded,
        "fan-out complete"
    );

    let out = output::render_single(global.output, &response, summary)?;
    output::print_output(&out, global.quiet);
    Ok(())
}

fn summary(response: &FanOutResponse) -> String {
    let failed = response.attempted.saturating_sub(response.succeeded);
    output::detail_lines(&[
        ("Command", response.command.clone()),
        ("Attempted", response.attempted.to_string()),
        ("Succeeded", response.succeeded.to_string()),
        ("Failed", failed.to_string()),
    ])
}

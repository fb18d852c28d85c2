//! Send one TSL datagram, for exercising receivers without a switcher.

use std::net::{Ipv4Addr, SocketAddr};

use serde::Serialize;
use tally_api::TallyCommand;
use tokio::net::UdpSocket;
use tracing::debug;

use crate::cli::{GlobalOpts, SendArgs};
use crate::error::CliError;
use crate::output;

#[derive(Debug, Serialize)]
struct Sent {
    target: SocketAddr,
    bytes: usize,
    #[serde(flatten)]
    command: TallyCommand,
}

pub async fn handle(args: SendArgs, global: &GlobalOpts) -> Result<(), CliError> {
    let target = match args.target {
        Some(target) => target,
        None => configured_target(global)?,
    };
    let command = TallyCommand::new(args.address, args.state, args.level, &args.text);
    let packet = command.encode();

    let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0)).await?;
    let bytes = socket.send_to(&packet, target).await?;
    debug!(%target, bytes, "datagram sent");

    let sent = Sent {
        target,
        bytes,
        command,
    };
    let color = output::should_color(global.color);
    let out = output::render_single(global.output, &sent, |s| {
        output::detail_lines(&[
            ("Target", s.target.to_string()),
            ("Address", s.command.address.to_string()),
            ("State", output::paint_state(s.command.state, color)),
            ("Level", s.command.brightness_level.to_string()),
            ("Text", s.command.text.as_str().to_owned()),
        ])
    })?;
    output::print_output(&out, global.quiet);
    Ok(())
}

/// The multicast group and port from the settings file.
fn configured_target(global: &GlobalOpts) -> Result<SocketAddr, CliError> {
    let path = global.config_path();
    let settings = tally_config::load_from(&path).map_err(|e| CliError::config(e, &path))?;
    let group: Ipv4Addr = settings
        .tsl
        .multicast
        .parse()
        .map_err(|_| CliError::Validation {
            field: "tsl.multicast".into(),
            reason: format!("not an IPv4 address: {}", settings.tsl.multicast),
        })?;
    Ok(SocketAddr::from((group, settings.tsl.port)))
}

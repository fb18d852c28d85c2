mod cli;
mod commands;
mod dns;
mod error;
mod http;
mod output;
mod platform;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use crate::cli::{Cli, Command, LogFormat};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // The daemon reports lifecycle events at info; operator tools stay quiet.
    let daemon = matches!(cli.command, None | Some(Command::Run));
    init_tracing(cli.global.verbose, cli.global.quiet, daemon, cli.global.log_format);

    if let Err(err) = commands::dispatch(cli.command, &cli.global).await {
        let code = err.exit_code();
        eprintln!("{:?}", miette::Report::new(err));
        std::process::exit(code);
    }
}

fn init_tracing(verbosity: u8, quiet: bool, daemon: bool, format: LogFormat) {
    let filter = match (verbosity, quiet, daemon) {
        (0, true, _) => "error",
        (0, false, false) => "warn",
        (0, false, true) | (1, ..) => "info",
        (2, ..) => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false);
    match format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}

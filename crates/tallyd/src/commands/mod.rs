//! Command dispatch: bridges CLI args to the daemon or an operator tool.

pub mod config_cmd;
pub mod fan_out;
pub mod peers;
pub mod run;
pub mod send;

use crate::cli::{Command, GlobalOpts};
use crate::error::CliError;

pub async fn dispatch(cmd: Option<Command>, global: &GlobalOpts) -> Result<(), CliError> {
    match cmd {
        None | Some(Command::Run) => run::handle(global).await,
        Some(Command::Send(args)) => send::handle(args, global).await,
        Some(Command::Peers(args)) => peers::handle(args, global).await,
        Some(Command::Config(args)) => config_cmd::handle(&args, global),
        Some(Command::FanOut(args)) => fan_out::handle(args, global).await,
    }
}

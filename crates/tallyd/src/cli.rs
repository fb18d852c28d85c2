//! Clap derive structures for the `tallyd` binary.
//!
//! Without a subcommand the daemon runs; the other subcommands are
//! operator tools that talk to a running device or to the network.

use std::net::SocketAddr;
use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};
use tally_api::TallyState;
use url::Url;

// ── Top-Level CLI ────────────────────────────────────────────────────

/// tallyd -- networked TSL tally light
#[derive(Debug, Parser)]
#[command(
    name = "tallyd",
    version,
    about = "Networked TSL tally light daemon and operator tools",
    long_about = "Receives TSL tally datagrams, drives the indicator, and serves the\n\
        local control surface. Subcommands send test datagrams, list sibling\n\
        devices and relay commands through a running daemon.",
    propagate_version = true
)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalOpts,

    #[command(subcommand)]
    pub command: Option<Command>,
}

// ── Global Options ───────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct GlobalOpts {
    /// Settings file (defaults to the platform config dir)
    #[arg(long, short = 'c', env = "TALLY_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Output format
    #[arg(
        long,
        short = 'o',
        env = "TALLY_OUTPUT",
        default_value = "table",
        global = true
    )]
    pub output: OutputFormat,

    /// When to use color output
    #[arg(long, default_value = "auto", global = true)]
    pub color: ColorMode,

    /// Log line format
    #[arg(long, env = "TALLY_LOG_FORMAT", default_value = "text", global = true)]
    pub log_format: LogFormat,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(long, short = 'v', action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress non-error output
    #[arg(long, short = 'q', global = true)]
    pub quiet: bool,
}

impl GlobalOpts {
    /// The settings file in effect.
    pub fn config_path(&self) -> PathBuf {
        self.config.clone().unwrap_or_else(tally_config::config_path)
    }
}

// ── Output & Color Enums ─────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Pretty table (default, interactive)
    Table,
    /// Pretty-printed JSON
    Json,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ColorMode {
    /// Auto-detect (color if terminal is interactive)
    Auto,
    /// Always emit color codes
    Always,
    /// Never emit color codes
    Never,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    /// Human-readable lines
    Text,
    /// One JSON object per line
    Json,
}

// ── Commands ─────────────────────────────────────────────────────────

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run the tally light (default)
    Run,

    /// Send one TSL datagram
    Send(SendArgs),

    /// Find tally lights on the local network
    #[command(alias = "ls")]
    Peers(PeersArgs),

    /// Inspect or reset the settings file
    Config(ConfigArgs),

    /// Relay a command to a device and all its peers
    FanOut(FanOutArgs),
}

// ── Send ─────────────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct SendArgs {
    /// Destination; defaults to the configured multicast group and port
    #[arg(long, short = 't')]
    pub target: Option<SocketAddr>,

    /// Receiver address (0-126)
    #[arg(long, short = 'a', default_value_t = 0, value_parser = clap::value_parser!(u8).range(0..=126))]
    pub address: u8,

    /// Tally state: off, program, preview, unselected
    #[arg(long, short = 's', default_value = "program")]
    pub state: TallyState,

    /// Brightness level (0-3)
    #[arg(long, short = 'l', default_value_t = 3, value_parser = clap::value_parser!(u8).range(0..=3))]
    pub level: u8,

    /// Display text, at most 15 characters
    #[arg(default_value = "")]
    pub text: String,
}

// ── Peers ────────────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct PeersArgs {
    /// Seconds to collect mDNS answers
    #[arg(long, default_value_t = 3)]
    pub timeout: u64,

    /// Ask a running device for its cached list instead of browsing
    #[arg(long, short = 'd')]
    pub daemon: Option<Url>,
}

// ── Config ───────────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub command: ConfigCommand,
}

#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Print the effective settings, secrets masked
    Show,
    /// Print the settings file path
    Path,
    /// Delete the settings file (factory reset)
    Reset,
}

// ── Fan-out ──────────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct FanOutArgs {
    /// Control surface of the device that relays the command
    #[arg(long, short = 'd', env = "TALLY_DAEMON", default_value = "http://127.0.0.1/")]
    pub daemon: Url,

    /// Request timeout in seconds
    #[arg(long, default_value_t = 15)]
    pub timeout: u64,

    #[command(subcommand)]
    pub command: FanOutCommand,
}

#[derive(Debug, Subcommand)]
pub enum FanOutCommand {
    /// Show a test state everywhere
    Test {
        /// off, program, preview, unselected
        state: TallyState,
    },
    /// Start a disco session everywhere
    Disco {
        /// Seconds, clamped to 1-60
        #[arg(long, default_value_t = 10)]
        duration: u64,
    },
    /// End disco sessions everywhere
    Stop,
}

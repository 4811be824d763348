//! ## vaktpost-cli
//! **Operational interface for the readiness service**
//!
//! A loopback echo tool driving the full stack: the `serve` subcommand runs
//! a poll loop over the socket service, `send` connects and round-trips a
//! message through it.

use clap::Parser;
use vaktpost_telemetry::ServiceLogger;

mod commands;
mod settings;

use commands::Cli;

fn main() -> anyhow::Result<()> {
    ServiceLogger::init();
    let cli = Cli::parse();
    commands::run_command(cli)
}

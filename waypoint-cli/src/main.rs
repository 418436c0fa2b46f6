//! Waypoint CLI - Command-line interface
//!
//! Runs the API server, one-off scheduler passes and ticks, and the
//! deterministic fleet simulation.

mod commands;

use std::path::PathBuf;

use clap::Parser;
use waypoint_core::tracing_setup::{CliLogLevel, init_tracing};

#[derive(Parser)]
#[command(name = "waypoint")]
#[command(about = "Vehicle position simulation engine")]
struct Cli {
    /// Console log level (overridden by RUST_LOG)
    #[arg(long, value_enum, default_value_t = CliLogLevel::Info, global = true)]
    log_level: CliLogLevel,

    /// Directory for the full trace log of this run
    #[arg(long, global = true)]
    logs_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: commands::Commands,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    init_tracing(cli.log_level, cli.logs_dir.as_deref())
        .map_err(|e| anyhow::anyhow!("Failed to initialize tracing: {e}"))?;

    commands::handle_command(cli.command).await
}

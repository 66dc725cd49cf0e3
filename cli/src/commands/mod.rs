//! CLI command definitions and dispatch.

mod check;
mod inspect;
mod pack;
mod resolve;
mod run;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use guest_harness_core::HarnessConfig;

/// Guest harness - boot a test program in an emulated guest and answer
/// its network and control traffic.
#[derive(Parser)]
#[command(name = "guest-harness", version, about)]
pub struct Cli {
    /// Configuration file (YAML)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Default log directive when RUST_LOG is unset
    #[arg(long, global = true, value_parser = ["trace", "debug", "info", "warn", "error"])]
    pub log_level: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

impl Cli {
    /// Configuration from `--config`, or the defaults.
    pub fn load_config(&self) -> guest_harness_core::Result<HarnessConfig> {
        match &self.config {
            Some(path) => HarnessConfig::from_file(path),
            None => Ok(HarnessConfig::default()),
        }
    }
}

/// Available commands.
#[derive(Subcommand)]
pub enum Command {
    /// Build the guest program, pack it and boot it under the emulator
    Run(run::RunArgs),
    /// Show the interpreter and shared libraries of an executable
    Resolve(resolve::ResolveArgs),
    /// Build a boot archive for an executable without booting it
    Pack(pack::PackArgs),
    /// List the entries of a boot archive
    Inspect(inspect::InspectArgs),
    /// Verify the host can boot the guest
    Check(check::CheckArgs),
}

/// Dispatch a parsed CLI to the appropriate command handler.
///
/// Returns the process exit code.
pub async fn dispatch(cli: Cli, config: HarnessConfig) -> Result<i32, Box<dyn std::error::Error>> {
    match cli.command {
        Command::Run(args) => run::execute(args, config).await,
        Command::Resolve(args) => resolve::execute(args, config).await,
        Command::Pack(args) => pack::execute(args, config).await,
        Command::Inspect(args) => inspect::execute(args).await,
        Command::Check(args) => check::execute(args, config).await,
    }
}

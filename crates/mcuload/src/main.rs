use std::process::ExitCode;

use anyhow::Result;
use clap::Parser;

use crate::logging::{LogFormat, LogLevel, LogOptions};

mod config;
mod device;
mod estimate;
mod load;
mod logging;
mod manifest;
mod report;
mod resolve;

#[derive(Parser, Debug)]
#[command(name = "mcuload")]
#[command(
    about = "Deploy analyzed programs to microcontroller runtimes without native metadata.",
    long_about = None
)]
#[command(version)]
struct Cli {
    /// Log format on stderr: auto, text or json. Overrides MCULOAD_LOG_FORMAT.
    #[arg(long, global = true, value_enum, value_name = "FORMAT")]
    log_format: Option<LogFormat>,

    /// Log level on stderr: error, warn, info, debug or trace. Overrides
    /// MCULOAD_LOG_LEVEL.
    #[arg(long, global = true, value_enum, value_name = "LEVEL")]
    log_level: Option<LogLevel>,

    #[command(subcommand)]
    command: Command,
}

#[derive(clap::Subcommand, Debug)]
enum Command {
    /// Report token counts, the memory estimate and the fingerprint of a manifest.
    Estimate(estimate::EstimateArgs),
    /// Map a raw token (e.g. from a device fault) back to its symbols.
    ResolveToken(resolve::ResolveTokenArgs),
    /// Push a manifest to a device, optionally running its entry point.
    Load(Box<load::LoadArgs>),
}

fn main() -> ExitCode {
    match try_main() {
        Ok(code) => code,
        Err(err) => {
            eprintln!("{err:#}");
            ExitCode::from(2)
        }
    }
}

fn try_main() -> Result<ExitCode> {
    let cli = Cli::parse();
    logging::init(LogOptions::from_env().with_flags(cli.log_format, cli.log_level));

    match cli.command {
        Command::Estimate(args) => estimate::cmd_estimate(args),
        Command::ResolveToken(args) => resolve::cmd_resolve_token(args),
        Command::Load(args) => load::cmd_load(*args),
    }
}

use std::error::Error;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use commands::{
    resolve_config::{self, ResolveConfigArgs},
    run::{self, RunArgs},
    terminate::{self, TerminateArgs},
};
use settings::Settings;
use tracing::error;

mod commands;
mod logging;
mod settings;

#[derive(Parser, Debug)]
#[command(name = "dias", version, about = "Archival-aware batch launcher for dias pipeline runs")]
struct Cli {
    /// Log at debug level unless RUST_LOG says otherwise.
    #[arg(long, short, global = true)]
    verbose: bool,
    /// Operator settings file; `./dias.toml` is used when present.
    #[arg(long, global = true)]
    settings: Option<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Resolve inputs, reconcile storage and launch the selected stages.
    Run(RunArgs),
    /// Terminate jobs or analyses.
    Terminate(TerminateArgs),
    /// Print the config that would be used for an assay.
    ResolveConfig(ResolveConfigArgs),
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    logging::init(cli.verbose);
    match execute(cli) {
        Ok(code) => code,
        Err(err) => {
            error!("{err}");
            ExitCode::FAILURE
        }
    }
}

fn execute(cli: Cli) -> Result<ExitCode, Box<dyn Error>> {
    let settings = Settings::discover(cli.settings.as_deref())?;
    match cli.command {
        Command::Run(args) => run::run(&args, &settings),
        Command::Terminate(args) => terminate::run(&args),
        Command::ResolveConfig(args) => resolve_config::run(&args, &settings),
    }
}

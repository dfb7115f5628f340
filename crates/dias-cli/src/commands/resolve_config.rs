use std::error::Error;
use std::process::ExitCode;

use clap::Args;
use dias_batch::serde::to_canonical_json_pretty;
use dias_dx::DxClient;

use super::load_config;
use crate::settings::Settings;

#[derive(Args, Debug)]
pub struct ResolveConfigArgs {
    /// Assay to resolve.
    #[arg(long, required_unless_present = "config")]
    pub assay: Option<String>,
    /// Load this config file id instead of resolving.
    #[arg(long)]
    pub config: Option<String>,
}

pub fn run(args: &ResolveConfigArgs, settings: &Settings) -> Result<ExitCode, Box<dyn Error>> {
    let client = DxClient::from_env()?;
    let project = client.settings().project.clone();
    let config = load_config(
        &client,
        settings,
        args.config.as_deref(),
        args.assay.as_deref(),
        project.as_ref(),
    )?;
    eprintln!("{} {} from {}", config.assay_name, config.version, config.source_id);
    println!("{}", String::from_utf8(to_canonical_json_pretty(&config)?)?);
    Ok(ExitCode::SUCCESS)
}

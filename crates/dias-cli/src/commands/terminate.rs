use std::error::Error;
use std::process::ExitCode;

use clap::Args;
use dias_core::JobId;
use dias_dx::DxClient;

#[derive(Args, Debug)]
pub struct TerminateArgs {
    /// Job or analysis ids.
    #[arg(required = true, value_name = "ID")]
    pub ids: Vec<String>,
}

/// Exit code when at least one id could not be terminated.
pub const PARTIAL_FAILURE: u8 = 2;

pub fn run(args: &TerminateArgs) -> Result<ExitCode, Box<dyn Error>> {
    let client = DxClient::from_env()?;
    let ids: Vec<JobId> = args.ids.iter().map(|id| JobId::new(id.trim())).collect();
    let summary = dias_batch::terminate(&client, &ids);
    println!("terminated {} of {} jobs", summary.terminated.len(), ids.len());
    for (id, reason) in &summary.failed {
        println!("  {id}: {reason}");
    }
    if summary.is_clean() {
        Ok(ExitCode::SUCCESS)
    } else {
        Ok(ExitCode::from(PARTIAL_FAILURE))
    }
}

//! Bulk job termination.

use dias_core::{ExecutionPlatform, JobId};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

/// Which ids were terminated and which were not.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TerminateSummary {
    /// Ids the platform accepted.
    pub terminated: Vec<JobId>,
    /// Ids with the error each one raised.
    pub failed: Vec<(JobId, String)>,
}

impl TerminateSummary {
    /// True when every id was terminated.
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Terminates every id independently; one failure never stops the rest.
pub fn terminate<P: ExecutionPlatform + ?Sized>(platform: &P, ids: &[JobId]) -> TerminateSummary {
    let mut summary = TerminateSummary::default();
    for id in ids {
        match platform.terminate(id) {
            Ok(()) => {
                info!(job = %id, "terminated");
                summary.terminated.push(id.clone());
            }
            Err(err) => {
                warn!(job = %id, error = %err, "could not terminate");
                summary.failed.push((id.clone(), err.to_string()));
            }
        }
    }
    summary
}

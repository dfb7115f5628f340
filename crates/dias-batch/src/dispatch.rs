//! Stage submission and destination folders.

use std::collections::{BTreeMap, BTreeSet};

use chrono::Utc;
use dias_core::{
    DiasError, ErrorInfo, ExecutableInfo, ExecutableKind, ExecutableRef, ExecutionPlatform,
    JobId, JobOutcome, JobSpec, Location,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::batch::{BatchTable, RUN_ROW};

/// Timestamp format used in destination folders.
pub const DESTINATION_TIMESTAMP: &str = "%y%m%d_%H%M%S";

/// Everything needed to launch one stage.
#[derive(Debug, Clone)]
pub struct StageDispatch<'s> {
    /// Stage name, used in logs and errors.
    pub stage: &'s str,
    /// Executable to launch.
    pub executable: &'s ExecutableRef,
    /// One job per row.
    pub table: &'s BatchTable,
    /// Instance type override.
    pub instance_type: Option<&'s str>,
    /// Jobs every submission depends on.
    pub dependencies: &'s [JobId],
    /// Wait for every job before returning.
    pub block_until_done: bool,
}

/// A submitted job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LaunchedJob {
    /// Platform job id.
    pub id: JobId,
    /// Job name, `<executable>-<batch id>` for per-sample rows.
    pub name: String,
    /// Batch id of the row the job was built from.
    pub batch_id: String,
    /// Sample of the row; `None` for the run row.
    pub sample: Option<String>,
}

/// Result of launching one stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DispatchedStage {
    /// Stage name.
    pub stage: String,
    /// `container:/folder` the stage writes into.
    pub destination: Location,
    /// Executable as described by the platform.
    pub executable: ExecutableInfo,
    /// Submitted jobs in row order.
    pub jobs: Vec<LaunchedJob>,
    /// Rendered batch table.
    #[serde(skip)]
    pub tsv: Vec<u8>,
}

impl DispatchedStage {
    /// Ids of every submitted job.
    pub fn job_ids(&self) -> Vec<JobId> {
        self.jobs.iter().map(|job| job.id.clone()).collect()
    }
}

/// Turns batch tables into platform submissions.
///
/// Destinations are `<output_root>/<name>[-<version>]-<timestamp>` and are
/// never handed out twice by the same dispatcher.
pub struct JobDispatcher<'a, P: ExecutionPlatform + ?Sized> {
    platform: &'a P,
    output_root: Location,
    timestamp: String,
    used: BTreeSet<String>,
}

impl<'a, P: ExecutionPlatform + ?Sized> JobDispatcher<'a, P> {
    /// Creates a dispatcher stamping destinations with the current time.
    pub fn new(platform: &'a P, output_root: Location) -> Self {
        Self {
            platform,
            output_root,
            timestamp: Utc::now().format(DESTINATION_TIMESTAMP).to_string(),
            used: BTreeSet::new(),
        }
    }

    /// Overrides the destination timestamp.
    pub fn with_timestamp(mut self, timestamp: impl Into<String>) -> Self {
        self.timestamp = timestamp.into();
        self
    }

    /// Timestamp stamped onto destinations.
    pub fn timestamp(&self) -> &str {
        &self.timestamp
    }

    /// Reserves a fresh destination for `info`.
    pub fn destination_for(&mut self, info: &ExecutableInfo) -> Location {
        let base = match &info.version {
            Some(version) => format!("{}-{version}-{}", info.name, self.timestamp),
            None => format!("{}-{}", info.name, self.timestamp),
        };
        let mut candidate = base.clone();
        let mut attempt = 1;
        while self.used.contains(&candidate) {
            attempt += 1;
            candidate = format!("{base}-{attempt}");
        }
        self.used.insert(candidate.clone());
        self.output_root.join(&candidate)
    }

    /// Submits one job per row, then optionally waits on all of them.
    pub fn dispatch(&mut self, request: &StageDispatch<'_>) -> Result<DispatchedStage, DiasError> {
        let executable = self.platform.describe_executable(request.executable)?;
        let destination = self.destination_for(&executable);
        let stage_folders: BTreeMap<String, String> =
            if request.executable.kind()? == ExecutableKind::Workflow {
                executable
                    .stages
                    .iter()
                    .map(|stage| (stage.id.clone(), stage.executable_name.clone()))
                    .collect()
            } else {
                BTreeMap::new()
            };
        let tsv = request.table.to_tsv()?;

        let mut jobs = Vec::with_capacity(request.table.len());
        for row in request.table.rows() {
            let name = if row.batch_id == RUN_ROW {
                executable.name.clone()
            } else {
                format!("{}-{}", executable.name, row.batch_id)
            };
            let spec = JobSpec {
                executable: request.executable.clone(),
                name: name.clone(),
                inputs: row.values.clone(),
                destination: destination.to_string(),
                stage_folders: stage_folders.clone(),
                instance_type: request.instance_type.map(str::to_string),
                dependencies: request.dependencies.to_vec(),
                block_until_done: request.block_until_done,
            };
            let id = self
                .platform
                .submit(&spec)
                .map_err(|err| with_stage_jobs(err, request.stage, &jobs))?;
            debug!(stage = request.stage, job = %id, name = %name, "submitted job");
            jobs.push(LaunchedJob {
                id,
                name,
                batch_id: row.batch_id.clone(),
                sample: row.sample.clone(),
            });
        }
        info!(
            stage = request.stage,
            executable = %request.executable,
            destination = %destination,
            jobs = jobs.len(),
            "launched stage"
        );

        if request.block_until_done {
            for job in &jobs {
                info!(stage = request.stage, job = %job.id, "waiting for job");
                let outcome = self
                    .platform
                    .wait(&job.id)
                    .map_err(|err| with_stage_jobs(err, request.stage, &jobs))?;
                if let JobOutcome::Failed { reason } = outcome {
                    let err = DiasError::RemoteJobFailed(
                        ErrorInfo::new("remote_job_failed", "upstream job did not finish")
                            .with_context("job", job.id.to_string())
                            .with_context("name", job.name.clone())
                            .with_context("reason", reason),
                    );
                    return Err(with_stage_jobs(err, request.stage, &jobs));
                }
            }
        }

        Ok(DispatchedStage {
            stage: request.stage.to_string(),
            destination,
            executable,
            jobs,
            tsv,
        })
    }
}

/// Names the stage and every job it already submitted.
fn with_stage_jobs(err: DiasError, stage: &str, jobs: &[LaunchedJob]) -> DiasError {
    let err = err.with_context("stage", stage);
    if jobs.is_empty() {
        return err;
    }
    err.with_list("stage_jobs", jobs.iter().map(|job| job.id.as_str()))
}

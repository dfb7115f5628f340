//! Execution platform wrapper that records instead of submitting.

use std::cell::RefCell;

use dias_core::{
    DiasError, ExecutableInfo, ExecutableRef, ExecutionPlatform, JobId, JobOutcome, JobSpec,
};
use tracing::info;

use crate::serde::to_canonical_json_bytes;

/// Describes executables through the real platform; everything else is
/// recorded and logged.
pub struct DryRunPlatform<'a, P: ExecutionPlatform + ?Sized> {
    inner: &'a P,
    submitted: RefCell<Vec<(JobId, JobSpec)>>,
}

impl<'a, P: ExecutionPlatform + ?Sized> DryRunPlatform<'a, P> {
    /// Wraps `inner`.
    pub fn new(inner: &'a P) -> Self {
        Self {
            inner,
            submitted: RefCell::new(Vec::new()),
        }
    }

    /// Jobs that would have been submitted.
    pub fn submitted(&self) -> Vec<(JobId, JobSpec)> {
        self.submitted.borrow().clone()
    }
}

impl<P: ExecutionPlatform + ?Sized> ExecutionPlatform for DryRunPlatform<'_, P> {
    fn describe_executable(&self, executable: &ExecutableRef) -> Result<ExecutableInfo, DiasError> {
        self.inner.describe_executable(executable)
    }

    fn submit(&self, spec: &JobSpec) -> Result<JobId, DiasError> {
        let mut submitted = self.submitted.borrow_mut();
        let id = JobId::new(format!("dry-run-{}", submitted.len() + 1));
        let payload = to_canonical_json_bytes(spec)?;
        info!(
            job = %id,
            name = %spec.name,
            spec = %String::from_utf8_lossy(&payload),
            "dry run: would submit"
        );
        submitted.push((id.clone(), spec.clone()));
        Ok(id)
    }

    fn wait(&self, job: &JobId) -> Result<JobOutcome, DiasError> {
        info!(job = %job, "dry run: not waiting");
        Ok(JobOutcome::Done)
    }

    fn terminate(&self, job: &JobId) -> Result<(), DiasError> {
        info!(job = %job, "dry run: would terminate");
        Ok(())
    }

    fn tag(&self, job: &JobId, tags: &[String]) -> Result<(), DiasError> {
        info!(job = %job, tags = ?tags, "dry run: would tag");
        Ok(())
    }
}

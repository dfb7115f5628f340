use std::thread;
use std::time::Duration;

use dias_core::{
    DiasError, ErrorInfo, ExecutableInfo, ExecutableKind, ExecutableRef, ExecutionPlatform, JobId,
    JobOutcome, JobSpec, Location, StageInfo,
};
use serde_json::{json, Value};
use tracing::{debug, info};

use crate::client::{DxClient, Family};
use crate::wire::{job_outcome, run_body};

fn field<'v>(value: &'v Value, key: &str, route: &str) -> Result<&'v str, DiasError> {
    value.get(key).and_then(Value::as_str).ok_or_else(|| {
        DiasError::Platform(
            ErrorInfo::new("dx_response", "response field missing")
                .with_context("route", route)
                .with_context("field", key),
        )
    })
}

impl DxClient {
    fn describe_raw(&self, executable: &ExecutableRef) -> Result<Value, DiasError> {
        let mut body = json!({});
        if let Some(project) = executable.container().or_else(|| self.settings().project.clone()) {
            if executable.kind()? != ExecutableKind::App {
                body["project"] = json!(project.as_str());
            }
        }
        self.call(&format!("{}/describe", executable.id()), &body, Family::Platform)
    }
}

impl ExecutionPlatform for DxClient {
    fn describe_executable(&self, executable: &ExecutableRef) -> Result<ExecutableInfo, DiasError> {
        let route = format!("{}/describe", executable.id());
        let reply = self.describe_raw(executable)?;
        let mut stages = Vec::new();
        if executable.kind()? == ExecutableKind::Workflow {
            let listed = reply
                .get("stages")
                .and_then(Value::as_array)
                .cloned()
                .unwrap_or_default();
            for stage in &listed {
                let id = field(stage, "id", &route)?;
                let stage_executable = field(stage, "executable", &route)?;
                let stage_ref = ExecutableRef::parse(stage_executable)?;
                let described = self.describe_raw(&stage_ref)?;
                stages.push(StageInfo {
                    id: id.to_string(),
                    executable: stage_executable.to_string(),
                    executable_name: field(&described, "name", &route)?.to_string(),
                });
            }
        }
        Ok(ExecutableInfo {
            id: field(&reply, "id", &route)?.to_string(),
            name: field(&reply, "name", &route)?.to_string(),
            version: reply
                .get("version")
                .and_then(Value::as_str)
                .map(str::to_string),
            stages,
        })
    }

    fn submit(&self, spec: &JobSpec) -> Result<JobId, DiasError> {
        let destination = Location::parse(&spec.destination, self.settings().project.as_ref())?;
        let kind = spec.executable.kind()?;
        let body = run_body(spec, kind, &destination);
        let route = format!("{}/run", spec.executable.id());
        let reply = self.call(&route, &body, Family::Platform)?;
        let id = JobId::new(field(&reply, "id", &route)?);
        info!(job = %id, name = %spec.name, destination = %destination, "submitted");
        Ok(id)
    }

    fn wait(&self, job: &JobId) -> Result<JobOutcome, DiasError> {
        let route = format!("{job}/describe");
        let body = json!({ "fields": { "state": true, "failureReason": true, "failureMessage": true } });
        let interval = Duration::from_millis(self.settings().poll_interval_ms);
        loop {
            let reply = self.call(&route, &body, Family::Platform)?;
            if let Some(outcome) = job_outcome(&reply) {
                return Ok(outcome);
            }
            let state = reply.get("state").and_then(Value::as_str).unwrap_or("unknown");
            debug!(job = %job, state, "waiting");
            thread::sleep(interval);
        }
    }

    fn terminate(&self, job: &JobId) -> Result<(), DiasError> {
        self.call(&format!("{job}/terminate"), &json!({}), Family::Platform)?;
        Ok(())
    }

    fn tag(&self, job: &JobId, tags: &[String]) -> Result<(), DiasError> {
        self.call(&format!("{job}/addTags"), &json!({ "tags": tags }), Family::Platform)?;
        Ok(())
    }
}

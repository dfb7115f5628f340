//! Request bodies and response decoding for the DNAnexus API.
//!
//! Everything here is pure so the shapes can be checked without a server.

use std::collections::BTreeMap;

use dias_core::{
    ContainerId, DiasError, ErrorInfo, ExecutableKind, FileId, InputValue, JobOutcome, JobSpec,
    Location, RemoteFile, StorageState,
};
use serde_json::{json, Map, Value};

/// Key the platform uses for file links in job input.
pub const LINK_KEY: &str = "$dnanexus_link";

/// Page size requested from `findDataObjects`.
pub const FIND_PAGE_LIMIT: u64 = 1000;

/// Encodes one input binding; files become links, literals pass through.
pub fn encode_input(value: &InputValue) -> Value {
    match value {
        InputValue::File(id) => link(id),
        InputValue::Files(ids) => Value::Array(ids.iter().map(link).collect()),
        InputValue::Literal(value) => value.clone(),
    }
}

fn link(id: &FileId) -> Value {
    json!({ LINK_KEY: id.as_str() })
}

/// Body of `/<executable>/run` for `spec`.
pub fn run_body(spec: &JobSpec, kind: ExecutableKind, destination: &Location) -> Value {
    let input: Map<String, Value> = spec
        .inputs
        .iter()
        .map(|(slot, value)| (slot.clone(), encode_input(value)))
        .collect();
    let mut body = json!({
        "name": spec.name,
        "input": input,
        "project": destination.container.as_str(),
        "folder": destination.folder,
    });
    if !spec.dependencies.is_empty() {
        body["dependsOn"] = json!(spec
            .dependencies
            .iter()
            .map(|job| job.as_str())
            .collect::<Vec<_>>());
    }
    if kind == ExecutableKind::Workflow && !spec.stage_folders.is_empty() {
        body["stageFolders"] = json!(spec.stage_folders);
    }
    if let Some(instance_type) = &spec.instance_type {
        let requirement = json!({ "*": { "instanceType": instance_type } });
        if kind == ExecutableKind::Workflow {
            let per_stage: BTreeMap<&str, Value> = spec
                .stage_folders
                .keys()
                .map(|stage| (stage.as_str(), requirement.clone()))
                .collect();
            body["stageSystemRequirements"] = json!(per_stage);
        } else {
            body["systemRequirements"] = requirement;
        }
    }
    body
}

/// Body of one `findDataObjects` page.
pub fn find_body(location: &Location, name_pattern: &str, starting: Option<&Value>) -> Value {
    let mut body = json!({
        "class": "file",
        "scope": {
            "project": location.container.as_str(),
            "folder": location.folder,
            "recurse": true,
        },
        "name": { "regexp": name_pattern },
        "describe": { "fields": describe_fields() },
        "limit": FIND_PAGE_LIMIT,
    });
    if let Some(starting) = starting {
        body["starting"] = starting.clone();
    }
    body
}

/// Fields requested whenever a file is described.
pub fn describe_fields() -> Value {
    json!({
        "id": true,
        "project": true,
        "folder": true,
        "name": true,
        "archivalState": true,
    })
}

fn text<'v>(value: &'v Value, key: &str) -> Result<&'v str, DiasError> {
    value.get(key).and_then(Value::as_str).ok_or_else(|| {
        DiasError::Store(
            ErrorInfo::new("dx_response", "response field missing")
                .with_context("field", key),
        )
    })
}

/// Decodes a file description into a snapshot.
pub fn remote_file(describe: &Value) -> Result<RemoteFile, DiasError> {
    let state = match describe.get("archivalState").and_then(Value::as_str) {
        Some(raw) => raw.parse::<StorageState>()?,
        None => StorageState::Live,
    };
    let location = Location::new(
        ContainerId::new(text(describe, "project")?),
        text(describe, "folder")?,
    );
    Ok(RemoteFile {
        id: FileId::new(text(describe, "id")?),
        container: location.container,
        folder: location.folder,
        name: text(describe, "name")?.to_string(),
        state,
    })
}

/// Decodes one `findDataObjects` page into files and the next cursor.
pub fn find_page(page: &Value) -> Result<(Vec<RemoteFile>, Option<Value>), DiasError> {
    let results = page
        .get("results")
        .and_then(Value::as_array)
        .ok_or_else(|| {
            DiasError::Store(ErrorInfo::new("dx_response", "findDataObjects returned no results"))
        })?;
    let files = results
        .iter()
        .map(|result| match result.get("describe") {
            Some(describe) => remote_file(describe),
            None => remote_file(result),
        })
        .collect::<Result<Vec<_>, _>>()?;
    let next = page.get("next").filter(|next| !next.is_null()).cloned();
    Ok((files, next))
}

/// Maps a job or analysis description to its terminal outcome, or `None`
/// while it is still running.
pub fn job_outcome(describe: &Value) -> Option<JobOutcome> {
    let state = describe.get("state").and_then(Value::as_str)?;
    match state {
        "done" => Some(JobOutcome::Done),
        "failed" | "terminated" => {
            let reason = describe
                .get("failureReason")
                .and_then(Value::as_str)
                .unwrap_or(state);
            let reason = match describe.get("failureMessage").and_then(Value::as_str) {
                Some(message) => format!("{reason}: {message}"),
                None => reason.to_string(),
            };
            Some(JobOutcome::Failed { reason })
        }
        _ => None,
    }
}

/// Pulls `(type, message)` out of an API error body.
pub fn api_error(body: &str) -> Option<(String, String)> {
    let value: Value = serde_json::from_str(body).ok()?;
    let error = value.get("error")?;
    let kind = error.get("type").and_then(Value::as_str)?.to_string();
    let message = error
        .get("message")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    Some((kind, message))
}

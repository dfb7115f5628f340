use dias_core::{
    ContainerId, DiasError, ErrorInfo, FileId, FileRef, Location, ObjectStore, RemoteFile,
};
use serde_json::{json, Value};
use tracing::{debug, info};

use crate::client::{headers, DxClient, Family};
use crate::wire::{describe_fields, find_body, find_page, remote_file};

fn url_of(reply: &Value, route: &str) -> Result<String, DiasError> {
    reply
        .get("url")
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| {
            DiasError::Store(
                ErrorInfo::new("dx_response", "reply carries no url").with_context("route", route),
            )
        })
}

impl DxClient {
    fn project_of(&self, file: &FileRef) -> Option<ContainerId> {
        file.container.clone().or_else(|| self.settings().project.clone())
    }
}

impl ObjectStore for DxClient {
    fn find(&self, location: &Location, name_pattern: &str) -> Result<Vec<RemoteFile>, DiasError> {
        let mut files = Vec::new();
        let mut starting: Option<Value> = None;
        loop {
            let body = find_body(location, name_pattern, starting.as_ref());
            let page = self.call("system/findDataObjects", &body, Family::Store)?;
            let (batch, next) = find_page(&page)?;
            files.extend(batch);
            match next {
                Some(next) => starting = Some(next),
                None => break,
            }
        }
        debug!(location = %location, pattern = name_pattern, found = files.len(), "find");
        Ok(files)
    }

    fn describe(&self, file: &FileRef) -> Result<RemoteFile, DiasError> {
        let mut body = json!({ "fields": describe_fields() });
        if let Some(project) = self.project_of(file) {
            body["project"] = json!(project.as_str());
        }
        let reply = self.call(&format!("{}/describe", file.id), &body, Family::Store)?;
        remote_file(&reply)
    }

    fn read(&self, file: &FileRef) -> Result<Vec<u8>, DiasError> {
        let route = format!("{}/download", file.id);
        let mut body = json!({ "duration": 3600 });
        if let Some(project) = self.project_of(file) {
            body["project"] = json!(project.as_str());
        }
        let reply = self.call(&route, &body, Family::Store)?;
        self.fetch(&url_of(&reply, &route)?, &headers(&reply))
    }

    fn request_revival(&self, container: &ContainerId, files: &[FileId]) -> Result<(), DiasError> {
        let ids: Vec<&str> = files.iter().map(FileId::as_str).collect();
        self.call(
            &format!("{container}/unarchive"),
            &json!({ "files": ids }),
            Family::Store,
        )?;
        info!(container = %container, files = files.len(), "unarchive requested");
        Ok(())
    }

    fn upload(&self, location: &Location, name: &str, bytes: &[u8]) -> Result<FileId, DiasError> {
        let created = self.call(
            "file/new",
            &json!({
                "project": location.container.as_str(),
                "folder": location.folder,
                "name": name,
                "parents": true,
            }),
            Family::Store,
        )?;
        let id = created.get("id").and_then(Value::as_str).ok_or_else(|| {
            DiasError::Store(ErrorInfo::new("dx_response", "file/new returned no id"))
        })?;
        let id = FileId::new(id);
        let route = format!("{id}/upload");
        let part = self.call(&route, &json!({ "index": 1 }), Family::Store)?;
        self.put(&url_of(&part, &route)?, &headers(&part), bytes)?;
        self.call(&format!("{id}/close"), &json!({}), Family::Store)?;
        debug!(location = %location, name, id = %id, "uploaded");
        Ok(id)
    }
}

//! Storage tier reconciliation for every file a run needs.

use std::collections::{BTreeMap, BTreeSet};

use dias_core::{
    ContainerId, DiasError, ErrorInfo, ExecutionPlatform, FileId, FileRef, JobId, ObjectStore,
    RemoteFile, StorageState,
};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::locate::owning_sample;

/// Files a run needs, split by scope.
#[derive(Debug, Clone, Default)]
pub struct NeededFiles {
    /// Files bound to one sample.
    pub sample: Vec<RemoteFile>,
    /// Run-wide files; never filtered.
    pub run: Vec<RemoteFile>,
}

/// Reconciliation flags.
#[derive(Debug, Clone, Default)]
pub struct ReconcileOptions {
    /// Request revival of archived files.
    pub unarchive: bool,
    /// Only revive; never proceed to dispatch.
    pub unarchive_only: bool,
    /// Restrict sample-scoped checks to these samples.
    pub samples: Option<BTreeSet<String>>,
    /// Job to tag when revival is requested.
    pub initiating_job: Option<JobId>,
    /// Report what would be revived without asking the store.
    pub dry_run: bool,
}

/// Result of a reconciliation pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ArchivalOutcome {
    /// Every needed file is live; the run may proceed.
    AllLive,
    /// Revival was requested; the run stops and is re-invoked later.
    RevivalRequested {
        /// Files asked for, per container.
        requested: BTreeMap<ContainerId, Vec<FileId>>,
    },
    /// Unarchive-only mode found nothing archived.
    NothingToRevive,
}

/// Checks storage tiers and revives archived files on request.
pub struct ArchivalReconciler<'a, S: ObjectStore + ?Sized, P: ExecutionPlatform + ?Sized> {
    store: &'a S,
    platform: &'a P,
}

impl<'a, S: ObjectStore + ?Sized, P: ExecutionPlatform + ?Sized> ArchivalReconciler<'a, S, P> {
    /// Creates a reconciler.
    pub fn new(store: &'a S, platform: &'a P) -> Self {
        Self { store, platform }
    }

    /// Describes every retained file again and decides whether the run can
    /// proceed.
    pub fn reconcile(
        &self,
        needed: &NeededFiles,
        options: &ReconcileOptions,
    ) -> Result<ArchivalOutcome, DiasError> {
        let mut retained: BTreeMap<(ContainerId, FileId), &RemoteFile> = BTreeMap::new();
        for file in &needed.sample {
            let allowed = match &options.samples {
                Some(samples) => {
                    owning_sample(samples.iter().map(String::as_str), &file.name).is_some()
                }
                None => true,
            };
            if allowed {
                retained.entry(copy_key(file)).or_insert(file);
            }
        }
        for file in &needed.run {
            retained.entry(copy_key(file)).or_insert(file);
        }

        let mut fresh = Vec::with_capacity(retained.len());
        for file in retained.values() {
            let reference = FileRef {
                container: Some(file.container.clone()),
                id: file.id.clone(),
            };
            fresh.push(self.store.describe(&reference)?);
        }

        let transient: Vec<&RemoteFile> = fresh.iter().filter(|file| file.state.is_transient()).collect();
        if !transient.is_empty() {
            return Err(DiasError::UnrecoverableArchivalState(
                ErrorInfo::new("archival_transient", "files are moving between storage tiers")
                    .with_list("files", transient.iter().map(|file| describe(file)))
                    .with_hint("wait for the storage transition to finish and re-run"),
            ));
        }

        let archived: Vec<&RemoteFile> = fresh
            .iter()
            .filter(|file| file.state == StorageState::Archived)
            .collect();
        if archived.is_empty() {
            info!(checked = fresh.len(), "all needed files are live");
            return Ok(if options.unarchive_only {
                ArchivalOutcome::NothingToRevive
            } else {
                ArchivalOutcome::AllLive
            });
        }
        if !(options.unarchive || options.unarchive_only) {
            return Err(DiasError::FilesArchived(
                ErrorInfo::new("files_archived", "needed files are archived")
                    .with_context("count", archived.len().to_string())
                    .with_list("files", archived.iter().map(|file| describe(file)))
                    .with_hint("re-run with --unarchive to request revival"),
            ));
        }

        let mut requested: BTreeMap<ContainerId, Vec<FileId>> = BTreeMap::new();
        for file in &archived {
            requested
                .entry(file.container.clone())
                .or_default()
                .push(file.id.clone());
        }
        for (container, files) in &requested {
            if options.dry_run {
                info!(container = %container, files = files.len(), "dry run: would request revival");
                continue;
            }
            info!(container = %container, files = files.len(), "requesting revival");
            self.store.request_revival(container, files)?;
        }
        if let (Some(job), false) = (&options.initiating_job, options.dry_run) {
            let tags = vec![format!("Unarchiving of {} files requested", archived.len())];
            if let Err(err) = self.platform.tag(job, &tags) {
                warn!(job = %job, error = %err, "could not tag initiating job");
            }
        }
        Ok(ArchivalOutcome::RevivalRequested { requested })
    }
}

/// A file id names one object; each container holding it is a separate copy
/// with its own storage state.
fn copy_key(file: &RemoteFile) -> (ContainerId, FileId) {
    (file.container.clone(), file.id.clone())
}

fn describe(file: &RemoteFile) -> String {
    format!("{} ({}, {})", file.name, file.qualified_id(), file.state.as_str())
}

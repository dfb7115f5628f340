//! Assigning located files to manifest samples.

use std::collections::{BTreeMap, BTreeSet};

use dias_core::{DiasError, ErrorInfo, Location, ObjectStore, RemoteFile};
use tracing::{debug, info};

use crate::locate::{owning_sample, FileLocator, LocateQuery};
use crate::manifest::{Manifest, ManifestEntry};

/// One file role a stage needs per sample.
#[derive(Debug, Clone)]
pub struct RoleSpec {
    /// Role (input slot) name.
    pub role: String,
    /// Search root.
    pub location: Location,
    /// Sub-directory filter below the root.
    pub subdir: Option<String>,
    /// File name regex.
    pub pattern: String,
    /// Whether a sample without a match leaves the dispatch set.
    pub required: bool,
}

/// Error category for samples lacking `role`.
pub fn missing_category(role: &str) -> String {
    format!("missing {role}")
}

/// Dispatch set with its bindings and the samples that fell out.
#[derive(Debug, Clone, Default)]
pub struct BoundManifest {
    /// Entries that can be dispatched, in manifest order.
    pub entries: Vec<ManifestEntry>,
    /// Sample to role to files.
    pub bindings: BTreeMap<String, BTreeMap<String, Vec<RemoteFile>>>,
    /// Category to sample ids.
    pub errors: BTreeMap<String, Vec<String>>,
    /// Samples removed by the exclude list.
    pub excluded: Vec<String>,
}

impl BoundManifest {
    /// Files bound to `sample` for `role`, empty when there are none.
    pub fn files(&self, sample: &str, role: &str) -> &[RemoteFile] {
        self.bindings
            .get(sample)
            .and_then(|roles| roles.get(role))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Every bound file.
    pub fn all_files(&self) -> impl Iterator<Item = &RemoteFile> {
        self.bindings.values().flat_map(|roles| roles.values().flatten())
    }

    /// Sample ids in the dispatch set.
    pub fn samples(&self) -> BTreeSet<String> {
        self.entries.iter().map(|entry| entry.sample_id.clone()).collect()
    }
}

/// Binds manifest samples to the files each role needs.
pub struct ManifestFileBinder<'a, S: ObjectStore + ?Sized> {
    locator: FileLocator<'a, S>,
}

impl<'a, S: ObjectStore + ?Sized> ManifestFileBinder<'a, S> {
    /// Creates a binder searching `store`.
    pub fn new(store: &'a S) -> Self {
        Self {
            locator: FileLocator::new(store),
        }
    }

    /// Binds every role, removing samples that lack a required one.
    ///
    /// Fails with `EmptyManifestAfterFiltering` when no sample survives.
    pub fn bind(
        &self,
        manifest: &Manifest,
        roles: &[RoleSpec],
        exclude: &BTreeSet<String>,
    ) -> Result<BoundManifest, DiasError> {
        let mut bound = BoundManifest::default();
        let mut candidates: Vec<&ManifestEntry> = Vec::new();
        for entry in &manifest.entries {
            if exclude.contains(&entry.sample_id) {
                bound.excluded.push(entry.sample_id.clone());
            } else {
                candidates.push(entry);
            }
        }
        let samples: BTreeSet<String> = candidates
            .iter()
            .map(|entry| entry.sample_id.clone())
            .collect();

        let mut dropped: BTreeSet<String> = BTreeSet::new();
        for role in roles {
            let query = LocateQuery {
                base: &role.location,
                subdir: role.subdir.as_deref(),
                pattern: &role.pattern,
                samples: Some(&samples),
            };
            let files = self.locator.locate(&query)?;
            let mut by_sample: BTreeMap<String, Vec<RemoteFile>> = BTreeMap::new();
            for file in files {
                if let Some(sample) = owning_sample(samples.iter().map(String::as_str), &file.name) {
                    by_sample.entry(sample.to_string()).or_default().push(file);
                }
            }
            for entry in &candidates {
                match by_sample.remove(&entry.sample_id) {
                    Some(files) => {
                        bound
                            .bindings
                            .entry(entry.sample_id.clone())
                            .or_default()
                            .insert(role.role.clone(), files);
                    }
                    None => {
                        bound
                            .errors
                            .entry(missing_category(&role.role))
                            .or_default()
                            .push(entry.sample_id.clone());
                        if role.required {
                            dropped.insert(entry.sample_id.clone());
                        }
                    }
                }
            }
            debug!(role = %role.role, required = role.required, "bound role");
        }

        for entry in candidates {
            if dropped.contains(&entry.sample_id) {
                bound.bindings.remove(&entry.sample_id);
            } else {
                bound.entries.push(entry.clone());
            }
        }
        if bound.entries.is_empty() {
            return Err(DiasError::EmptyManifestAfterFiltering(
                ErrorInfo::new("manifest_empty_after_filtering", "no sample left to dispatch")
                    .with_context("manifest_samples", manifest.entries.len().to_string())
                    .with_context("excluded", bound.excluded.len().to_string())
                    .with_list(
                        "errors",
                        bound
                            .errors
                            .iter()
                            .map(|(category, samples)| format!("{category}: {}", samples.len())),
                    ),
            ));
        }
        info!(
            dispatch = bound.entries.len(),
            dropped = dropped.len(),
            excluded = bound.excluded.len(),
            "bound manifest to files"
        );
        Ok(bound)
    }
}

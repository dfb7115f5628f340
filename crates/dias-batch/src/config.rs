//! Assay config documents and version resolution.
//!
//! A config is a JSON document on the remote store describing every stage
//! of one assay's pipeline. Several versions of the document usually sit in
//! the same folder; [`VersionResolver`] picks the single highest one.

use std::collections::{BTreeMap, BTreeSet};

use dias_core::{DiasError, ErrorInfo, ExecutableRef, FileRef, Location, ObjectStore, StorageState};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::serde::from_json_slice;
use crate::version::ConfigVersion;

/// Regex used to list candidate config documents.
pub const CONFIG_NAME_PATTERN: &str = r"\.json$";

/// Immutable run configuration for one assay.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Assay the document configures.
    #[serde(rename = "assay")]
    pub assay_name: String,
    /// Document version.
    pub version: ConfigVersion,
    /// Sample naming conventions.
    #[serde(default)]
    pub name_patterns: NamePatterns,
    /// Named run-wide reference files.
    #[serde(default)]
    pub reference_files: BTreeMap<String, FileRef>,
    /// Optional variant calling stage.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub calling: Option<StageConfig>,
    /// Report generation stages, run in order.
    #[serde(default)]
    pub reports: Vec<StageConfig>,
    /// Optional downstream packaging stage.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub packaging: Option<StageConfig>,
    /// Store identifier the document was read from.
    #[serde(skip)]
    pub source_id: String,
}

/// Sample naming conventions, one per manifest format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NamePatterns {
    /// Pattern a structured-manifest sample id must match.
    pub structured: String,
    /// Pattern a legacy-manifest sample id must match.
    pub legacy: String,
}

impl Default for NamePatterns {
    fn default() -> Self {
        Self {
            structured: r"^[A-Za-z0-9]+-[A-Za-z0-9]+".to_string(),
            legacy: r"^X\d+".to_string(),
        }
    }
}

/// Which stage slot of the pipeline a stage occupies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StageKind {
    /// Variant calling.
    Calling,
    /// Report generation.
    Reports,
    /// Downstream packaging.
    Packaging,
}

/// How a stage waits for the stages feeding it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum DependencyMode {
    /// Submit immediately and let the platform hold the job until its
    /// dependencies finish.
    #[default]
    #[serde(rename = "platform")]
    PlatformLinked,
    /// Wait for the upstream jobs in this process before submitting.
    #[serde(rename = "block")]
    BlockUntilDone,
}

/// Whether a file input belongs to one sample or to the whole run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileScope {
    /// One binding per sample, matched by sample id.
    #[default]
    Sample,
    /// Every match is bound to every row.
    Run,
}

/// Manifest-derived values a stage input can take.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ManifestField {
    /// Sample id.
    Sample,
    /// Test codes of the row's test-group.
    TestCodes,
    /// Clinical indication of the row's test-group.
    ClinicalIndications,
    /// Panels of the row's test-group.
    Panels,
    /// Collision-free output prefix for the row.
    OutputName,
}

fn required_default() -> bool {
    true
}

/// Where the value of one stage input slot comes from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "from", rename_all = "snake_case")]
pub enum InputSource {
    /// Files found below the run's input root or an upstream output folder.
    Files {
        /// Sub-directory filter below the search root.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        folder: Option<String>,
        /// File name regex.
        pattern: String,
        /// Whether an absent match excludes the sample (or fails the run).
        #[serde(default = "required_default")]
        required: bool,
        /// Sample or run scope.
        #[serde(default)]
        scope: FileScope,
        /// Search the output folder of this upstream stage instead.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        from_stage: Option<String>,
    },
    /// One fixed file.
    Reference {
        /// File reference, or the key of an entry in `reference_files`.
        file: String,
    },
    /// A value taken from the manifest row.
    Manifest {
        /// Field to copy.
        field: ManifestField,
    },
    /// The destination folder of an upstream stage.
    UpstreamFolder {
        /// Upstream stage name.
        stage: String,
    },
}

impl InputSource {
    /// Upstream stage this input reads from, if any.
    pub fn upstream(&self) -> Option<&str> {
        match self {
            InputSource::Files {
                from_stage: Some(stage),
                ..
            } => Some(stage),
            InputSource::UpstreamFolder { stage } => Some(stage),
            _ => None,
        }
    }
}

/// One pipeline stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageConfig {
    /// Stage name, unique within the config.
    pub name: String,
    /// Executable to launch.
    pub executable: ExecutableRef,
    /// Input slot sources.
    #[serde(default)]
    pub inputs: BTreeMap<String, InputSource>,
    /// Fixed literal inputs copied into every row.
    #[serde(default)]
    pub parameters: BTreeMap<String, Value>,
    /// Instance type override.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instance_type: Option<String>,
    /// Requested dependency mechanism towards upstream stages.
    #[serde(default)]
    pub depends_via: DependencyMode,
}

impl StageConfig {
    /// Upstream stages named by any input, in slot order.
    pub fn upstream_stages(&self) -> Vec<&str> {
        let mut seen = BTreeSet::new();
        self.inputs
            .values()
            .filter_map(InputSource::upstream)
            .filter(|stage| seen.insert(*stage))
            .collect()
    }

    /// Effective dependency mode.
    ///
    /// Inputs searched inside an upstream output folder only exist once that
    /// upstream has finished, so they always force blocking.
    pub fn dependency_mode(&self) -> DependencyMode {
        let searches_upstream = self.inputs.values().any(|source| {
            matches!(
                source,
                InputSource::Files {
                    from_stage: Some(_),
                    ..
                }
            )
        });
        if searches_upstream {
            DependencyMode::BlockUntilDone
        } else {
            self.depends_via
        }
    }

    /// True when the stage launches one job per manifest row.
    pub fn is_per_sample(&self) -> bool {
        self.inputs.values().any(|source| match source {
            InputSource::Manifest { .. } => true,
            InputSource::Files { scope, .. } => *scope == FileScope::Sample,
            _ => false,
        })
    }
}

impl Config {
    /// Parses and validates a config document.
    pub fn from_slice(bytes: &[u8], source_id: impl Into<String>) -> Result<Self, DiasError> {
        let mut config: Config = from_json_slice(bytes)?;
        config.source_id = source_id.into();
        config.validate()?;
        Ok(config)
    }

    /// Stages in pipeline order with their slot.
    pub fn stages(&self) -> Vec<(StageKind, &StageConfig)> {
        let mut stages = Vec::new();
        if let Some(calling) = &self.calling {
            stages.push((StageKind::Calling, calling));
        }
        stages.extend(self.reports.iter().map(|stage| (StageKind::Reports, stage)));
        if let Some(packaging) = &self.packaging {
            stages.push((StageKind::Packaging, packaging));
        }
        stages
    }

    /// Looks a stage up by name.
    pub fn stage(&self, name: &str) -> Option<&StageConfig> {
        self.stages()
            .into_iter()
            .map(|(_, stage)| stage)
            .find(|stage| stage.name == name)
    }

    /// Resolves a reference input: a `reference_files` key or a file id.
    pub fn reference(&self, raw: &str) -> Result<FileRef, DiasError> {
        match self.reference_files.get(raw) {
            Some(file) => Ok(file.clone()),
            None => FileRef::parse(raw),
        }
    }

    /// Checks stage names, upstream references and regex patterns.
    pub fn validate(&self) -> Result<(), DiasError> {
        let invalid = |message: &str| {
            ErrorInfo::new("config_invalid", message)
                .with_context("assay", self.assay_name.clone())
                .with_context("version", self.version.to_string())
        };
        if self.assay_name.trim().is_empty() {
            return Err(DiasError::InvalidConfig(invalid("config has no assay name")));
        }
        for pattern in [&self.name_patterns.structured, &self.name_patterns.legacy] {
            Regex::new(pattern).map_err(|err| {
                DiasError::InvalidConfig(
                    invalid("sample name pattern does not compile")
                        .with_context("pattern", pattern.clone())
                        .with_hint(err.to_string()),
                )
            })?;
        }
        let mut earlier: BTreeSet<&str> = BTreeSet::new();
        for (_, stage) in self.stages() {
            if earlier.contains(stage.name.as_str()) {
                return Err(DiasError::InvalidConfig(
                    invalid("duplicate stage name").with_context("stage", stage.name.clone()),
                ));
            }
            for (slot, source) in &stage.inputs {
                if let Some(upstream) = source.upstream() {
                    if !earlier.contains(upstream) {
                        return Err(DiasError::InvalidConfig(
                            invalid("input refers to a stage that does not run earlier")
                                .with_context("stage", stage.name.clone())
                                .with_context("slot", slot.clone())
                                .with_context("upstream", upstream),
                        ));
                    }
                }
                match source {
                    InputSource::Files { pattern, .. } => {
                        Regex::new(pattern).map_err(|err| {
                            DiasError::InvalidConfig(
                                invalid("file pattern does not compile")
                                    .with_context("stage", stage.name.clone())
                                    .with_context("slot", slot.clone())
                                    .with_hint(err.to_string()),
                            )
                        })?;
                    }
                    InputSource::Reference { file } => {
                        self.reference(file)?;
                    }
                    _ => {}
                }
            }
            earlier.insert(stage.name.as_str());
        }
        Ok(())
    }
}

/// Picks the highest version of an assay's config from the remote store.
pub struct VersionResolver<'a, S: ObjectStore + ?Sized> {
    store: &'a S,
}

impl<'a, S: ObjectStore + ?Sized> VersionResolver<'a, S> {
    /// Creates a resolver reading from `store`.
    pub fn new(store: &'a S) -> Self {
        Self { store }
    }

    /// Loads one explicitly referenced document, bypassing version search.
    pub fn load_explicit(&self, file: &FileRef) -> Result<Config, DiasError> {
        let remote = self.store.describe(file)?;
        let bytes = self.store.read(file)?;
        let source = if file.container.is_some() {
            file.to_string()
        } else {
            remote.qualified_id()
        };
        let config = Config::from_slice(&bytes, source)?;
        info!(
            assay = %config.assay_name,
            version = %config.version,
            source = %config.source_id,
            "loaded explicit config"
        );
        Ok(config)
    }

    /// Resolves the single highest-version config for `assay` at `location`.
    pub fn resolve(&self, location: &Location, assay: &str) -> Result<Config, DiasError> {
        let candidates = self.store.find(location, CONFIG_NAME_PATTERN)?;
        debug!(location = %location, found = candidates.len(), "listed config documents");
        if candidates.is_empty() {
            return Err(DiasError::ConfigNotFound(
                ErrorInfo::new("config_not_found", "no config documents at location")
                    .with_context("location", location.to_string()),
            ));
        }

        let mut matching: Vec<(String, Config)> = Vec::new();
        for file in candidates {
            if file.state != StorageState::Live {
                warn!(file = %file.qualified_id(), name = %file.name, state = file.state.as_str(), "skipping config that is not live");
                continue;
            }
            let reference = FileRef {
                container: Some(file.container.clone()),
                id: file.id.clone(),
            };
            let parsed = self
                .store
                .read(&reference)
                .and_then(|bytes| Config::from_slice(&bytes, file.qualified_id()));
            match parsed {
                Ok(config) if config.assay_name == assay => {
                    matching.push((file.name.clone(), config));
                }
                Ok(config) => {
                    debug!(name = %file.name, assay = %config.assay_name, "config is for another assay");
                }
                Err(err) => {
                    warn!(name = %file.name, error = %err, "skipping unparseable config");
                }
            }
        }

        let Some(highest) = matching.iter().map(|(_, config)| config.version).max() else {
            return Err(DiasError::NoMatchingAssay(
                ErrorInfo::new("no_matching_assay", "no config matches the assay")
                    .with_context("assay", assay)
                    .with_context("location", location.to_string()),
            ));
        };
        let mut top: Vec<(String, Config)> = matching
            .into_iter()
            .filter(|(_, config)| config.version == highest)
            .collect();
        if top.len() > 1 {
            return Err(DiasError::AmbiguousVersion(
                ErrorInfo::new("ambiguous_version", "several configs share the highest version")
                    .with_context("assay", assay)
                    .with_context("version", highest.to_string())
                    .with_list(
                        "candidates",
                        top.iter()
                            .map(|(name, config)| format!("{name} ({})", config.source_id)),
                    )
                    .with_hint("remove or re-version all but one document"),
            ));
        }
        let (name, config) = top.remove(0);
        info!(assay, version = %config.version, name = %name, source = %config.source_id, "resolved config");
        Ok(config)
    }
}

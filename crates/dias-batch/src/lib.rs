#![deny(missing_docs)]
//! Archival-aware batch orchestration for dias pipeline runs.
//!
//! A run resolves the assay config, parses the sample manifest, binds
//! remote files to samples, makes sure every needed file is in the live
//! storage tier, and launches the calling, report and packaging stages in
//! dependency order.

pub mod archive;
pub mod batch;
pub mod bind;
pub mod config;
pub mod dispatch;
pub mod dry_run;
pub mod genepanels;
mod hash;
pub mod locate;
pub mod manifest;
pub mod naming;
pub mod orchestrate;
pub mod report;
pub mod serde;
pub mod terminate;
pub mod version;

pub use archive::{ArchivalOutcome, ArchivalReconciler, NeededFiles, ReconcileOptions};
pub use batch::{BatchRow, BatchTable};
pub use bind::{BoundManifest, ManifestFileBinder, RoleSpec};
pub use config::{
    Config, DependencyMode, FileScope, InputSource, ManifestField, StageConfig, StageKind,
    VersionResolver,
};
pub use dispatch::{DispatchedStage, JobDispatcher, LaunchedJob, StageDispatch};
pub use dry_run::DryRunPlatform;
pub use genepanels::Genepanels;
pub use hash::stable_hash_string;
pub use locate::{FileLocator, LocateQuery};
pub use manifest::{parse_manifest, Manifest, ManifestEntry, ManifestFormat};
pub use orchestrate::{
    ManifestInput, PipelineOrchestrator, ReportSelection, RunRequest, StageSelection,
};
pub use report::{PipelineReport, RunReport, RunStatus};
pub use terminate::{terminate, TerminateSummary};
pub use version::ConfigVersion;

//! End-to-end run: resolve inputs, reconcile storage, launch stages.

use std::collections::{BTreeMap, BTreeSet};

use dias_core::{
    DiasError, ErrorInfo, ExecutionPlatform, FileId, InputValue, JobId, Location, ObjectStore,
    RemoteFile,
};
use regex::Regex;
use tracing::{debug, info, warn};

use crate::archive::{ArchivalOutcome, ArchivalReconciler, NeededFiles, ReconcileOptions};
use crate::batch::{check_shape, BatchRow, BatchTable, RUN_ROW};
use crate::bind::{BoundManifest, ManifestFileBinder, RoleSpec};
use crate::config::{
    Config, DependencyMode, FileScope, InputSource, ManifestField, StageConfig, StageKind,
};
use crate::dispatch::{DispatchedStage, JobDispatcher, StageDispatch};
use crate::dry_run::DryRunPlatform;
use crate::genepanels::Genepanels;
use crate::locate::{FileLocator, LocateQuery};
use crate::manifest::{parse_manifest, Manifest, ManifestEntry, ManifestFormat};
use crate::naming;
use crate::report::{
    provenance, PipelineReport, RunReport, RunStatus, AMBIGUOUS_REANALYSIS, INVALID_SAMPLE_NAME,
    INVALID_TEST_CODES, NO_TEST_CODES,
};

/// Key of the genepanels file in `reference_files`.
pub const GENEPANELS_REFERENCE: &str = "genepanels";

/// Manifest content handed to a run.
#[derive(Debug, Clone)]
pub struct ManifestInput {
    /// File name; the uploaded copy keeps it.
    pub name: String,
    /// Raw content.
    pub content: Vec<u8>,
}

/// Which report stages to run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum ReportSelection {
    /// No report stage.
    #[default]
    Skip,
    /// Every configured report stage.
    All,
    /// Only the named report stages.
    Named(BTreeSet<String>),
}

/// Which stages of the config to run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StageSelection {
    /// Run the calling stage.
    pub calling: bool,
    /// Report stages to run.
    pub reports: ReportSelection,
    /// Run the packaging stage.
    pub packaging: bool,
}

impl StageSelection {
    /// Selects every configured stage.
    pub fn all() -> Self {
        Self {
            calling: true,
            reports: ReportSelection::All,
            packaging: true,
        }
    }

    fn selects(&self, kind: StageKind, name: &str) -> bool {
        match kind {
            StageKind::Calling => self.calling,
            StageKind::Packaging => self.packaging,
            StageKind::Reports => match &self.reports {
                ReportSelection::Skip => false,
                ReportSelection::All => true,
                ReportSelection::Named(names) => names.contains(name),
            },
        }
    }
}

/// Operator inputs of one run.
#[derive(Debug, Clone)]
pub struct RunRequest {
    /// Root searched for stage input files.
    pub input_root: Location,
    /// Root under which stage destinations are created.
    pub output_root: Location,
    /// Sample manifest; required when a per-sample stage is selected.
    pub manifest: Option<ManifestInput>,
    /// Stages to run.
    pub stages: StageSelection,
    /// Samples left out of every stage.
    pub exclude: BTreeSet<String>,
    /// Keep at most this many samples per stage.
    pub sample_limit: Option<usize>,
    /// Request revival of archived inputs instead of failing.
    pub unarchive: bool,
    /// Only request revival; never launch.
    pub unarchive_only: bool,
    /// Describe and record every job without submitting.
    pub dry_run: bool,
    /// Output folders of upstream stages that are not run this time.
    pub upstream_folders: BTreeMap<String, Location>,
    /// Job to tag when revival is requested.
    pub initiating_job: Option<JobId>,
    /// Destination timestamp override.
    pub timestamp: Option<String>,
}

impl RunRequest {
    /// Request with every optional behaviour off.
    pub fn new(input_root: Location, output_root: Location) -> Self {
        Self {
            input_root,
            output_root,
            manifest: None,
            stages: StageSelection::default(),
            exclude: BTreeSet::new(),
            sample_limit: None,
            unarchive: false,
            unarchive_only: false,
            dry_run: false,
            upstream_folders: BTreeMap::new(),
            initiating_job: None,
            timestamp: None,
        }
    }
}

/// Outcome of screening the parsed manifest.
#[derive(Debug, Default)]
struct Screening {
    /// Samples in the manifest before screening.
    manifest_samples: usize,
    /// Category to samples that can never be dispatched.
    errors: BTreeMap<String, Vec<String>>,
    /// Sample to malformed codes dropped from its test-groups.
    filtered: BTreeMap<String, Vec<String>>,
}

struct StagePlan<'c> {
    kind: StageKind,
    stage: &'c StageConfig,
    bound: Option<BoundManifest>,
    run_files: BTreeMap<String, Vec<RemoteFile>>,
    references: BTreeMap<String, RemoteFile>,
    report: RunReport,
}

/// Runs the selected stages of one config.
pub struct PipelineOrchestrator<'a, S: ObjectStore + ?Sized, P: ExecutionPlatform + ?Sized> {
    store: &'a S,
    platform: &'a P,
    config: &'a Config,
}

impl<'a, S: ObjectStore + ?Sized, P: ExecutionPlatform + ?Sized> PipelineOrchestrator<'a, S, P> {
    /// Creates an orchestrator for `config`.
    pub fn new(store: &'a S, platform: &'a P, config: &'a Config) -> Self {
        Self {
            store,
            platform,
            config,
        }
    }

    /// Executes the run and returns its report.
    ///
    /// Dry runs describe executables through the real platform but never
    /// submit, revive or upload anything.
    pub fn run(&self, request: &RunRequest) -> Result<PipelineReport, DiasError> {
        if request.dry_run {
            let dry = DryRunPlatform::new(self.platform);
            self.execute(&dry, request)
        } else {
            self.execute(self.platform, request)
        }
    }

    fn execute<Q: ExecutionPlatform + ?Sized>(
        &self,
        platform: &Q,
        request: &RunRequest,
    ) -> Result<PipelineReport, DiasError> {
        let provenance = provenance(self.config);
        let selected: Vec<(StageKind, &StageConfig)> = self
            .config
            .stages()
            .into_iter()
            .filter(|(kind, stage)| request.stages.selects(*kind, &stage.name))
            .collect();
        if selected.is_empty() {
            return Err(DiasError::InvalidConfig(
                ErrorInfo::new("no_stage_selected", "no configured stage was selected")
                    .with_context("assay", self.config.assay_name.clone()),
            ));
        }
        let selected_names: BTreeSet<&str> =
            selected.iter().map(|&(_, stage)| stage.name.as_str()).collect();
        for (_, stage) in &selected {
            for upstream in stage.upstream_stages() {
                if !selected_names.contains(upstream)
                    && !request.upstream_folders.contains_key(upstream)
                {
                    return Err(DiasError::InvalidConfig(
                        ErrorInfo::new("upstream_unavailable", "upstream stage is neither run nor given")
                            .with_context("stage", stage.name.clone())
                            .with_context("upstream", upstream)
                            .with_hint("select the upstream stage or pass --upstream stage=folder"),
                    ));
                }
            }
        }
        info!(
            assay = %self.config.assay_name,
            version = %self.config.version,
            stages = selected.len(),
            dry_run = request.dry_run,
            "starting run"
        );

        let needs_manifest = selected.iter().any(|(_, stage)| stage.is_per_sample());
        let (manifest_samples, screened, screening) = match (&request.manifest, needs_manifest) {
            (Some(input), _) => {
                let mut manifest = parse_manifest(&String::from_utf8_lossy(&input.content))?;
                let samples = manifest
                    .samples()
                    .into_iter()
                    .map(str::to_string)
                    .collect::<Vec<_>>();
                let screening = self.screen(&mut manifest, &request.exclude)?;
                (samples, Some(manifest), screening)
            }
            (None, true) => {
                return Err(DiasError::InvalidConfig(ErrorInfo::new(
                    "manifest_required",
                    "a selected stage launches per-sample jobs but no manifest was given",
                )))
            }
            (None, false) => (Vec::new(), None, Screening::default()),
        };

        let mut plans = Vec::with_capacity(selected.len());
        for (kind, stage) in selected {
            plans.push(self.plan_stage(kind, stage, screened.as_ref(), &screening, request)?);
        }

        let mut needed = NeededFiles::default();
        let mut allowlist = BTreeSet::new();
        for plan in &plans {
            if let Some(bound) = &plan.bound {
                needed.sample.extend(bound.all_files().cloned());
                allowlist.extend(bound.samples());
            }
            needed.run.extend(plan.run_files.values().flatten().cloned());
            needed.run.extend(plan.references.values().cloned());
        }
        let options = ReconcileOptions {
            unarchive: request.unarchive,
            unarchive_only: request.unarchive_only,
            samples: screened.as_ref().map(|_| allowlist),
            initiating_job: request.initiating_job.clone(),
            dry_run: request.dry_run,
        };
        let archival = ArchivalReconciler::new(self.store, platform).reconcile(&needed, &options)?;

        let mut dispatcher = JobDispatcher::new(platform, request.output_root.clone());
        if let Some(timestamp) = &request.timestamp {
            dispatcher = dispatcher.with_timestamp(timestamp.clone());
        }
        let timestamp = dispatcher.timestamp().to_string();

        let status = match &archival {
            ArchivalOutcome::RevivalRequested { .. } => Some(RunStatus::RevivalRequested),
            ArchivalOutcome::NothingToRevive => Some(RunStatus::NothingToRevive),
            ArchivalOutcome::AllLive => None,
        };
        if let Some(status) = status {
            info!(status = ?status, "run stops before dispatch");
            let report = PipelineReport {
                status,
                archival,
                manifest_samples,
                stages: plans.into_iter().map(|plan| plan.report).collect(),
                provenance,
            };
            if !request.dry_run {
                self.persist(request, &timestamp, &report, &[])?;
            }
            return Ok(report);
        }

        let block_upstream: BTreeSet<String> = plans
            .iter()
            .filter(|plan| plan.stage.dependency_mode() == DependencyMode::BlockUntilDone)
            .flat_map(|plan| plan.stage.upstream_stages())
            .filter(|upstream| selected_names.contains(upstream))
            .map(str::to_string)
            .collect();

        let mut dispatched: BTreeMap<String, DispatchedStage> = BTreeMap::new();
        let mut order: Vec<String> = Vec::new();
        let mut reports = Vec::with_capacity(plans.len());
        let mut assigned_names: BTreeSet<String> = BTreeSet::new();
        for mut plan in plans {
            let outcome = self.launch_stage(
                &mut plan,
                &mut dispatcher,
                &dispatched,
                &block_upstream,
                request,
                &mut assigned_names,
            );
            let result = match outcome {
                Ok(result) => result,
                Err(err) => {
                    let failed_stage = plan.stage.name.clone();
                    reports.push(plan.report);
                    let partial = PipelineReport {
                        status: RunStatus::Aborted,
                        archival,
                        manifest_samples,
                        stages: reports,
                        provenance,
                    };
                    let launched: Vec<&DispatchedStage> =
                        order.iter().filter_map(|name| dispatched.get(name)).collect();
                    return Err(self.abort(request, &timestamp, &failed_stage, &partial, &launched, err));
                }
            };
            plan.report.destination = Some(result.destination.to_string());
            for job in &result.jobs {
                plan.report
                    .record_launch(job.sample.clone().unwrap_or_else(|| RUN_ROW.to_string()), job.name.clone());
            }
            order.push(plan.stage.name.clone());
            reports.push(plan.report);
            dispatched.insert(result.stage.clone(), result);
        }

        let report = PipelineReport {
            status: if request.dry_run {
                RunStatus::DryRun
            } else {
                RunStatus::Launched
            },
            archival,
            manifest_samples,
            stages: reports,
            provenance,
        };
        if !request.dry_run {
            let launched: Vec<&DispatchedStage> =
                order.iter().filter_map(|name| dispatched.get(name)).collect();
            self.persist(request, &timestamp, &report, &launched)?;
        }
        info!(
            stages = report.stages.len(),
            jobs = report.stages.iter().map(RunReport::job_count).sum::<usize>(),
            "run finished"
        );
        Ok(report)
    }

    fn launch_stage<Q: ExecutionPlatform + ?Sized>(
        &self,
        plan: &mut StagePlan<'_>,
        dispatcher: &mut JobDispatcher<'_, Q>,
        dispatched: &BTreeMap<String, DispatchedStage>,
        block_upstream: &BTreeSet<String>,
        request: &RunRequest,
        assigned_names: &mut BTreeSet<String>,
    ) -> Result<DispatchedStage, DiasError> {
        let upstreams = self.upstream_locations(plan.stage, dispatched, request);
        self.bind_upstream_outputs(plan, &upstreams, dispatched, request)?;

        let table = self.build_table(plan, &upstreams, request, assigned_names)?;
        check_shape(&table.to_tsv()?)?;

        let mut dependencies: Vec<JobId> = Vec::new();
        if plan.stage.dependency_mode() == DependencyMode::PlatformLinked {
            for upstream in plan.stage.upstream_stages() {
                if let Some(done) = dispatched.get(upstream) {
                    dependencies.extend(done.job_ids());
                }
            }
        }
        let launch = StageDispatch {
            stage: &plan.stage.name,
            executable: &plan.stage.executable,
            table: &table,
            instance_type: plan.stage.instance_type.as_deref(),
            dependencies: &dependencies,
            block_until_done: block_upstream.contains(&plan.stage.name),
        };
        dispatcher.dispatch(&launch)
    }

    /// Accounts for a stage that failed after earlier stages were launched.
    ///
    /// Launched jobs keep running; their ids go into the error and the
    /// partial report is persisted so the operator can terminate them.
    fn abort(
        &self,
        request: &RunRequest,
        timestamp: &str,
        failed_stage: &str,
        report: &PipelineReport,
        launched: &[&DispatchedStage],
        err: DiasError,
    ) -> DiasError {
        let jobs: Vec<String> = launched
            .iter()
            .flat_map(|stage| stage.job_ids())
            .map(|id| id.to_string())
            .collect();
        let mut err = err.with_context("failed_stage", failed_stage);
        if jobs.is_empty() {
            return err;
        }
        warn!(stage = %failed_stage, launched = jobs.len(), error = %err, "stage failed after earlier stages were launched");
        err = err
            .with_list("launched_stages", launched.iter().map(|stage| stage.stage.as_str()))
            .with_list("launched_jobs", &jobs);
        if err.info().hint.is_none() {
            err.info_mut().hint = Some("launched jobs keep running; stop them with `dias terminate` before rerunning".to_string());
        }
        if request.dry_run {
            return err;
        }
        match self.persist(request, timestamp, report, launched) {
            Ok(folder) => err.with_context("report_folder", folder.to_string()),
            Err(persist_err) => {
                warn!(error = %persist_err, "could not persist partial run report");
                err.with_context("report_persisted", "false")
            }
        }
    }

    /// Removes entries that can never be dispatched and records the
    /// category each one fell under. Excluded samples are left for the
    /// binder to account for.
    fn screen(&self, manifest: &mut Manifest, exclude: &BTreeSet<String>) -> Result<Screening, DiasError> {
        let unknown = match self.config.reference_files.get(GENEPANELS_REFERENCE) {
            Some(file) => {
                let content = self.store.read(file)?;
                Genepanels::parse(&String::from_utf8_lossy(&content))?.annotate(manifest)
            }
            None => BTreeMap::new(),
        };
        let compile = |pattern: &str| {
            Regex::new(pattern).map_err(|err| {
                DiasError::InvalidConfig(
                    ErrorInfo::new("sample_pattern", "sample name pattern does not compile")
                        .with_context("pattern", pattern)
                        .with_hint(err.to_string()),
                )
            })
        };
        let structured = compile(&self.config.name_patterns.structured)?;
        let legacy = compile(&self.config.name_patterns.legacy)?;

        for sample in exclude {
            if manifest.get(sample).is_none() {
                warn!(sample = %sample, "excluded sample is not in the manifest");
            }
        }

        let mut screening = Screening {
            manifest_samples: manifest.entries.len(),
            ..Screening::default()
        };
        for entry in &manifest.entries {
            if !entry.rejected_codes.is_empty() {
                screening
                    .filtered
                    .insert(entry.sample_id.clone(), entry.rejected_codes.clone());
            }
        }
        let errors = &mut screening.errors;
        manifest.retain(|entry| {
            if exclude.contains(&entry.sample_id) {
                return true;
            }
            let pattern = match entry.source_format {
                ManifestFormat::Structured => &structured,
                ManifestFormat::Legacy => &legacy,
            };
            let mut categories = Vec::new();
            if entry.ambiguous_reanalysis {
                categories.push(AMBIGUOUS_REANALYSIS);
            }
            if !pattern.is_match(&entry.sample_id) {
                categories.push(INVALID_SAMPLE_NAME);
            }
            if unknown.contains_key(&entry.sample_id) {
                categories.push(INVALID_TEST_CODES);
            } else if entry.test_groups.is_empty() {
                categories.push(NO_TEST_CODES);
            }
            for category in &categories {
                errors
                    .entry(category.to_string())
                    .or_default()
                    .push(entry.sample_id.clone());
            }
            categories.is_empty()
        });
        for (category, samples) in &screening.errors {
            warn!(category = %category, samples = %samples.join(", "), "manifest samples cannot be dispatched");
        }
        Ok(screening)
    }

    fn plan_stage<'c>(
        &self,
        kind: StageKind,
        stage: &'c StageConfig,
        manifest: Option<&Manifest>,
        screening: &Screening,
        request: &RunRequest,
    ) -> Result<StagePlan<'c>, DiasError> {
        let mut report = RunReport::new(stage.name.clone(), kind);
        let mut run_files = BTreeMap::new();
        let mut references = BTreeMap::new();
        let mut roles = Vec::new();
        for (slot, source) in &stage.inputs {
            match source {
                InputSource::Files {
                    folder,
                    pattern,
                    required,
                    scope,
                    from_stage: None,
                } => match scope {
                    FileScope::Sample => roles.push(RoleSpec {
                        role: slot.clone(),
                        location: request.input_root.clone(),
                        subdir: folder.clone(),
                        pattern: pattern.clone(),
                        required: *required,
                    }),
                    FileScope::Run => {
                        let files = self.locate_run_files(
                            &stage.name,
                            slot,
                            &request.input_root,
                            folder.as_deref(),
                            pattern,
                            *required,
                        )?;
                        run_files.insert(slot.clone(), files);
                    }
                },
                InputSource::Reference { file } => {
                    let reference = self.config.reference(file)?;
                    references.insert(slot.clone(), self.store.describe(&reference)?);
                }
                _ => {}
            }
        }

        let bound = match (stage.is_per_sample(), manifest) {
            (true, Some(manifest)) => {
                report.merge_errors(&screening.errors);
                for (sample, codes) in &screening.filtered {
                    report.record_filtered(sample.clone(), codes);
                }
                let binder = ManifestFileBinder::new(self.store);
                let mut bound = binder
                    .bind(manifest, &roles, &request.exclude)
                    .map_err(|err| with_screening(err, &stage.name, screening))?;
                if let Some(limit) = request.sample_limit {
                    if bound.entries.len() > limit {
                        for entry in bound.entries.split_off(limit) {
                            bound.bindings.remove(&entry.sample_id);
                            bound.excluded.push(entry.sample_id);
                        }
                    }
                }
                report.merge_errors(&bound.errors);
                for sample in &bound.excluded {
                    report.exclude(sample.clone());
                }
                Some(bound)
            }
            _ => None,
        };
        debug!(stage = %stage.name, per_sample = bound.is_some(), "planned stage");
        Ok(StagePlan {
            kind,
            stage,
            bound,
            run_files,
            references,
            report,
        })
    }

    fn locate_run_files(
        &self,
        stage: &str,
        slot: &str,
        base: &Location,
        subdir: Option<&str>,
        pattern: &str,
        required: bool,
    ) -> Result<Vec<RemoteFile>, DiasError> {
        let query = LocateQuery {
            base,
            subdir,
            pattern,
            samples: None,
        };
        let files = FileLocator::new(self.store).locate(&query)?;
        if files.is_empty() && required {
            return Err(DiasError::RequiredRunFileMissing(
                ErrorInfo::new("run_file_missing", "required run file not found")
                    .with_context("stage", stage)
                    .with_context("slot", slot)
                    .with_context("location", base.to_string())
                    .with_context("pattern", pattern),
            ));
        }
        Ok(files)
    }

    fn upstream_locations(
        &self,
        stage: &StageConfig,
        dispatched: &BTreeMap<String, DispatchedStage>,
        request: &RunRequest,
    ) -> BTreeMap<String, Location> {
        stage
            .upstream_stages()
            .into_iter()
            .filter_map(|upstream| {
                dispatched
                    .get(upstream)
                    .map(|done| done.destination.clone())
                    .or_else(|| request.upstream_folders.get(upstream).cloned())
                    .map(|location| (upstream.to_string(), location))
            })
            .collect()
    }

    /// Binds inputs that live in upstream output folders; those folders are
    /// only populated once the upstream has finished.
    fn bind_upstream_outputs(
        &self,
        plan: &mut StagePlan<'_>,
        upstreams: &BTreeMap<String, Location>,
        dispatched: &BTreeMap<String, DispatchedStage>,
        request: &RunRequest,
    ) -> Result<(), DiasError> {
        let mut roles = Vec::new();
        for (slot, source) in &plan.stage.inputs {
            let InputSource::Files {
                folder,
                pattern,
                required,
                scope,
                from_stage: Some(upstream),
            } = source
            else {
                continue;
            };
            if request.dry_run && dispatched.contains_key(upstream) {
                warn!(stage = %plan.stage.name, slot = %slot, upstream = %upstream, "dry run: upstream outputs do not exist yet, slot left unbound");
                continue;
            }
            let Some(location) = upstreams.get(upstream) else {
                continue;
            };
            match scope {
                FileScope::Sample => roles.push(RoleSpec {
                    role: slot.clone(),
                    location: location.clone(),
                    subdir: folder.clone(),
                    pattern: pattern.clone(),
                    required: *required,
                }),
                FileScope::Run => {
                    let files = self.locate_run_files(
                        &plan.stage.name,
                        slot,
                        location,
                        folder.as_deref(),
                        pattern,
                        *required,
                    )?;
                    plan.run_files.insert(slot.clone(), files);
                }
            }
        }
        if roles.is_empty() {
            return Ok(());
        }
        let Some(bound) = plan.bound.as_mut() else {
            return Ok(());
        };
        let current = Manifest {
            format: ManifestFormat::Structured,
            entries: bound.entries.clone(),
        };
        let binder = ManifestFileBinder::new(self.store);
        let upstream_bound = binder.bind(&current, &roles, &BTreeSet::new())?;
        plan.report.merge_errors(&upstream_bound.errors);
        bound.entries = upstream_bound.entries;
        let keep = bound.samples();
        bound.bindings.retain(|sample, _| keep.contains(sample));
        for (sample, roles) in upstream_bound.bindings {
            bound.bindings.entry(sample).or_default().extend(roles);
        }
        Ok(())
    }

    fn build_table(
        &self,
        plan: &StagePlan<'_>,
        upstreams: &BTreeMap<String, Location>,
        request: &RunRequest,
        assigned_names: &mut BTreeSet<String>,
    ) -> Result<BatchTable, DiasError> {
        let stage = plan.stage;
        let mut table = BatchTable::new(
            stage
                .inputs
                .keys()
                .chain(stage.parameters.keys().filter(|key| !stage.inputs.contains_key(*key)))
                .cloned(),
        );
        let grouped = stage.inputs.values().any(|source| {
            matches!(
                source,
                InputSource::Manifest {
                    field: ManifestField::TestCodes
                        | ManifestField::ClinicalIndications
                        | ManifestField::Panels
                        | ManifestField::OutputName
                }
            )
        });

        let Some(bound) = &plan.bound else {
            let values = self.row_values(plan, None, upstreams, request, assigned_names)?;
            table.push(BatchRow {
                batch_id: RUN_ROW.to_string(),
                sample: None,
                values,
            })?;
            return Ok(table);
        };

        for entry in &bound.entries {
            if grouped {
                for index in 0..entry.test_groups.len() {
                    let values =
                        self.row_values(plan, Some((entry, Some(index))), upstreams, request, assigned_names)?;
                    table.push(BatchRow {
                        batch_id: naming::stem(&entry.sample_id, &entry.test_groups[index]),
                        sample: Some(entry.sample_id.clone()),
                        values,
                    })?;
                }
            } else {
                let values = self.row_values(plan, Some((entry, None)), upstreams, request, assigned_names)?;
                table.push(BatchRow {
                    batch_id: entry.sample_id.clone(),
                    sample: Some(entry.sample_id.clone()),
                    values,
                })?;
            }
        }
        Ok(table)
    }

    fn row_values(
        &self,
        plan: &StagePlan<'_>,
        row: Option<(&ManifestEntry, Option<usize>)>,
        upstreams: &BTreeMap<String, Location>,
        request: &RunRequest,
        assigned_names: &mut BTreeSet<String>,
    ) -> Result<BTreeMap<String, InputValue>, DiasError> {
        let mut values = BTreeMap::new();
        for (key, value) in &plan.stage.parameters {
            values.insert(key.clone(), InputValue::Literal(value.clone()));
        }
        for (slot, source) in &plan.stage.inputs {
            let value = match source {
                InputSource::Files {
                    scope: FileScope::Sample,
                    ..
                } => match (row, &plan.bound) {
                    (Some((entry, _)), Some(bound)) => {
                        InputValue::from_files(file_ids(bound.files(&entry.sample_id, slot)))
                    }
                    _ => None,
                },
                InputSource::Files {
                    scope: FileScope::Run,
                    ..
                } => plan
                    .run_files
                    .get(slot)
                    .and_then(|files| InputValue::from_files(file_ids(files))),
                InputSource::Reference { .. } => plan
                    .references
                    .get(slot)
                    .map(|file| InputValue::File(file.id.clone())),
                InputSource::UpstreamFolder { stage } => upstreams
                    .get(stage)
                    .map(|location| InputValue::text(location.folder.clone())),
                InputSource::Manifest { field } => match row {
                    Some((entry, group)) => {
                        self.manifest_value(*field, entry, group, request, assigned_names)?
                    }
                    None => None,
                },
            };
            if let Some(value) = value {
                values.insert(slot.clone(), value);
            }
        }
        Ok(values)
    }

    fn manifest_value(
        &self,
        field: ManifestField,
        entry: &ManifestEntry,
        group: Option<usize>,
        request: &RunRequest,
        assigned_names: &mut BTreeSet<String>,
    ) -> Result<Option<InputValue>, DiasError> {
        let index = group.unwrap_or(0);
        let value = match field {
            ManifestField::Sample => Some(entry.sample_id.clone()),
            ManifestField::TestCodes => entry.test_groups.get(index).map(|codes| codes.join(",")),
            ManifestField::ClinicalIndications => entry.indications.get(index).cloned(),
            ManifestField::Panels => entry.panels.get(index).cloned(),
            ManifestField::OutputName => match entry.test_groups.get(index) {
                Some(codes) => {
                    let stem = naming::stem(&entry.sample_id, codes);
                    let search = Location::new(request.output_root.container.clone(), "/");
                    let mut existing: Vec<String> = self
                        .store
                        .find(&search, &naming::prior_outputs_pattern(&stem))?
                        .into_iter()
                        .map(|file| file.name)
                        .collect();
                    existing.extend(assigned_names.iter().cloned());
                    let name = naming::resolve(&stem, &existing);
                    assigned_names.insert(name.clone());
                    Some(name)
                }
                None => None,
            },
        };
        Ok(value.map(InputValue::text))
    }

    fn persist(
        &self,
        request: &RunRequest,
        timestamp: &str,
        report: &PipelineReport,
        launched: &[&DispatchedStage],
    ) -> Result<Location, DiasError> {
        let folder = request.output_root.join(&format!("dias-run-{timestamp}"));
        if let Some(manifest) = &request.manifest {
            self.store.upload(&folder, &manifest.name, &manifest.content)?;
        }
        for stage in launched {
            self.store
                .upload(&folder, &format!("{}.tsv", stage.stage), &stage.tsv)?;
        }
        self.store.upload(&folder, "run_report.json", &report.to_json()?)?;
        self.store
            .upload(&folder, "run_report.txt", report.to_text().as_bytes())?;
        info!(folder = %folder, "persisted run report");
        Ok(folder)
    }
}

/// Adds what screening removed to an empty-manifest error, so the error
/// accounts for every sample the manifest named.
fn with_screening(err: DiasError, stage: &str, screening: &Screening) -> DiasError {
    if !matches!(err, DiasError::EmptyManifestAfterFiltering(_)) {
        return err;
    }
    let mut err = err
        .with_context("stage", stage)
        .with_context("manifest_samples", screening.manifest_samples.to_string());
    for (category, samples) in &screening.errors {
        err = err.with_list(format!("screened: {category}"), samples);
    }
    err
}

fn file_ids(files: &[RemoteFile]) -> Vec<FileId> {
    files.iter().map(|file| file.id.clone()).collect()
}

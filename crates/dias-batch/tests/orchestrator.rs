use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use dias_batch::{
    Config, ManifestInput, PipelineOrchestrator, ReportSelection, RunRequest, RunStatus,
    StageSelection,
};
use dias_core::{
    ContainerId, DiasError, ExecutableInfo, FileId, FileRef, InputValue, Location, MemoryPlatform,
    MemoryStore, ObjectStore, StorageState,
};
use serde_json::{json, Value};

const RUN: &str = "project-run";
const REF: &str = "project-ref";
const TIMESTAMP: &str = "240101_120000";

struct Fixture {
    store: Arc<MemoryStore>,
    platform: MemoryPlatform,
    config: Config,
    x1_vcf: FileId,
}

fn fixture() -> Fixture {
    fixture_without(&[])
}

/// Fixture whose platform does not know the `unregistered` executables.
fn fixture_without(unregistered: &[&str]) -> Fixture {
    let store = Arc::new(MemoryStore::new());
    let genepanels = store.add_file(
        REF,
        "/dynamic_files",
        "genepanels.tsv",
        StorageState::Live,
        b"R207.1_Inherited ovarian cancer_P\tOvarian cancer (1.0)\tHGNC:1100\n",
    );
    let bed = store.add_file(REF, "/dynamic_files", "panel.bed", StorageState::Live, b"");
    let x1_vcf = store.add_file(RUN, "/output/single/vcf", "X1_markdup.vcf.gz", StorageState::Live, b"");
    store.add_file(RUN, "/output/single/old", "X2_markdup.vcf.gz", StorageState::Live, b"");
    store.add_file(RUN, "/output/single/bam", "X1_markdup.bam", StorageState::Live, b"");
    store.add_file(RUN, "/output/single/bam", "X2_markdup.bam", StorageState::Live, b"");
    store.add_file(RUN, "/output/reports", "X1_R207.1_1.xlsx", StorageState::Live, b"");

    let document = json!({
        "assay": "CEN",
        "version": "1.0.0",
        "name_patterns": { "structured": "^X\\d+-S\\d+", "legacy": "^X\\d+" },
        "reference_files": { "genepanels": format!("{REF}:{genepanels}") },
        "calling": {
            "name": "cnv_call",
            "executable": "app-cnvcall",
            "inputs": { "bams": { "from": "files", "pattern": "\\.bam$", "scope": "run" } }
        },
        "reports": [
            {
                "name": "snv_reports",
                "executable": "workflow-snv",
                "inputs": {
                    "vcf": { "from": "files", "pattern": "\\.vcf\\.gz$", "folder": "vcf" },
                    "codes": { "from": "manifest", "field": "test_codes" },
                    "clinical_indication": { "from": "manifest", "field": "clinical_indications" },
                    "name": { "from": "manifest", "field": "output_name" },
                    "panel_bed": { "from": "reference", "file": format!("{REF}:{bed}") }
                },
                "parameters": { "flank": 5 }
            },
            {
                "name": "cnv_reports",
                "executable": "workflow-cnv",
                "inputs": {
                    "segments": { "from": "files", "pattern": "_segments\\.vcf$", "from_stage": "cnv_call" },
                    "codes": { "from": "manifest", "field": "test_codes" }
                }
            }
        ],
        "packaging": {
            "name": "artemis",
            "executable": "app-artemis",
            "inputs": { "snv_folder": { "from": "upstream_folder", "stage": "snv_reports" } }
        }
    });
    let bytes = serde_json::to_vec(&document).expect("encode config");
    let config = Config::from_slice(&bytes, "project-configs:file-cen").expect("config");

    let platform = MemoryPlatform::new();
    for (id, name) in [
        ("app-cnvcall", "eggd_cnvcall"),
        ("workflow-snv", "dias_reports_snv"),
        ("workflow-cnv", "dias_reports_cnv"),
        ("app-artemis", "eggd_artemis"),
    ] {
        if unregistered.contains(&id) {
            continue;
        }
        platform.register(ExecutableInfo {
            id: id.to_string(),
            name: name.to_string(),
            version: None,
            stages: Vec::new(),
        });
    }
    let outputs = Arc::clone(&store);
    platform.on_complete("app-cnvcall", move |spec| {
        let destination = Location::parse(&spec.destination, None).expect("destination");
        for sample in ["X1", "X2"] {
            outputs.add_file(
                destination.container.as_str(),
                &destination.folder,
                &format!("{sample}_segments.vcf"),
                StorageState::Live,
                b"",
            );
        }
    });

    Fixture {
        store,
        platform,
        config,
        x1_vcf,
    }
}

fn request() -> RunRequest {
    let mut request = RunRequest::new(
        Location::new(ContainerId::new(RUN), "/output/single"),
        Location::new(ContainerId::new(RUN), "/output"),
    );
    request.manifest = Some(ManifestInput {
        name: "run_manifest.txt".to_string(),
        content: b"X1\tR207.1\nX2\tR207.1\nX3\tR999.1\nbad\tR207.1\nX4\t\n".to_vec(),
    });
    request.stages = StageSelection::all();
    request.timestamp = Some(TIMESTAMP.to_string());
    request
}

#[test]
fn full_run_launches_every_stage_in_dependency_order() {
    let fx = fixture();
    let orchestrator = PipelineOrchestrator::new(&*fx.store, &fx.platform, &fx.config);
    let report = orchestrator.run(&request()).expect("run");

    assert_eq!(report.status, RunStatus::Launched);
    let names: Vec<&str> = report.stages.iter().map(|stage| stage.stage.as_str()).collect();
    assert_eq!(names, vec!["cnv_call", "snv_reports", "cnv_reports", "artemis"]);

    let calling = &report.stages[0];
    assert_eq!(calling.launched["run"], vec!["eggd_cnvcall"]);

    let snv = &report.stages[1];
    assert_eq!(snv.launched.keys().collect::<Vec<_>>(), vec!["X1"]);
    assert_eq!(snv.errors["missing vcf"], vec!["X2"]);
    assert_eq!(snv.errors["invalid sample name"], vec!["bad"]);
    assert_eq!(snv.errors["invalid test codes"], vec!["X3"]);
    assert_eq!(snv.errors["no test codes"], vec!["X4"]);

    let cnv = &report.stages[2];
    assert_eq!(
        cnv.launched.keys().collect::<Vec<_>>(),
        vec!["X1", "X2"]
    );

    let submitted = fx.platform.submitted();
    assert_eq!(submitted.len(), 5);
    let (calling_id, calling_spec) = &submitted[0];
    assert_eq!(
        calling_spec.inputs["bams"],
        InputValue::Files(
            fx.store
                .files()
                .into_iter()
                .filter(|file| file.name.ends_with(".bam"))
                .map(|file| file.id)
                .collect()
        )
    );
    assert!(calling_spec.block_until_done);
    assert_eq!(fx.platform.waited(), vec![calling_id.clone()]);

    let (snv_id, snv_spec) = &submitted[1];
    assert_eq!(snv_spec.inputs["vcf"], InputValue::File(fx.x1_vcf.clone()));
    assert_eq!(snv_spec.inputs["name"], InputValue::text("X1_R207.1_2"));
    assert_eq!(
        snv_spec.inputs["clinical_indication"],
        InputValue::text("R207.1_Inherited ovarian cancer_P")
    );
    assert_eq!(snv_spec.inputs["flank"], InputValue::Literal(json!(5)));
    assert!(snv_spec.inputs["panel_bed"].is_file());
    assert!(snv_spec.dependencies.is_empty());

    let cnv_spec = &submitted[2].1;
    assert!(cnv_spec.inputs["segments"].is_file());
    assert!(cnv_spec.dependencies.is_empty());

    let artemis = &submitted[4].1;
    assert_eq!(artemis.dependencies, vec![snv_id.clone()]);
    let snv_destination = Location::parse(&snv_spec.destination, None).expect("destination");
    assert_eq!(artemis.inputs["snv_folder"], InputValue::text(snv_destination.folder));
    assert!(!artemis.block_until_done);

    let uploaded: BTreeSet<String> = fx
        .store
        .files()
        .into_iter()
        .filter(|file| file.folder == format!("/output/dias-run-{TIMESTAMP}"))
        .map(|file| file.name)
        .collect();
    for name in [
        "run_manifest.txt",
        "cnv_call.tsv",
        "snv_reports.tsv",
        "cnv_reports.tsv",
        "artemis.tsv",
        "run_report.json",
        "run_report.txt",
    ] {
        assert!(uploaded.contains(name), "missing upload {name}");
    }
}

#[test]
fn archived_inputs_stop_the_run_before_anything_is_submitted() {
    let fx = fixture();
    fx.store
        .set_state(&fx.x1_vcf, StorageState::Archived)
        .expect("archive");
    let orchestrator = PipelineOrchestrator::new(&*fx.store, &fx.platform, &fx.config);

    let err = orchestrator.run(&request()).expect_err("archived");
    assert!(matches!(err, DiasError::FilesArchived(_)));
    assert!(fx.platform.submitted().is_empty());

    let mut revive = request();
    revive.unarchive = true;
    let report = orchestrator.run(&revive).expect("revival");
    assert_eq!(report.status, RunStatus::RevivalRequested);
    assert!(fx.platform.submitted().is_empty());
    assert_eq!(fx.store.revival_requests().len(), 1);
    assert!(report.to_text().contains("Revival requested for 1 files"));
}

#[test]
fn dry_run_submits_and_uploads_nothing() {
    let fx = fixture();
    let before = fx.store.files().len();
    let orchestrator = PipelineOrchestrator::new(&*fx.store, &fx.platform, &fx.config);
    let mut dry = request();
    dry.dry_run = true;

    let report = orchestrator.run(&dry).expect("dry run");
    assert_eq!(report.status, RunStatus::DryRun);
    assert!(fx.platform.submitted().is_empty());
    assert_eq!(fx.store.files().len(), before);
    assert_eq!(report.stages[2].launched.len(), 2);
}

#[test]
fn exclusions_and_sample_limit_are_listed_per_stage() {
    let fx = fixture();
    let orchestrator = PipelineOrchestrator::new(&*fx.store, &fx.platform, &fx.config);

    let mut excluded = request();
    excluded.exclude = BTreeSet::from(["X2".to_string()]);
    let report = orchestrator.run(&excluded).expect("run");
    let snv = &report.stages[1];
    assert_eq!(snv.excluded, vec!["X2"]);
    assert!(!snv.errors.contains_key("missing vcf"));

    let mut limited = request();
    limited.sample_limit = Some(1);
    let report = orchestrator.run(&limited).expect("run");
    let cnv = &report.stages[2];
    assert_eq!(cnv.launched.keys().collect::<Vec<_>>(), vec!["X1"]);
    assert_eq!(cnv.excluded, vec!["X2"]);
}

#[test]
fn packaging_alone_needs_an_upstream_folder() {
    let fx = fixture();
    let orchestrator = PipelineOrchestrator::new(&*fx.store, &fx.platform, &fx.config);
    let mut packaging = RunRequest::new(
        Location::new(ContainerId::new(RUN), "/output/single"),
        Location::new(ContainerId::new(RUN), "/output"),
    );
    packaging.stages = StageSelection {
        packaging: true,
        ..StageSelection::default()
    };

    let err = orchestrator.run(&packaging).expect_err("no upstream");
    assert!(matches!(err, DiasError::InvalidConfig(_)));

    packaging.upstream_folders = BTreeMap::from([(
        "snv_reports".to_string(),
        Location::new(ContainerId::new(RUN), "/output/dias_reports_snv-old"),
    )]);
    let report = orchestrator.run(&packaging).expect("run");
    assert_eq!(report.stages.len(), 1);
    let spec = &fx.platform.submitted()[0].1;
    assert_eq!(
        spec.inputs["snv_folder"],
        InputValue::text("/output/dias_reports_snv-old")
    );
    assert!(spec.dependencies.is_empty());
}

#[test]
fn named_report_selection_runs_only_those_reports() {
    let fx = fixture();
    let orchestrator = PipelineOrchestrator::new(&*fx.store, &fx.platform, &fx.config);
    let mut only_snv = request();
    only_snv.stages = StageSelection {
        calling: false,
        reports: ReportSelection::Named(BTreeSet::from(["snv_reports".to_string()])),
        packaging: false,
    };
    let report = orchestrator.run(&only_snv).expect("run");
    assert_eq!(report.stages.len(), 1);
    assert_eq!(report.stages[0].stage, "snv_reports");
    assert_eq!(fx.platform.submitted().len(), 1);
}

fn only_snv_reports() -> StageSelection {
    StageSelection {
        calling: false,
        reports: ReportSelection::Named(BTreeSet::from(["snv_reports".to_string()])),
        packaging: false,
    }
}

#[test]
fn malformed_codes_are_dropped_and_the_sample_still_launches() {
    let fx = fixture();
    let orchestrator = PipelineOrchestrator::new(&*fx.store, &fx.platform, &fx.config);
    let mut filtered = request();
    filtered.stages = only_snv_reports();
    filtered.manifest = Some(ManifestInput {
        name: "run_manifest.txt".to_string(),
        content: b"X1\tR207.1,Research Use\n".to_vec(),
    });

    let report = orchestrator.run(&filtered).expect("run");
    let snv = &report.stages[0];
    assert_eq!(snv.launched.keys().collect::<Vec<_>>(), vec!["X1"]);
    assert!(!snv.errors.contains_key("invalid test codes"));
    assert_eq!(snv.filtered_codes["X1"], vec!["Research Use"]);
    assert!(report.to_text().contains("filtered codes for X1: Research Use"));

    let spec = &fx.platform.submitted()[0].1;
    assert_eq!(spec.inputs["codes"], InputValue::text("R207.1"));
}

#[test]
fn empty_manifest_error_names_what_screening_removed() {
    let fx = fixture();
    let orchestrator = PipelineOrchestrator::new(&*fx.store, &fx.platform, &fx.config);
    let mut nothing_left = request();
    nothing_left.stages = only_snv_reports();
    nothing_left.manifest = Some(ManifestInput {
        name: "run_manifest.txt".to_string(),
        content: b"bad\tR207.1\nX3\tR999.1\nX4\t\n".to_vec(),
    });

    let err = orchestrator.run(&nothing_left).expect_err("nothing to dispatch");
    assert!(matches!(err, DiasError::EmptyManifestAfterFiltering(_)));
    let context = &err.info().context;
    assert_eq!(context["stage"], "snv_reports");
    assert_eq!(context["manifest_samples"], "3");
    assert_eq!(context["screened: invalid sample name"], "bad");
    assert_eq!(context["screened: invalid test codes"], "X3");
    assert_eq!(context["screened: no test codes"], "X4");
    assert!(fx.platform.submitted().is_empty());
}

#[test]
fn later_stage_failure_reports_the_jobs_already_running() {
    let fx = fixture_without(&["app-artemis"]);
    let orchestrator = PipelineOrchestrator::new(&*fx.store, &fx.platform, &fx.config);

    let err = orchestrator.run(&request()).expect_err("packaging cannot launch");
    assert!(matches!(err, DiasError::Platform(_)));
    let submitted: Vec<String> = fx
        .platform
        .submitted()
        .into_iter()
        .map(|(id, _)| id.to_string())
        .collect();
    assert_eq!(submitted.len(), 4);
    let context = &err.info().context;
    assert_eq!(context["failed_stage"], "artemis");
    assert_eq!(context["launched_stages"], "cnv_call, snv_reports, cnv_reports");
    assert_eq!(context["launched_jobs"], submitted.join(", "));
    assert_eq!(context["report_folder"], format!("{RUN}:/output/dias-run-{TIMESTAMP}"));
    assert!(err.info().hint.is_some());
    assert!(fx.platform.terminated().is_empty());

    let persisted = fx
        .store
        .files()
        .into_iter()
        .find(|file| file.name == "run_report.json" && file.folder == format!("/output/dias-run-{TIMESTAMP}"))
        .expect("partial report persisted");
    let bytes = fx
        .store
        .read(&FileRef {
            container: Some(ContainerId::new(RUN)),
            id: persisted.id,
        })
        .expect("read report");
    let report: Value = serde_json::from_slice(&bytes).expect("report json");
    assert_eq!(report["status"], "aborted");
    let stages = report["stages"].as_array().expect("stages");
    assert_eq!(stages.len(), 4);
    assert_eq!(stages[3]["stage"], "artemis");
    assert_eq!(stages[3]["launched"], json!({}));
    assert_eq!(stages[1]["launched"]["X1"].as_array().map(Vec::len), Some(1));
}

#[test]
fn files_moving_between_tiers_abort_the_run() {
    let fx = fixture();
    fx.store
        .set_state(&fx.x1_vcf, StorageState::Archiving)
        .expect("set state");
    let before = fx.store.files().len();
    let orchestrator = PipelineOrchestrator::new(&*fx.store, &fx.platform, &fx.config);
    let mut revive = request();
    revive.unarchive = true;

    let err = orchestrator.run(&revive).expect_err("transient state");
    assert!(matches!(err, DiasError::UnrecoverableArchivalState(_)));
    assert!(err.info().context["files"].contains("X1_markdup.vcf.gz"));
    assert!(fx.platform.submitted().is_empty());
    assert!(fx.store.revival_requests().is_empty());
    assert_eq!(fx.store.files().len(), before);
}

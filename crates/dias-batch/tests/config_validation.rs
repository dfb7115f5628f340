use dias_batch::{Config, DependencyMode, InputSource, StageKind};
use dias_core::DiasError;
use serde_json::{json, Value};

fn parse(document: Value) -> Result<Config, DiasError> {
    Config::from_slice(&serde_json::to_vec(&document).expect("encode"), "project-x:file-1")
}

#[test]
fn stages_come_back_in_pipeline_order() {
    let config = parse(json!({
        "assay": "CEN",
        "version": "2.0.0",
        "packaging": { "name": "artemis", "executable": "app-artemis" },
        "reports": [
            { "name": "snv", "executable": "workflow-snv" },
            { "name": "cnv", "executable": "workflow-cnv" }
        ],
        "calling": { "name": "call", "executable": "app-call" }
    }))
    .expect("config");
    let order: Vec<(StageKind, &str)> = config
        .stages()
        .into_iter()
        .map(|(kind, stage)| (kind, stage.name.as_str()))
        .collect();
    assert_eq!(
        order,
        vec![
            (StageKind::Calling, "call"),
            (StageKind::Reports, "snv"),
            (StageKind::Reports, "cnv"),
            (StageKind::Packaging, "artemis"),
        ]
    );
    assert_eq!(config.source_id, "project-x:file-1");
}

#[test]
fn input_defaults_and_dependency_modes() {
    let config = parse(json!({
        "assay": "CEN",
        "version": "1.0.0",
        "calling": { "name": "call", "executable": "app-call" },
        "reports": [
            {
                "name": "linked",
                "executable": "app-r",
                "inputs": { "folder": { "from": "upstream_folder", "stage": "call" } }
            },
            {
                "name": "searching",
                "executable": "app-r",
                "inputs": { "vcf": { "from": "files", "pattern": "\\.vcf$", "from_stage": "call" } }
            },
            {
                "name": "forced",
                "executable": "app-r",
                "depends_via": "block",
                "inputs": { "folder": { "from": "upstream_folder", "stage": "call" } }
            }
        ]
    }))
    .expect("config");
    assert_eq!(
        config.stage("linked").expect("linked").dependency_mode(),
        DependencyMode::PlatformLinked
    );
    let searching = config.stage("searching").expect("searching");
    assert_eq!(searching.dependency_mode(), DependencyMode::BlockUntilDone);
    assert!(matches!(
        &searching.inputs["vcf"],
        InputSource::Files { required: true, .. }
    ));
    assert!(searching.is_per_sample());
    assert_eq!(
        config.stage("forced").expect("forced").dependency_mode(),
        DependencyMode::BlockUntilDone
    );
}

#[test]
fn references_may_name_reference_files() {
    let config = parse(json!({
        "assay": "CEN",
        "version": "1.0.0",
        "reference_files": { "genepanels": "project-ref:file-gp" },
        "reports": [{
            "name": "snv",
            "executable": "app-r",
            "inputs": { "panels": { "from": "reference", "file": "genepanels" } }
        }]
    }))
    .expect("config");
    assert_eq!(
        config.reference("genepanels").expect("ref").to_string(),
        "project-ref:file-gp"
    );
    assert_eq!(config.reference("file-direct").expect("ref").to_string(), "file-direct");
}

#[test]
fn malformed_documents_are_rejected() {
    let duplicate = parse(json!({
        "assay": "CEN", "version": "1.0.0",
        "reports": [
            { "name": "snv", "executable": "app-r" },
            { "name": "snv", "executable": "app-r" }
        ]
    }));
    assert!(matches!(duplicate, Err(DiasError::InvalidConfig(_))));

    let forward = parse(json!({
        "assay": "CEN", "version": "1.0.0",
        "calling": {
            "name": "call", "executable": "app-c",
            "inputs": { "x": { "from": "upstream_folder", "stage": "artemis" } }
        },
        "packaging": { "name": "artemis", "executable": "app-a" }
    }));
    assert!(matches!(forward, Err(DiasError::InvalidConfig(_))));

    let bad_pattern = parse(json!({
        "assay": "CEN", "version": "1.0.0",
        "reports": [{
            "name": "snv", "executable": "app-r",
            "inputs": { "vcf": { "from": "files", "pattern": "([unclosed" } }
        }]
    }));
    assert!(matches!(bad_pattern, Err(DiasError::InvalidConfig(_))));

    let bad_executable = parse(json!({
        "assay": "CEN", "version": "1.0.0",
        "reports": [{ "name": "snv", "executable": "file-notrunnable" }]
    }));
    assert!(matches!(bad_executable, Err(DiasError::Serde(_))));

    let bad_version = parse(json!({ "assay": "CEN", "version": "latest" }));
    assert!(matches!(bad_version, Err(DiasError::Serde(_))));
}

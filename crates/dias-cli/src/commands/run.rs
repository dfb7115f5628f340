use std::collections::{BTreeMap, BTreeSet};
use std::error::Error;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::Args;
use dias_batch::{ManifestInput, PipelineOrchestrator, ReportSelection, RunRequest, StageSelection};
use dias_core::{ContainerId, FileRef, JobId, Location, ObjectStore};
use dias_dx::DxClient;
use tracing::info;

use super::load_config;
use crate::settings::Settings;

#[derive(Args, Debug)]
pub struct RunArgs {
    /// Assay whose newest config is used.
    #[arg(long, required_unless_present = "config")]
    pub assay: Option<String>,
    /// Config file id (`project-xxx:file-yyy`); skips version resolution.
    #[arg(long)]
    pub config: Option<String>,
    /// Folder searched for stage inputs (`project-xxx:/path`).
    #[arg(long)]
    pub input_dir: String,
    /// Root for stage outputs; defaults to the settings file, then `/output`
    /// of the input project.
    #[arg(long)]
    pub output_dir: Option<String>,
    /// Local manifest file.
    #[arg(long, conflicts_with = "manifest_id")]
    pub manifest: Option<PathBuf>,
    /// Manifest file id in the store.
    #[arg(long)]
    pub manifest_id: Option<String>,
    /// Run the calling stage.
    #[arg(long)]
    pub calling: bool,
    /// Run report stages; every configured one when no name is given.
    #[arg(long, num_args = 0.., value_name = "NAME")]
    pub reports: Option<Vec<String>>,
    /// Run the packaging stage.
    #[arg(long)]
    pub packaging: bool,
    /// Samples to leave out.
    #[arg(long, num_args = 1.., value_delimiter = ',', value_name = "SAMPLE")]
    pub exclude: Vec<String>,
    /// File listing samples to leave out, one per line.
    #[arg(long)]
    pub exclude_file: Option<PathBuf>,
    /// Keep at most this many samples per stage.
    #[arg(long)]
    pub sample_limit: Option<usize>,
    /// Request revival of archived inputs instead of failing.
    #[arg(long)]
    pub unarchive: bool,
    /// Only request revival; never launch.
    #[arg(long, conflicts_with = "unarchive")]
    pub unarchive_only: bool,
    /// Build and log every job without submitting.
    #[arg(long)]
    pub dry_run: bool,
    /// Output folder of a stage that is not run this time.
    #[arg(long = "upstream", value_name = "STAGE=FOLDER", value_parser = parse_upstream)]
    pub upstream: Vec<(String, String)>,
}

pub fn run(args: &RunArgs, settings: &Settings) -> Result<ExitCode, Box<dyn Error>> {
    let client = DxClient::from_env()?;
    let default_container = client.settings().project.clone();
    let input_root = Location::parse(&args.input_dir, default_container.as_ref())?;
    let config = load_config(
        &client,
        settings,
        args.config.as_deref(),
        args.assay.as_deref(),
        Some(&input_root.container),
    )?;
    info!(assay = %config.assay_name, version = %config.version, source = %config.source_id, "using config");

    let initiating_job = client.settings().job.clone();
    let request = build_request(args, settings, &client, input_root, initiating_job)?;
    let report = PipelineOrchestrator::new(&client, &client, &config).run(&request)?;
    print!("{}", report.to_text());
    Ok(ExitCode::SUCCESS)
}

fn build_request<S: ObjectStore + ?Sized>(
    args: &RunArgs,
    settings: &Settings,
    store: &S,
    input_root: Location,
    initiating_job: Option<JobId>,
) -> Result<RunRequest, Box<dyn Error>> {
    let container = input_root.container.clone();
    let output_root = match args.output_dir.as_deref().or(settings.output_root.as_deref()) {
        Some(raw) => Location::parse(raw, Some(&container))?,
        None => Location::new(container.clone(), "/output"),
    };
    let mut request = RunRequest::new(input_root, output_root);
    request.manifest = manifest_input(args, store)?;
    request.stages = StageSelection {
        calling: args.calling,
        reports: match &args.reports {
            None => ReportSelection::Skip,
            Some(names) if names.is_empty() => ReportSelection::All,
            Some(names) => ReportSelection::Named(names.iter().cloned().collect()),
        },
        packaging: args.packaging,
    };
    request.exclude = exclusions(&args.exclude, args.exclude_file.as_deref())?;
    request.sample_limit = args.sample_limit;
    request.unarchive = args.unarchive;
    request.unarchive_only = args.unarchive_only;
    request.dry_run = args.dry_run;
    request.upstream_folders = upstream_folders(&args.upstream, &container)?;
    request.initiating_job = initiating_job;
    Ok(request)
}

fn manifest_input<S: ObjectStore + ?Sized>(
    args: &RunArgs,
    store: &S,
) -> Result<Option<ManifestInput>, Box<dyn Error>> {
    if let Some(path) = &args.manifest {
        let name = path
            .file_name()
            .and_then(|name| name.to_str())
            .unwrap_or("manifest.txt")
            .to_string();
        return Ok(Some(ManifestInput {
            name,
            content: fs::read(path)?,
        }));
    }
    if let Some(raw) = &args.manifest_id {
        let file = FileRef::parse(raw)?;
        let described = store.describe(&file)?;
        return Ok(Some(ManifestInput {
            name: described.name,
            content: store.read(&file)?,
        }));
    }
    Ok(None)
}

/// Samples from `--exclude` plus every non-blank, non-comment line of
/// `file`.
fn exclusions(listed: &[String], file: Option<&Path>) -> Result<BTreeSet<String>, Box<dyn Error>> {
    let mut excluded: BTreeSet<String> = listed
        .iter()
        .map(|sample| sample.trim().to_string())
        .filter(|sample| !sample.is_empty())
        .collect();
    if let Some(path) = file {
        let contents = fs::read_to_string(path)?;
        excluded.extend(
            contents
                .lines()
                .map(str::trim)
                .filter(|line| !line.is_empty() && !line.starts_with('#'))
                .map(str::to_string),
        );
    }
    Ok(excluded)
}

fn upstream_folders(
    pairs: &[(String, String)],
    container: &ContainerId,
) -> Result<BTreeMap<String, Location>, Box<dyn Error>> {
    let mut folders = BTreeMap::new();
    for (stage, folder) in pairs {
        folders.insert(stage.clone(), Location::parse(folder, Some(container))?);
    }
    Ok(folders)
}

fn parse_upstream(raw: &str) -> Result<(String, String), String> {
    match raw.split_once('=') {
        Some((stage, folder)) if !stage.trim().is_empty() && !folder.trim().is_empty() => {
            Ok((stage.trim().to_string(), folder.trim().to_string()))
        }
        _ => Err(format!("expected STAGE=FOLDER, got `{raw}`")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dias_core::{MemoryStore, StorageState};

    fn args(extra: &[&str]) -> RunArgs {
        use clap::Parser;

        #[derive(Parser)]
        struct Wrapper {
            #[command(flatten)]
            run: RunArgs,
        }

        let mut argv = vec!["dias", "--assay", "CEN", "--input-dir", "project-run:/output/single"];
        argv.extend_from_slice(extra);
        Wrapper::parse_from(argv).run
    }

    #[test]
    fn upstream_pairs_need_both_halves() {
        assert_eq!(
            parse_upstream("snv_reports=/output/snv"),
            Ok(("snv_reports".to_string(), "/output/snv".to_string()))
        );
        assert!(parse_upstream("snv_reports").is_err());
        assert!(parse_upstream("=/output").is_err());
    }

    #[test]
    fn report_flag_without_names_selects_every_report() {
        let store = MemoryStore::new();
        let input = Location::new(ContainerId::new("project-run"), "/output/single");

        let all = build_request(&args(&["--reports"]), &Settings::default(), &store, input.clone(), None)
            .expect("request");
        assert_eq!(all.stages.reports, ReportSelection::All);
        assert_eq!(all.output_root.to_string(), "project-run:/output");

        let named = build_request(
            &args(&["--reports", "snv", "cnv", "--calling"]),
            &Settings::default(),
            &store,
            input.clone(),
            None,
        )
        .expect("request");
        assert!(named.stages.calling);
        assert_eq!(
            named.stages.reports,
            ReportSelection::Named(BTreeSet::from(["snv".to_string(), "cnv".to_string()]))
        );

        let none = build_request(&args(&[]), &Settings::default(), &store, input, None).expect("request");
        assert_eq!(none.stages.reports, ReportSelection::Skip);
    }

    #[test]
    fn exclusions_merge_flag_and_file() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = dir.path().join("exclude.txt");
        fs::write(&path, "X3\n\n# control\nX4 \n").expect("write");
        let excluded = exclusions(&["X1".to_string(), " X2".to_string()], Some(&path)).expect("exclude");
        assert_eq!(
            excluded,
            BTreeSet::from(["X1", "X2", "X3", "X4"].map(String::from))
        );
    }

    #[test]
    fn manifests_come_from_disk_or_store() {
        let store = MemoryStore::new();
        let id = store.add_file("project-run", "/", "run.manifest", StorageState::Live, b"X1\tR207.1\n");
        let input = Location::new(ContainerId::new("project-run"), "/output/single");
        let raw_id = format!("project-run:{id}");

        let remote = build_request(
            &args(&["--manifest-id", raw_id.as_str(), "--upstream", "snv=/output/old"]),
            &Settings::default(),
            &store,
            input.clone(),
            None,
        )
        .expect("request");
        let manifest = remote.manifest.expect("manifest");
        assert_eq!(manifest.name, "run.manifest");
        assert_eq!(manifest.content, b"X1\tR207.1\n");
        assert_eq!(remote.upstream_folders["snv"].to_string(), "project-run:/output/old");

        let dir = tempfile::tempdir().expect("temp dir");
        let path = dir.path().join("local.txt");
        fs::write(&path, "X2\tR208.1\n").expect("write");
        let settings = Settings {
            output_root: Some("/elsewhere".to_string()),
            ..Settings::default()
        };
        let local = build_request(
            &args(&["--manifest", path.to_str().expect("utf8 path")]),
            &settings,
            &store,
            input,
            None,
        )
        .expect("request");
        assert_eq!(local.manifest.expect("manifest").name, "local.txt");
        assert_eq!(local.output_root.to_string(), "project-run:/elsewhere");
    }
}

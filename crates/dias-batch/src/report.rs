//! Run accounting persisted at the end of every run.

use std::collections::BTreeMap;
use std::fmt::Write as _;

use chrono::Utc;
use dias_core::{DiasError, RunProvenance};
use serde::{Deserialize, Serialize};

use crate::archive::ArchivalOutcome;
use crate::config::{Config, StageKind};
use crate::hash::stable_hash_string;
use crate::serde::to_canonical_json_pretty;

/// Category for samples whose id fails the naming convention.
pub const INVALID_SAMPLE_NAME: &str = "invalid sample name";
/// Category for samples with a code unknown to genepanels.
pub const INVALID_TEST_CODES: &str = "invalid test codes";
/// Category for samples whose primary and re-analysis ids disagree.
pub const AMBIGUOUS_REANALYSIS: &str = "ambiguous reanalysis";
/// Category for samples without any test code.
pub const NO_TEST_CODES: &str = "no test codes";

/// Per-stage accounting of what was launched and what was not.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunReport {
    /// Stage name.
    pub stage: String,
    /// Pipeline slot of the stage.
    pub kind: StageKind,
    /// `container:/folder` the stage wrote into, once launched.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub destination: Option<String>,
    /// Sample (or `run`) to launched job names.
    pub launched: BTreeMap<String, Vec<String>>,
    /// Error category to sample ids.
    pub errors: BTreeMap<String, Vec<String>>,
    /// Samples left out on purpose.
    pub excluded: Vec<String>,
    /// Sample ids to malformed codes dropped from their test-groups.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub filtered_codes: BTreeMap<String, Vec<String>>,
}

impl RunReport {
    /// Empty report for a stage.
    pub fn new(stage: impl Into<String>, kind: StageKind) -> Self {
        Self {
            stage: stage.into(),
            kind,
            destination: None,
            launched: BTreeMap::new(),
            errors: BTreeMap::new(),
            excluded: Vec::new(),
            filtered_codes: BTreeMap::new(),
        }
    }

    /// Records a launched job.
    pub fn record_launch(&mut self, sample: impl Into<String>, job_name: impl Into<String>) {
        self.launched
            .entry(sample.into())
            .or_default()
            .push(job_name.into());
    }

    /// Records a per-sample error once per category.
    pub fn record_error(&mut self, category: impl Into<String>, sample: impl Into<String>) {
        let sample = sample.into();
        let samples = self.errors.entry(category.into()).or_default();
        if !samples.contains(&sample) {
            samples.push(sample);
        }
    }

    /// Records an excluded sample once.
    pub fn exclude(&mut self, sample: impl Into<String>) {
        let sample = sample.into();
        if !self.excluded.contains(&sample) {
            self.excluded.push(sample);
        }
    }

    /// Merges category lists from another accounting step.
    pub fn merge_errors(&mut self, errors: &BTreeMap<String, Vec<String>>) {
        for (category, samples) in errors {
            for sample in samples {
                self.record_error(category.clone(), sample.clone());
            }
        }
    }

    /// Records codes dropped from a sample's test-groups.
    pub fn record_filtered(&mut self, sample: impl Into<String>, codes: &[String]) {
        if codes.is_empty() {
            return;
        }
        let recorded = self.filtered_codes.entry(sample.into()).or_default();
        for code in codes {
            if !recorded.contains(code) {
                recorded.push(code.clone());
            }
        }
    }

    /// Number of launched jobs.
    pub fn job_count(&self) -> usize {
        self.launched.values().map(Vec::len).sum()
    }
}

/// How a run ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// Stages were launched.
    Launched,
    /// Jobs were recorded but never submitted.
    DryRun,
    /// Archived inputs were asked for; nothing was launched.
    RevivalRequested,
    /// Unarchive-only mode found nothing to do.
    NothingToRevive,
    /// A stage failed after earlier stages were launched.
    Aborted,
}

/// Report persisted at the end of every run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineReport {
    /// How the run ended.
    pub status: RunStatus,
    /// Archival reconciliation result.
    pub archival: ArchivalOutcome,
    /// Samples read from the manifest, in order.
    pub manifest_samples: Vec<String>,
    /// Per-stage reports in pipeline order.
    pub stages: Vec<RunReport>,
    /// Provenance metadata describing the run.
    pub provenance: RunProvenance,
}

impl PipelineReport {
    /// Canonical pretty JSON.
    pub fn to_json(&self) -> Result<Vec<u8>, DiasError> {
        to_canonical_json_pretty(self)
    }

    /// Flat text summary for operators.
    pub fn to_text(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "Assay: {}", self.provenance.assay);
        let _ = writeln!(
            out,
            "Config: {} (version {})",
            self.provenance.config_source, self.provenance.config_version
        );
        let _ = writeln!(out, "Date: {}", self.provenance.created_at);
        let _ = writeln!(out, "Status: {}", status_label(&self.status));
        let _ = writeln!(out, "Samples in manifest: {}", self.manifest_samples.len());
        if let ArchivalOutcome::RevivalRequested { requested } = &self.archival {
            let total: usize = requested.values().map(Vec::len).sum();
            let _ = writeln!(
                out,
                "Revival requested for {total} files in {} containers",
                requested.len()
            );
        }
        for stage in &self.stages {
            let _ = writeln!(out);
            let _ = writeln!(out, "[{}] {}", kind_label(stage.kind), stage.stage);
            if let Some(destination) = &stage.destination {
                let _ = writeln!(out, "Output: {destination}");
            }
            let _ = writeln!(
                out,
                "Jobs launched: {} for {} samples",
                stage.job_count(),
                stage.launched.len()
            );
            for (category, samples) in &stage.errors {
                let _ = writeln!(out, "{category} ({}): {}", samples.len(), samples.join(", "));
            }
            for (sample, codes) in &stage.filtered_codes {
                let _ = writeln!(out, "filtered codes for {sample}: {}", codes.join(", "));
            }
            if !stage.excluded.is_empty() {
                let _ = writeln!(
                    out,
                    "excluded ({}): {}",
                    stage.excluded.len(),
                    stage.excluded.join(", ")
                );
            }
        }
        out
    }
}

fn status_label(status: &RunStatus) -> &'static str {
    match status {
        RunStatus::Launched => "launched",
        RunStatus::DryRun => "dry run",
        RunStatus::RevivalRequested => "revival requested",
        RunStatus::NothingToRevive => "nothing to revive",
        RunStatus::Aborted => "aborted",
    }
}

fn kind_label(kind: StageKind) -> &'static str {
    match kind {
        StageKind::Calling => "calling",
        StageKind::Reports => "reports",
        StageKind::Packaging => "packaging",
    }
}

/// Provenance for a run of `config`.
pub fn provenance(config: &Config) -> RunProvenance {
    let mut versions = BTreeMap::new();
    versions.insert(
        "dias-batch".to_string(),
        env!("CARGO_PKG_VERSION").to_string(),
    );
    RunProvenance {
        assay: config.assay_name.clone(),
        config_version: config.version.to_string(),
        config_source: config.source_id.clone(),
        config_hash: stable_hash_string(config).unwrap_or_default(),
        created_at: Utc::now().to_rfc3339(),
        tool_versions: versions,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn errors_are_recorded_once() {
        let mut report = RunReport::new("snv_reports", StageKind::Reports);
        report.record_error("missing vcf", "B");
        report.record_error("missing vcf", "B");
        report.exclude("C");
        report.exclude("C");
        assert_eq!(report.errors["missing vcf"], vec!["B"]);
        assert_eq!(report.excluded, vec!["C"]);
    }

    #[test]
    fn filtered_codes_are_informational() {
        let mut report = RunReport::new("snv_reports", StageKind::Reports);
        report.record_filtered("A", &[]);
        report.record_filtered("B", &["Research Use".to_string()]);
        report.record_filtered("B", &["Research Use".to_string()]);
        assert!(!report.filtered_codes.contains_key("A"));
        assert_eq!(report.filtered_codes["B"], vec!["Research Use"]);
        assert!(report.errors.is_empty());
    }

    #[test]
    fn launches_accumulate_per_sample() {
        let mut report = RunReport::new("snv_reports", StageKind::Reports);
        report.record_launch("A", "reports-A_R1.1");
        report.record_launch("A", "reports-A_R2.1");
        assert_eq!(report.job_count(), 2);
        assert_eq!(report.launched.len(), 1);
    }
}

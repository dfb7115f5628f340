//! Sample manifest parsing.
//!
//! Two conventions are accepted. Structured manifests are semicolon
//! delimited exports with named columns, one test-group per row. Legacy
//! manifests are tab delimited `sample<TAB>codes` lines.

use std::collections::BTreeMap;
use std::sync::OnceLock;

use dias_core::{DiasError, ErrorInfo};
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Column holding the instrument (sequencing) id.
pub const INSTRUMENT_COLUMN: &str = "Instrument ID";
/// Column holding the specimen id.
pub const SPECIMEN_COLUMN: &str = "Specimen ID";
/// Column holding the instrument id of a re-analysed sample.
pub const REANALYSIS_INSTRUMENT_COLUMN: &str = "Re-analysis Instrument ID";
/// Column holding the specimen id of a re-analysed sample.
pub const REANALYSIS_SPECIMEN_COLUMN: &str = "Re-analysis Specimen ID";
/// Column holding comma separated test codes.
pub const TEST_CODES_COLUMN: &str = "Test Codes";

/// Marker that starts a single-gene test code.
pub const SINGLE_GENE_MARKER: char = '_';

fn valid_code() -> &'static Regex {
    static VALID: OnceLock<Regex> = OnceLock::new();
    VALID.get_or_init(|| Regex::new(r"^(?:[RC]\d+\.\d+|_HGNC:\d+)$").expect("static code pattern"))
}

/// True when `code` is a panel code (`R207.1`) or a single-gene code
/// (`_HGNC:1234`).
pub fn is_valid_code(code: &str) -> bool {
    valid_code().is_match(code)
}

/// True for single-gene codes.
pub fn is_single_gene(code: &str) -> bool {
    code.starts_with(SINGLE_GENE_MARKER)
}

/// Manifest convention a sample was read from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ManifestFormat {
    /// Tab delimited `sample<TAB>codes`.
    Legacy,
    /// Semicolon delimited export with named columns.
    Structured,
}

/// Everything requested for one sample.
///
/// `test_groups`, `indications` and `panels` are index aligned; the labels
/// stay empty until the entry is annotated from genepanels.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestEntry {
    /// Sample id; `instrument-specimen` for structured manifests.
    pub sample_id: String,
    /// One list of valid codes per manifest row.
    pub test_groups: Vec<Vec<String>>,
    /// Clinical indication label per group, `;` joined across codes.
    pub indications: Vec<String>,
    /// Panel label per group, `;` joined across codes.
    pub panels: Vec<String>,
    /// Convention the entry was read from.
    pub source_format: ManifestFormat,
    /// Codes that failed the valid-code pattern and were dropped from
    /// `test_groups`.
    #[serde(default)]
    pub rejected_codes: Vec<String>,
    /// Set when primary and re-analysis ids disagree.
    #[serde(default)]
    pub ambiguous_reanalysis: bool,
}

impl ManifestEntry {
    fn new(sample_id: String, source_format: ManifestFormat) -> Self {
        Self {
            sample_id,
            test_groups: Vec::new(),
            indications: Vec::new(),
            panels: Vec::new(),
            source_format,
            rejected_codes: Vec::new(),
            ambiguous_reanalysis: false,
        }
    }

    /// Appends one test-group, keeping the label lists aligned.
    pub fn push_group(&mut self, codes: Vec<String>) {
        self.test_groups.push(codes);
        self.indications.push(String::new());
        self.panels.push(String::new());
    }

    /// Every code across all groups, in order.
    pub fn codes(&self) -> impl Iterator<Item = &str> {
        self.test_groups.iter().flatten().map(String::as_str)
    }
}

/// Parsed manifest, entries in first-appearance order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
    /// Convention of the whole document.
    pub format: ManifestFormat,
    /// One entry per distinct sample.
    pub entries: Vec<ManifestEntry>,
}

impl Manifest {
    /// Looks an entry up by sample id.
    pub fn get(&self, sample_id: &str) -> Option<&ManifestEntry> {
        self.entries.iter().find(|entry| entry.sample_id == sample_id)
    }

    /// Sample ids in manifest order.
    pub fn samples(&self) -> Vec<&str> {
        self.entries.iter().map(|entry| entry.sample_id.as_str()).collect()
    }

    /// Keeps only the entries accepted by `keep`.
    pub fn retain(&mut self, keep: impl FnMut(&ManifestEntry) -> bool) {
        self.entries.retain(keep);
    }

    fn entry_mut(&mut self, sample_id: &str, format: ManifestFormat) -> &mut ManifestEntry {
        let index = match self
            .entries
            .iter()
            .position(|entry| entry.sample_id == sample_id)
        {
            Some(index) => index,
            None => {
                self.entries
                    .push(ManifestEntry::new(sample_id.to_string(), format));
                self.entries.len() - 1
            }
        };
        &mut self.entries[index]
    }
}

/// Splits a comma separated code list into valid and rejected codes.
pub fn split_codes(raw: &str) -> (Vec<String>, Vec<String>) {
    let mut valid = Vec::new();
    let mut rejected = Vec::new();
    for code in raw.split(',').map(str::trim).filter(|code| !code.is_empty()) {
        if is_valid_code(code) {
            valid.push(code.to_string());
        } else {
            rejected.push(code.to_string());
        }
    }
    (valid, rejected)
}

/// Parses manifest content of either convention.
pub fn parse_manifest(content: &str) -> Result<Manifest, DiasError> {
    let lines: Vec<(usize, &str)> = content
        .lines()
        .enumerate()
        .map(|(index, line)| (index + 1, line.trim_end_matches('\r')))
        .filter(|(_, line)| !line.trim().is_empty())
        .collect();
    let mut rest = lines.as_slice();
    if let Some(((_, first), tail)) = rest.split_first() {
        let leading = first.split(';').next().unwrap_or_default().trim();
        if leading.eq_ignore_ascii_case("batch") {
            rest = tail;
        }
    }
    let Some(((line_no, first), _)) = rest.split_first() else {
        return Err(DiasError::UnrecognizedManifestFormat(ErrorInfo::new(
            "manifest_empty",
            "manifest has no data lines",
        )));
    };
    if StructuredHeader::parse(first).is_some() {
        parse_structured(rest)
    } else if first.contains('\t') {
        parse_legacy(rest)
    } else {
        Err(DiasError::UnrecognizedManifestFormat(
            ErrorInfo::new("manifest_format", "manifest matches no known convention")
                .with_context("line", line_no.to_string())
                .with_hint("expected a semicolon header with Instrument ID, Specimen ID and Test Codes, or tab delimited sample and codes"),
        ))
    }
}

struct StructuredHeader {
    instrument: usize,
    specimen: usize,
    reanalysis_instrument: Option<usize>,
    reanalysis_specimen: Option<usize>,
    test_codes: usize,
}

impl StructuredHeader {
    fn parse(line: &str) -> Option<Self> {
        let columns: Vec<&str> = line.split(';').map(str::trim).collect();
        let find = |name: &str| columns.iter().position(|column| *column == name);
        Some(Self {
            instrument: find(INSTRUMENT_COLUMN)?,
            specimen: find(SPECIMEN_COLUMN)?,
            reanalysis_instrument: find(REANALYSIS_INSTRUMENT_COLUMN),
            reanalysis_specimen: find(REANALYSIS_SPECIMEN_COLUMN),
            test_codes: find(TEST_CODES_COLUMN)?,
        })
    }
}

fn sample_from(fields: &[&str], instrument: Option<usize>, specimen: Option<usize>) -> Option<String> {
    let get = |index: Option<usize>| {
        index
            .and_then(|index| fields.get(index))
            .map(|value| value.trim())
            .filter(|value| !value.is_empty())
    };
    match (get(instrument), get(specimen)) {
        (Some(instrument), Some(specimen)) => Some(format!("{instrument}-{specimen}")),
        _ => None,
    }
}

fn missing_sample(line_no: usize) -> DiasError {
    DiasError::UnrecognizedManifestFormat(
        ErrorInfo::new("manifest_missing_sample", "manifest row has no sample id")
            .with_context("line", line_no.to_string()),
    )
}

fn warn_rejected(line_no: usize, sample_id: &str, rejected: &[String]) {
    if !rejected.is_empty() {
        warn!(line = line_no, sample = %sample_id, codes = %rejected.join(", "), "dropping malformed test codes");
    }
}

fn parse_structured(lines: &[(usize, &str)]) -> Result<Manifest, DiasError> {
    let mut manifest = Manifest {
        format: ManifestFormat::Structured,
        entries: Vec::new(),
    };
    let Some(((_, header_line), rows)) = lines.split_first() else {
        return Ok(manifest);
    };
    let Some(header) = StructuredHeader::parse(header_line) else {
        return Ok(manifest);
    };
    for (line_no, line) in rows {
        if !line.contains(';') {
            return Err(DiasError::UnrecognizedManifestFormat(
                ErrorInfo::new("manifest_mixed_delimiters", "structured manifest row is not semicolon delimited")
                    .with_context("line", line_no.to_string()),
            ));
        }
        let fields: Vec<&str> = line.split(';').collect();
        let primary = sample_from(&fields, Some(header.instrument), Some(header.specimen));
        let reanalysis = sample_from(
            &fields,
            header.reanalysis_instrument,
            header.reanalysis_specimen,
        );
        let (sample_id, ambiguous) = match (primary, reanalysis) {
            (Some(primary), Some(reanalysis)) if primary != reanalysis => (primary, true),
            (Some(primary), _) => (primary, false),
            (None, Some(reanalysis)) => (reanalysis, false),
            (None, None) => return Err(missing_sample(*line_no)),
        };
        let raw_codes = fields.get(header.test_codes).copied().unwrap_or_default();
        let (codes, rejected) = split_codes(raw_codes);
        warn_rejected(*line_no, &sample_id, &rejected);
        let entry = manifest.entry_mut(&sample_id, ManifestFormat::Structured);
        entry.ambiguous_reanalysis |= ambiguous;
        entry.rejected_codes.extend(rejected);
        if !codes.is_empty() {
            entry.push_group(codes);
        }
    }
    debug!(samples = manifest.entries.len(), "parsed structured manifest");
    Ok(manifest)
}

fn parse_legacy(lines: &[(usize, &str)]) -> Result<Manifest, DiasError> {
    let mut manifest = Manifest {
        format: ManifestFormat::Legacy,
        entries: Vec::new(),
    };
    for (line_no, line) in lines {
        let fields: Vec<&str> = line.split('\t').collect();
        if fields.len() != 2 {
            return Err(DiasError::MalformedLegacyRow(
                ErrorInfo::new("manifest_legacy_row", "legacy row must have two fields")
                    .with_context("line", line_no.to_string())
                    .with_context("fields", fields.len().to_string()),
            ));
        }
        let sample_id = fields[0].trim();
        if sample_id.is_empty() {
            return Err(missing_sample(*line_no));
        }
        let (codes, rejected) = split_codes(fields[1]);
        warn_rejected(*line_no, sample_id, &rejected);
        let entry = manifest.entry_mut(sample_id, ManifestFormat::Legacy);
        entry.rejected_codes.extend(rejected);
        if !codes.is_empty() {
            entry.push_group(codes);
        }
    }
    debug!(samples = manifest.entries.len(), "parsed legacy manifest");
    Ok(manifest)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn code_validity() {
        assert!(is_valid_code("R207.1"));
        assert!(is_valid_code("C1.2"));
        assert!(is_valid_code("_HGNC:1234"));
        assert!(!is_valid_code("R207"));
        assert!(!is_valid_code("_HGNC:"));
        assert!(!is_valid_code("Research Use"));
    }

    #[test]
    fn single_gene_marker() {
        assert!(is_single_gene("_HGNC:5"));
        assert!(!is_single_gene("R1.1"));
    }
}

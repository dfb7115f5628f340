//! Clinical indication lookup from the genepanels reference file.

use std::collections::BTreeMap;

use dias_core::{DiasError, ErrorInfo};
use tracing::debug;

use crate::manifest::{is_single_gene, Manifest};

/// Indication label and panels for one test code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Indication {
    /// Full clinical indication label, e.g. `R207.1_Inherited ovarian cancer_P`.
    pub label: String,
    /// Panel names in file order, without duplicates.
    pub panels: Vec<String>,
}

/// Test code to indication mapping.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Genepanels {
    by_code: BTreeMap<String, Indication>,
}

/// Test code of a clinical indication label: its text before the first `_`.
pub fn code_of(indication: &str) -> &str {
    indication.split('_').next().unwrap_or(indication)
}

impl Genepanels {
    /// Parses tab delimited `clinical indication, panel, gene` rows.
    ///
    /// A leading test-code column is accepted when rows have four fields.
    /// Blank lines, `#` comments and a header row are skipped.
    pub fn parse(content: &str) -> Result<Self, DiasError> {
        let mut by_code: BTreeMap<String, Indication> = BTreeMap::new();
        for (index, line) in content.lines().enumerate() {
            let line = line.trim_end_matches('\r');
            if line.trim().is_empty() || line.starts_with('#') {
                continue;
            }
            let fields: Vec<&str> = line.split('\t').map(str::trim).collect();
            let (code, label, panel) = match fields.as_slice() {
                [code, label, panel, _gene] => (code.to_string(), *label, *panel),
                [label, panel, _] | [label, panel] => (code_of(label).to_string(), *label, *panel),
                _ => {
                    return Err(DiasError::InvalidConfig(
                        ErrorInfo::new("genepanels_row", "genepanels row has an unexpected shape")
                            .with_context("line", (index + 1).to_string())
                            .with_context("fields", fields.len().to_string()),
                    ))
                }
            };
            if index == 0 && label.eq_ignore_ascii_case("clinical indication") {
                continue;
            }
            let entry = by_code.entry(code).or_insert_with(|| Indication {
                label: label.to_string(),
                panels: Vec::new(),
            });
            if !panel.is_empty() && !entry.panels.iter().any(|known| known == panel) {
                entry.panels.push(panel.to_string());
            }
        }
        debug!(codes = by_code.len(), "parsed genepanels");
        Ok(Self { by_code })
    }

    /// Looks a test code up.
    pub fn get(&self, code: &str) -> Option<&Indication> {
        self.by_code.get(code)
    }

    /// Number of known test codes.
    pub fn len(&self) -> usize {
        self.by_code.len()
    }

    /// True when no code is known.
    pub fn is_empty(&self) -> bool {
        self.by_code.is_empty()
    }

    /// Fills indication and panel labels of every test-group.
    ///
    /// Single-gene codes label themselves. Returns, per sample, the codes
    /// that genepanels does not know; those samples keep empty labels for
    /// the offending groups.
    pub fn annotate(&self, manifest: &mut Manifest) -> BTreeMap<String, Vec<String>> {
        let mut unknown: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for entry in &mut manifest.entries {
            for index in 0..entry.test_groups.len() {
                let mut labels = Vec::new();
                let mut panels = Vec::new();
                let mut complete = true;
                for code in &entry.test_groups[index] {
                    if is_single_gene(code) {
                        labels.push(code.clone());
                        panels.push(code.clone());
                        continue;
                    }
                    match self.get(code) {
                        Some(indication) => {
                            labels.push(indication.label.clone());
                            panels.extend(indication.panels.iter().cloned());
                        }
                        None => {
                            complete = false;
                            unknown
                                .entry(entry.sample_id.clone())
                                .or_default()
                                .push(code.clone());
                        }
                    }
                }
                if complete {
                    entry.indications[index] = labels.join(";");
                    entry.panels[index] = panels.join(";");
                }
            }
        }
        unknown
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn code_is_text_before_first_underscore() {
        assert_eq!(code_of("R207.1_Inherited ovarian cancer_P"), "R207.1");
        assert_eq!(code_of("R207.1"), "R207.1");
    }

    #[test]
    fn panels_are_deduplicated_in_order() {
        let content = "R1.1_A_P\tPanel one\tHGNC:1\nR1.1_A_P\tPanel one\tHGNC:2\nR1.1_A_P\tPanel two\tHGNC:3\n";
        let panels = Genepanels::parse(content).unwrap();
        let indication = panels.get("R1.1").unwrap();
        assert_eq!(indication.label, "R1.1_A_P");
        assert_eq!(indication.panels, vec!["Panel one", "Panel two"]);
    }

    #[test]
    fn header_and_comments_are_skipped() {
        let content = "clinical indication\tpanel\tgene\n# note\nR2.1_B_G\tPanel\tHGNC:9\n";
        let panels = Genepanels::parse(content).unwrap();
        assert_eq!(panels.len(), 1);
    }
}

//! Operator settings file (`dias.toml`).

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use dias_core::{DiasError, ErrorInfo};
use serde::Deserialize;

/// Settings file looked up in the working directory.
pub const DEFAULT_SETTINGS_FILE: &str = "dias.toml";

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Settings {
    /// Folder holding assay config documents, `project-xxx:/path`.
    #[serde(default)]
    pub config_location: Option<String>,
    /// Root for stage outputs when `--output-dir` is not given.
    #[serde(default)]
    pub output_root: Option<String>,
    /// Assay name to config folder, overriding `config_location`.
    #[serde(default)]
    pub assays: BTreeMap<String, String>,
}

impl Settings {
    pub fn load(path: &Path) -> Result<Self, DiasError> {
        let contents = fs::read_to_string(path).map_err(|err| {
            DiasError::Serde(
                ErrorInfo::new("settings_read", format!("failed to read settings: {err}"))
                    .with_context("path", path.display().to_string()),
            )
        })?;
        toml::from_str(&contents).map_err(|err| {
            DiasError::Serde(
                ErrorInfo::new("settings_parse", err.to_string())
                    .with_context("path", path.display().to_string()),
            )
        })
    }

    /// Loads `explicit`, else `./dias.toml` when it exists, else defaults.
    pub fn discover(explicit: Option<&Path>) -> Result<Self, DiasError> {
        match explicit {
            Some(path) => Self::load(path),
            None => {
                let fallback = Path::new(DEFAULT_SETTINGS_FILE);
                if fallback.is_file() {
                    Self::load(fallback)
                } else {
                    Ok(Self::default())
                }
            }
        }
    }

    /// Config folder for `assay`; assay names compare case-insensitively.
    pub fn config_location_for(&self, assay: &str) -> Option<&str> {
        self.assays
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case(assay))
            .map(|(_, location)| location.as_str())
            .or(self.config_location.as_deref())
    }
}

//! Semantic config versions.

use std::fmt;
use std::str::FromStr;

use dias_core::{DiasError, ErrorInfo};
use serde::{Deserialize, Serialize};

/// Semantic version of an assay config, ordered numerically.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ConfigVersion {
    /// Major version.
    pub major: u32,
    /// Minor version.
    pub minor: u32,
    /// Patch version.
    pub patch: u32,
}

impl ConfigVersion {
    /// Creates a version descriptor.
    pub const fn new(major: u32, minor: u32, patch: u32) -> Self {
        Self {
            major,
            minor,
            patch,
        }
    }
}

impl FromStr for ConfigVersion {
    type Err = DiasError;

    /// Accepts `1.2.3`, `v1.2.3`, and the shorter `1.2` / `1` forms.
    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let invalid = || {
            DiasError::InvalidConfig(
                ErrorInfo::new("config_version", "version is not numeric major.minor.patch")
                    .with_context("version", raw),
            )
        };
        let trimmed = raw.trim();
        let trimmed = trimmed
            .strip_prefix('v')
            .or_else(|| trimmed.strip_prefix('V'))
            .unwrap_or(trimmed);
        let parts: Vec<&str> = trimmed.split('.').collect();
        if parts.is_empty() || parts.len() > 3 {
            return Err(invalid());
        }
        let mut numbers = [0u32; 3];
        for (slot, part) in numbers.iter_mut().zip(parts.iter()) {
            if part.is_empty() || !part.bytes().all(|b| b.is_ascii_digit()) {
                return Err(invalid());
            }
            *slot = part.parse().map_err(|_| invalid())?;
        }
        Ok(Self::new(numbers[0], numbers[1], numbers[2]))
    }
}

impl TryFrom<String> for ConfigVersion {
    type Error = DiasError;

    fn try_from(raw: String) -> Result<Self, Self::Error> {
        raw.parse()
    }
}

impl From<ConfigVersion> for String {
    fn from(value: ConfigVersion) -> Self {
        value.to_string()
    }
}

impl fmt::Display for ConfigVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

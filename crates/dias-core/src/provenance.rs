//! Provenance descriptor attached to persisted run reports.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Provenance information attached to every persisted report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct RunProvenance {
    /// Assay the run was configured for.
    pub assay: String,
    /// Version of the resolved assay config.
    pub config_version: String,
    /// Store identifier of the config document.
    pub config_source: String,
    /// Canonical hash of the config contents.
    pub config_hash: String,
    /// ISO-8601 timestamp recording when the run started.
    pub created_at: String,
    /// Version map for all tools involved in the run.
    pub tool_versions: BTreeMap<String, String>,
}

//! Job submission payloads exchanged with the execution platform.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::types::{ExecutableRef, FileId, JobId};

/// Value bound to a single job input slot.
///
/// The scalar/list split for files is fixed at binding time; downstream
/// executables treat a one-element list differently from a scalar.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum InputValue {
    /// Exactly one file.
    File(FileId),
    /// An ordered list of files.
    Files(Vec<FileId>),
    /// A literal JSON value (string, number, bool, array).
    Literal(Value),
}

impl InputValue {
    /// Builds the file binding for `ids`, scalar when there is exactly one.
    ///
    /// Returns `None` for an empty slice.
    pub fn from_files(mut ids: Vec<FileId>) -> Option<Self> {
        match ids.len() {
            0 => None,
            1 => ids.pop().map(InputValue::File),
            _ => Some(InputValue::Files(ids)),
        }
    }

    /// Literal string input.
    pub fn text(value: impl Into<String>) -> Self {
        InputValue::Literal(Value::String(value.into()))
    }

    /// True when the value references at least one file.
    pub fn is_file(&self) -> bool {
        matches!(self, InputValue::File(_) | InputValue::Files(_))
    }
}

/// Everything needed to submit one remote job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobSpec {
    /// Executable to run.
    pub executable: ExecutableRef,
    /// Job name shown on the platform.
    pub name: String,
    /// Input slot bindings.
    pub inputs: BTreeMap<String, InputValue>,
    /// Output folder of the job.
    pub destination: String,
    /// Per-stage relative output folders (workflows only).
    #[serde(default)]
    pub stage_folders: BTreeMap<String, String>,
    /// Instance type override.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instance_type: Option<String>,
    /// Jobs that must finish before this one starts.
    #[serde(default)]
    pub dependencies: Vec<JobId>,
    /// Whether the dispatcher waits for the job before returning.
    #[serde(default)]
    pub block_until_done: bool,
}

/// Terminal state reported by `wait`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "lowercase")]
pub enum JobOutcome {
    /// Job finished successfully.
    Done,
    /// Job failed or was terminated.
    Failed {
        /// Failure reason reported by the platform.
        reason: String,
    },
}

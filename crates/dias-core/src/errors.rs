//! Structured error types shared across dias crates.

use std::collections::BTreeMap;
use std::fmt::{self, Display};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Structured payload attached to every [`DiasError`] variant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorInfo {
    /// Stable machine readable error code.
    pub code: String,
    /// Human readable diagnostic message.
    pub message: String,
    /// Contextual key value pairs (identifiers, counts, etc.).
    #[serde(default)]
    pub context: BTreeMap<String, String>,
    /// Optional hint that may help the operator resolve the issue.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hint: Option<String>,
}

impl ErrorInfo {
    /// Creates a new error payload with the provided code and message.
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            context: BTreeMap::new(),
            hint: None,
        }
    }

    /// Adds a context entry to the payload.
    pub fn with_context(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }

    /// Adds a context entry listing every item joined with `, `.
    pub fn with_list<I, S>(self, key: impl Into<String>, items: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let joined = items
            .into_iter()
            .map(|item| item.as_ref().to_string())
            .collect::<Vec<_>>()
            .join(", ");
        self.with_context(key, joined)
    }

    /// Sets a human readable hint for remediation.
    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }
}

impl Display for ErrorInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (code: {})", self.message, self.code)?;
        if !self.context.is_empty() {
            write!(f, " | context: [")?;
            for (idx, (key, value)) in self.context.iter().enumerate() {
                if idx > 0 {
                    write!(f, ", ")?;
                }
                write!(f, "{key}={value}")?;
            }
            write!(f, "]")?;
        }
        if let Some(hint) = &self.hint {
            write!(f, " | hint: {hint}")?;
        }
        Ok(())
    }
}

/// Canonical error type for the dias orchestrator.
///
/// Every variant is fatal for the run that raised it. Per-sample problems are
/// never surfaced through this type; they are accumulated in the run report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Error)]
#[serde(tag = "family", content = "detail")]
pub enum DiasError {
    /// No candidate config documents exist at the search location.
    #[error("config not found: {0}")]
    ConfigNotFound(ErrorInfo),
    /// Candidate documents exist but none belong to the requested assay.
    #[error("no matching assay: {0}")]
    NoMatchingAssay(ErrorInfo),
    /// Two or more live configs share the highest version.
    #[error("ambiguous config version: {0}")]
    AmbiguousVersion(ErrorInfo),
    /// A config document is structurally invalid.
    #[error("invalid config: {0}")]
    InvalidConfig(ErrorInfo),
    /// Manifest content matches neither supported delimiter convention.
    #[error("unrecognized manifest format: {0}")]
    UnrecognizedManifestFormat(ErrorInfo),
    /// A legacy manifest row does not have exactly two fields.
    #[error("malformed legacy manifest row: {0}")]
    MalformedLegacyRow(ErrorInfo),
    /// Nothing is left to dispatch once samples were filtered.
    #[error("empty manifest after filtering: {0}")]
    EmptyManifestAfterFiltering(ErrorInfo),
    /// A run-scoped input required by a stage could not be located.
    #[error("required run file missing: {0}")]
    RequiredRunFileMissing(ErrorInfo),
    /// Files are in a transient storage state and cannot be requested.
    #[error("unrecoverable archival state: {0}")]
    UnrecoverableArchivalState(ErrorInfo),
    /// Files are archived and revival was not requested.
    #[error("files archived: {0}")]
    FilesArchived(ErrorInfo),
    /// A remote job failed while the caller was blocking on it.
    #[error("remote job failed: {0}")]
    RemoteJobFailed(ErrorInfo),
    /// Object store transport or protocol failure.
    #[error("store error: {0}")]
    Store(ErrorInfo),
    /// Execution platform transport or protocol failure.
    #[error("platform error: {0}")]
    Platform(ErrorInfo),
    /// Serialization, schema or local IO errors.
    #[error("serde error: {0}")]
    Serde(ErrorInfo),
}

impl DiasError {
    /// Returns a reference to the payload describing the error.
    pub fn info(&self) -> &ErrorInfo {
        match self {
            DiasError::ConfigNotFound(info)
            | DiasError::NoMatchingAssay(info)
            | DiasError::AmbiguousVersion(info)
            | DiasError::InvalidConfig(info)
            | DiasError::UnrecognizedManifestFormat(info)
            | DiasError::MalformedLegacyRow(info)
            | DiasError::EmptyManifestAfterFiltering(info)
            | DiasError::RequiredRunFileMissing(info)
            | DiasError::UnrecoverableArchivalState(info)
            | DiasError::FilesArchived(info)
            | DiasError::RemoteJobFailed(info)
            | DiasError::Store(info)
            | DiasError::Platform(info)
            | DiasError::Serde(info) => info,
        }
    }

    /// Mutable access to the payload, for callers adding context on the way up.
    pub fn info_mut(&mut self) -> &mut ErrorInfo {
        match self {
            DiasError::ConfigNotFound(info)
            | DiasError::NoMatchingAssay(info)
            | DiasError::AmbiguousVersion(info)
            | DiasError::InvalidConfig(info)
            | DiasError::UnrecognizedManifestFormat(info)
            | DiasError::MalformedLegacyRow(info)
            | DiasError::EmptyManifestAfterFiltering(info)
            | DiasError::RequiredRunFileMissing(info)
            | DiasError::UnrecoverableArchivalState(info)
            | DiasError::FilesArchived(info)
            | DiasError::RemoteJobFailed(info)
            | DiasError::Store(info)
            | DiasError::Platform(info)
            | DiasError::Serde(info) => info,
        }
    }

    /// Adds a context entry, keeping the variant.
    pub fn with_context(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.info_mut().context.insert(key.into(), value.into());
        self
    }

    /// Adds a context entry listing every item joined with `, `, keeping the
    /// variant.
    pub fn with_list<I, S>(self, key: impl Into<String>, items: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let joined = items
            .into_iter()
            .map(|item| item.as_ref().to_string())
            .collect::<Vec<_>>()
            .join(", ");
        self.with_context(key, joined)
    }

    /// Shorthand for a [`DiasError::Serde`] error wrapping a foreign error.
    pub fn serde(code: &str, err: impl ToString) -> Self {
        DiasError::Serde(ErrorInfo::new(code, err.to_string()))
    }

    /// Shorthand for a [`DiasError::Store`] error wrapping a foreign error.
    pub fn store(code: &str, err: impl ToString) -> Self {
        DiasError::Store(ErrorInfo::new(code, err.to_string()))
    }

    /// Shorthand for a [`DiasError::Platform`] error wrapping a foreign error.
    pub fn platform(code: &str, err: impl ToString) -> Self {
        DiasError::Platform(ErrorInfo::new(code, err.to_string()))
    }
}

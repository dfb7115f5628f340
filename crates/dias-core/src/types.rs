use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::errors::{DiasError, ErrorInfo};

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Wraps a raw identifier.
            pub fn new(raw: impl Into<String>) -> Self {
                Self(raw.into())
            }

            /// Returns the raw identifier.
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(raw: &str) -> Self {
                Self(raw.to_string())
            }
        }
    };
}

string_id!(
    /// Identifier of a remote file object.
    FileId
);
string_id!(
    /// Identifier of a storage container (project).
    ContainerId
);
string_id!(
    /// Opaque identifier of a submitted remote job or analysis.
    JobId
);

/// Storage tier of a remote file at the time it was described.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageState {
    /// Immediately retrievable.
    Live,
    /// Cold tier; a revival request brings it back.
    Archived,
    /// Moving to the cold tier; cannot be requested.
    Archiving,
    /// Revival already in flight; cannot be requested again.
    Unarchiving,
}

impl StorageState {
    /// True for states a new revival request cannot act on.
    pub fn is_transient(self) -> bool {
        matches!(self, StorageState::Archiving | StorageState::Unarchiving)
    }

    /// Lower-case label used in logs and error context.
    pub fn as_str(self) -> &'static str {
        match self {
            StorageState::Live => "live",
            StorageState::Archived => "archived",
            StorageState::Archiving => "archiving",
            StorageState::Unarchiving => "unarchiving",
        }
    }
}

impl FromStr for StorageState {
    type Err = DiasError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw {
            "live" => Ok(StorageState::Live),
            "archived" => Ok(StorageState::Archived),
            "archival" | "archiving" => Ok(StorageState::Archiving),
            "unarchiving" => Ok(StorageState::Unarchiving),
            other => Err(DiasError::Store(
                ErrorInfo::new("storage_state", "unknown storage state")
                    .with_context("state", other),
            )),
        }
    }
}

/// Snapshot of a remote file taken at query time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteFile {
    /// File identifier.
    pub id: FileId,
    /// Container the file lives in.
    pub container: ContainerId,
    /// Absolute folder of the file inside its container.
    pub folder: String,
    /// File name.
    pub name: String,
    /// Storage tier when the snapshot was taken.
    pub state: StorageState,
}

impl RemoteFile {
    /// `container:id`, the fully qualified reference used in logs.
    pub fn qualified_id(&self) -> String {
        format!("{}:{}", self.container, self.id)
    }

    /// `folder/name` inside the container.
    pub fn path(&self) -> String {
        if self.folder.ends_with('/') {
            format!("{}{}", self.folder, self.name)
        } else {
            format!("{}/{}", self.folder, self.name)
        }
    }
}

/// A folder inside a container.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Location {
    /// Container being searched.
    pub container: ContainerId,
    /// Absolute, normalised folder path.
    pub folder: String,
}

impl Location {
    /// Builds a location, normalising the folder to `/a/b` form.
    pub fn new(container: ContainerId, folder: &str) -> Self {
        Self {
            container,
            folder: normalise_folder(folder),
        }
    }

    /// Returns a child location `folder/segment`.
    pub fn join(&self, segment: &str) -> Self {
        let segment = segment.trim_matches('/');
        if segment.is_empty() {
            return self.clone();
        }
        let folder = if self.folder == "/" {
            format!("/{segment}")
        } else {
            format!("{}/{segment}", self.folder)
        };
        Self::new(self.container.clone(), &folder)
    }

    /// Parses `container:/folder`, falling back to `default` when no
    /// container prefix is present.
    pub fn parse(raw: &str, default: Option<&ContainerId>) -> Result<Self, DiasError> {
        match raw.split_once(':') {
            Some((container, folder)) if !container.is_empty() => {
                Ok(Self::new(ContainerId::new(container), folder))
            }
            _ => match default {
                Some(container) => Ok(Self::new(container.clone(), raw)),
                None => Err(DiasError::InvalidConfig(
                    ErrorInfo::new("location_container", "location has no container")
                        .with_context("location", raw)
                        .with_hint("use the form project-xxxx:/folder"),
                )),
            },
        }
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.container, self.folder)
    }
}

fn normalise_folder(folder: &str) -> String {
    let segments: Vec<&str> = folder.split('/').filter(|s| !s.is_empty()).collect();
    format!("/{}", segments.join("/"))
}

/// A reference to a single file, optionally qualified with its container.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct FileRef {
    /// Container hint, when the reference was written `container:file`.
    pub container: Option<ContainerId>,
    /// File identifier.
    pub id: FileId,
}

impl FileRef {
    /// Parses `file-xxx` or `project-yyy:file-xxx`.
    pub fn parse(raw: &str) -> Result<Self, DiasError> {
        let raw = raw.trim();
        let (container, id) = match raw.split_once(':') {
            Some((container, id)) => (Some(ContainerId::new(container)), id),
            None => (None, raw),
        };
        if id.is_empty() {
            return Err(DiasError::InvalidConfig(
                ErrorInfo::new("file_ref", "empty file reference").with_context("value", raw),
            ));
        }
        Ok(Self {
            container,
            id: FileId::new(id),
        })
    }
}

impl TryFrom<String> for FileRef {
    type Error = DiasError;

    fn try_from(raw: String) -> Result<Self, Self::Error> {
        FileRef::parse(&raw)
    }
}

impl From<FileRef> for String {
    fn from(value: FileRef) -> Self {
        value.to_string()
    }
}

impl fmt::Display for FileRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.container {
            Some(container) => write!(f, "{}:{}", container, self.id),
            None => write!(f, "{}", self.id),
        }
    }
}

/// Class of a runnable remote executable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutableKind {
    /// Published app.
    App,
    /// Project-local applet.
    Applet,
    /// Multi-stage workflow.
    Workflow,
}

/// Reference to an app, applet or workflow.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ExecutableRef {
    raw: String,
}

impl ExecutableRef {
    /// Parses an executable id, with or without a container prefix.
    pub fn parse(raw: &str) -> Result<Self, DiasError> {
        let reference = Self {
            raw: raw.trim().to_string(),
        };
        reference.kind()?;
        Ok(reference)
    }

    /// Id without any container prefix.
    pub fn id(&self) -> &str {
        self.raw
            .rsplit_once(':')
            .map(|(_, id)| id)
            .unwrap_or(&self.raw)
    }

    /// Container prefix, if any.
    pub fn container(&self) -> Option<ContainerId> {
        self.raw
            .split_once(':')
            .map(|(container, _)| ContainerId::new(container))
    }

    /// Executable class derived from the id prefix.
    pub fn kind(&self) -> Result<ExecutableKind, DiasError> {
        let id = self.id();
        if id.starts_with("app-") {
            Ok(ExecutableKind::App)
        } else if id.starts_with("applet-") {
            Ok(ExecutableKind::Applet)
        } else if id.starts_with("workflow-") {
            Ok(ExecutableKind::Workflow)
        } else {
            Err(DiasError::InvalidConfig(
                ErrorInfo::new("executable_ref", "unrecognised executable reference")
                    .with_context("executable", self.raw.clone())
                    .with_hint("expected an app-, applet- or workflow- identifier"),
            ))
        }
    }

    /// Full reference as written in the config.
    pub fn as_str(&self) -> &str {
        &self.raw
    }
}

impl TryFrom<String> for ExecutableRef {
    type Error = DiasError;

    fn try_from(raw: String) -> Result<Self, Self::Error> {
        ExecutableRef::parse(&raw)
    }
}

impl From<ExecutableRef> for String {
    fn from(value: ExecutableRef) -> Self {
        value.raw
    }
}

impl fmt::Display for ExecutableRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

/// One stage of a workflow executable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageInfo {
    /// Stage identifier within the workflow.
    pub id: String,
    /// Executable that runs the stage.
    pub executable: String,
    /// Name of that executable, used for relative output folders.
    pub executable_name: String,
}

/// Typed description of an executable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutableInfo {
    /// Executable identifier.
    pub id: String,
    /// Executable name.
    pub name: String,
    /// Version string, when the executable carries one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    /// Stages, empty unless the executable is a workflow.
    #[serde(default)]
    pub stages: Vec<StageInfo>,
}

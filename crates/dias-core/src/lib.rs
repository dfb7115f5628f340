#![deny(missing_docs)]
#![doc = "Core data model, error surface and remote platform contracts for dias."]

pub mod errors;
pub mod job;
pub mod memory;
pub mod provenance;
mod types;

pub use errors::{DiasError, ErrorInfo};
pub use job::{InputValue, JobOutcome, JobSpec};
pub use memory::{MemoryPlatform, MemoryStore};
pub use provenance::RunProvenance;
pub use types::{
    ContainerId, ExecutableInfo, ExecutableKind, ExecutableRef, FileId, FileRef, JobId, Location,
    RemoteFile, StageInfo, StorageState,
};

/// Contract for the remote object store holding run inputs and outputs.
pub trait ObjectStore {
    /// Recursively lists files under `location` whose name matches the
    /// regular expression `name_pattern`.
    fn find(&self, location: &Location, name_pattern: &str) -> Result<Vec<RemoteFile>, DiasError>;

    /// Returns a fresh snapshot of a single file.
    fn describe(&self, file: &FileRef) -> Result<RemoteFile, DiasError>;

    /// Reads the whole content of a file.
    fn read(&self, file: &FileRef) -> Result<Vec<u8>, DiasError>;

    /// Requests revival of archived files; one call per container.
    fn request_revival(&self, container: &ContainerId, files: &[FileId]) -> Result<(), DiasError>;

    /// Uploads `bytes` as `name` into `location`, returning the new file id.
    fn upload(&self, location: &Location, name: &str, bytes: &[u8]) -> Result<FileId, DiasError>;
}

/// Contract for the remote execution platform.
pub trait ExecutionPlatform {
    /// Describes an executable: name, version and workflow stages.
    fn describe_executable(&self, executable: &ExecutableRef) -> Result<ExecutableInfo, DiasError>;

    /// Submits a job and returns its identifier without waiting.
    fn submit(&self, spec: &JobSpec) -> Result<JobId, DiasError>;

    /// Blocks until the job reaches a terminal state.
    fn wait(&self, job: &JobId) -> Result<JobOutcome, DiasError>;

    /// Terminates a job or analysis.
    fn terminate(&self, job: &JobId) -> Result<(), DiasError>;

    /// Adds tags to a job.
    fn tag(&self, job: &JobId, tags: &[String]) -> Result<(), DiasError>;
}

//! In-process object store and execution platform.
//!
//! Both backends keep their state behind a mutex and record every mutating
//! call so integration tests and offline dry runs can inspect what the
//! orchestrator asked for.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Mutex, MutexGuard};

use regex::Regex;

use crate::errors::{DiasError, ErrorInfo};
use crate::job::{JobOutcome, JobSpec};
use crate::types::{
    ContainerId, ExecutableInfo, ExecutableRef, FileId, FileRef, JobId, Location, RemoteFile,
    StorageState,
};
use crate::{ExecutionPlatform, ObjectStore};

fn poisoned() -> DiasError {
    DiasError::Store(ErrorInfo::new("memory_lock", "memory backend lock poisoned"))
}

#[derive(Debug, Default)]
struct StoreState {
    files: BTreeMap<(ContainerId, FileId), (RemoteFile, Vec<u8>)>,
    revivals: Vec<(ContainerId, Vec<FileId>)>,
    next_id: u64,
}

/// Object store backed by an in-memory map.
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<StoreState>,
}

impl MemoryStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, StoreState>, DiasError> {
        self.state.lock().map_err(|_| poisoned())
    }

    /// Adds a file and returns its generated id.
    pub fn add_file(
        &self,
        container: &str,
        folder: &str,
        name: &str,
        state: StorageState,
        bytes: &[u8],
    ) -> FileId {
        let mut guard = match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        guard.next_id += 1;
        let id = FileId::new(format!("file-{:06}", guard.next_id));
        let location = Location::new(ContainerId::new(container), folder);
        let file = RemoteFile {
            id: id.clone(),
            container: location.container,
            folder: location.folder,
            name: name.to_string(),
            state,
        };
        guard
            .files
            .insert((file.container.clone(), id.clone()), (file, bytes.to_vec()));
        id
    }

    /// Places a copy of file `id` in another container under the same id.
    pub fn clone_into(&self, id: &FileId, container: &str, folder: &str) -> Result<(), DiasError> {
        let mut guard = self.lock()?;
        let (source, bytes) = guard
            .files
            .iter()
            .find(|((_, existing), _)| existing == id)
            .map(|(_, entry)| entry.clone())
            .ok_or_else(|| not_found(id))?;
        let location = Location::new(ContainerId::new(container), folder);
        let copy = RemoteFile {
            container: location.container,
            folder: location.folder,
            ..source
        };
        guard
            .files
            .insert((copy.container.clone(), id.clone()), (copy, bytes));
        Ok(())
    }

    /// Changes the storage state of every copy of file `id`.
    pub fn set_state(&self, id: &FileId, state: StorageState) -> Result<(), DiasError> {
        let mut guard = self.lock()?;
        let mut found = false;
        for (file, _) in guard.files.values_mut().filter(|(file, _)| file.id == *id) {
            file.state = state;
            found = true;
        }
        if found {
            Ok(())
        } else {
            Err(not_found(id))
        }
    }

    /// Revival requests received so far, in call order.
    pub fn revival_requests(&self) -> Vec<(ContainerId, Vec<FileId>)> {
        self.lock().map(|guard| guard.revivals.clone()).unwrap_or_default()
    }

    /// Every file currently held, ordered by container then id.
    pub fn files(&self) -> Vec<RemoteFile> {
        self.lock()
            .map(|guard| guard.files.values().map(|(file, _)| file.clone()).collect())
            .unwrap_or_default()
    }
}

fn not_found(id: &FileId) -> DiasError {
    DiasError::Store(
        ErrorInfo::new("file_not_found", "no such file").with_context("file", id.to_string()),
    )
}

/// Exact copy when the reference names a container, else the first copy.
fn held<'s>(state: &'s StoreState, file: &FileRef) -> Option<&'s (RemoteFile, Vec<u8>)> {
    match &file.container {
        Some(container) => state.files.get(&(container.clone(), file.id.clone())),
        None => state
            .files
            .iter()
            .find(|((_, id), _)| *id == file.id)
            .map(|(_, entry)| entry),
    }
}

fn under(folder: &str, root: &str) -> bool {
    root == "/" || folder == root || folder.starts_with(&format!("{root}/"))
}

impl ObjectStore for MemoryStore {
    fn find(&self, location: &Location, name_pattern: &str) -> Result<Vec<RemoteFile>, DiasError> {
        let pattern = Regex::new(name_pattern).map_err(|err| {
            DiasError::Store(
                ErrorInfo::new("find_pattern", "invalid name pattern")
                    .with_context("pattern", name_pattern)
                    .with_hint(err.to_string()),
            )
        })?;
        let guard = self.lock()?;
        Ok(guard
            .files
            .values()
            .map(|(file, _)| file)
            .filter(|file| file.container == location.container)
            .filter(|file| under(&file.folder, &location.folder))
            .filter(|file| pattern.is_match(&file.name))
            .cloned()
            .collect())
    }

    fn describe(&self, file: &FileRef) -> Result<RemoteFile, DiasError> {
        let guard = self.lock()?;
        held(&guard, file)
            .map(|(file, _)| file.clone())
            .ok_or_else(|| not_found(&file.id))
    }

    fn read(&self, file: &FileRef) -> Result<Vec<u8>, DiasError> {
        let guard = self.lock()?;
        match held(&guard, file) {
            Some((meta, _)) if meta.state != StorageState::Live => Err(DiasError::Store(
                ErrorInfo::new("file_not_live", "file is not in the live tier")
                    .with_context("file", file.id.to_string())
                    .with_context("state", meta.state.as_str()),
            )),
            Some((_, bytes)) => Ok(bytes.clone()),
            None => Err(not_found(&file.id)),
        }
    }

    fn request_revival(&self, container: &ContainerId, files: &[FileId]) -> Result<(), DiasError> {
        let mut guard = self.lock()?;
        for id in files {
            if let Some((file, _)) = guard.files.get_mut(&(container.clone(), id.clone())) {
                if file.state == StorageState::Archived {
                    file.state = StorageState::Unarchiving;
                }
            }
        }
        guard.revivals.push((container.clone(), files.to_vec()));
        Ok(())
    }

    fn upload(&self, location: &Location, name: &str, bytes: &[u8]) -> Result<FileId, DiasError> {
        Ok(self.add_file(
            location.container.as_str(),
            &location.folder,
            name,
            StorageState::Live,
            bytes,
        ))
    }
}

type CompletionHook = Box<dyn Fn(&JobSpec) + Send>;

#[derive(Default)]
struct PlatformState {
    executables: BTreeMap<String, ExecutableInfo>,
    submitted: Vec<(JobId, JobSpec)>,
    failing: BTreeMap<String, String>,
    hooks: BTreeMap<String, CompletionHook>,
    waited: Vec<JobId>,
    terminated: Vec<JobId>,
    refuse_terminate: BTreeSet<JobId>,
    tags: Vec<(JobId, Vec<String>)>,
    refuse_tags: bool,
}

/// Execution platform that records submissions and completes them on `wait`.
#[derive(Default)]
pub struct MemoryPlatform {
    state: Mutex<PlatformState>,
}

impl std::fmt::Debug for MemoryPlatform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryPlatform").finish_non_exhaustive()
    }
}

impl MemoryPlatform {
    /// Creates a platform with no registered executables.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, PlatformState>, DiasError> {
        self.state.lock().map_err(|_| {
            DiasError::Platform(ErrorInfo::new("memory_lock", "memory backend lock poisoned"))
        })
    }

    fn guard(&self) -> MutexGuard<'_, PlatformState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Registers an executable description under its id.
    pub fn register(&self, info: ExecutableInfo) {
        self.guard().executables.insert(info.id.clone(), info);
    }

    /// Makes every job named `job_name` fail with `reason` when waited on.
    pub fn fail_job(&self, job_name: &str, reason: &str) {
        self.guard()
            .failing
            .insert(job_name.to_string(), reason.to_string());
    }

    /// Runs `hook` whenever a job of `executable_id` completes successfully.
    pub fn on_complete(&self, executable_id: &str, hook: impl Fn(&JobSpec) + Send + 'static) {
        self.guard()
            .hooks
            .insert(executable_id.to_string(), Box::new(hook));
    }

    /// Makes `terminate` fail for `job`.
    pub fn refuse_terminate(&self, job: &JobId) {
        self.guard().refuse_terminate.insert(job.clone());
    }

    /// Makes every `tag` call fail.
    pub fn refuse_tags(&self) {
        self.guard().refuse_tags = true;
    }

    /// Submitted jobs in submission order.
    pub fn submitted(&self) -> Vec<(JobId, JobSpec)> {
        self.guard().submitted.clone()
    }

    /// Jobs that were waited on.
    pub fn waited(&self) -> Vec<JobId> {
        self.guard().waited.clone()
    }

    /// Jobs that were terminated.
    pub fn terminated(&self) -> Vec<JobId> {
        self.guard().terminated.clone()
    }

    /// Tag calls received so far.
    pub fn tags(&self) -> Vec<(JobId, Vec<String>)> {
        self.guard().tags.clone()
    }
}

impl ExecutionPlatform for MemoryPlatform {
    fn describe_executable(&self, executable: &ExecutableRef) -> Result<ExecutableInfo, DiasError> {
        let guard = self.lock()?;
        guard
            .executables
            .get(executable.id())
            .cloned()
            .ok_or_else(|| {
                DiasError::Platform(
                    ErrorInfo::new("executable_not_found", "no such executable")
                        .with_context("executable", executable.to_string()),
                )
            })
    }

    fn submit(&self, spec: &JobSpec) -> Result<JobId, DiasError> {
        let mut guard = self.lock()?;
        let id = JobId::new(format!("job-{:06}", guard.submitted.len() + 1));
        guard.submitted.push((id.clone(), spec.clone()));
        Ok(id)
    }

    fn wait(&self, job: &JobId) -> Result<JobOutcome, DiasError> {
        let mut guard = self.lock()?;
        guard.waited.push(job.clone());
        let spec = guard
            .submitted
            .iter()
            .find(|(id, _)| id == job)
            .map(|(_, spec)| spec.clone())
            .ok_or_else(|| {
                DiasError::Platform(
                    ErrorInfo::new("job_not_found", "no such job")
                        .with_context("job", job.to_string()),
                )
            })?;
        if let Some(reason) = guard.failing.get(&spec.name) {
            return Ok(JobOutcome::Failed {
                reason: reason.clone(),
            });
        }
        if let Some(hook) = guard.hooks.get(spec.executable.id()) {
            hook(&spec);
        }
        Ok(JobOutcome::Done)
    }

    fn terminate(&self, job: &JobId) -> Result<(), DiasError> {
        let mut guard = self.lock()?;
        if guard.refuse_terminate.contains(job) {
            return Err(DiasError::Platform(
                ErrorInfo::new("terminate_refused", "job could not be terminated")
                    .with_context("job", job.to_string()),
            ));
        }
        guard.terminated.push(job.clone());
        Ok(())
    }

    fn tag(&self, job: &JobId, tags: &[String]) -> Result<(), DiasError> {
        let mut guard = self.lock()?;
        if guard.refuse_tags {
            return Err(DiasError::Platform(
                ErrorInfo::new("tag_refused", "job could not be tagged")
                    .with_context("job", job.to_string()),
            ));
        }
        guard.tags.push((job.clone(), tags.to_vec()));
        Ok(())
    }
}

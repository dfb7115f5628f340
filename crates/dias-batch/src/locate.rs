//! Remote file discovery below a run folder.

use std::collections::BTreeSet;

use dias_core::{DiasError, Location, ObjectStore, RemoteFile};
use tracing::debug;

/// True when `name` belongs to `sample`.
///
/// The name must start with the sample id and the next character, if any,
/// must not be alphanumeric, so `X1` never claims `X12_markdup.bam`.
pub fn sample_matches(sample: &str, name: &str) -> bool {
    match name.strip_prefix(sample) {
        Some(rest) => rest
            .chars()
            .next()
            .map_or(true, |next| !next.is_ascii_alphanumeric()),
        None => false,
    }
}

/// Longest sample in `samples` that `name` belongs to.
pub fn owning_sample<'s, I>(samples: I, name: &str) -> Option<&'s str>
where
    I: IntoIterator<Item = &'s str>,
{
    samples
        .into_iter()
        .filter(|sample| sample_matches(sample, name))
        .max_by_key(|sample| sample.len())
}

/// True when `subdir` appears as whole consecutive segments of `folder`
/// below `base`.
pub fn in_subdir(base: &str, folder: &str, subdir: &str) -> bool {
    let wanted: Vec<&str> = subdir.split('/').filter(|s| !s.is_empty()).collect();
    if wanted.is_empty() {
        return true;
    }
    let relative = if base == "/" {
        Some(folder)
    } else {
        folder
            .strip_prefix(base)
            .filter(|rest| rest.is_empty() || rest.starts_with('/'))
    };
    let Some(relative) = relative else {
        return false;
    };
    let segments: Vec<&str> = relative.split('/').filter(|s| !s.is_empty()).collect();
    segments.windows(wanted.len()).any(|window| window == wanted.as_slice())
}

/// One search for files.
#[derive(Debug, Clone)]
pub struct LocateQuery<'q> {
    /// Search root.
    pub base: &'q Location,
    /// Optional sub-directory filter below the root.
    pub subdir: Option<&'q str>,
    /// File name regex.
    pub pattern: &'q str,
    /// Optional sample allowlist.
    pub samples: Option<&'q BTreeSet<String>>,
}

/// Finds remote files matching a [`LocateQuery`].
pub struct FileLocator<'a, S: ObjectStore + ?Sized> {
    store: &'a S,
}

impl<'a, S: ObjectStore + ?Sized> FileLocator<'a, S> {
    /// Creates a locator over `store`.
    pub fn new(store: &'a S) -> Self {
        Self { store }
    }

    /// Runs the query. An empty result is not an error.
    pub fn locate(&self, query: &LocateQuery<'_>) -> Result<Vec<RemoteFile>, DiasError> {
        let mut files = self.store.find(query.base, query.pattern)?;
        if let Some(subdir) = query.subdir {
            files.retain(|file| in_subdir(&query.base.folder, &file.folder, subdir));
        }
        if let Some(samples) = query.samples {
            files.retain(|file| owning_sample(samples.iter().map(String::as_str), &file.name).is_some());
        }
        files.sort_by(|left, right| left.name.cmp(&right.name).then(left.id.cmp(&right.id)));
        debug!(
            base = %query.base,
            subdir = query.subdir.unwrap_or(""),
            pattern = query.pattern,
            found = files.len(),
            "located files"
        );
        Ok(files)
    }
}

//! Collision-free destination names for downloaded artifacts

use crate::error::AttemptError;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs::OpenOptions;
use tokio::sync::Mutex;
use tracing::debug;

/// Characters that are not allowed in file names on at least one common platform
const ILLEGAL_CHARS: &[char] = &['\\', '/', ':', '*', '?', '"', '<', '>', '|'];

/// Maximum number of suffixes tried before giving up
const MAX_RENAME_ATTEMPTS: u32 = 9999;

/// Name used when nothing usable is left after sanitizing
const FALLBACK_NAME: &str = "download";

/// Assigns and reserves unique paths inside a download directory
///
/// [`resolve`](Self::resolve) picks the first free name out of `name.ext`,
/// `name_1.ext`, `name_2.ext`, ... and creates it as an empty placeholder before
/// returning, all while holding the resolver lock. Two workers resolving the same
/// raw name therefore always get different paths.
pub struct NameResolver {
    directory: PathBuf,
    lock: Mutex<()>,
}

impl NameResolver {
    /// Create a resolver for `directory`
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self {
            directory: directory.into(),
            lock: Mutex::new(()),
        }
    }

    /// Directory artifacts are placed in
    pub fn directory(&self) -> &Path {
        &self.directory
    }

    /// Remove characters that are illegal in file names
    ///
    /// # Examples
    ///
    /// ```
    /// use sharelink_dl::naming::NameResolver;
    ///
    /// assert_eq!(NameResolver::sanitize("a/b:c?.txt"), "abc.txt");
    /// assert_eq!(NameResolver::sanitize("???"), "download");
    /// ```
    #[must_use]
    pub fn sanitize(raw_name: &str) -> String {
        let cleaned: String = raw_name
            .chars()
            .filter(|c| !ILLEGAL_CHARS.contains(c) && !c.is_control())
            .collect();

        if cleaned.trim_matches(|c: char| c == '.' || c.is_whitespace()).is_empty() {
            FALLBACK_NAME.to_string()
        } else {
            cleaned
        }
    }

    /// Pick a free destination for `raw_name` and reserve it on disk
    ///
    /// The returned path exists as an empty file owned by the caller, who is
    /// expected to overwrite it or hand it back with [`release`](Self::release).
    pub async fn resolve(&self, raw_name: &str) -> Result<PathBuf, AttemptError> {
        let name = Self::sanitize(raw_name);
        let (stem, extension) = split_name(&name);

        let _guard = self.lock.lock().await;

        tokio::fs::create_dir_all(&self.directory)
            .await
            .map_err(|e| AttemptError::Persist {
                path: self.directory.clone(),
                reason: format!("cannot create download directory: {e}"),
            })?;

        let first = self.directory.join(&name);
        if reserve(&first).await? {
            return Ok(first);
        }

        for i in 1..=MAX_RENAME_ATTEMPTS {
            let candidate = match extension {
                Some(ext) => format!("{stem}_{i}.{ext}"),
                None => format!("{stem}_{i}"),
            };
            let path = self.directory.join(candidate);
            if reserve(&path).await? {
                debug!(raw_name, path = %path.display(), "resolved name collision");
                return Ok(path);
            }
        }

        Err(AttemptError::Persist {
            path: first,
            reason: format!("no free name after {MAX_RENAME_ATTEMPTS} attempts"),
        })
    }

    /// Give back a reserved path that will not be used
    ///
    /// Later resolutions never reuse freed suffixes out of order; the scan always
    /// restarts from `_1`.
    pub async fn release(&self, path: &Path) {
        match tokio::fs::remove_file(path).await {
            Ok(()) => debug!(path = %path.display(), "released reserved name"),
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => debug!(path = %path.display(), error = %e, "failed to release reserved name"),
        }
    }
}

/// Split `name` into stem and extension the way `a.txt` -> (`a`, `txt`)
fn split_name(name: &str) -> (&str, Option<&str>) {
    let path = Path::new(name);
    match (
        path.file_stem().and_then(|s| s.to_str()),
        path.extension().and_then(|e| e.to_str()),
    ) {
        (Some(stem), Some(ext)) => (stem, Some(ext)),
        _ => (name, None),
    }
}

/// Create `path` exclusively; `Ok(false)` when it already exists
async fn reserve(path: &Path) -> Result<bool, AttemptError> {
    match OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(path)
        .await
    {
        Ok(_) => Ok(true),
        Err(e) if e.kind() == ErrorKind::AlreadyExists => Ok(false),
        Err(e) => Err(AttemptError::Persist {
            path: path.to_path_buf(),
            reason: e.to_string(),
        }),
    }
}

//! Exclusive read locks.
//!
//! A read lock keeps other threads and other processes away from a file
//! while it is processed. Every strategy hands out a `LockToken` that owns
//! the lock artifacts (marker file, renamed working file, OS lock handle,
//! repository key). A token is released by value, so it can only be released
//! once; a token that is dropped unreleased (for example while a panic
//! unwinds) releases its artifacts on a best-effort basis.
//!
//! Contention is not an error: `acquire` returns `LockAttempt::Denied` and
//! the file is offered again on the next poll.

mod changed;
#[cfg(unix)]
mod file_lock;
mod idempotent;
mod marker;
mod rename;

use std::ffi::{OsStr, OsString};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{info, warn};

use crate::config::{ReadLockConfig, ReadLockKind};
use crate::error::{EngineError, EngineResult};
use crate::idempotent::IdempotentRepository;
use crate::model::CandidateEntry;
use crate::scanner::DirectoryScanner;

pub use changed::ChangedReadLock;
#[cfg(unix)]
pub use file_lock::FileLockReadLock;
pub use idempotent::IdempotentReadLock;
pub use marker::MarkerFileReadLock;
pub use rename::RenameReadLock;

/// Suffix of marker files created next to a locked file.
pub const LOCK_FILE_SUFFIX: &str = ".filegate-lock";

/// Suffix a file carries while it is held by the rename read lock.
pub const WORKING_FILE_SUFFIX: &str = ".filegate-work";

/// Result of a lock attempt.
#[derive(Debug)]
pub enum LockAttempt {
    Acquired(LockToken),
    /// Someone else holds the file, or it is not ready yet
    Denied,
}

/// How a token is being released.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Release {
    Commit,
    Rollback,
}

/// A lock protocol.
pub trait ReadLockStrategy: Send + Sync {
    fn kind(&self) -> ReadLockKind;

    /// Clean up artifacts left behind by a previous run, limited to files
    /// `scanner` would select. Returns the number of artifacts removed or
    /// restored.
    fn prepare_on_startup(&self, _scanner: &DirectoryScanner) -> EngineResult<usize> {
        Ok(0)
    }

    /// Try to take the lock for `entry`.
    fn acquire(&self, entry: &CandidateEntry) -> EngineResult<LockAttempt>;
}

pub(crate) enum LockArtifact {
    Marker(PathBuf),
    Renamed {
        original: PathBuf,
        working: PathBuf,
    },
    #[cfg(unix)]
    Flock(nix::fcntl::Flock<fs::File>),
    RepositoryKey {
        repository: Arc<dyn IdempotentRepository>,
        key: String,
        remove_on_commit: bool,
        remove_on_rollback: bool,
    },
}

impl std::fmt::Debug for LockArtifact {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Marker(path) => f.debug_tuple("Marker").field(path).finish(),
            Self::Renamed { original, working } => f
                .debug_struct("Renamed")
                .field("original", original)
                .field("working", working)
                .finish(),
            #[cfg(unix)]
            Self::Flock(_) => f.write_str("Flock"),
            Self::RepositoryKey { key, .. } => f.debug_tuple("RepositoryKey").field(key).finish(),
        }
    }
}

impl LockArtifact {
    fn release(self, mode: Release) -> EngineResult<()> {
        match self {
            Self::Marker(path) => {
                crate::fs_ops::delete_file(&path)?;
                Ok(())
            }
            Self::Renamed { original, working } => {
                // After a committed move or delete there is nothing to restore.
                if working.exists() {
                    fs::rename(&working, &original)
                        .map_err(|e| EngineError::io("rename", &working, e))?;
                }
                Ok(())
            }
            #[cfg(unix)]
            Self::Flock(lock) => {
                drop(lock);
                Ok(())
            }
            Self::RepositoryKey {
                repository,
                key,
                remove_on_commit,
                remove_on_rollback,
            } => {
                let remove = match mode {
                    Release::Commit => remove_on_commit,
                    Release::Rollback => remove_on_rollback,
                };
                if remove {
                    repository.remove(&key);
                }
                Ok(())
            }
        }
    }
}

/// Proof that the holder has exclusive access to a file.
#[derive(Debug)]
pub struct LockToken {
    original_path: PathBuf,
    current_path: PathBuf,
    artifacts: Vec<LockArtifact>,
}

impl LockToken {
    pub(crate) fn new(path: &Path) -> Self {
        Self {
            original_path: path.to_path_buf(),
            current_path: path.to_path_buf(),
            artifacts: Vec::new(),
        }
    }

    pub(crate) fn push(&mut self, artifact: LockArtifact) {
        if let LockArtifact::Renamed { working, .. } = &artifact {
            self.current_path = working.clone();
        }
        self.artifacts.push(artifact);
    }

    /// Path the file was found at.
    pub fn original_path(&self) -> &Path {
        &self.original_path
    }

    /// Path the file lives at while the lock is held.
    pub fn current_path(&self) -> &Path {
        &self.current_path
    }

    /// True while an OS lock handle is open on the file.
    pub fn holds_os_lock(&self) -> bool {
        #[cfg(unix)]
        {
            self.artifacts
                .iter()
                .any(|a| matches!(a, LockArtifact::Flock(_)))
        }
        #[cfg(not(unix))]
        {
            false
        }
    }

    /// Close the OS lock handle ahead of the commit action, keeping every
    /// other artifact.
    pub fn release_os_lock(&mut self) {
        #[cfg(unix)]
        self.artifacts
            .retain(|a| !matches!(a, LockArtifact::Flock(_)));
    }

    /// Release every artifact, most recent first. All artifacts are
    /// attempted; the first failure is returned.
    pub fn release(mut self, mode: Release) -> EngineResult<()> {
        release_all(std::mem::take(&mut self.artifacts), mode)
    }
}

impl Drop for LockToken {
    fn drop(&mut self) {
        if self.artifacts.is_empty() {
            return;
        }
        warn!(
            path = %self.original_path.display(),
            "read lock dropped without release, releasing"
        );
        if let Err(err) = release_all(std::mem::take(&mut self.artifacts), Release::Rollback) {
            warn!(path = %self.original_path.display(), error = %err, "failed to release read lock");
        }
    }
}

fn release_all(artifacts: Vec<LockArtifact>, mode: Release) -> EngineResult<()> {
    let mut first_error = None;
    for artifact in artifacts.into_iter().rev() {
        if let Err(err) = artifact.release(mode) {
            first_error.get_or_insert(err);
        }
    }
    first_error.map_or(Ok(()), Err)
}

/// Strategy that never blocks anyone.
#[derive(Debug, Default)]
pub struct NoReadLock;

impl ReadLockStrategy for NoReadLock {
    fn kind(&self) -> ReadLockKind {
        ReadLockKind::None
    }

    fn acquire(&self, entry: &CandidateEntry) -> EngineResult<LockAttempt> {
        Ok(LockAttempt::Acquired(LockToken::new(&entry.absolute_path)))
    }
}

/// Build the strategy configured for an endpoint.
///
/// `repository` backs the idempotent read lock; it may be shared between
/// endpoints (and so between consumers of the same directory).
pub fn build_strategy(
    config: &ReadLockConfig,
    repository: Arc<dyn IdempotentRepository>,
) -> EngineResult<Box<dyn ReadLockStrategy>> {
    let strategy: Box<dyn ReadLockStrategy> = match config.kind {
        ReadLockKind::None => Box::new(NoReadLock),
        ReadLockKind::MarkerFile => Box::new(MarkerFileReadLock::new(config.delete_orphan_lock_files)),
        ReadLockKind::Rename => Box::new(RenameReadLock::new(config.delete_orphan_lock_files)),
        #[cfg(unix)]
        ReadLockKind::FileLock => Box::new(FileLockReadLock::new(config.clone())),
        #[cfg(not(unix))]
        ReadLockKind::FileLock => {
            return Err(EngineError::config(
                "readLock",
                "fileLock is only supported on unix platforms",
            ))
        }
        ReadLockKind::Changed => Box::new(ChangedReadLock::new(config.clone())),
        ReadLockKind::Idempotent => Box::new(IdempotentReadLock::new(config.clone(), repository)),
    };
    Ok(strategy)
}

/// Path of the marker file guarding `path`.
pub fn marker_path(path: &Path) -> PathBuf {
    suffixed(path, LOCK_FILE_SUFFIX)
}

/// Path a file is renamed to while held by the rename read lock.
pub fn working_path(path: &Path) -> PathBuf {
    suffixed(path, WORKING_FILE_SUFFIX)
}

fn suffixed(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(suffix);
    PathBuf::from(name)
}

/// Name of the file an artifact called `name` belongs to.
pub(crate) fn payload_name(name: &OsStr, suffix: &str) -> Option<OsString> {
    #[cfg(unix)]
    {
        use std::os::unix::ffi::{OsStrExt, OsStringExt};
        name.as_bytes()
            .strip_suffix(suffix.as_bytes())
            .filter(|stem| !stem.is_empty())
            .map(|stem| OsString::from_vec(stem.to_vec()))
    }
    #[cfg(not(unix))]
    {
        name.to_str()?
            .strip_suffix(suffix)
            .filter(|stem| !stem.is_empty())
            .map(OsString::from)
    }
}

/// Remove orphaned marker files guarding files `scanner` would select.
pub(crate) fn delete_orphan_markers(scanner: &DirectoryScanner) -> EngineResult<usize> {
    let mut removed = 0;
    for (path, _) in scanner.lock_artifacts(LOCK_FILE_SUFFIX) {
        match crate::fs_ops::delete_file(&path) {
            Ok(true) => {
                info!(path = %path.display(), "deleted orphan lock file");
                removed += 1;
            }
            Ok(false) => {}
            Err(err) => warn!(path = %path.display(), error = %err, "failed to delete orphan lock file"),
        }
    }
    Ok(removed)
}

/// Rename orphaned working files back to their original names.
pub(crate) fn restore_orphan_working_files(scanner: &DirectoryScanner) -> EngineResult<usize> {
    let mut restored = 0;
    for (path, original) in scanner.lock_artifacts(WORKING_FILE_SUFFIX) {
        if original.exists() {
            warn!(
                path = %path.display(),
                "orphan working file shadows an existing file, leaving it in place"
            );
            continue;
        }
        match fs::rename(&path, &original) {
            Ok(()) => {
                info!(path = %original.display(), "restored orphan working file");
                restored += 1;
            }
            Err(err) => warn!(path = %path.display(), error = %err, "failed to restore working file"),
        }
    }
    Ok(restored)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::idempotent::MemoryIdempotentRepository;
    use crate::model::tests::entry;

    pub(super) fn file_entry(dir: &Path, name: &str) -> CandidateEntry {
        let path = dir.join(name);
        fs::write(&path, b"payload").expect("write candidate");
        let mut e = entry(dir, name, 7);
        e.last_modified = fs::metadata(&path)
            .and_then(|m| m.modified())
            .expect("mtime");
        e
    }

    #[test]
    fn test_marker_and_working_paths() {
        assert_eq!(
            marker_path(Path::new("/in/a.txt")),
            PathBuf::from("/in/a.txt.filegate-lock")
        );
        assert_eq!(
            working_path(Path::new("/in/a.txt")),
            PathBuf::from("/in/a.txt.filegate-work")
        );
    }

    #[test]
    fn test_dropped_token_releases_marker() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let candidate = file_entry(temp_dir.path(), "a.txt");
        let strategy = MarkerFileReadLock::new(true);

        let token = match strategy.acquire(&candidate).expect("acquire") {
            LockAttempt::Acquired(token) => token,
            LockAttempt::Denied => panic!("lock denied"),
        };
        let marker = marker_path(&candidate.absolute_path);
        assert!(marker.exists());
        drop(token);
        assert!(!marker.exists());
    }

    fn scanner(root: &Path, options: crate::config::EndpointOptions) -> DirectoryScanner {
        let config = options.build(root).expect("valid options");
        let filter = crate::filter::PathFilterChain::from_config(&config).expect("filter");
        DirectoryScanner::new(root, filter)
    }

    #[test]
    fn test_orphan_cleanup() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let sub = temp_dir.path().join("sub");
        fs::create_dir(&sub).expect("mkdir");
        fs::write(sub.join("a.txt.filegate-lock"), b"1").expect("write marker");
        fs::write(sub.join("b.txt.filegate-work"), b"b").expect("write working");

        let flat = scanner(temp_dir.path(), Default::default());
        assert_eq!(delete_orphan_markers(&flat).expect("cleanup"), 0);

        let recursive = scanner(
            temp_dir.path(),
            crate::config::EndpointOptions {
                recursive: Some(true),
                ..Default::default()
            },
        );
        assert_eq!(delete_orphan_markers(&recursive).expect("cleanup"), 1);
        assert_eq!(restore_orphan_working_files(&recursive).expect("restore"), 1);
        assert!(sub.join("b.txt").exists());
    }

    #[test]
    fn test_orphan_cleanup_respects_filter() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let root = temp_dir.path();
        fs::write(root.join("a.txt.filegate-lock"), b"1").expect("write marker");
        fs::write(root.join("b.csv.filegate-lock"), b"1").expect("write marker");
        fs::write(root.join("c.txt.filegate-work"), b"c").expect("write working");
        fs::create_dir(root.join(".hidden")).expect("mkdir");
        fs::write(root.join(".hidden").join("d.csv.filegate-lock"), b"1").expect("write marker");

        let csv_only = scanner(
            root,
            crate::config::EndpointOptions {
                include: Some(r".*\.csv".into()),
                recursive: Some(true),
                ..Default::default()
            },
        );
        assert_eq!(delete_orphan_markers(&csv_only).expect("cleanup"), 1);
        assert_eq!(restore_orphan_working_files(&csv_only).expect("restore"), 0);

        assert!(root.join("a.txt.filegate-lock").exists());
        assert!(!root.join("b.csv.filegate-lock").exists());
        assert!(root.join("c.txt.filegate-work").exists());
        assert!(root.join(".hidden").join("d.csv.filegate-lock").exists());
    }

    #[cfg(unix)]
    #[test]
    fn test_payload_name_keeps_non_utf8_bytes() {
        use std::os::unix::ffi::OsStrExt;

        let name = OsStr::from_bytes(b"caf\xe9.txt.filegate-work");
        let payload = payload_name(name, WORKING_FILE_SUFFIX).expect("payload");
        assert_eq!(payload.as_bytes(), b"caf\xe9.txt");
        assert_eq!(payload_name(OsStr::new(".filegate-work"), WORKING_FILE_SUFFIX), None);
        assert_eq!(payload_name(OsStr::new("a.txt"), WORKING_FILE_SUFFIX), None);
    }

    #[test]
    fn test_build_strategy_matches_kind() {
        let repository: Arc<dyn IdempotentRepository> =
            Arc::new(MemoryIdempotentRepository::default());
        for kind in [
            ReadLockKind::None,
            ReadLockKind::MarkerFile,
            ReadLockKind::Rename,
            ReadLockKind::Changed,
            ReadLockKind::Idempotent,
        ] {
            let config = ReadLockConfig {
                kind,
                ..Default::default()
            };
            let strategy = build_strategy(&config, Arc::clone(&repository)).expect("strategy");
            assert_eq!(strategy.kind(), kind);
        }
    }
}

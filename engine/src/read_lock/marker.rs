use std::fs::OpenOptions;
use std::io::{self, Write};
use std::path::Path;

use tracing::debug;

use super::{marker_path, LockArtifact, LockAttempt, LockToken, ReadLockStrategy};
use crate::config::ReadLockKind;
use crate::error::{EngineError, EngineResult};
use crate::model::CandidateEntry;
use crate::scanner::DirectoryScanner;

/// Marker file created with create-exclusive semantics next to the file.
///
/// The marker holds the owning process id; whoever creates it first owns the
/// file, across threads and across processes sharing the directory.
#[derive(Debug)]
pub struct MarkerFileReadLock {
    delete_orphans: bool,
}

impl MarkerFileReadLock {
    pub fn new(delete_orphans: bool) -> Self {
        Self { delete_orphans }
    }
}

/// Create the marker for `path`. `Ok(None)` means someone else holds it.
pub(super) fn create_marker(path: &Path) -> EngineResult<Option<LockArtifact>> {
    let marker = marker_path(path);
    let mut file = match OpenOptions::new().write(true).create_new(true).open(&marker) {
        Ok(file) => file,
        Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
            debug!(path = %path.display(), "marker file exists, lock denied");
            return Ok(None);
        }
        Err(e) => return Err(EngineError::io("create lock file", &marker, e)),
    };
    // The marker owns the lock from here on; its content is informational.
    let _ = write!(file, "{}", std::process::id());
    Ok(Some(LockArtifact::Marker(marker)))
}

impl ReadLockStrategy for MarkerFileReadLock {
    fn kind(&self) -> ReadLockKind {
        ReadLockKind::MarkerFile
    }

    fn prepare_on_startup(&self, scanner: &DirectoryScanner) -> EngineResult<usize> {
        if !self.delete_orphans {
            return Ok(0);
        }
        super::delete_orphan_markers(scanner)
    }

    fn acquire(&self, entry: &CandidateEntry) -> EngineResult<LockAttempt> {
        match create_marker(&entry.absolute_path)? {
            Some(marker) => {
                let mut token = LockToken::new(&entry.absolute_path);
                token.push(marker);
                Ok(LockAttempt::Acquired(token))
            }
            None => Ok(LockAttempt::Denied),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::read_lock::tests::file_entry;
    use crate::read_lock::Release;
    use std::sync::{Arc, Barrier};
    use std::thread;

    #[test]
    fn test_second_acquire_is_denied_until_release() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let candidate = file_entry(temp_dir.path(), "a.txt");
        let strategy = MarkerFileReadLock::new(true);

        let token = match strategy.acquire(&candidate).expect("acquire") {
            LockAttempt::Acquired(token) => token,
            LockAttempt::Denied => panic!("first acquire denied"),
        };
        assert!(matches!(
            strategy.acquire(&candidate).expect("acquire"),
            LockAttempt::Denied
        ));

        token.release(Release::Commit).expect("release");
        assert!(!marker_path(&candidate.absolute_path).exists());
        assert!(matches!(
            strategy.acquire(&candidate).expect("acquire"),
            LockAttempt::Acquired(_)
        ));
    }

    #[test]
    fn test_concurrent_acquire_has_single_owner() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let candidate = Arc::new(file_entry(temp_dir.path(), "race.txt"));
        let strategy = Arc::new(MarkerFileReadLock::new(true));
        let barrier = Arc::new(Barrier::new(6));

        let handles: Vec<_> = (0..6)
            .map(|_| {
                let candidate = Arc::clone(&candidate);
                let strategy = Arc::clone(&strategy);
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    barrier.wait();
                    match strategy.acquire(&candidate).expect("acquire") {
                        // Keep the token alive until every thread has tried.
                        LockAttempt::Acquired(token) => Some(token),
                        LockAttempt::Denied => None,
                    }
                })
            })
            .collect();

        let tokens: Vec<_> = handles
            .into_iter()
            .filter_map(|h| h.join().expect("thread panicked"))
            .collect();
        assert_eq!(tokens.len(), 1);
    }

    #[test]
    fn test_marker_contains_process_id() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let candidate = file_entry(temp_dir.path(), "a.txt");
        let artifact = create_marker(&candidate.absolute_path)
            .expect("create")
            .expect("not contended");
        let content =
            std::fs::read_to_string(marker_path(&candidate.absolute_path)).expect("read marker");
        assert_eq!(content, std::process::id().to_string());
        artifact.release(Release::Rollback).expect("release");
    }
}

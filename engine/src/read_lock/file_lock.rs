use std::fs::File;
use std::io;

use nix::errno::Errno;
use nix::fcntl::{Flock, FlockArg};
use tracing::debug;

use super::marker::create_marker;
use super::{LockArtifact, LockAttempt, LockToken, ReadLockStrategy};
use crate::config::{ReadLockConfig, ReadLockKind};
use crate::error::{EngineError, EngineResult};
use crate::model::CandidateEntry;
use crate::scanner::DirectoryScanner;

/// Non-blocking exclusive `flock` on the file itself, optionally guarded by
/// a marker file. The OS lock is dropped before the commit action runs.
#[derive(Debug)]
pub struct FileLockReadLock {
    config: ReadLockConfig,
}

impl FileLockReadLock {
    pub fn new(config: ReadLockConfig) -> Self {
        Self { config }
    }
}

impl ReadLockStrategy for FileLockReadLock {
    fn kind(&self) -> ReadLockKind {
        ReadLockKind::FileLock
    }

    fn prepare_on_startup(&self, scanner: &DirectoryScanner) -> EngineResult<usize> {
        if !(self.config.marker_file && self.config.delete_orphan_lock_files) {
            return Ok(0);
        }
        super::delete_orphan_markers(scanner)
    }

    fn acquire(&self, entry: &CandidateEntry) -> EngineResult<LockAttempt> {
        let path = &entry.absolute_path;
        let mut token = LockToken::new(path);

        if self.config.marker_file {
            match create_marker(path)? {
                Some(marker) => token.push(marker),
                None => return Ok(LockAttempt::Denied),
            }
        }

        let file = match File::open(path) {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "file vanished before locking");
                token.release(super::Release::Rollback)?;
                return Ok(LockAttempt::Denied);
            }
            Err(e) => {
                let _ = token.release(super::Release::Rollback);
                return Err(EngineError::io("open", path, e));
            }
        };

        match Flock::lock(file, FlockArg::LockExclusiveNonblock) {
            Ok(lock) => {
                token.push(LockArtifact::Flock(lock));
                Ok(LockAttempt::Acquired(token))
            }
            Err((_, Errno::EWOULDBLOCK)) => {
                debug!(path = %path.display(), "file locked by another holder");
                token.release(super::Release::Rollback)?;
                Ok(LockAttempt::Denied)
            }
            Err((_, errno)) => {
                let _ = token.release(super::Release::Rollback);
                Err(EngineError::io("flock", path, io::Error::from(errno)))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::read_lock::tests::file_entry;
    use crate::read_lock::{marker_path, Release};

    fn strategy(marker_file: bool) -> FileLockReadLock {
        FileLockReadLock::new(ReadLockConfig {
            kind: ReadLockKind::FileLock,
            marker_file,
            ..Default::default()
        })
    }

    #[test]
    fn test_flock_excludes_second_holder() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let candidate = file_entry(temp_dir.path(), "a.txt");
        let lock = strategy(false);

        let mut token = match lock.acquire(&candidate).expect("acquire") {
            LockAttempt::Acquired(token) => token,
            LockAttempt::Denied => panic!("first acquire denied"),
        };
        assert!(token.holds_os_lock());
        assert!(matches!(
            lock.acquire(&candidate).expect("acquire"),
            LockAttempt::Denied
        ));

        token.release_os_lock();
        assert!(!token.holds_os_lock());
        match lock.acquire(&candidate).expect("acquire") {
            LockAttempt::Acquired(other) => other.release(Release::Commit).expect("release"),
            LockAttempt::Denied => panic!("lock still held after release"),
        }
        token.release(Release::Commit).expect("release");
    }

    #[test]
    fn test_marker_guard_is_removed_on_release() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let candidate = file_entry(temp_dir.path(), "a.txt");
        let lock = strategy(true);

        let token = match lock.acquire(&candidate).expect("acquire") {
            LockAttempt::Acquired(token) => token,
            LockAttempt::Denied => panic!("lock denied"),
        };
        assert!(marker_path(&candidate.absolute_path).exists());
        token.release(Release::Commit).expect("release");
        assert!(!marker_path(&candidate.absolute_path).exists());
    }
}

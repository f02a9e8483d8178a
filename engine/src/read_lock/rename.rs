use std::fs;
use std::io;

use tracing::debug;

use super::{working_path, LockArtifact, LockAttempt, LockToken, ReadLockStrategy};
use crate::config::ReadLockKind;
use crate::error::{EngineError, EngineResult};
use crate::model::CandidateEntry;
use crate::scanner::DirectoryScanner;

/// Holds a file by renaming it to `<name>.filegate-work`.
///
/// The rename only succeeds for one contender; losers see the source vanish.
/// Writers that still hold the file open on platforms with mandatory locking
/// make the rename fail, which is also reported as a denial.
#[derive(Debug)]
pub struct RenameReadLock {
    restore_orphans: bool,
}

impl RenameReadLock {
    pub fn new(restore_orphans: bool) -> Self {
        Self { restore_orphans }
    }
}

impl ReadLockStrategy for RenameReadLock {
    fn kind(&self) -> ReadLockKind {
        ReadLockKind::Rename
    }

    fn prepare_on_startup(&self, scanner: &DirectoryScanner) -> EngineResult<usize> {
        if !self.restore_orphans {
            return Ok(0);
        }
        super::restore_orphan_working_files(scanner)
    }

    fn acquire(&self, entry: &CandidateEntry) -> EngineResult<LockAttempt> {
        let original = entry.absolute_path.clone();
        let working = working_path(&original);
        if working.exists() {
            return Ok(LockAttempt::Denied);
        }

        match fs::rename(&original, &working) {
            Ok(()) => {
                let mut token = LockToken::new(&original);
                token.push(LockArtifact::Renamed { original, working });
                Ok(LockAttempt::Acquired(token))
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!(path = %original.display(), "file renamed by another consumer");
                Ok(LockAttempt::Denied)
            }
            Err(e) if e.kind() == io::ErrorKind::PermissionDenied => {
                debug!(path = %original.display(), error = %e, "file busy, lock denied");
                Ok(LockAttempt::Denied)
            }
            Err(e) => Err(EngineError::io("rename", &original, e)),
        }
    }
}

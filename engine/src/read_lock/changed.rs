use std::fs;
use std::io;
use std::path::Path;
use std::thread;
use std::time::{Instant, SystemTime};

use tracing::debug;

use super::marker::create_marker;
use super::{LockAttempt, LockToken, ReadLockStrategy, Release};
use crate::config::{ReadLockConfig, ReadLockKind};
use crate::error::{EngineError, EngineResult};
use crate::model::CandidateEntry;
use crate::scanner::DirectoryScanner;

/// Waits until the file stops changing.
///
/// Two consecutive (size, modification time) samples taken one check
/// interval apart must be equal, the size must reach `min_length` and the
/// file must be at least `min_age` old. With a zero timeout a single
/// comparison is made and an unstable file is denied until the next poll;
/// otherwise running out of time is a `ReadLockTimeout` error.
#[derive(Debug)]
pub struct ChangedReadLock {
    config: ReadLockConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Sample {
    size: u64,
    modified: SystemTime,
}

impl ChangedReadLock {
    pub fn new(config: ReadLockConfig) -> Self {
        Self { config }
    }

    fn sample(path: &Path) -> EngineResult<Option<Sample>> {
        match fs::metadata(path) {
            Ok(metadata) => Ok(Some(Sample {
                size: metadata.len(),
                modified: metadata.modified().unwrap_or(SystemTime::UNIX_EPOCH),
            })),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(EngineError::io("stat", path, e)),
        }
    }

    fn is_ready(&self, previous: Sample, current: Sample) -> bool {
        if previous != current || current.size < self.config.min_length {
            return false;
        }
        let age = SystemTime::now()
            .duration_since(current.modified)
            .unwrap_or_default();
        age >= self.config.min_age
    }

    /// `Ok(true)` once the file is stable, `Ok(false)` to deny.
    fn wait_until_stable(&self, path: &Path) -> EngineResult<bool> {
        let started = Instant::now();
        let Some(mut previous) = Self::sample(path)? else {
            return Ok(false);
        };

        loop {
            thread::sleep(self.config.check_interval);
            let Some(current) = Self::sample(path)? else {
                debug!(path = %path.display(), "file vanished while waiting for it to settle");
                return Ok(false);
            };
            if self.is_ready(previous, current) {
                return Ok(true);
            }
            if self.config.timeout.is_zero() {
                debug!(path = %path.display(), "file still changing, lock denied");
                return Ok(false);
            }
            let waited = started.elapsed();
            if waited >= self.config.timeout {
                return Err(EngineError::ReadLockTimeout {
                    path: path.to_path_buf(),
                    waited,
                });
            }
            previous = current;
        }
    }
}

impl ReadLockStrategy for ChangedReadLock {
    fn kind(&self) -> ReadLockKind {
        ReadLockKind::Changed
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

        match self.wait_until_stable(path) {
            Ok(true) => Ok(LockAttempt::Acquired(token)),
            Ok(false) => {
                token.release(Release::Rollback)?;
                Ok(LockAttempt::Denied)
            }
            Err(err) => {
                let _ = token.release(Release::Rollback);
                Err(err)
            }
        }
    }
}

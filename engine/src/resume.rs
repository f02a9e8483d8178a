//! Resumption of partially or previously processed files.
//!
//! A resume strategy runs after the read lock is taken and before the file
//! reaches the collaborator. It can move the starting offset forward (a file
//! that was half consumed before a restart) or skip the file outright.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use crate::model::CandidateEntry;

/// What to do with a locked candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResumeAction {
    /// Hand the file to the collaborator starting at `offset`
    Start { offset: u64 },
    /// Release the file without processing it
    Skip,
}

pub trait ResumeStrategy: Send + Sync {
    fn resume(&self, entry: &CandidateEntry) -> ResumeAction;

    /// Called after the file committed.
    fn completed(&self, _entry: &CandidateEntry) {}
}

/// Every file starts at offset zero.
#[derive(Debug, Default)]
pub struct NoResume;

impl ResumeStrategy for NoResume {
    fn resume(&self, _entry: &CandidateEntry) -> ResumeAction {
        ResumeAction::Start { offset: 0 }
    }
}

/// Byte offsets recorded per absolute path.
///
/// An offset at or past the end of the file skips it; committed files are
/// forgotten.
#[derive(Debug, Default)]
pub struct OffsetResumeStrategy {
    offsets: Mutex<HashMap<PathBuf, u64>>,
}

impl OffsetResumeStrategy {
    pub fn new() -> Self {
        Self::default()
    }

    fn offsets(&self) -> MutexGuard<'_, HashMap<PathBuf, u64>> {
        self.offsets
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Record how far `path` has been consumed.
    pub fn record(&self, path: impl Into<PathBuf>, offset: u64) {
        self.offsets().insert(path.into(), offset);
    }

    pub fn offset(&self, path: &Path) -> Option<u64> {
        self.offsets().get(path).copied()
    }
}

impl ResumeStrategy for OffsetResumeStrategy {
    fn resume(&self, entry: &CandidateEntry) -> ResumeAction {
        match self.offset(&entry.absolute_path) {
            Some(offset) if entry.size > 0 && offset >= entry.size => ResumeAction::Skip,
            Some(offset) => ResumeAction::Start { offset },
            None => ResumeAction::Start { offset: 0 },
        }
    }

    fn completed(&self, entry: &CandidateEntry) {
        self.offsets().remove(&entry.absolute_path);
    }
}

/// Skips files whose relative name is in a known set, for example the names
/// an earlier run already delivered.
#[derive(Debug, Default)]
pub struct FileSetResumeStrategy {
    processed: Mutex<HashSet<String>>,
}

impl FileSetResumeStrategy {
    pub fn new<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            processed: Mutex::new(names.into_iter().map(Into::into).collect()),
        }
    }

    fn processed(&self) -> MutexGuard<'_, HashSet<String>> {
        self.processed
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn mark(&self, name: impl Into<String>) {
        self.processed().insert(name.into());
    }

    pub fn contains(&self, name: &str) -> bool {
        self.processed().contains(name)
    }
}

impl ResumeStrategy for FileSetResumeStrategy {
    fn resume(&self, entry: &CandidateEntry) -> ResumeAction {
        if self.contains(&entry.relative_name()) {
            ResumeAction::Skip
        } else {
            ResumeAction::Start { offset: 0 }
        }
    }

    fn completed(&self, entry: &CandidateEntry) {
        self.mark(entry.relative_name());
    }
}

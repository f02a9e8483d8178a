//! Begin, commit and rollback actions applied to a locked file.
//!
//! - begin: optional `preMove` before the collaborator sees the file
//! - commit: terminal action (`move`, `delete` or `noop`), lock release,
//!   done-file cleanup
//! - rollback: optional `moveFailed`, lock release
//!
//! An OS lock handle is closed before the commit action runs; every other
//! lock artifact is released after it, so a renamed working file is moved
//! or deleted under its working name.

use std::path::{Path, PathBuf};

use tracing::{error, info, warn};

use crate::config::{EndpointConfig, TerminalAction};
use crate::done_file::DoneFileCoordinator;
use crate::error::{EngineError, EngineResult};
use crate::expression::{PathTemplate, TemplateContext};
use crate::fs_ops;
use crate::model::CandidateEntry;
use crate::read_lock::{LockToken, Release};

#[derive(Debug, Clone)]
pub struct ProcessStrategy {
    root: PathBuf,
    pre_move: Option<PathTemplate>,
    on_commit: TerminalAction,
    move_failed: Option<PathTemplate>,
    done_files: Option<DoneFileCoordinator>,
}

impl ProcessStrategy {
    pub fn from_config(config: &EndpointConfig, done_files: Option<DoneFileCoordinator>) -> Self {
        Self {
            root: config.directory.clone(),
            pre_move: config.pre_move.clone(),
            on_commit: config.on_commit.clone(),
            move_failed: config.move_failed.clone(),
            done_files,
        }
    }

    fn target(&self, template: &PathTemplate, entry: &CandidateEntry) -> PathBuf {
        template.resolve(&TemplateContext::from_entry(entry), &self.root)
    }

    /// Apply `preMove`. Returns the path the file is read from.
    pub fn begin(&self, entry: &CandidateEntry, token: &LockToken) -> EngineResult<PathBuf> {
        let current = token.current_path().to_path_buf();
        let Some(template) = &self.pre_move else {
            return Ok(current);
        };
        let target = self.target(template, entry);
        if target != current {
            fs_ops::move_file(&current, &target)?;
            info!(from = %current.display(), to = %target.display(), "pre-moved file");
        }
        Ok(target)
    }

    /// Apply the terminal action to the file at `current` and release the lock.
    ///
    /// A failed action still releases the lock (as a rollback, so the file is
    /// offered again) and is returned as `EngineError::Commit`. A lock that
    /// cannot be released after a successful action is logged only.
    pub fn commit(
        &self,
        entry: &CandidateEntry,
        current: &Path,
        mut token: LockToken,
    ) -> EngineResult<()> {
        if token.holds_os_lock() {
            token.release_os_lock();
        }

        if let Err(err) = self.apply_terminal_action(entry, current) {
            error!(path = %current.display(), error = %err, "commit action failed");
            if let Err(release_err) = token.release(Release::Rollback) {
                warn!(path = %current.display(), error = %release_err, "failed to release read lock");
            }
            return Err(EngineError::Commit {
                path: entry.absolute_path.clone(),
                source: Box::new(err),
            });
        }

        // The terminal action already happened; a stuck lock artifact does
        // not turn the file back into a candidate.
        if let Err(err) = token.release(Release::Commit) {
            warn!(
                path = %entry.absolute_path.display(),
                error = %err,
                "failed to release read lock after commit"
            );
        }
        if let Some(done_files) = &self.done_files {
            done_files.delete(entry);
        }
        Ok(())
    }

    fn apply_terminal_action(&self, entry: &CandidateEntry, current: &Path) -> EngineResult<()> {
        match &self.on_commit {
            TerminalAction::Noop => Ok(()),
            TerminalAction::Delete => {
                fs_ops::delete_file(current)?;
                info!(path = %current.display(), "deleted committed file");
                Ok(())
            }
            TerminalAction::Move(template) => {
                let target = self.target(template, entry);
                if target != current {
                    fs_ops::move_file(current, &target)?;
                    info!(from = %current.display(), to = %target.display(), "moved committed file");
                }
                Ok(())
            }
        }
    }

    /// Apply `moveFailed` (if configured) and release the lock.
    pub fn rollback(
        &self,
        entry: &CandidateEntry,
        current: &Path,
        token: LockToken,
    ) -> EngineResult<()> {
        let moved = match &self.move_failed {
            Some(template) if current.exists() => {
                let target = self.target(template, entry);
                let result = fs_ops::move_file(current, &target);
                if result.is_ok() {
                    info!(from = %current.display(), to = %target.display(), "moved failed file");
                }
                result
            }
            _ => Ok(()),
        };
        let released = token.release(Release::Rollback);
        moved.and(released)
    }
}

//! Done-file gating.
//!
//! A payload file is only eligible once its done file exists in the same
//! directory. Done files are recognised by name so they are never selected
//! themselves, and are deleted (best-effort) after the payload commits.

use std::path::{Path, PathBuf};

use regex::Regex;
use tracing::{debug, warn};

use crate::error::EngineResult;
use crate::expression::{PathTemplate, TemplateContext};
use crate::fs_ops;
use crate::model::CandidateEntry;

#[derive(Debug, Clone)]
pub struct DoneFileCoordinator {
    template: PathTemplate,
    matcher: Regex,
}

impl DoneFileCoordinator {
    pub fn new(template: PathTemplate) -> EngineResult<Self> {
        let matcher = template.name_pattern()?;
        Ok(Self { template, matcher })
    }

    /// Path of the done file belonging to `entry`.
    ///
    /// `${file:name}` evaluates to the bare file name here; the done file
    /// always lives next to its payload.
    pub fn done_file_path(&self, entry: &CandidateEntry) -> PathBuf {
        done_file_for(&self.template, entry.parent(), entry.file_name(), entry)
    }

    /// Whether `entry` is itself a done file and must be skipped.
    pub fn is_done_file(&self, entry: &CandidateEntry) -> bool {
        let name = entry.file_name();
        if self.template.is_constant() {
            return name == self.template.source();
        }
        self.matcher.is_match(name)
    }

    /// True when the done file of `entry` exists.
    pub fn is_ready(&self, entry: &CandidateEntry) -> bool {
        let done = self.done_file_path(entry);
        let ready = done.is_file();
        if !ready {
            debug!(path = %entry.absolute_path.display(), done_file = %done.display(), "done file missing");
        }
        ready
    }

    /// Delete the done file of `entry`. Failures are logged, never returned.
    pub fn delete(&self, entry: &CandidateEntry) {
        let done = self.done_file_path(entry);
        match fs_ops::delete_file(&done) {
            Ok(_) => debug!(done_file = %done.display(), "deleted done file"),
            Err(err) => warn!(done_file = %done.display(), error = %err, "failed to delete done file"),
        }
    }
}

/// Evaluate a done-file template for a file named `name` in `directory`.
pub(crate) fn done_file_for(
    template: &PathTemplate,
    directory: &Path,
    name: &str,
    entry: &CandidateEntry,
) -> PathBuf {
    let ctx = TemplateContext {
        name: name.to_string(),
        absolute_path: directory.join(name),
        size: entry.size,
        modified: entry.last_modified,
    };
    template.resolve(&ctx, directory)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::tests::entry;
    use std::fs;

    fn coordinator(template: &str) -> DoneFileCoordinator {
        DoneFileCoordinator::new(PathTemplate::parse("doneFileName", template).expect("parse"))
            .expect("coordinator")
    }

    #[test]
    fn test_done_file_path_uses_bare_name() {
        let c = coordinator("${file:name}.done");
        let e = entry(Path::new("/in"), "sub/b.txt", 1);
        assert_eq!(c.done_file_path(&e), PathBuf::from("/in/sub/b.txt.done"));

        let c = coordinator("${file:name.noext}.ready");
        assert_eq!(c.done_file_path(&e), PathBuf::from("/in/sub/b.ready"));
    }

    #[test]
    fn test_done_files_are_recognised() {
        let c = coordinator("${file:name}.done");
        assert!(c.is_done_file(&entry(Path::new("/in"), "b.txt.done", 0)));
        assert!(!c.is_done_file(&entry(Path::new("/in"), "b.txt", 1)));

        let constant = coordinator("ready");
        assert!(constant.is_done_file(&entry(Path::new("/in"), "ready", 0)));
        assert!(!constant.is_done_file(&entry(Path::new("/in"), "ready.txt", 0)));
    }

    #[test]
    fn test_ready_and_delete() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let c = coordinator("${file:name}.done");
        let e = entry(temp_dir.path(), "b.txt", 1);

        assert!(!c.is_ready(&e));
        fs::write(temp_dir.path().join("b.txt.done"), b"").expect("write done file");
        assert!(c.is_ready(&e));

        c.delete(&e);
        assert!(!temp_dir.path().join("b.txt.done").exists());
        // Deleting again is harmless.
        c.delete(&e);
    }
}

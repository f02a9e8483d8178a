//! Path filtering.
//!
//! `PathFilterChain` is the logical AND of every configured predicate. It is
//! consulted for directories during traversal (a rejected directory is never
//! descended into) and for files before they become candidates.

use std::fmt;
use std::sync::Arc;

use globset::{GlobBuilder, GlobSet, GlobSetBuilder};
use regex::Regex;

use crate::config::EndpointConfig;
use crate::error::{EngineError, EngineResult};
use crate::model::CandidateEntry;
use crate::read_lock::{LOCK_FILE_SUFFIX, WORKING_FILE_SUFFIX};

/// User supplied predicate; it sees directories as well as files.
pub type EntryPredicate = Arc<dyn Fn(&CandidateEntry) -> bool + Send + Sync>;

/// Ant-style include/exclude globs matched against the path relative to the
/// scan root. `**` spans any number of segments, `*` stays within one.
#[derive(Debug, Clone)]
pub struct AntPathFilter {
    include: Option<GlobSet>,
    exclude: Option<GlobSet>,
}

impl AntPathFilter {
    /// Returns `None` when there are no patterns at all.
    pub fn new(
        includes: &[String],
        excludes: &[String],
        case_sensitive: bool,
    ) -> EngineResult<Option<Self>> {
        if includes.is_empty() && excludes.is_empty() {
            return Ok(None);
        }
        Ok(Some(Self {
            include: build_globset(includes, case_sensitive)?,
            exclude: build_globset(excludes, case_sensitive)?,
        }))
    }

    /// Exclude wins over include; without includes everything not excluded matches.
    pub fn matches_file(&self, relative: &str) -> bool {
        if self
            .exclude
            .as_ref()
            .is_some_and(|exclude| exclude.is_match(relative))
        {
            return false;
        }
        self.include
            .as_ref()
            .map_or(true, |include| include.is_match(relative))
    }

    /// Directories are only pruned when an exclude pattern names them directly.
    pub fn excludes_directory(&self, relative: &str) -> bool {
        self.exclude
            .as_ref()
            .is_some_and(|exclude| exclude.is_match(relative))
    }
}

fn build_globset(patterns: &[String], case_sensitive: bool) -> EngineResult<Option<GlobSet>> {
    if patterns.is_empty() {
        return Ok(None);
    }

    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        let glob = GlobBuilder::new(pattern)
            .literal_separator(true)
            .case_insensitive(!case_sensitive)
            .build()
            .map_err(|source| EngineError::Glob {
                pattern: pattern.clone(),
                source,
            })?;
        builder.add(glob);
    }
    builder
        .build()
        .map(Some)
        .map_err(|source| EngineError::Glob {
            pattern: patterns.join(","),
            source,
        })
}

/// Composition of every filter configured on an endpoint.
#[derive(Clone)]
pub struct PathFilterChain {
    include_hidden_files: bool,
    include_hidden_dirs: bool,
    min_depth: usize,
    max_depth: usize,
    include: Option<Regex>,
    exclude: Option<Regex>,
    ant: Option<AntPathFilter>,
    predicate: Option<EntryPredicate>,
}

impl fmt::Debug for PathFilterChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PathFilterChain")
            .field("include_hidden_files", &self.include_hidden_files)
            .field("include_hidden_dirs", &self.include_hidden_dirs)
            .field("min_depth", &self.min_depth)
            .field("max_depth", &self.max_depth)
            .field("include", &self.include)
            .field("exclude", &self.exclude)
            .field("ant", &self.ant)
            .field("predicate", &self.predicate.is_some())
            .finish()
    }
}

impl PathFilterChain {
    /// Build the chain from a validated configuration.
    pub fn from_config(config: &EndpointConfig) -> EngineResult<Self> {
        Ok(Self {
            include_hidden_files: config.include_hidden_files,
            include_hidden_dirs: config.include_hidden_dirs,
            min_depth: config.min_depth,
            max_depth: config.max_depth,
            include: config.include.clone(),
            exclude: config.exclude.clone(),
            ant: AntPathFilter::new(
                &config.ant_include,
                &config.ant_exclude,
                config.ant_filter_case_sensitive,
            )?,
            predicate: None,
        })
    }

    /// Add an arbitrary predicate to the chain.
    pub fn with_predicate(mut self, predicate: EntryPredicate) -> Self {
        self.predicate = Some(predicate);
        self
    }

    pub fn min_depth(&self) -> usize {
        self.min_depth
    }

    pub fn max_depth(&self) -> usize {
        self.max_depth
    }

    /// Accept or reject an entry.
    pub fn accept(&self, entry: &CandidateEntry) -> bool {
        if entry.is_directory {
            self.accept_directory(entry)
        } else {
            self.accept_file(entry)
        }
    }

    /// Whether traversal may descend into a directory.
    pub fn accept_directory(&self, entry: &CandidateEntry) -> bool {
        let name = entry.file_name();
        if name.starts_with('.') && !self.include_hidden_dirs {
            return false;
        }
        if let Some(predicate) = &self.predicate {
            if !predicate(entry) {
                return false;
            }
        }
        if let Some(ant) = &self.ant {
            if ant.excludes_directory(&entry.relative_name()) {
                return false;
            }
        }
        true
    }

    /// Whether a file may become a candidate.
    pub fn accept_file(&self, entry: &CandidateEntry) -> bool {
        let name = entry.file_name();
        if name.starts_with('.') && !self.include_hidden_files {
            return false;
        }
        if is_lock_artifact(name) {
            return false;
        }
        if let Some(predicate) = &self.predicate {
            if !predicate(entry) {
                return false;
            }
        }
        if let Some(ant) = &self.ant {
            if !ant.matches_file(&entry.relative_name()) {
                return false;
            }
        }
        if entry.depth < self.min_depth || entry.depth > self.max_depth {
            return false;
        }
        if self.exclude.as_ref().is_some_and(|re| re.is_match(name)) {
            return false;
        }
        if let Some(include) = &self.include {
            if !include.is_match(name) {
                return false;
            }
        }
        true
    }
}

/// Names the engine itself creates while holding a read lock.
pub fn is_lock_artifact(name: &str) -> bool {
    name.ends_with(LOCK_FILE_SUFFIX) || name.ends_with(WORKING_FILE_SUFFIX)
}

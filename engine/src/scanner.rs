//! Directory traversal and candidate ordering.
//!
//! `DirectoryScanner` walks the endpoint directory lazily with walkdir,
//! pruning rejected directories before descending, and yields the files that
//! pass the filter chain. `SortBy` orders a finished candidate list.

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use tracing::{debug, warn};
use walkdir::{DirEntry, WalkDir};

use crate::error::{EngineError, EngineResult};
use crate::filter::PathFilterChain;
use crate::model::CandidateEntry;
use crate::read_lock::payload_name;

/// Lazily walks one endpoint directory.
#[derive(Debug, Clone)]
pub struct DirectoryScanner {
    root: PathBuf,
    filter: PathFilterChain,
    extended_attributes: Vec<String>,
}

impl DirectoryScanner {
    pub fn new(root: impl Into<PathBuf>, filter: PathFilterChain) -> Self {
        Self {
            root: root.into(),
            filter,
            extended_attributes: Vec::new(),
        }
    }

    /// Extended attribute names (with `*` wildcards) to read for each file.
    pub fn with_extended_attributes(mut self, names: Vec<String>) -> Self {
        self.extended_attributes = names;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn filter(&self) -> &PathFilterChain {
        &self.filter
    }

    /// Iterate accepted files.
    ///
    /// A missing or unreadable starting directory is yielded as an error;
    /// entries that vanish or cannot be read mid-walk are skipped.
    pub fn scan(&self) -> impl Iterator<Item = EngineResult<CandidateEntry>> + '_ {
        let max_depth = self.filter.max_depth();
        let xattrs = XattrSelector::new(&self.extended_attributes);

        WalkDir::new(&self.root)
            .min_depth(1)
            .max_depth(max_depth)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(move |entry| self.descend(entry))
            .filter_map(move |result| match result {
                Ok(entry) if entry.file_type().is_file() => {
                    let candidate = self.file_entry(&entry, &xattrs)?;
                    self.filter.accept_file(&candidate).then_some(Ok(candidate))
                }
                Ok(_) => None,
                Err(err) if err.depth() == 0 => Some(Err(EngineError::Scan {
                    path: self.root.clone(),
                    source: err,
                })),
                Err(err) => {
                    warn!(
                        root = %self.root.display(),
                        error = %err,
                        "skipping unreadable entry"
                    );
                    None
                }
            })
    }

    /// Collect every accepted file, failing on the first fatal scan error.
    pub fn collect(&self) -> EngineResult<Vec<CandidateEntry>> {
        self.scan().collect()
    }

    /// Lock artifacts ending in `suffix` whose payload file this scanner
    /// would accept, as `(artifact, payload)` pairs.
    pub fn lock_artifacts(&self, suffix: &str) -> Vec<(PathBuf, PathBuf)> {
        WalkDir::new(&self.root)
            .min_depth(1)
            .max_depth(self.filter.max_depth())
            .into_iter()
            .filter_entry(|entry| self.descend(entry))
            .filter_map(Result::ok)
            .filter(|entry| entry.file_type().is_file())
            .filter_map(|entry| {
                let payload = entry
                    .path()
                    .with_file_name(payload_name(entry.file_name(), suffix)?);
                let candidate = self.payload_entry(&entry, &payload)?;
                self.filter
                    .accept_file(&candidate)
                    .then(|| (entry.into_path(), payload))
            })
            .collect()
    }

    fn descend(&self, entry: &DirEntry) -> bool {
        if entry.depth() == 0 || !entry.file_type().is_dir() {
            return true;
        }
        match self.directory_entry(entry) {
            Some(candidate) => self.filter.accept_directory(&candidate),
            None => false,
        }
    }

    /// Candidate for the file an artifact belongs to; the payload's own
    /// metadata when it still exists, the artifact's otherwise.
    fn payload_entry(&self, artifact: &DirEntry, payload: &Path) -> Option<CandidateEntry> {
        let metadata = fs::metadata(payload)
            .ok()
            .or_else(|| artifact.metadata().ok())?;
        Some(CandidateEntry {
            absolute_path: payload.to_path_buf(),
            relative_path: payload.strip_prefix(&self.root).ok()?.to_path_buf(),
            is_directory: false,
            size: metadata.len(),
            last_modified: metadata.modified().unwrap_or(SystemTime::UNIX_EPOCH),
            depth: artifact.depth(),
            extended_attributes: BTreeMap::new(),
        })
    }

    fn relative(&self, entry: &DirEntry) -> Option<PathBuf> {
        entry
            .path()
            .strip_prefix(&self.root)
            .ok()
            .map(Path::to_path_buf)
    }

    fn directory_entry(&self, entry: &DirEntry) -> Option<CandidateEntry> {
        Some(CandidateEntry {
            absolute_path: entry.path().to_path_buf(),
            relative_path: self.relative(entry)?,
            is_directory: true,
            size: 0,
            last_modified: SystemTime::UNIX_EPOCH,
            depth: entry.depth(),
            extended_attributes: BTreeMap::new(),
        })
    }

    fn file_entry(&self, entry: &DirEntry, xattrs: &XattrSelector) -> Option<CandidateEntry> {
        let metadata = match entry.metadata() {
            Ok(metadata) => metadata,
            Err(err) => {
                debug!(path = %entry.path().display(), error = %err, "entry vanished during scan");
                return None;
            }
        };
        Some(CandidateEntry {
            absolute_path: entry.path().to_path_buf(),
            relative_path: self.relative(entry)?,
            is_directory: false,
            size: metadata.len(),
            last_modified: metadata.modified().unwrap_or(SystemTime::UNIX_EPOCH),
            depth: entry.depth(),
            extended_attributes: xattrs.read(entry.path()),
        })
    }
}

/// Selects extended attributes by name pattern.
struct XattrSelector {
    patterns: Option<globset::GlobSet>,
}

impl XattrSelector {
    fn new(names: &[String]) -> Self {
        if names.is_empty() {
            return Self { patterns: None };
        }
        let mut builder = globset::GlobSetBuilder::new();
        for name in names {
            match globset::Glob::new(name) {
                Ok(glob) => {
                    builder.add(glob);
                }
                Err(err) => warn!(pattern = %name, error = %err, "ignoring extended attribute pattern"),
            }
        }
        Self {
            patterns: builder.build().ok(),
        }
    }

    #[cfg(all(unix, feature = "xattr"))]
    fn read(&self, path: &Path) -> BTreeMap<String, Vec<u8>> {
        let mut values = BTreeMap::new();
        let Some(patterns) = &self.patterns else {
            return values;
        };
        // Filesystems without xattr support report an error here.
        let Ok(names) = xattr::list(path) else {
            return values;
        };
        for name in names {
            let name = name.to_string_lossy().into_owned();
            if !patterns.is_match(&name) {
                continue;
            }
            if let Ok(Some(value)) = xattr::get(path, &name) {
                values.insert(name, value);
            }
        }
        values
    }

    #[cfg(not(all(unix, feature = "xattr")))]
    fn read(&self, _path: &Path) -> BTreeMap<String, Vec<u8>> {
        let _ = &self.patterns;
        BTreeMap::new()
    }
}

/// Field a candidate list can be ordered by.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortField {
    /// Relative path from the endpoint directory
    Name,
    /// File name only
    OnlyName,
    /// Absolute path
    Path,
    Size,
    Modified,
}

/// One `sortBy` group.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SortKey {
    pub field: SortField,
    pub reverse: bool,
    pub ignore_case: bool,
}

/// Parsed `sortBy` option: groups in precedence order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SortBy {
    keys: Vec<SortKey>,
}

impl SortBy {
    /// Parse `[reverse:][ignoreCase:]file:<field>` groups separated by `;`.
    pub fn parse(value: &str) -> EngineResult<Self> {
        let mut keys = Vec::new();
        for group in value.split(';').map(str::trim).filter(|g| !g.is_empty()) {
            let mut rest = group;
            let mut reverse = false;
            let mut ignore_case = false;
            loop {
                if let Some(r) = rest.strip_prefix("reverse:") {
                    reverse = true;
                    rest = r;
                } else if let Some(r) = rest.strip_prefix("ignoreCase:") {
                    ignore_case = true;
                    rest = r;
                } else {
                    break;
                }
            }
            let field = match rest {
                "file:name" => SortField::Name,
                "file:onlyname" => SortField::OnlyName,
                "file:path" | "file:absolute.path" => SortField::Path,
                "file:size" | "file:length" => SortField::Size,
                "file:modified" => SortField::Modified,
                other => {
                    return Err(EngineError::config(
                        "sortBy",
                        format!("unsupported sort field '{other}'"),
                    ))
                }
            };
            keys.push(SortKey {
                field,
                reverse,
                ignore_case,
            });
        }
        if keys.is_empty() {
            return Err(EngineError::config("sortBy", "no sort groups given"));
        }
        Ok(Self { keys })
    }

    pub fn keys(&self) -> &[SortKey] {
        &self.keys
    }

    pub fn compare(&self, a: &CandidateEntry, b: &CandidateEntry) -> Ordering {
        for key in &self.keys {
            let ordering = compare_field(key, a, b);
            let ordering = if key.reverse {
                ordering.reverse()
            } else {
                ordering
            };
            if ordering != Ordering::Equal {
                return ordering;
            }
        }
        Ordering::Equal
    }
}

fn compare_field(key: &SortKey, a: &CandidateEntry, b: &CandidateEntry) -> Ordering {
    let text = |value: String| {
        if key.ignore_case {
            value.to_lowercase()
        } else {
            value
        }
    };
    match key.field {
        SortField::Name => text(a.relative_name()).cmp(&text(b.relative_name())),
        SortField::OnlyName => {
            text(a.file_name().to_string()).cmp(&text(b.file_name().to_string()))
        }
        SortField::Path => text(a.absolute_path.to_string_lossy().into_owned())
            .cmp(&text(b.absolute_path.to_string_lossy().into_owned())),
        SortField::Size => a.size.cmp(&b.size),
        SortField::Modified => a.last_modified.cmp(&b.last_modified),
    }
}

/// Order candidates by `sort_by`, or by relative path when unset.
pub fn sort_candidates(entries: &mut [CandidateEntry], sort_by: Option<&SortBy>) {
    entries.sort_by(|a, b| compare_candidates(sort_by, a, b));
}

/// Order of two candidates under `sort_by`; relative path when unset.
pub fn compare_candidates(
    sort_by: Option<&SortBy>,
    a: &CandidateEntry,
    b: &CandidateEntry,
) -> Ordering {
    match sort_by {
        Some(sort_by) => sort_by.compare(a, b),
        None => a.relative_path.cmp(&b.relative_path),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EndpointOptions;
    use crate::model::tests::entry;
    use std::fs;
    use std::time::{Duration, UNIX_EPOCH};

    fn scanner(root: &Path, options: EndpointOptions) -> DirectoryScanner {
        let config = options.build(root).expect("valid options");
        let filter = PathFilterChain::from_config(&config).expect("valid filters");
        DirectoryScanner::new(root, filter)
    }

    fn touch(root: &Path, relative: &str) {
        let path = root.join(relative);
        fs::create_dir_all(path.parent().expect("parent")).expect("mkdir");
        fs::write(&path, relative.as_bytes()).expect("write");
    }

    fn names(entries: &[CandidateEntry]) -> Vec<String> {
        entries.iter().map(CandidateEntry::relative_name).collect()
    }

    #[test]
    fn test_flat_scan_ignores_subdirectories() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        touch(temp_dir.path(), "a.txt");
        touch(temp_dir.path(), "sub/b.txt");

        let found = scanner(temp_dir.path(), EndpointOptions::default())
            .collect()
            .expect("scan");
        assert_eq!(names(&found), vec!["a.txt"]);
        assert_eq!(found[0].size, 5);
        assert_eq!(found[0].depth, 1);
    }

    #[test]
    fn test_depth_window_over_deep_tree() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        for relative in ["l1.txt", "a/l2.txt", "a/b/l3.txt", "a/b/c/l4.txt", "a/b/c/d/l5.txt"] {
            touch(temp_dir.path(), relative);
        }

        let found = scanner(
            temp_dir.path(),
            EndpointOptions {
                recursive: Some(true),
                min_depth: Some(2),
                max_depth: Some(2),
                ..Default::default()
            },
        )
        .collect()
        .expect("scan");
        assert_eq!(names(&found), vec!["a/l2.txt"]);
    }

    #[test]
    fn test_hidden_directories_are_pruned() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        touch(temp_dir.path(), ".filegate/old.txt");
        touch(temp_dir.path(), "new.txt");

        let found = scanner(
            temp_dir.path(),
            EndpointOptions {
                recursive: Some(true),
                ..Default::default()
            },
        )
        .collect()
        .expect("scan");
        assert_eq!(names(&found), vec!["new.txt"]);
    }

    #[test]
    fn test_missing_root_is_scan_error() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let missing = temp_dir.path().join("missing");
        let err = scanner(&missing, EndpointOptions::default())
            .collect()
            .unwrap_err();
        assert!(matches!(err, EngineError::Scan { .. }));
    }

    #[test]
    fn test_sort_by_groups() {
        let sort = SortBy::parse("reverse:file:size;ignoreCase:file:name").expect("parse");
        assert_eq!(sort.keys().len(), 2);

        let root = Path::new("/in");
        let mut entries = vec![
            entry(root, "b.txt", 1),
            entry(root, "C.txt", 5),
            entry(root, "a.txt", 5),
        ];
        sort_candidates(&mut entries, Some(&sort));
        assert_eq!(names(&entries), vec!["a.txt", "C.txt", "b.txt"]);
    }

    #[test]
    fn test_sort_by_modified_and_default_order() {
        let root = Path::new("/in");
        let mut newer = entry(root, "a.txt", 1);
        newer.last_modified = UNIX_EPOCH + Duration::from_secs(2_000_000_000);
        let older = entry(root, "b.txt", 1);

        let mut entries = vec![newer.clone(), older.clone()];
        sort_candidates(&mut entries, Some(&SortBy::parse("file:modified").expect("parse")));
        assert_eq!(names(&entries), vec!["b.txt", "a.txt"]);

        sort_candidates(&mut entries, None);
        assert_eq!(names(&entries), vec!["a.txt", "b.txt"]);
    }

    #[test]
    fn test_sort_by_rejects_unknown_field() {
        assert!(SortBy::parse("file:owner").is_err());
        assert!(SortBy::parse("").is_err());
    }
}

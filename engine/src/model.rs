//! Core data model for poll cycles.
//!
//! This module defines the values that flow through one poll cycle:
//! - CandidateEntry: a filesystem entry found by the scanner
//! - InProgressKey: the key guarding a candidate against concurrent selection
//! - PollBatch: the ordered selection for one cycle
//! - FileUnit: what the collaborator receives for a single file
//! - TransferOutcome / SkipReason: the per-file result of a cycle

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

/// A filesystem entry considered for one poll cycle.
///
/// Created fresh on every scan and never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CandidateEntry {
    /// Absolute path of the entry
    pub absolute_path: PathBuf,

    /// Path relative to the scan root
    pub relative_path: PathBuf,

    /// True if this entry is a directory
    pub is_directory: bool,

    /// Size in bytes (0 for directories)
    pub size: u64,

    /// Last modification time
    pub last_modified: SystemTime,

    /// Number of path segments below the scan root (files in the root are at depth 1)
    pub depth: usize,

    /// Extended attributes selected by the `extendedAttributes` option
    pub extended_attributes: BTreeMap<String, Vec<u8>>,
}

impl CandidateEntry {
    /// File name without any directory component.
    pub fn file_name(&self) -> &str {
        self.absolute_path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or_default()
    }

    /// Relative path using `/` separators, as matched by ant-style globs.
    pub fn relative_name(&self) -> String {
        self.relative_path
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/")
    }

    /// Parent directory of the entry.
    pub fn parent(&self) -> &Path {
        self.absolute_path.parent().unwrap_or_else(|| Path::new(""))
    }

    /// Modification time as milliseconds since the unix epoch.
    pub fn modified_millis(&self) -> u128 {
        self.last_modified
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis())
            .unwrap_or_default()
    }
}

/// How the in-progress key of a candidate is derived.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum KeyStrategy {
    /// Absolute path of the file
    #[default]
    Path,
    /// File name, size and modification time
    NameSizeModified,
}

/// Key that prevents two cycles or threads from selecting the same file.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InProgressKey(String);

impl InProgressKey {
    /// Derive the key for an entry.
    pub fn derive(entry: &CandidateEntry, strategy: KeyStrategy) -> Self {
        match strategy {
            KeyStrategy::Path => Self(entry.absolute_path.to_string_lossy().into_owned()),
            KeyStrategy::NameSizeModified => Self(format!(
                "{}-{}-{}",
                entry.relative_name(),
                entry.size,
                entry.modified_millis()
            )),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for InProgressKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Ordered selection of candidates for one poll cycle.
///
/// Built after sorting, truncation and locking; every `FileUnit` of the
/// cycle takes its batch index and size from here.
#[derive(Debug, Clone, Default)]
pub struct PollBatch {
    entries: Vec<CandidateEntry>,
}

impl PollBatch {
    pub fn new(entries: Vec<CandidateEntry>) -> Self {
        Self { entries }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[CandidateEntry] {
        &self.entries
    }

    /// Turn the batch into units. `placements` gives the current path and
    /// start offset of each entry, in batch order.
    pub fn into_units(
        self,
        placements: impl IntoIterator<Item = (PathBuf, u64)>,
    ) -> Vec<FileUnit> {
        let batch_size = self.entries.len();
        self.entries
            .into_iter()
            .zip(placements)
            .enumerate()
            .map(|(batch_index, (entry, (current_path, offset)))| FileUnit {
                entry,
                current_path,
                offset,
                batch_index,
                batch_size,
            })
            .collect()
    }
}

/// The unit handed to the collaborator for one file.
#[derive(Debug, Clone)]
pub struct FileUnit {
    /// Candidate as scanned
    pub entry: CandidateEntry,

    /// Where the file currently lives (differs from the scanned path after
    /// a rename read lock or preMove)
    pub current_path: PathBuf,

    /// Byte offset the stream starts at (non-zero only when resumed)
    pub offset: u64,

    /// Position of this file within its batch
    pub batch_index: usize,

    /// Number of files in the batch
    pub batch_size: usize,
}

impl FileUnit {
    /// True for the last file of the batch.
    pub fn batch_complete(&self) -> bool {
        self.batch_index + 1 == self.batch_size
    }
}

/// Why a selected file was not processed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// Another consumer holds the read lock
    LockDenied,
    /// The read lock could not be acquired within its timeout
    LockTimeout,
    /// The resume strategy marked the file as already handled
    Resumed,
    /// The endpoint was stopping before the file could be started
    Stopped,
    /// The file disappeared between scan and processing
    Vanished,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::LockDenied => write!(f, "lock denied"),
            SkipReason::LockTimeout => write!(f, "lock timeout"),
            SkipReason::Resumed => write!(f, "resumed"),
            SkipReason::Stopped => write!(f, "stopped"),
            SkipReason::Vanished => write!(f, "vanished"),
        }
    }
}

/// Result of processing a single candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferOutcome {
    /// Processed and the terminal action applied
    Committed,
    /// Processing (or its commit) failed and the file was released
    RolledBack,
    /// Never handed to the collaborator
    Skipped(SkipReason),
}

impl TransferOutcome {
    pub fn is_committed(&self) -> bool {
        matches!(self, TransferOutcome::Committed)
    }
}

impl fmt::Display for TransferOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransferOutcome::Committed => write!(f, "committed"),
            TransferOutcome::RolledBack => write!(f, "rolled back"),
            TransferOutcome::Skipped(reason) => write!(f, "skipped ({reason})"),
        }
    }
}

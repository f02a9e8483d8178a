//! Endpoint configuration.
//!
//! `EndpointOptions` is the loose, serde-facing option surface (every field
//! optional, camelCase names). `build` validates it once and produces an
//! immutable `EndpointConfig` for consumers; `build_producer` produces a
//! `ProducerConfig` for the atomic writer. Mutually exclusive options are
//! rejected here and never at runtime.

use std::path::{Path, PathBuf};
use std::time::Duration;

use regex::Regex;
use serde::Deserialize;

use crate::checksums::ChecksumAlgorithm;
use crate::error::{EngineError, EngineResult};
use crate::expression::PathTemplate;
use crate::model::KeyStrategy;
use crate::scanner::SortBy;
use crate::scheduler::Schedule;

/// Directory (beside the consumed file) that committed files move to when no
/// other terminal action is configured.
pub const DEFAULT_MOVE_DIRECTORY: &str = ".filegate";

const DEFAULT_READ_LOCK_TIMEOUT_MS: u64 = 10_000;
const DEFAULT_READ_LOCK_CHECK_INTERVAL_MS: u64 = 1_000;
const DEFAULT_DELAY_MS: u64 = 500;
const DEFAULT_INITIAL_DELAY_MS: u64 = 1_000;

/// Read lock protocol used by a consumer endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ReadLockKind {
    /// No read lock
    #[default]
    None,
    /// Sibling marker file created exclusively
    MarkerFile,
    /// Rename to a working name while processing
    Rename,
    /// OS advisory lock on the file itself
    FileLock,
    /// Wait until size and modification time stop changing
    Changed,
    /// Atomic insert of the path into an idempotent repository
    Idempotent,
}

impl std::fmt::Display for ReadLockKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ReadLockKind::None => write!(f, "none"),
            ReadLockKind::MarkerFile => write!(f, "markerFile"),
            ReadLockKind::Rename => write!(f, "rename"),
            ReadLockKind::FileLock => write!(f, "fileLock"),
            ReadLockKind::Changed => write!(f, "changed"),
            ReadLockKind::Idempotent => write!(f, "idempotent"),
        }
    }
}

impl std::str::FromStr for ReadLockKind {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "none" => Ok(ReadLockKind::None),
            "markerFile" => Ok(ReadLockKind::MarkerFile),
            "rename" => Ok(ReadLockKind::Rename),
            "fileLock" => Ok(ReadLockKind::FileLock),
            "changed" => Ok(ReadLockKind::Changed),
            "idempotent" => Ok(ReadLockKind::Idempotent),
            other => Err(EngineError::config(
                "readLock",
                format!("unknown read lock '{other}'"),
            )),
        }
    }
}

/// Policy for a producer target that already exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
pub enum FileExist {
    /// Replace the existing file
    #[default]
    Override,
    /// Append to the existing file
    Append,
    /// Fail the write
    Fail,
    /// Keep the existing file and silently skip the write
    Ignore,
    /// Move the existing file away (see `moveExisting`) before writing
    Move,
    /// Rename the temp file into place without checking for the target
    TryRename,
}

impl std::fmt::Display for FileExist {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FileExist::Override => write!(f, "Override"),
            FileExist::Append => write!(f, "Append"),
            FileExist::Fail => write!(f, "Fail"),
            FileExist::Ignore => write!(f, "Ignore"),
            FileExist::Move => write!(f, "Move"),
            FileExist::TryRename => write!(f, "TryRename"),
        }
    }
}

impl std::str::FromStr for FileExist {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "override" => Ok(FileExist::Override),
            "append" => Ok(FileExist::Append),
            "fail" => Ok(FileExist::Fail),
            "ignore" => Ok(FileExist::Ignore),
            "move" => Ok(FileExist::Move),
            "tryrename" => Ok(FileExist::TryRename),
            _ => Err(EngineError::config(
                "fileExist",
                format!("unknown policy '{s}'"),
            )),
        }
    }
}

/// What happens to a consumed file after successful processing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TerminalAction {
    /// Leave the file where it is
    Noop,
    /// Delete the file
    Delete,
    /// Move the file to the evaluated target
    Move(PathTemplate),
}

/// Read lock settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadLockConfig {
    pub kind: ReadLockKind,
    pub timeout: Duration,
    pub check_interval: Duration,
    pub min_length: u64,
    pub min_age: Duration,
    /// Guard the `changed` strategy with a marker file as well
    pub marker_file: bool,
    pub delete_orphan_lock_files: bool,
    pub remove_on_commit: bool,
    pub remove_on_rollback: bool,
}

impl Default for ReadLockConfig {
    fn default() -> Self {
        Self {
            kind: ReadLockKind::None,
            timeout: Duration::from_millis(DEFAULT_READ_LOCK_TIMEOUT_MS),
            check_interval: Duration::from_millis(DEFAULT_READ_LOCK_CHECK_INTERVAL_MS),
            min_length: 1,
            min_age: Duration::ZERO,
            marker_file: true,
            delete_orphan_lock_files: true,
            remove_on_commit: false,
            remove_on_rollback: true,
        }
    }
}

/// Validated, immutable consumer configuration.
#[derive(Debug, Clone)]
pub struct EndpointConfig {
    /// Starting directory that is polled
    pub directory: PathBuf,
    pub recursive: bool,
    pub min_depth: usize,
    pub max_depth: usize,
    pub include: Option<Regex>,
    pub exclude: Option<Regex>,
    pub ant_include: Vec<String>,
    pub ant_exclude: Vec<String>,
    pub ant_filter_case_sensitive: bool,
    pub include_hidden_files: bool,
    pub include_hidden_dirs: bool,
    pub sort_by: Option<SortBy>,
    pub read_lock: ReadLockConfig,
    pub done_file_name: Option<PathTemplate>,
    pub idempotent: bool,
    pub idempotent_key: Option<PathTemplate>,
    pub in_progress_key: KeyStrategy,
    pub pre_move: Option<PathTemplate>,
    pub on_commit: TerminalAction,
    pub move_failed: Option<PathTemplate>,
    /// 0 means unlimited
    pub max_messages_per_poll: usize,
    pub eager_max_messages_per_poll: bool,
    pub extended_attributes: Vec<String>,
    pub auto_create: bool,
    pub starting_directory_must_exist: bool,
    pub starting_directory_must_have_access: bool,
    /// Number of threads processing entries of one batch
    pub workers: usize,
    pub schedule: Schedule,
}

impl EndpointConfig {
    /// Defaults for `directory`; equivalent to building empty options.
    pub fn new(directory: impl Into<PathBuf>) -> EngineResult<Self> {
        EndpointOptions::default().build(directory)
    }

    /// True when the terminal action leaves files in place.
    pub fn is_noop(&self) -> bool {
        self.on_commit == TerminalAction::Noop
    }
}

/// Validated, immutable producer configuration.
#[derive(Debug, Clone)]
pub struct ProducerConfig {
    pub directory: PathBuf,
    pub file_exist: FileExist,
    pub temp_prefix: Option<String>,
    pub temp_file_name: Option<PathTemplate>,
    pub move_existing: Option<PathTemplate>,
    pub eager_delete_target_file: bool,
    pub chmod: Option<u32>,
    pub chmod_directory: Option<u32>,
    pub checksum_file_algorithm: Option<ChecksumAlgorithm>,
    pub done_file_name: Option<PathTemplate>,
    pub auto_create: bool,
    pub jail_starting_directory: bool,
    pub keep_last_modified: bool,
}

impl ProducerConfig {
    pub fn new(directory: impl Into<PathBuf>) -> EngineResult<Self> {
        EndpointOptions::default().build_producer(directory)
    }

    /// True when writes go through a temporary file first.
    pub fn uses_temp_file(&self) -> bool {
        self.file_exist != FileExist::Append
    }
}

/// Raw endpoint options, named as documented (`readLock`, `maxMessagesPerPoll`, ...).
///
/// Durations are given in milliseconds.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default, deny_unknown_fields)]
pub struct EndpointOptions {
    pub recursive: Option<bool>,
    pub min_depth: Option<usize>,
    pub max_depth: Option<usize>,
    pub include: Option<String>,
    pub exclude: Option<String>,
    pub ant_include: Option<String>,
    pub ant_exclude: Option<String>,
    pub ant_filter_case_sensitive: Option<bool>,
    pub include_hidden_files: Option<bool>,
    pub include_hidden_dirs: Option<bool>,
    pub sort_by: Option<String>,
    pub read_lock: Option<ReadLockKind>,
    pub read_lock_timeout: Option<u64>,
    pub read_lock_check_interval: Option<u64>,
    pub read_lock_min_length: Option<u64>,
    pub read_lock_min_age: Option<u64>,
    pub read_lock_marker_file: Option<bool>,
    pub read_lock_delete_orphan_lock_files: Option<bool>,
    pub read_lock_remove_on_commit: Option<bool>,
    pub read_lock_remove_on_rollback: Option<bool>,
    pub done_file_name: Option<String>,
    pub idempotent: Option<bool>,
    pub idempotent_key: Option<String>,
    pub in_progress_key: Option<KeyStrategy>,
    #[serde(rename = "move")]
    pub move_to: Option<String>,
    pub pre_move: Option<String>,
    pub move_failed: Option<String>,
    pub delete: Option<bool>,
    pub noop: Option<bool>,
    pub max_messages_per_poll: Option<usize>,
    pub eager_max_messages_per_poll: Option<bool>,
    pub extended_attributes: Option<String>,
    pub auto_create: Option<bool>,
    pub starting_directory_must_exist: Option<bool>,
    pub starting_directory_must_have_access: Option<bool>,
    pub workers: Option<usize>,
    pub delay: Option<u64>,
    pub initial_delay: Option<u64>,
    pub use_fixed_delay: Option<bool>,

    pub file_exist: Option<FileExist>,
    pub temp_prefix: Option<String>,
    pub temp_file_name: Option<String>,
    pub move_existing: Option<String>,
    pub eager_delete_target_file: Option<bool>,
    pub chmod: Option<String>,
    pub chmod_directory: Option<String>,
    pub checksum_file_algorithm: Option<String>,
    pub jail_starting_directory: Option<bool>,
    pub keep_last_modified: Option<bool>,
}

impl EndpointOptions {
    /// Parse options from a JSON object.
    pub fn from_json_str(json: &str) -> EngineResult<Self> {
        serde_json::from_str(json).map_err(|e| EngineError::config("options", e.to_string()))
    }

    /// Validate consumer options for `directory`.
    pub fn build(&self, directory: impl Into<PathBuf>) -> EngineResult<EndpointConfig> {
        let directory = directory.into();
        check_directory(&directory)?;

        let noop = self.noop.unwrap_or(false);
        let delete = self.delete.unwrap_or(false);
        if noop && delete {
            return Err(EngineError::config("delete", "cannot be combined with noop"));
        }
        if delete && self.move_to.is_some() {
            return Err(EngineError::config("delete", "cannot be combined with move"));
        }
        if noop && self.move_to.is_some() {
            return Err(EngineError::config("noop", "cannot be combined with move"));
        }

        let recursive = self.recursive.unwrap_or(false);
        let min_depth = self.min_depth.unwrap_or(0);
        let max_depth = if recursive {
            self.max_depth.unwrap_or(usize::MAX)
        } else {
            self.max_depth.unwrap_or(1).min(1)
        };
        if min_depth > max_depth {
            return Err(EngineError::config(
                "minDepth",
                format!("{min_depth} is greater than maxDepth {max_depth}"),
            ));
        }

        let read_lock = self.read_lock_config()?;

        let on_commit = if noop {
            TerminalAction::Noop
        } else if delete {
            TerminalAction::Delete
        } else {
            let target = self.move_to.as_deref().unwrap_or(DEFAULT_MOVE_DIRECTORY);
            TerminalAction::Move(PathTemplate::parse_move("move", target)?)
        };

        let workers = self.workers.unwrap_or(1);
        if workers == 0 {
            return Err(EngineError::config("workers", "must be at least 1"));
        }

        let delay = Duration::from_millis(self.delay.unwrap_or(DEFAULT_DELAY_MS));
        if delay.is_zero() {
            return Err(EngineError::config("delay", "must be greater than zero"));
        }

        Ok(EndpointConfig {
            directory,
            recursive,
            min_depth,
            max_depth,
            include: compile_regex("include", self.include.as_deref())?,
            exclude: compile_regex("exclude", self.exclude.as_deref())?,
            ant_include: split_list(self.ant_include.as_deref()),
            ant_exclude: split_list(self.ant_exclude.as_deref()),
            ant_filter_case_sensitive: self.ant_filter_case_sensitive.unwrap_or(true),
            include_hidden_files: self.include_hidden_files.unwrap_or(false),
            include_hidden_dirs: self.include_hidden_dirs.unwrap_or(false),
            sort_by: self.sort_by.as_deref().map(SortBy::parse).transpose()?,
            read_lock,
            done_file_name: self
                .done_file_name
                .as_deref()
                .map(|v| PathTemplate::parse("doneFileName", v))
                .transpose()?,
            // Without an idempotent repository a noop endpoint would pick up
            // the same files on every poll.
            idempotent: self.idempotent.unwrap_or(noop),
            idempotent_key: self
                .idempotent_key
                .as_deref()
                .map(|v| PathTemplate::parse("idempotentKey", v))
                .transpose()?,
            in_progress_key: self.in_progress_key.unwrap_or_default(),
            pre_move: self
                .pre_move
                .as_deref()
                .map(|v| PathTemplate::parse_move("preMove", v))
                .transpose()?,
            on_commit,
            move_failed: self
                .move_failed
                .as_deref()
                .map(|v| PathTemplate::parse_move("moveFailed", v))
                .transpose()?,
            max_messages_per_poll: self.max_messages_per_poll.unwrap_or(0),
            eager_max_messages_per_poll: self.eager_max_messages_per_poll.unwrap_or(true),
            extended_attributes: split_list(self.extended_attributes.as_deref()),
            auto_create: self.auto_create.unwrap_or(true),
            starting_directory_must_exist: self.starting_directory_must_exist.unwrap_or(false),
            starting_directory_must_have_access: self
                .starting_directory_must_have_access
                .unwrap_or(false),
            workers,
            schedule: Schedule {
                initial_delay: Duration::from_millis(
                    self.initial_delay.unwrap_or(DEFAULT_INITIAL_DELAY_MS),
                ),
                delay,
                fixed_rate: !self.use_fixed_delay.unwrap_or(true),
            },
        })
    }

    /// Validate producer options for `directory`.
    pub fn build_producer(&self, directory: impl Into<PathBuf>) -> EngineResult<ProducerConfig> {
        let directory = directory.into();
        check_directory(&directory)?;

        let file_exist = self.file_exist.unwrap_or_default();
        if file_exist == FileExist::Append
            && (self.temp_prefix.is_some() || self.temp_file_name.is_some())
        {
            return Err(EngineError::config(
                "fileExist",
                "Append cannot be combined with tempPrefix or tempFileName",
            ));
        }
        if self.temp_prefix.is_some() && self.temp_file_name.is_some() {
            return Err(EngineError::config(
                "tempPrefix",
                "cannot be combined with tempFileName",
            ));
        }
        if file_exist == FileExist::Move && self.move_existing.is_none() {
            return Err(EngineError::config(
                "moveExisting",
                "must be configured when fileExist=Move",
            ));
        }
        if file_exist != FileExist::Move && self.move_existing.is_some() {
            return Err(EngineError::config(
                "moveExisting",
                "requires fileExist=Move",
            ));
        }
        if let Some(prefix) = &self.temp_prefix {
            if prefix.is_empty() || prefix.contains(['/', '\\']) {
                return Err(EngineError::config(
                    "tempPrefix",
                    "must be a non-empty name without separators",
                ));
            }
        }

        let checksum_file_algorithm = match self.checksum_file_algorithm.as_deref() {
            Some(name) => Some(ChecksumAlgorithm::from_str(name).ok_or_else(|| {
                EngineError::config(
                    "checksumFileAlgorithm",
                    format!("unsupported algorithm '{name}'"),
                )
            })?),
            None => None,
        };

        Ok(ProducerConfig {
            directory,
            file_exist,
            temp_prefix: self.temp_prefix.clone(),
            temp_file_name: self
                .temp_file_name
                .as_deref()
                .map(|v| PathTemplate::parse("tempFileName", v))
                .transpose()?,
            move_existing: self
                .move_existing
                .as_deref()
                .map(|v| PathTemplate::parse("moveExisting", v))
                .transpose()?,
            eager_delete_target_file: self.eager_delete_target_file.unwrap_or(true),
            chmod: parse_mode("chmod", self.chmod.as_deref())?,
            chmod_directory: parse_mode("chmodDirectory", self.chmod_directory.as_deref())?,
            checksum_file_algorithm,
            done_file_name: self
                .done_file_name
                .as_deref()
                .map(|v| PathTemplate::parse("doneFileName", v))
                .transpose()?,
            auto_create: self.auto_create.unwrap_or(true),
            jail_starting_directory: self.jail_starting_directory.unwrap_or(true),
            keep_last_modified: self.keep_last_modified.unwrap_or(false),
        })
    }

    fn read_lock_config(&self) -> EngineResult<ReadLockConfig> {
        let defaults = ReadLockConfig::default();
        let kind = self.read_lock.unwrap_or_default();
        let timeout = self
            .read_lock_timeout
            .map_or(defaults.timeout, Duration::from_millis);
        let check_interval = self
            .read_lock_check_interval
            .map_or(defaults.check_interval, Duration::from_millis);

        if kind != ReadLockKind::None && !timeout.is_zero() && timeout <= check_interval {
            return Err(EngineError::config(
                "readLockTimeout",
                format!(
                    "must be higher than readLockCheckInterval ({timeout:?} <= {check_interval:?})"
                ),
            ));
        }
        if kind == ReadLockKind::FileLock && !cfg!(unix) {
            return Err(EngineError::config(
                "readLock",
                "fileLock is only supported on unix platforms",
            ));
        }

        Ok(ReadLockConfig {
            kind,
            timeout,
            check_interval,
            min_length: self.read_lock_min_length.unwrap_or(defaults.min_length),
            min_age: self
                .read_lock_min_age
                .map_or(defaults.min_age, Duration::from_millis),
            marker_file: self.read_lock_marker_file.unwrap_or(defaults.marker_file),
            delete_orphan_lock_files: self
                .read_lock_delete_orphan_lock_files
                .unwrap_or(defaults.delete_orphan_lock_files),
            remove_on_commit: self
                .read_lock_remove_on_commit
                .unwrap_or(defaults.remove_on_commit),
            remove_on_rollback: self
                .read_lock_remove_on_rollback
                .unwrap_or(defaults.remove_on_rollback),
        })
    }
}

fn check_directory(directory: &Path) -> EngineResult<()> {
    if directory.as_os_str().is_empty() {
        return Err(EngineError::config("directory", "must not be empty"));
    }
    Ok(())
}

fn compile_regex(option: &'static str, pattern: Option<&str>) -> EngineResult<Option<Regex>> {
    pattern
        .map(|p| {
            // Patterns must match the whole file name.
            Regex::new(&format!("^(?:{p})$")).map_err(|source| EngineError::Regex { option, source })
        })
        .transpose()
}

fn split_list(value: Option<&str>) -> Vec<String> {
    value
        .map(|v| {
            v.split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

fn parse_mode(option: &'static str, value: Option<&str>) -> EngineResult<Option<u32>> {
    let Some(value) = value else {
        return Ok(None);
    };
    match u32::from_str_radix(value.trim(), 8) {
        Ok(mode) if mode <= 0o7777 => Ok(Some(mode)),
        _ => Err(EngineError::config(
            option,
            format!("'{value}' is not an octal permission mode"),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = EndpointConfig::new("/in").expect("defaults are valid");
        assert!(!config.recursive);
        assert_eq!(config.max_depth, 1);
        assert_eq!(config.read_lock.kind, ReadLockKind::None);
        assert!(!config.idempotent);
        assert_eq!(config.workers, 1);
        match &config.on_commit {
            TerminalAction::Move(t) => assert!(t.source().contains(DEFAULT_MOVE_DIRECTORY)),
            other => panic!("unexpected terminal action {other:?}"),
        }
    }

    #[test]
    fn test_from_json_uses_documented_names() {
        let options = EndpointOptions::from_json_str(
            r#"{
                "recursive": true,
                "readLock": "changed",
                "readLockTimeout": 5000,
                "readLockCheckInterval": 100,
                "antInclude": "**/*.txt, **/*.csv",
                "move": "done",
                "maxMessagesPerPoll": 10,
                "sortBy": "reverse:file:modified;file:name"
            }"#,
        )
        .expect("valid json");
        let config = options.build("/in").expect("valid options");
        assert_eq!(config.read_lock.kind, ReadLockKind::Changed);
        assert_eq!(config.read_lock.timeout, Duration::from_millis(5000));
        assert_eq!(config.ant_include, vec!["**/*.txt", "**/*.csv"]);
        assert_eq!(config.max_depth, usize::MAX);
        assert_eq!(config.max_messages_per_poll, 10);
        assert!(config.sort_by.is_some());
    }

    #[test]
    fn test_unknown_option_is_rejected() {
        assert!(EndpointOptions::from_json_str(r#"{"recursve": true}"#).is_err());
    }

    #[test]
    fn test_noop_enables_idempotent_unless_set() {
        let options = EndpointOptions {
            noop: Some(true),
            ..Default::default()
        };
        assert!(options.build("/in").expect("valid").idempotent);

        let options = EndpointOptions {
            noop: Some(true),
            idempotent: Some(false),
            ..Default::default()
        };
        assert!(!options.build("/in").expect("valid").idempotent);
    }

    #[test]
    fn test_mutually_exclusive_consumer_options() {
        let noop_delete = EndpointOptions {
            noop: Some(true),
            delete: Some(true),
            ..Default::default()
        };
        assert!(noop_delete.build("/in").unwrap_err().is_configuration());

        let delete_move = EndpointOptions {
            delete: Some(true),
            move_to: Some("done".into()),
            ..Default::default()
        };
        assert!(delete_move.build("/in").is_err());

        let depth = EndpointOptions {
            min_depth: Some(3),
            max_depth: Some(2),
            ..Default::default()
        };
        assert!(depth.build("/in").is_err());
    }

    #[test]
    fn test_read_lock_timeout_must_exceed_interval() {
        let options = EndpointOptions {
            read_lock: Some(ReadLockKind::Changed),
            read_lock_timeout: Some(500),
            read_lock_check_interval: Some(1000),
            ..Default::default()
        };
        assert!(options.build("/in").is_err());

        let zero_timeout = EndpointOptions {
            read_lock: Some(ReadLockKind::Changed),
            read_lock_timeout: Some(0),
            ..Default::default()
        };
        assert!(zero_timeout.build("/in").is_ok());
    }

    #[test]
    fn test_append_rejects_temp_file_options() {
        let options = EndpointOptions {
            file_exist: Some(FileExist::Append),
            temp_prefix: Some("inflight-".into()),
            ..Default::default()
        };
        assert!(options.build_producer("/out").unwrap_err().is_configuration());
    }

    #[test]
    fn test_move_policy_requires_move_existing() {
        let options = EndpointOptions {
            file_exist: Some(FileExist::Move),
            ..Default::default()
        };
        assert!(options.build_producer("/out").is_err());

        let options = EndpointOptions {
            move_existing: Some("old/${file:name}".into()),
            ..Default::default()
        };
        assert!(options.build_producer("/out").is_err());
    }

    #[test]
    fn test_producer_modes_and_checksum() {
        let options = EndpointOptions {
            chmod: Some("640".into()),
            chmod_directory: Some("0750".into()),
            checksum_file_algorithm: Some("SHA256".into()),
            ..Default::default()
        };
        let config = options.build_producer("/out").expect("valid");
        assert_eq!(config.chmod, Some(0o640));
        assert_eq!(config.chmod_directory, Some(0o750));
        assert_eq!(config.checksum_file_algorithm, Some(ChecksumAlgorithm::Sha256));

        let bad = EndpointOptions {
            chmod: Some("rwx".into()),
            ..Default::default()
        };
        assert!(bad.build_producer("/out").is_err());
    }

    #[test]
    fn test_enum_options_from_str() {
        assert_eq!("markerFile".parse::<ReadLockKind>().expect("parse"), ReadLockKind::MarkerFile);
        assert!("marker".parse::<ReadLockKind>().is_err());
        assert_eq!("tryRename".parse::<FileExist>().expect("parse"), FileExist::TryRename);
        assert!("replace".parse::<FileExist>().unwrap_err().is_configuration());
    }

    #[test]
    fn test_invalid_regex_is_configuration_error() {
        let options = EndpointOptions {
            include: Some("(".into()),
            ..Default::default()
        };
        assert!(options.build("/in").unwrap_err().is_configuration());
    }
}

//! Atomic producer writes.
//!
//! Content is streamed into a temporary file next to the target (hashing as
//! it goes), synced, and renamed into place, so a consumer polling the same
//! directory only ever sees complete files. `Append` is the exception: it
//! writes the target directly under an exclusive OS lock.
//!
//! Writes to the same target through one writer (or its clones) are
//! serialized. The default temporary name is unique per write, so writers in
//! other processes never share a temporary file either.

use std::collections::HashSet;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Write};
use std::path::{Component, Path, PathBuf};
use std::sync::{Arc, Condvar, Mutex};
use std::time::SystemTime;

use filetime::FileTime;
use tracing::{debug, info};
use uuid::Uuid;

use crate::checksums::{self, ChecksumValue, HashingWriter};
use crate::config::{FileExist, ProducerConfig};
use crate::error::{EngineError, EngineResult};
use crate::expression::TemplateContext;
use crate::fs_ops;

/// Suffix of the default temporary file (`.<name>.<uuid>.filegate-tmp`).
pub const TEMP_FILE_SUFFIX: &str = ".filegate-tmp";

/// Result of a single write.
#[derive(Debug, Clone)]
pub enum WriteOutcome {
    /// Content landed at `path`
    Written {
        path: PathBuf,
        bytes: u64,
        checksum: Option<ChecksumValue>,
    },
    /// Target existed and `fileExist=Ignore` left it alone
    Ignored { path: PathBuf },
}

impl WriteOutcome {
    pub fn path(&self) -> &Path {
        match self {
            WriteOutcome::Written { path, .. } | WriteOutcome::Ignored { path } => path,
        }
    }
}

/// Targets currently being written.
#[derive(Debug, Default)]
struct TargetLocks {
    busy: Mutex<HashSet<PathBuf>>,
    released: Condvar,
}

impl TargetLocks {
    fn acquire(self: &Arc<Self>, target: &Path) -> TargetGuard {
        let mut busy = self.busy.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        while busy.contains(target) {
            busy = self
                .released
                .wait(busy)
                .unwrap_or_else(|poisoned| poisoned.into_inner());
        }
        busy.insert(target.to_path_buf());
        TargetGuard {
            locks: Arc::clone(self),
            target: target.to_path_buf(),
        }
    }
}

struct TargetGuard {
    locks: Arc<TargetLocks>,
    target: PathBuf,
}

impl Drop for TargetGuard {
    fn drop(&mut self) {
        let mut busy = self
            .locks
            .busy
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        busy.remove(&self.target);
        self.locks.released.notify_all();
    }
}

/// Writes files into a producer directory.
#[derive(Debug, Clone)]
pub struct AtomicWriter {
    config: ProducerConfig,
    locks: Arc<TargetLocks>,
}

impl AtomicWriter {
    pub fn new(config: ProducerConfig) -> Self {
        Self {
            config,
            locks: Arc::new(TargetLocks::default()),
        }
    }

    pub fn config(&self) -> &ProducerConfig {
        &self.config
    }

    /// Write `reader` to `name` (relative to the producer directory).
    pub fn write(&self, name: &str, reader: &mut dyn Read) -> EngineResult<WriteOutcome> {
        self.write_with_modified(name, reader, None)
    }

    /// Like [`write`](Self::write); with `keepLastModified` the target gets
    /// `modified` as its modification time.
    ///
    /// # Errors
    ///
    /// * `OutsideStartingDirectory` when the name escapes a jailed directory
    /// * `FileExists` for `fileExist=Fail`, or a `moveExisting` target that
    ///   exists while `eagerDeleteTargetFile` is off
    /// * `Io` / `CopyVerification` for filesystem failures; the temporary
    ///   file is removed in that case
    pub fn write_with_modified(
        &self,
        name: &str,
        reader: &mut dyn Read,
        modified: Option<SystemTime>,
    ) -> EngineResult<WriteOutcome> {
        let target = self.resolve_target(name)?;
        let _guard = self.locks.acquire(&target);
        self.prepare_directories(&target)?;

        let exists = target.exists();
        let outcome = match self.config.file_exist {
            FileExist::Ignore if exists => {
                debug!(path = %target.display(), "target exists, ignoring write");
                return Ok(WriteOutcome::Ignored { path: target });
            }
            FileExist::Fail if exists => {
                return Err(EngineError::FileExists { path: target });
            }
            FileExist::Append => self.append(&target, reader)?,
            FileExist::Move if exists => {
                self.move_existing(name, &target)?;
                self.write_via_temp(name, &target, reader)?
            }
            _ => self.write_via_temp(name, &target, reader)?,
        };

        self.apply_side_effects(name, &outcome, modified)?;
        info!(
            path = %outcome.path().display(),
            policy = %self.config.file_exist,
            "wrote file"
        );
        Ok(outcome)
    }

    fn resolve_target(&self, name: &str) -> EngineResult<PathBuf> {
        let root = normalize(&self.config.directory);
        let target = normalize(&root.join(name));
        if self.config.jail_starting_directory && !target.starts_with(&root) {
            return Err(EngineError::OutsideStartingDirectory { path: target });
        }
        if target == root || target.file_name().is_none() {
            return Err(EngineError::io(
                "write",
                target,
                io::Error::new(io::ErrorKind::InvalidInput, "target has no file name"),
            ));
        }
        Ok(target)
    }

    fn prepare_directories(&self, target: &Path) -> EngineResult<()> {
        let dir = &self.config.directory;
        if !dir.is_dir() {
            if !self.config.auto_create {
                return Err(EngineError::StartingDirectoryNotFound { path: dir.clone() });
            }
            fs_ops::create_dir_all(dir, self.config.chmod_directory)?;
        }
        fs_ops::ensure_parent_dir_exists(target, self.config.chmod_directory)
    }

    fn temp_path(&self, name: &str, target: &Path) -> PathBuf {
        let parent = target.parent().unwrap_or(&self.config.directory);
        let file_name = target
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();

        if let Some(template) = &self.config.temp_file_name {
            let ctx = TemplateContext::for_target(&self.config.directory, name);
            return template.resolve(&ctx, parent);
        }
        match &self.config.temp_prefix {
            Some(prefix) => parent.join(format!("{prefix}{file_name}")),
            None => parent.join(format!(
                ".{file_name}.{}{TEMP_FILE_SUFFIX}",
                Uuid::new_v4().simple()
            )),
        }
    }

    fn write_via_temp(
        &self,
        name: &str,
        target: &Path,
        reader: &mut dyn Read,
    ) -> EngineResult<WriteOutcome> {
        let temp = self.temp_path(name, target);
        fs_ops::ensure_parent_dir_exists(&temp, self.config.chmod_directory)?;

        let written = self.stream_to(&temp, reader).and_then(|(bytes, checksum)| {
            self.rename_into_place(&temp, target)?;
            Ok((bytes, checksum))
        });
        match written {
            Ok((bytes, checksum)) => Ok(WriteOutcome::Written {
                path: target.to_path_buf(),
                bytes,
                checksum,
            }),
            Err(err) => {
                let _ = fs::remove_file(&temp);
                Err(err)
            }
        }
    }

    fn stream_to(
        &self,
        temp: &Path,
        reader: &mut dyn Read,
    ) -> EngineResult<(u64, Option<ChecksumValue>)> {
        let file = File::create(temp).map_err(|e| EngineError::io("create temp file", temp, e))?;
        let mut writer = HashingWriter::new(file, self.config.checksum_file_algorithm);
        io::copy(reader, &mut writer).map_err(|e| EngineError::io("write", temp, e))?;
        let (file, bytes, checksum) = writer.finish();
        file.sync_all()
            .map_err(|e| EngineError::io("fsync", temp, e))?;
        debug!(temp = %temp.display(), bytes, "temp file written");
        Ok((bytes, checksum))
    }

    /// Replace `target` with `temp` in one rename. Only a temporary file on
    /// another filesystem falls back to copying.
    fn rename_into_place(&self, temp: &Path, target: &Path) -> EngineResult<()> {
        let err = match fs::rename(temp, target) {
            Ok(()) => return Ok(()),
            Err(err) => err,
        };
        if self.config.file_exist == FileExist::TryRename {
            return Err(if err.kind() == io::ErrorKind::AlreadyExists {
                EngineError::FileExists {
                    path: target.to_path_buf(),
                }
            } else {
                EngineError::io("rename", target, err)
            });
        }
        if !is_cross_device(&err) {
            return Err(EngineError::io("rename", target, err));
        }
        debug!(temp = %temp.display(), target = %target.display(), "temp file on another filesystem, copying");
        fs_ops::rename_or_copy(temp, target)
    }

    fn move_existing(&self, name: &str, target: &Path) -> EngineResult<()> {
        let Some(template) = &self.config.move_existing else {
            return Ok(());
        };
        let mut ctx = TemplateContext::for_target(&self.config.directory, name);
        if let Ok(metadata) = fs::metadata(target) {
            ctx.size = metadata.len();
            ctx.modified = metadata.modified().unwrap_or(ctx.modified);
        }
        let destination = template.resolve(&ctx, &self.config.directory);
        if destination.exists() {
            if !self.config.eager_delete_target_file {
                return Err(EngineError::FileExists { path: destination });
            }
            fs_ops::delete_file(&destination)?;
        }
        fs_ops::ensure_parent_dir_exists(&destination, self.config.chmod_directory)?;
        fs_ops::rename_or_copy(target, &destination)?;
        info!(from = %target.display(), to = %destination.display(), "moved existing target");
        Ok(())
    }

    fn append(&self, target: &Path, reader: &mut dyn Read) -> EngineResult<WriteOutcome> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(target)
            .map_err(|e| EngineError::io("open for append", target, e))?;
        let file = lock_exclusive(file, target)?;

        let mut out: &File = &file;
        let bytes = io::copy(reader, &mut out).map_err(|e| EngineError::io("append", target, e))?;
        out.sync_all()
            .map_err(|e| EngineError::io("fsync", target, e))?;

        // The side file describes the whole file, not just this append.
        let checksum = self
            .config
            .checksum_file_algorithm
            .map(|algorithm| checksums::compute_file_checksum(target, algorithm))
            .transpose()?;
        drop(file);

        Ok(WriteOutcome::Written {
            path: target.to_path_buf(),
            bytes,
            checksum,
        })
    }

    fn apply_side_effects(
        &self,
        name: &str,
        outcome: &WriteOutcome,
        modified: Option<SystemTime>,
    ) -> EngineResult<()> {
        let WriteOutcome::Written { path, bytes, checksum } = outcome else {
            return Ok(());
        };

        if let Some(mode) = self.config.chmod {
            fs_ops::set_mode(path, mode)?;
        }
        if let (true, Some(modified)) = (self.config.keep_last_modified, modified) {
            filetime::set_file_mtime(path, FileTime::from_system_time(modified))
                .map_err(|e| EngineError::io("set modification time", path, e))?;
        }
        if let Some(checksum) = checksum {
            let side = checksums::write_checksum_file(path, checksum)?;
            debug!(checksum_file = %side.display(), "wrote checksum file");
        }
        if let Some(template) = &self.config.done_file_name {
            let directory = path.parent().unwrap_or(&self.config.directory);
            let mut ctx = TemplateContext::for_target(&self.config.directory, name);
            ctx.size = *bytes;
            let done = template.resolve(&ctx, directory);
            fs::write(&done, b"").map_err(|e| EngineError::io("write done file", &done, e))?;
            debug!(done_file = %done.display(), "wrote done file");
        }
        Ok(())
    }
}

#[cfg(unix)]
fn lock_exclusive(file: File, path: &Path) -> EngineResult<nix::fcntl::Flock<File>> {
    use nix::fcntl::{Flock, FlockArg};

    Flock::lock(file, FlockArg::LockExclusive)
        .map_err(|(_, errno)| EngineError::io("lock for append", path, io::Error::from(errno)))
}

#[cfg(not(unix))]
fn lock_exclusive(file: File, _path: &Path) -> EngineResult<File> {
    Ok(file)
}

#[cfg(unix)]
fn is_cross_device(err: &io::Error) -> bool {
    err.raw_os_error() == Some(nix::errno::Errno::EXDEV as i32)
}

#[cfg(windows)]
fn is_cross_device(err: &io::Error) -> bool {
    // ERROR_NOT_SAME_DEVICE
    err.raw_os_error() == Some(17)
}

#[cfg(not(any(unix, windows)))]
fn is_cross_device(_err: &io::Error) -> bool {
    false
}

/// Lexically resolve `.` and `..` without touching the filesystem.
fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EndpointOptions;
    use std::sync::Arc;
    use std::thread;

    fn writer(dir: &Path, options: EndpointOptions) -> AtomicWriter {
        AtomicWriter::new(options.build_producer(dir).expect("valid producer options"))
    }

    fn write_str(w: &AtomicWriter, name: &str, content: &str) -> EngineResult<WriteOutcome> {
        w.write(name, &mut content.as_bytes())
    }

    fn names(dir: &Path) -> Vec<String> {
        let mut names: Vec<String> = fs::read_dir(dir)
            .expect("read dir")
            .map(|e| e.expect("entry").file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        names
    }

    #[test]
    fn test_override_leaves_no_temp_file() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let w = writer(temp_dir.path(), EndpointOptions::default());

        write_str(&w, "a.txt", "first").expect("write");
        let outcome = write_str(&w, "a.txt", "second").expect("write");
        assert_eq!(outcome.path(), temp_dir.path().join("a.txt"));
        assert_eq!(fs::read_to_string(temp_dir.path().join("a.txt")).expect("read"), "second");
        assert_eq!(names(temp_dir.path()), vec!["a.txt"]);
    }

    #[test]
    fn test_default_temp_name_is_hidden_and_unique() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let w = writer(temp_dir.path(), EndpointOptions::default());
        let target = temp_dir.path().join("a.txt");

        let first = w.temp_path("a.txt", &target);
        let second = w.temp_path("a.txt", &target);
        assert_ne!(first, second);
        let name = first.file_name().expect("name").to_string_lossy().into_owned();
        assert!(name.starts_with(".a.txt."), "{name}");
        assert!(name.ends_with(TEMP_FILE_SUFFIX), "{name}");
        assert_eq!(first.parent(), Some(temp_dir.path()));
    }

    fn assert_single_block(path: &Path, block_len: usize) {
        let content = fs::read(path).expect("target must exist");
        assert_eq!(content.len(), block_len);
        let first = content[0];
        assert!(content.iter().all(|b| *b == first), "mixed content");
    }

    fn spawn_override_writers(dir: &Path, shared: Option<Arc<AtomicWriter>>, options: EndpointOptions) {
        const BLOCK: usize = 512 * 1024;
        let handles: Vec<_> = (0..8u8)
            .map(|i| {
                let w = shared
                    .clone()
                    .unwrap_or_else(|| Arc::new(writer(dir, options.clone())));
                thread::spawn(move || {
                    let block = vec![b'a' + i; BLOCK];
                    w.write("x.txt", &mut block.as_slice()).expect("override write");
                })
            })
            .collect();
        for handle in handles {
            handle.join().expect("writer panicked");
        }
        assert_single_block(&dir.join("x.txt"), BLOCK);
        assert_eq!(names(dir), vec!["x.txt"]);
    }

    #[test]
    fn test_concurrent_overrides_from_independent_writers() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        spawn_override_writers(temp_dir.path(), None, EndpointOptions::default());
    }

    #[test]
    fn test_concurrent_overrides_share_configured_temp_name() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let options = EndpointOptions {
            temp_prefix: Some("inflight-".into()),
            ..Default::default()
        };
        let shared = Arc::new(writer(temp_dir.path(), options.clone()));
        spawn_override_writers(temp_dir.path(), Some(shared), options);
    }

    #[test]
    fn test_fail_and_ignore_policies() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        fs::write(temp_dir.path().join("a.txt"), "old").expect("write");

        let fail = writer(
            temp_dir.path(),
            EndpointOptions {
                file_exist: Some(FileExist::Fail),
                ..Default::default()
            },
        );
        assert!(matches!(
            write_str(&fail, "a.txt", "new"),
            Err(EngineError::FileExists { .. })
        ));

        let ignore = writer(
            temp_dir.path(),
            EndpointOptions {
                file_exist: Some(FileExist::Ignore),
                ..Default::default()
            },
        );
        let outcome = write_str(&ignore, "a.txt", "new").expect("write");
        assert!(matches!(outcome, WriteOutcome::Ignored { .. }));
        assert_eq!(fs::read_to_string(temp_dir.path().join("a.txt")).expect("read"), "old");
        write_str(&ignore, "b.txt", "new").expect("write");
        assert!(temp_dir.path().join("b.txt").exists());
    }

    #[test]
    fn test_move_existing_before_write() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        fs::write(temp_dir.path().join("a.txt"), "old").expect("write");
        let w = writer(
            temp_dir.path(),
            EndpointOptions {
                file_exist: Some(FileExist::Move),
                move_existing: Some("archive/${file:name}.bak".into()),
                ..Default::default()
            },
        );

        write_str(&w, "a.txt", "new").expect("write");
        assert_eq!(fs::read_to_string(temp_dir.path().join("a.txt")).expect("read"), "new");
        let archived = temp_dir.path().join("archive").join("a.txt.bak");
        assert_eq!(fs::read_to_string(&archived).expect("read"), "old");

        // A second move replaces the archived copy (eager delete is on by default).
        write_str(&w, "a.txt", "newer").expect("write");
        assert_eq!(fs::read_to_string(&archived).expect("read"), "new");
    }

    #[test]
    fn test_move_existing_without_eager_delete_fails() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        fs::write(temp_dir.path().join("a.txt"), "old").expect("write");
        fs::create_dir(temp_dir.path().join("archive")).expect("mkdir");
        fs::write(temp_dir.path().join("archive").join("a.txt"), "older").expect("write");
        let w = writer(
            temp_dir.path(),
            EndpointOptions {
                file_exist: Some(FileExist::Move),
                move_existing: Some("archive/${file:name}".into()),
                eager_delete_target_file: Some(false),
                ..Default::default()
            },
        );

        assert!(matches!(
            write_str(&w, "a.txt", "new"),
            Err(EngineError::FileExists { .. })
        ));
        assert_eq!(fs::read_to_string(temp_dir.path().join("a.txt")).expect("read"), "old");
    }

    #[test]
    fn test_temp_prefix_and_temp_file_name() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let prefixed = writer(
            temp_dir.path(),
            EndpointOptions {
                temp_prefix: Some("inflight-".into()),
                ..Default::default()
            },
        );
        assert_eq!(
            prefixed.temp_path("sub/a.txt", &temp_dir.path().join("sub").join("a.txt")),
            temp_dir.path().join("sub").join("inflight-a.txt")
        );

        let named = writer(
            temp_dir.path(),
            EndpointOptions {
                temp_file_name: Some("../staging/${file:onlyname}.part".into()),
                ..Default::default()
            },
        );
        write_str(&named, "out/a.txt", "data").expect("write");
        assert_eq!(
            fs::read_to_string(temp_dir.path().join("out").join("a.txt")).expect("read"),
            "data"
        );
        assert!(!temp_dir.path().join("staging").join("a.txt.part").exists());
    }

    #[test]
    fn test_try_rename_writes_without_exists_check() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let w = writer(
            temp_dir.path(),
            EndpointOptions {
                file_exist: Some(FileExist::TryRename),
                temp_prefix: Some("tmp-".into()),
                ..Default::default()
            },
        );
        write_str(&w, "a.txt", "data").expect("write");
        assert_eq!(names(temp_dir.path()), vec!["a.txt"]);
    }

    #[test]
    fn test_checksum_done_file_and_chmod() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let w = writer(
            temp_dir.path(),
            EndpointOptions {
                checksum_file_algorithm: Some("crc32".into()),
                done_file_name: Some("${file:name.noext}.ready".into()),
                chmod: Some("640".into()),
                ..Default::default()
            },
        );

        let outcome = write_str(&w, "hello.txt", "hello").expect("write");
        match &outcome {
            WriteOutcome::Written { bytes, checksum, .. } => {
                assert_eq!(*bytes, 5);
                assert_eq!(checksum.as_ref().map(ChecksumValue::hex), Some("3610a686"));
            }
            other => panic!("unexpected outcome {other:?}"),
        }
        assert_eq!(
            fs::read_to_string(temp_dir.path().join("hello.txt.crc32")).expect("read"),
            "3610a686"
        );
        assert!(temp_dir.path().join("hello.ready").exists());

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = fs::metadata(temp_dir.path().join("hello.txt"))
                .expect("stat")
                .permissions()
                .mode();
            assert_eq!(mode & 0o777, 0o640);
        }
    }

    #[test]
    fn test_keep_last_modified() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let w = writer(
            temp_dir.path(),
            EndpointOptions {
                keep_last_modified: Some(true),
                ..Default::default()
            },
        );
        let modified = SystemTime::UNIX_EPOCH + std::time::Duration::from_secs(1_600_000_000);
        w.write_with_modified("a.txt", &mut "x".as_bytes(), Some(modified))
            .expect("write");

        let meta = fs::metadata(temp_dir.path().join("a.txt")).expect("stat");
        assert_eq!(
            FileTime::from_last_modification_time(&meta),
            FileTime::from_system_time(modified)
        );
    }

    #[test]
    fn test_jail_rejects_escaping_names() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let out = temp_dir.path().join("out");
        let w = writer(&out, EndpointOptions::default());
        assert!(matches!(
            write_str(&w, "../escape.txt", "x"),
            Err(EngineError::OutsideStartingDirectory { .. })
        ));
        assert!(!temp_dir.path().join("escape.txt").exists());

        // Staying inside after normalization is fine.
        write_str(&w, "sub/../ok.txt", "x").expect("write");
        assert!(out.join("ok.txt").exists());
    }

    #[test]
    fn test_missing_directory_without_auto_create() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let w = writer(
            &temp_dir.path().join("missing"),
            EndpointOptions {
                auto_create: Some(false),
                ..Default::default()
            },
        );
        assert!(matches!(
            write_str(&w, "a.txt", "x"),
            Err(EngineError::StartingDirectoryNotFound { .. })
        ));
    }

    #[test]
    fn test_chmod_directory_applies_to_created_parents() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let w = writer(
            temp_dir.path(),
            EndpointOptions {
                chmod_directory: Some("750".into()),
                ..Default::default()
            },
        );
        write_str(&w, "a/b/c.txt", "x").expect("write");

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            for dir in [temp_dir.path().join("a"), temp_dir.path().join("a").join("b")] {
                let mode = fs::metadata(&dir).expect("stat").permissions().mode();
                assert_eq!(mode & 0o777, 0o750, "{}", dir.display());
            }
        }
    }

    #[test]
    fn test_concurrent_appends_do_not_interleave() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let w = Arc::new(writer(
            temp_dir.path(),
            EndpointOptions {
                file_exist: Some(FileExist::Append),
                ..Default::default()
            },
        ));

        let handles: Vec<_> = (0..8u8)
            .map(|i| {
                let w = Arc::clone(&w);
                thread::spawn(move || {
                    let letter = (b'a' + i) as char;
                    let block = format!("{}\n", letter.to_string().repeat(64 * 1024));
                    w.write("log.txt", &mut block.as_bytes()).expect("append");
                })
            })
            .collect();
        for handle in handles {
            handle.join().expect("appender panicked");
        }

        let content = fs::read_to_string(temp_dir.path().join("log.txt")).expect("read");
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 8);
        for line in lines {
            assert_eq!(line.len(), 64 * 1024);
            let first = line.as_bytes()[0];
            assert!(line.bytes().all(|b| b == first), "interleaved append");
        }
    }
}

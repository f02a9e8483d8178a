//! Filesystem operations module.
//!
//! This module provides the low-level operations shared by the consumer and
//! the producer:
//! - Renaming with a copy + delete fallback when rename is not possible
//! - Copying files with modification time preservation
//! - Creating parent directories (optionally with a permission mode)
//! - Applying permission modes and deleting files

use std::fs;
use std::io;
use std::path::Path;

use filetime::FileTime;
use tracing::debug;

use crate::error::{EngineError, EngineResult};

/// Rename `src` to `dst`, falling back to copy + delete when the rename fails
/// (different filesystems). The copy is verified by length before the source
/// is removed.
///
/// # Errors
/// Returns `EngineError::Io` if neither rename nor copy succeeds, and
/// `EngineError::CopyVerification` if the copied file has the wrong length.
pub fn rename_or_copy(src: &Path, dst: &Path) -> EngineResult<()> {
    let rename_err = match fs::rename(src, dst) {
        Ok(()) => return Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            return Err(EngineError::io("rename", src, e));
        }
        Err(e) => e,
    };

    debug!(
        from = %src.display(),
        to = %dst.display(),
        error = %rename_err,
        "rename failed, falling back to copy"
    );

    let expected = fs::metadata(src)
        .map_err(|e| EngineError::io("stat", src, e))?
        .len();
    let actual = copy_file_with_metadata(src, dst)?;
    if actual != expected {
        let _ = fs::remove_file(dst);
        return Err(EngineError::CopyVerification {
            path: dst.to_path_buf(),
            expected,
            actual,
        });
    }
    fs::remove_file(src).map_err(|e| EngineError::io("delete", src, e))
}

/// Copy a file from source to destination, preserving its modification time.
///
/// # Returns
/// Number of bytes copied
///
/// # Errors
/// Returns `EngineError::Io` if the copy fails
pub fn copy_file_with_metadata(src: &Path, dst: &Path) -> EngineResult<u64> {
    ensure_parent_dir_exists(dst, None)?;

    let mut src_file = fs::File::open(src).map_err(|e| EngineError::io("open", src, e))?;
    let src_mtime = src_file.metadata().and_then(|m| m.modified()).ok();

    let mut dst_file = fs::File::create(dst).map_err(|e| EngineError::io("create", dst, e))?;

    let bytes_copied = io::copy(&mut src_file, &mut dst_file).map_err(|e| {
        if e.kind() == io::ErrorKind::PermissionDenied {
            EngineError::io("write", dst, e)
        } else {
            EngineError::io("read", src, e)
        }
    })?;
    dst_file
        .sync_all()
        .map_err(|e| EngineError::io("fsync", dst, e))?;

    if let Some(mtime) = src_mtime {
        let _ = filetime::set_file_mtime(dst, FileTime::from_system_time(mtime));
    }

    Ok(bytes_copied)
}

/// Ensure the parent directory of a path exists, creating it if necessary.
///
/// Directories created here get `mode` applied when one is given.
///
/// # Errors
/// Returns `EngineError::Io` if the parent is not a directory or cannot be created
pub fn ensure_parent_dir_exists(path: &Path, mode: Option<u32>) -> EngineResult<()> {
    let Some(parent) = path.parent() else {
        return Ok(());
    };
    if parent.as_os_str().is_empty() {
        return Ok(());
    }

    match fs::metadata(parent) {
        Ok(metadata) if metadata.is_dir() => Ok(()),
        Ok(_) => Err(EngineError::io(
            "create directory",
            parent,
            io::Error::new(
                io::ErrorKind::InvalidInput,
                "parent path exists but is not a directory",
            ),
        )),
        Err(e) if e.kind() == io::ErrorKind::NotFound => create_dir_all(parent, mode),
        Err(e) => Err(EngineError::io("create directory", parent, e)),
    }
}

/// Create `dir` and its missing ancestors, applying `mode` to each one created.
pub fn create_dir_all(dir: &Path, mode: Option<u32>) -> EngineResult<()> {
    let mut missing = Vec::new();
    let mut current = Some(dir);
    while let Some(candidate) = current {
        if candidate.as_os_str().is_empty() || candidate.exists() {
            break;
        }
        missing.push(candidate.to_path_buf());
        current = candidate.parent();
    }

    fs::create_dir_all(dir).map_err(|e| EngineError::io("create directory", dir, e))?;

    if let Some(mode) = mode {
        for created in missing.iter().rev() {
            set_mode(created, mode)?;
        }
    }
    Ok(())
}

/// Apply a unix permission mode. A no-op on other platforms.
#[cfg(unix)]
pub fn set_mode(path: &Path, mode: u32) -> EngineResult<()> {
    use std::os::unix::fs::PermissionsExt;

    fs::set_permissions(path, fs::Permissions::from_mode(mode))
        .map_err(|e| EngineError::io("chmod", path, e))
}

#[cfg(not(unix))]
pub fn set_mode(_path: &Path, _mode: u32) -> EngineResult<()> {
    Ok(())
}

/// Delete a file. Returns `false` when it was already gone.
pub fn delete_file(path: &Path) -> EngineResult<bool> {
    match fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(EngineError::io("delete", path, e)),
    }
}

/// Move a file to `dst`, creating the target directory first. An existing
/// target is replaced.
pub fn move_file(src: &Path, dst: &Path) -> EngineResult<()> {
    ensure_parent_dir_exists(dst, None)?;
    if dst.exists() {
        delete_file(dst)?;
    }
    rename_or_copy(src, dst)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_copy_file_with_metadata() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let src_file = temp_dir.path().join("source.txt");
        let dst_file = temp_dir.path().join("nested").join("dest.txt");

        let mut file = fs::File::create(&src_file).expect("Failed to create source");
        file.write_all(b"test content").expect("Failed to write source");
        drop(file);
        let old = FileTime::from_unix_time(1_600_000_000, 0);
        filetime::set_file_mtime(&src_file, old).expect("Failed to set mtime");

        let bytes = copy_file_with_metadata(&src_file, &dst_file).expect("Failed to copy");
        assert_eq!(bytes, 12);

        let content = fs::read_to_string(&dst_file).expect("Failed to read dest");
        assert_eq!(content, "test content");
        let meta = fs::metadata(&dst_file).expect("Failed to stat dest");
        assert_eq!(FileTime::from_last_modification_time(&meta), old);
    }

    #[test]
    fn test_rename_or_copy_moves_file() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let src = temp_dir.path().join("a.txt");
        let dst = temp_dir.path().join("b.txt");
        fs::write(&src, b"payload").expect("Failed to write source");

        rename_or_copy(&src, &dst).expect("Failed to rename");
        assert!(!src.exists());
        assert_eq!(fs::read(&dst).expect("Failed to read dest"), b"payload");
    }

    #[test]
    fn test_rename_missing_source_fails() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let err = rename_or_copy(&temp_dir.path().join("gone"), &temp_dir.path().join("x"))
            .unwrap_err();
        assert_eq!(err.raw_os_error(), Some(2));
    }

    #[test]
    fn test_ensure_parent_dir_exists() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let path = temp_dir.path().join("subdir").join("file.txt");

        ensure_parent_dir_exists(&path, None).expect("Failed to create parent");
        assert!(temp_dir.path().join("subdir").is_dir());
    }

    #[cfg(unix)]
    #[test]
    fn test_create_dir_all_applies_mode_to_created_dirs() {
        use std::os::unix::fs::PermissionsExt;

        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let leaf = temp_dir.path().join("a").join("b");
        create_dir_all(&leaf, Some(0o750)).expect("Failed to create dirs");

        for dir in [temp_dir.path().join("a"), leaf] {
            let mode = fs::metadata(&dir).expect("stat").permissions().mode();
            assert_eq!(mode & 0o777, 0o750, "{}", dir.display());
        }
    }

    #[test]
    fn test_delete_file_reports_missing() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let path = temp_dir.path().join("x.txt");
        fs::write(&path, b"x").expect("Failed to write");

        assert!(delete_file(&path).expect("delete"));
        assert!(!delete_file(&path).expect("delete again"));
    }

    #[test]
    fn test_move_file_replaces_existing_target() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let src = temp_dir.path().join("a.txt");
        let dst = temp_dir.path().join("done").join("a.txt");
        fs::write(&src, b"new").expect("write src");
        fs::create_dir_all(dst.parent().expect("parent")).expect("mkdir");
        fs::write(&dst, b"old").expect("write dst");

        move_file(&src, &dst).expect("move");
        assert_eq!(fs::read(&dst).expect("read"), b"new");
    }
}

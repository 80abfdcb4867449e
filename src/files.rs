//! Database files and the sidecar files the engine keeps next to them.
//!
//! A database at `N` may be accompanied by `N-journal`, `N-shm`, `N-wal` and
//! `N.lck`. Deleting or renaming a database always covers all of them.

use std::ffi::OsString;
use std::io;
use std::path::{Path, PathBuf};

/// Suffixes appended to a database filename to form its sidecar files.
pub const SIDECAR_SUFFIXES: [&str; 4] = ["-journal", "-shm", "-wal", ".lck"];

fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut name = OsString::from(path.as_os_str());
    name.push(suffix);
    PathBuf::from(name)
}

/// The database file followed by every sidecar path, whether or not they exist.
pub fn database_files(path: &Path) -> Vec<PathBuf> {
    std::iter::once(path.to_path_buf())
        .chain(SIDECAR_SUFFIXES.iter().map(|suffix| with_suffix(path, suffix)))
        .collect()
}

fn remove_if_exists(path: &Path) -> io::Result<bool> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e),
    }
}

/// Deletes the database file and its sidecars. Missing files are skipped.
/// Returns whether the database file itself existed.
pub fn delete_database_files(path: &Path) -> io::Result<bool> {
    let existed = remove_if_exists(path)?;
    for sidecar in database_files(path).iter().skip(1) {
        if remove_if_exists(sidecar)? {
            tracing::trace!("deleted {}", sidecar.display());
        }
    }
    tracing::debug!(path = %path.display(), existed, "deleted database files");
    Ok(existed)
}

/// Renames the database file and every existing sidecar from `from` to `to`.
///
/// When one rename fails, the files already moved are moved back before the
/// error is returned.
pub fn rename_database_files(from: &Path, to: &Path) -> io::Result<()> {
    let mut moved: Vec<(PathBuf, PathBuf)> = Vec::new();
    for (src, dst) in database_files(from).into_iter().zip(database_files(to)) {
        if !src.exists() {
            continue;
        }
        if let Err(e) = std::fs::rename(&src, &dst) {
            tracing::warn!(
                "rename of {} failed, restoring {} moved files: {e}",
                src.display(),
                moved.len()
            );
            for (restored_src, restored_dst) in moved.iter().rev() {
                if let Err(restore) = std::fs::rename(restored_dst, restored_src) {
                    tracing::error!(
                        "failed to restore {}: {restore}",
                        restored_src.display()
                    );
                }
            }
            return Err(e);
        }
        moved.push((src, dst));
    }
    tracing::debug!(from = %from.display(), to = %to.display(), "renamed database files");
    Ok(())
}

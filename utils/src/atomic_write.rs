//! Atomic file write helpers.
//!
//! Uses a temp file + rename pattern. Where rename-over-existing fails, the old
//! file is moved to `.bak` first and restored if the second rename also fails.

use std::fs;
use std::io::{self, Write};
use std::path::Path;

use tempfile::NamedTempFile;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FileMode {
    /// Inherit the process umask.
    Inherit,
    /// Owner read/write only (0o600 on Unix). Ignored elsewhere.
    #[default]
    OwnerOnly,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Durability {
    /// `sync_all` the temp file, then best-effort sync of the parent dir.
    #[default]
    Synced,
    /// Skip fsync. Tests and throwaway data only.
    Unsynced,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct WriteOptions {
    pub mode: FileMode,
    pub durability: Durability,
}

/// Recover from an interrupted write by restoring `path.bak`.
///
/// If `path` is missing but the backup exists, the process died between
/// moving the old file aside and persisting the new one.
pub fn recover_bak_file(path: &Path) {
    let backup = path.with_extension("bak");
    if path.exists() || !backup.exists() {
        return;
    }
    match fs::rename(&backup, path) {
        Ok(()) => {
            tracing::warn!(
                path = %path.display(),
                "Recovered .bak file from interrupted atomic write"
            );
        }
        Err(e) => {
            tracing::warn!(path = %path.display(), "Failed to recover .bak file: {e}");
        }
    }
}

pub fn atomic_write(path: impl AsRef<Path>, bytes: &[u8], options: WriteOptions) -> io::Result<()> {
    let path = path.as_ref();
    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };

    let mut tmp = NamedTempFile::new_in(parent)?;
    set_owner_only(tmp.path(), options.mode)?;

    tmp.write_all(bytes)?;
    if options.durability == Durability::Synced {
        tmp.as_file().sync_all()?;
    }

    if let Err(err) = tmp.persist(path) {
        if !path.exists() {
            return Err(err.error);
        }
        let backup = path.with_extension("bak");
        let _ = fs::remove_file(&backup);
        fs::rename(path, &backup)?;

        if let Err(retry) = err.file.persist(path) {
            let _ = fs::rename(&backup, path);
            return Err(retry.error);
        }
        if let Err(e) = fs::remove_file(&backup) {
            tracing::warn!(path = %backup.display(), "Failed to remove .bak after atomic write: {e}");
        }
    }

    set_owner_only(path, options.mode)?;

    if options.durability == Durability::Synced {
        sync_parent_dir(parent);
    }

    Ok(())
}

#[cfg(unix)]
fn set_owner_only(path: &Path, mode: FileMode) -> io::Result<()> {
    use std::os::unix::fs::PermissionsExt;

    if mode == FileMode::OwnerOnly {
        fs::set_permissions(path, fs::Permissions::from_mode(0o600))?;
    }
    Ok(())
}

#[cfg(not(unix))]
fn set_owner_only(_path: &Path, _mode: FileMode) -> io::Result<()> {
    Ok(())
}

#[cfg(unix)]
fn sync_parent_dir(parent: &Path) {
    if let Err(e) = fs::File::open(parent).and_then(|dir| dir.sync_all()) {
        debug!(path = %parent.display(), "Parent directory sync_all failed (best-effort): {e}");
    }
}

#[cfg(not(unix))]
fn sync_parent_dir(parent: &Path) {
    debug!(path = %parent.display(), "Parent directory sync skipped on this platform");
}

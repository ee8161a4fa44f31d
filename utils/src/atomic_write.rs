//! Atomic file write helpers.
//!
//! Bytes go to a temp file in the destination directory, then the temp file is
//! renamed over the target. A reader never observes a half-written ledger.
//! Where rename-over-existing fails, the old file is moved aside to `.bak`
//! first and restored if the second rename also fails.

use std::fs;
use std::io::{self, Write};
use std::path::Path;

use tempfile::NamedTempFile;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PersistMode {
    /// Keep the mode of the file being replaced. A new file keeps the temp
    /// file's mode (0o600 on Unix).
    #[default]
    Default,
    /// Owner-only read/write (0o600 on Unix). Ignored elsewhere.
    OwnerOnly,
}

impl PersistMode {
    #[cfg(unix)]
    fn mode(self, existing: Option<u32>) -> Option<u32> {
        match self {
            Self::Default => existing,
            Self::OwnerOnly => Some(0o600),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileSyncPolicy {
    SyncAll,
    SkipSync,
}

#[derive(Debug, Clone, Copy)]
pub struct AtomicWriteOptions {
    /// Sync the temp file to disk before renaming it into place.
    pub file_sync: FileSyncPolicy,
    /// Create missing parent directories of the target.
    pub create_parent_dirs: bool,
    pub mode: PersistMode,
}

impl Default for AtomicWriteOptions {
    fn default() -> Self {
        Self {
            file_sync: FileSyncPolicy::SyncAll,
            create_parent_dirs: true,
            mode: PersistMode::Default,
        }
    }
}

/// Restore `path` from `path.bak` after an interrupted overwrite.
///
/// Only acts when the canonical file is missing and the backup exists.
/// Returns `true` when a backup was restored.
pub fn recover_bak_file(path: &Path) -> bool {
    let backup = path.with_extension("bak");
    if path.exists() || !backup.exists() {
        return false;
    }
    match fs::rename(&backup, path) {
        Ok(()) => {
            warn!(path = %path.display(), "Recovered .bak file from interrupted atomic write");
            true
        }
        Err(e) => {
            warn!(path = %path.display(), "Failed to recover .bak file: {e}");
            false
        }
    }
}

pub fn atomic_write(path: impl AsRef<Path>, bytes: &[u8]) -> io::Result<()> {
    atomic_write_with_options(path, bytes, AtomicWriteOptions::default())
}

pub fn atomic_write_with_options(
    path: impl AsRef<Path>,
    bytes: &[u8],
    options: AtomicWriteOptions,
) -> io::Result<()> {
    let path = path.as_ref();
    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };

    if options.create_parent_dirs && !parent.exists() {
        fs::create_dir_all(parent)?;
        debug!(path = %parent.display(), "Created parent directory");
    }

    #[cfg(unix)]
    let existing_mode = {
        use std::os::unix::fs::PermissionsExt;
        fs::metadata(path)
            .ok()
            .map(|meta| meta.permissions().mode() & 0o7777)
    };

    let mut tmp = NamedTempFile::new_in(parent)?;
    tmp.write_all(bytes)?;
    if matches!(options.file_sync, FileSyncPolicy::SyncAll) {
        tmp.as_file().sync_all()?;
    }

    if let Err(err) = tmp.persist(path) {
        if !path.exists() {
            return Err(err.error);
        }
        let backup_path = path.with_extension("bak");
        let _ = fs::remove_file(&backup_path);
        fs::rename(path, &backup_path)?;

        if let Err(rename_err) = err.file.persist(path) {
            let _ = fs::rename(&backup_path, path);
            return Err(rename_err.error);
        }
        if let Err(e) = fs::remove_file(&backup_path) {
            warn!(path = %backup_path.display(), "Failed to remove .bak after atomic write: {e}");
        }
    }

    #[cfg(unix)]
    if let Some(mode) = options.mode.mode(existing_mode) {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(path, fs::Permissions::from_mode(mode))?;
    }

    debug!(path = %path.display(), bytes = bytes.len(), "Atomic write complete");
    Ok(())
}

//! Reading and writing the ledger's canonical JSON form on disk.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::info;

use proofbook_utils::{atomic_write, recover_bak_file};

use crate::ledger::{LedgerError, TermLedger};

#[derive(Debug, Error)]
pub enum PersistError {
    #[error("failed to read ledger {path}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to write ledger {path}")]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("invalid ledger {path}")]
    Ledger {
        path: PathBuf,
        #[source]
        source: LedgerError,
    },
}

/// Write `ledger` to `path` atomically, creating parent directories.
pub fn export_ledger(ledger: &TermLedger, path: impl AsRef<Path>) -> Result<(), PersistError> {
    let path = path.as_ref();
    let json = ledger.to_json().map_err(|source| PersistError::Ledger {
        path: path.to_path_buf(),
        source,
    })?;
    atomic_write(path, json.as_bytes()).map_err(|source| PersistError::Write {
        path: path.to_path_buf(),
        source,
    })?;
    info!(path = %path.display(), terms = ledger.count_total(), "Exported ledger");
    Ok(())
}

/// Load a ledger previously written by [`export_ledger`].
///
/// Pruning is a view and is not persisted: every imported term is visible.
pub fn import_ledger(path: impl AsRef<Path>) -> Result<TermLedger, PersistError> {
    let path = path.as_ref();
    recover_bak_file(path);
    let json = fs::read_to_string(path).map_err(|source| PersistError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let ledger = TermLedger::from_json(&json).map_err(|source| PersistError::Ledger {
        path: path.to_path_buf(),
        source,
    })?;
    info!(path = %path.display(), terms = ledger.count_total(), "Imported ledger");
    Ok(ledger)
}

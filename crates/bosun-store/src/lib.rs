//! Durable state for bosun.
//!
//! This crate owns everything the control plane persists: the `StateLayout`
//! directory structure, the App Record Store (`RecordStore`, backed by one
//! checksummed JSON file per app), the last-applied `Transaction` sidecar, the
//! `SecretStore` and the per-consumer env files rendered from it, and the
//! append-only `AttemptLog`. Every whole-file write goes through
//! [`write_atomic`], so concurrent hook processes never observe a
//! half-written file.

pub mod attempts;
pub mod envfiles;
pub mod layout;
pub mod lock;
pub mod records;
pub mod secrets;
pub mod transaction_file;

pub use attempts::{AttemptLog, AttemptRecord, AttemptStatus};
pub use envfiles::{append_env, database_name, render_env_files, DatastoreEndpoint, EnvConsumer};
pub use layout::{StateLayout, STATE_FORMAT_VERSION};
pub use lock::StoreLock;
pub use records::{AppRecord, AppStatus, FileRecordStore, RecordStore};
pub use secrets::{generate_secret, AppSecretKind, AppSecrets, SecretBundle, SecretRole, SecretStore};
pub use transaction_file::TransactionFile;

use std::fs;
use std::io::Write;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{op} {}: {source}", path.display())]
    IoAt {
        op: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("store I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("integrity check failed for record '{name}': expected {expected}, got {actual}")]
    IntegrityFailure {
        name: String,
        expected: String,
        actual: String,
    },
    #[error("app not found: {0}")]
    AppNotFound(String),
    #[error("lock acquisition failed: {0}")]
    LockFailed(String),
    #[error("state format version mismatch: expected {expected}, found {found}")]
    VersionMismatch { expected: u32, found: u32 },
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("{0}")]
    Schema(#[from] bosun_schema::SchemaError),
    #[error("invalid env entry '{key}': {reason}")]
    InvalidEnv { key: String, reason: String },
}

/// Attach an operation name and path to an I/O error.
pub(crate) fn io_at(op: &'static str, path: &Path) -> impl FnOnce(std::io::Error) -> StoreError {
    let path = path.to_path_buf();
    move |source| StoreError::IoAt { op, path, source }
}

/// Fsync a directory so that a preceding `rename()` is durable.
pub(crate) fn fsync_dir(dir: &Path) -> Result<(), std::io::Error> {
    let f = fs::File::open(dir)?;
    f.sync_all()
}

/// Replace `path` with `data` via write-temp-then-rename.
///
/// Readers in other processes see either the old or the new content, never a
/// partial write. Missing parent directories are created. With `mode`, the
/// temp file gets those permission bits before any data is written.
pub fn write_atomic(path: &Path, data: &[u8], mode: Option<u32>) -> Result<(), StoreError> {
    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or(Path::new("."));
    fs::create_dir_all(dir).map_err(io_at("create directory", dir))?;

    let mut tmp = NamedTempFile::new_in(dir).map_err(io_at("create temp file in", dir))?;
    if let Some(mode) = mode {
        tmp.as_file()
            .set_permissions(fs::Permissions::from_mode(mode))
            .map_err(io_at("set permissions on temp file for", path))?;
    }
    tmp.write_all(data).map_err(io_at("write", path))?;
    tmp.as_file().sync_all().map_err(io_at("sync", path))?;
    tmp.persist(path).map_err(|e| StoreError::IoAt {
        op: "rename into",
        path: path.to_path_buf(),
        source: e.error,
    })?;
    fsync_dir(dir).map_err(io_at("sync directory", dir))?;
    Ok(())
}

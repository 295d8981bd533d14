use crate::{io_at, write_atomic, StoreError};
use bosun_schema::Transaction;
use std::fs;
use std::path::{Path, PathBuf};

/// JSON sidecar holding the last-applied [`Transaction`].
pub struct TransactionFile {
    path: PathBuf,
}

impl TransactionFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// A missing file is an empty transaction, not an error.
    pub fn load(&self) -> Result<Transaction, StoreError> {
        if !self.path.exists() {
            return Ok(Transaction::new());
        }
        let content = fs::read_to_string(&self.path).map_err(io_at("read", &self.path))?;
        if content.trim().is_empty() {
            return Ok(Transaction::new());
        }
        Ok(Transaction::from_json(&content)?)
    }

    pub fn save(&self, tx: &Transaction) -> Result<(), StoreError> {
        write_atomic(&self.path, tx.to_json()?.as_bytes(), Some(0o644))
    }
}

use crate::{io_at, write_atomic, StoreError};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Current state directory format version. Incremented on incompatible layout changes.
pub const STATE_FORMAT_VERSION: u32 = 1;
const VERSION_FILE: &str = "version";

/// Directory layout of the bosun state directory.
///
/// ```text
/// <root>/
///   version            format marker
///   .lock              install/uninstall serialisation lock
///   apps/<name>.json   app records
///   transaction.json   last-applied transaction
///   secrets.json       secret bundle (0600)
///   env/<name>.env     rendered env files (0600)
///   attempts.jsonl     attempt log
/// ```
#[derive(Debug, Clone)]
pub struct StateLayout {
    root: PathBuf,
}

#[derive(Debug, Serialize, Deserialize)]
struct StateVersion {
    format_version: u32,
}

impl StateLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    #[inline]
    pub fn root(&self) -> &Path {
        &self.root
    }

    #[inline]
    pub fn apps_dir(&self) -> PathBuf {
        self.root.join("apps")
    }

    #[inline]
    pub fn record_path(&self, app: &str) -> PathBuf {
        self.apps_dir().join(format!("{app}.json"))
    }

    #[inline]
    pub fn env_dir(&self) -> PathBuf {
        self.root.join("env")
    }

    #[inline]
    pub fn env_file(&self, name: &str) -> PathBuf {
        self.env_dir().join(format!("{name}.env"))
    }

    #[inline]
    pub fn transaction_file(&self) -> PathBuf {
        self.root.join("transaction.json")
    }

    #[inline]
    pub fn secrets_file(&self) -> PathBuf {
        self.root.join("secrets.json")
    }

    #[inline]
    pub fn attempts_file(&self) -> PathBuf {
        self.root.join("attempts.jsonl")
    }

    #[inline]
    pub fn lock_file(&self) -> PathBuf {
        self.root.join(".lock")
    }

    pub fn initialize(&self) -> Result<(), StoreError> {
        for dir in [self.apps_dir(), self.env_dir()] {
            fs::create_dir_all(&dir).map_err(io_at("create directory", &dir))?;
        }

        let version_path = self.root.join(VERSION_FILE);
        if version_path.exists() {
            self.verify_version()?;
        } else {
            let ver = StateVersion {
                format_version: STATE_FORMAT_VERSION,
            };
            let content = serde_json::to_string_pretty(&ver)?;
            write_atomic(&version_path, content.as_bytes(), Some(0o644))?;
        }
        Ok(())
    }

    pub fn verify_version(&self) -> Result<(), StoreError> {
        let version_path = self.root.join(VERSION_FILE);
        let content =
            fs::read_to_string(&version_path).map_err(io_at("read", &version_path))?;
        let ver: StateVersion = serde_json::from_str(&content)?;

        if ver.format_version != STATE_FORMAT_VERSION {
            return Err(StoreError::VersionMismatch {
                expected: STATE_FORMAT_VERSION,
                found: ver.format_version,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layout_paths_are_correct() {
        let layout = StateLayout::new("/var/lib/bosun");
        assert_eq!(layout.apps_dir(), PathBuf::from("/var/lib/bosun/apps"));
        assert_eq!(
            layout.record_path("radarr"),
            PathBuf::from("/var/lib/bosun/apps/radarr.json")
        );
        assert_eq!(
            layout.env_file("postgres"),
            PathBuf::from("/var/lib/bosun/env/postgres.env")
        );
        assert_eq!(
            layout.transaction_file(),
            PathBuf::from("/var/lib/bosun/transaction.json")
        );
        assert_eq!(
            layout.secrets_file(),
            PathBuf::from("/var/lib/bosun/secrets.json")
        );
    }

    #[test]
    fn initialize_creates_directories_and_version() {
        let dir = tempfile::tempdir().unwrap();
        let layout = StateLayout::new(dir.path());
        layout.initialize().unwrap();
        assert!(layout.apps_dir().is_dir());
        assert!(layout.env_dir().is_dir());
        layout.verify_version().unwrap();
    }

    #[test]
    fn initialize_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let layout = StateLayout::new(dir.path());
        layout.initialize().unwrap();
        layout.initialize().unwrap();
        layout.verify_version().unwrap();
    }

    #[test]
    fn future_version_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let layout = StateLayout::new(dir.path());
        fs::write(dir.path().join(VERSION_FILE), r#"{"format_version": 99}"#).unwrap();
        assert!(matches!(
            layout.initialize(),
            Err(StoreError::VersionMismatch { found: 99, .. })
        ));
    }
}

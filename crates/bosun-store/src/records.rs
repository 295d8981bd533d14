use crate::layout::StateLayout;
use crate::{io_at, write_atomic, StoreError};
use bosun_schema::{validate_app_name, AppName};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::fs;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum AppStatus {
    Installing,
    Starting,
    Running,
    Stopped,
    Error,
    Failed,
    Uninstalling,
}

impl AppStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            AppStatus::Installing => "installing",
            AppStatus::Starting => "starting",
            AppStatus::Running => "running",
            AppStatus::Stopped => "stopped",
            AppStatus::Error => "error",
            AppStatus::Failed => "failed",
            AppStatus::Uninstalling => "uninstalling",
        }
    }

    /// Every status except `Uninstalling`.
    pub fn is_installed(self) -> bool {
        !matches!(self, AppStatus::Uninstalling)
    }
}

impl fmt::Display for AppStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Durable record of one installed app.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AppRecord {
    pub name: AppName,
    #[serde(default)]
    pub display_name: String,
    #[serde(default)]
    pub version: String,
    pub status: AppStatus,
    #[serde(default)]
    pub port: u16,
    /// Infrastructure apps are hidden from end-user views.
    #[serde(default)]
    pub is_system: bool,
    /// Integration slot → chosen provider app.
    #[serde(default)]
    pub integration_config: BTreeMap<String, String>,
    pub installed_at: String,
    pub updated_at: String,
    /// Set once an install of this app got through the configuration apply.
    #[serde(default)]
    pub applied: bool,
    /// blake3 checksum over the record content. `None` for hand-written records.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checksum: Option<String>,
}

impl AppRecord {
    pub fn new(name: &str, display_name: &str, version: &str, port: u16) -> Self {
        let now = chrono::Utc::now().to_rfc3339();
        Self {
            name: AppName::new(name),
            display_name: display_name.to_owned(),
            version: version.to_owned(),
            status: AppStatus::Installing,
            port,
            is_system: false,
            integration_config: BTreeMap::new(),
            installed_at: now.clone(),
            updated_at: now,
            applied: false,
            checksum: None,
        }
    }

    /// Whether the app belongs in the desired-state transaction. A record
    /// whose install failed before any apply succeeded is left out, so the
    /// rolled-back configuration stays rolled back.
    pub fn is_declared(&self) -> bool {
        if !self.status.is_installed() {
            return false;
        }
        self.applied || !matches!(self.status, AppStatus::Error | AppStatus::Failed)
    }

    pub fn touch(&mut self) {
        self.updated_at = chrono::Utc::now().to_rfc3339();
    }

    fn compute_checksum(&self) -> Result<String, StoreError> {
        let mut copy = self.clone();
        copy.checksum = None;
        let json = serde_json::to_string_pretty(&copy)?;
        Ok(blake3::hash(json.as_bytes()).to_hex().to_string())
    }
}

/// CRUD access to app records, keyed by app name.
pub trait RecordStore: Send + Sync {
    /// `Ok(None)` when no record exists for `name`.
    fn get(&self, name: &str) -> Result<Option<AppRecord>, StoreError>;

    fn put(&self, record: &AppRecord) -> Result<(), StoreError>;

    /// All readable records, ordered by name.
    fn list(&self) -> Result<Vec<AppRecord>, StoreError>;

    /// Returns whether a record was removed.
    fn remove(&self, name: &str) -> Result<bool, StoreError>;

    fn set_status(&self, name: &str, status: AppStatus) -> Result<AppRecord, StoreError> {
        let mut record = self
            .get(name)?
            .ok_or_else(|| StoreError::AppNotFound(name.to_owned()))?;
        record.status = status;
        record.touch();
        self.put(&record)?;
        Ok(record)
    }
}

/// One checksummed JSON file per app under `apps/`.
pub struct FileRecordStore {
    layout: StateLayout,
}

impl FileRecordStore {
    pub fn new(layout: StateLayout) -> Self {
        Self { layout }
    }
}

impl RecordStore for FileRecordStore {
    fn get(&self, name: &str) -> Result<Option<AppRecord>, StoreError> {
        validate_app_name(name)?;
        let path = self.layout.record_path(name);
        if !path.exists() {
            return Ok(None);
        }
        let content = fs::read_to_string(&path).map_err(io_at("read", &path))?;
        let record: AppRecord = serde_json::from_str(&content)?;

        if let Some(ref expected) = record.checksum {
            let actual = record.compute_checksum()?;
            if actual != *expected {
                return Err(StoreError::IntegrityFailure {
                    name: name.to_owned(),
                    expected: expected.clone(),
                    actual,
                });
            }
        }
        Ok(Some(record))
    }

    fn put(&self, record: &AppRecord) -> Result<(), StoreError> {
        validate_app_name(&record.name)?;
        let mut with_checksum = record.clone();
        with_checksum.checksum = Some(with_checksum.compute_checksum()?);
        let content = serde_json::to_string_pretty(&with_checksum)?;
        write_atomic(
            &self.layout.record_path(&record.name),
            content.as_bytes(),
            Some(0o644),
        )
    }

    fn list(&self) -> Result<Vec<AppRecord>, StoreError> {
        let dir = self.layout.apps_dir();
        if !dir.exists() {
            return Ok(Vec::new());
        }
        let mut results = Vec::new();
        for entry in fs::read_dir(&dir).map_err(io_at("list", &dir))? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            match self.get(stem) {
                Ok(Some(record)) => results.push(record),
                Ok(None) => {}
                Err(e) => tracing::warn!("skipping unreadable app record '{stem}': {e}"),
            }
        }
        results.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(results)
    }

    fn remove(&self, name: &str) -> Result<bool, StoreError> {
        validate_app_name(name)?;
        let path = self.layout.record_path(name);
        if !path.exists() {
            return Ok(false);
        }
        fs::remove_file(&path).map_err(io_at("remove", &path))?;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_store() -> (tempfile::TempDir, FileRecordStore) {
        let dir = tempfile::tempdir().unwrap();
        let layout = StateLayout::new(dir.path());
        layout.initialize().unwrap();
        (dir, FileRecordStore::new(layout))
    }

    fn sample() -> AppRecord {
        let mut record = AppRecord::new("radarr", "Radarr", "5.2.6", 7878);
        record
            .integration_config
            .insert("downloadClient".to_owned(), "qbittorrent".to_owned());
        record
    }

    #[test]
    fn record_roundtrip_embeds_checksum() {
        let (_dir, store) = test_store();
        store.put(&sample()).unwrap();
        let back = store.get("radarr").unwrap().unwrap();
        assert_eq!(back.port, 7878);
        assert_eq!(back.status, AppStatus::Installing);
        assert_eq!(back.integration_config["downloadClient"], "qbittorrent");
        assert!(back.checksum.is_some());
    }

    #[test]
    fn failed_first_install_is_not_declared() {
        let mut record = sample();
        assert!(record.is_declared());
        record.status = AppStatus::Error;
        assert!(!record.is_declared());
        record.status = AppStatus::Failed;
        assert!(!record.is_declared());

        record.applied = true;
        assert!(record.is_declared());
        record.status = AppStatus::Uninstalling;
        assert!(!record.is_declared());
    }

    #[test]
    fn records_without_applied_field_load_as_unapplied() {
        let (dir, store) = test_store();
        fs::write(
            dir.path().join("apps/radarr.json"),
            r#"{"name":"radarr","status":"running","installed_at":"x","updated_at":"x"}"#,
        )
        .unwrap();
        let back = store.get("radarr").unwrap().unwrap();
        assert!(!back.applied);
        assert!(back.is_declared());
    }

    #[test]
    fn missing_record_is_none() {
        let (_dir, store) = test_store();
        assert!(store.get("sonarr").unwrap().is_none());
    }

    #[test]
    fn tampered_record_fails_integrity() {
        let (dir, store) = test_store();
        store.put(&sample()).unwrap();
        let path = StateLayout::new(dir.path()).record_path("radarr");
        let tampered = fs::read_to_string(&path)
            .unwrap()
            .replace("7878", "7879");
        fs::write(&path, tampered).unwrap();
        assert!(matches!(
            store.get("radarr"),
            Err(StoreError::IntegrityFailure { .. })
        ));
    }

    #[test]
    fn hand_written_record_without_checksum_loads() {
        let (dir, store) = test_store();
        let json = r#"{
            "name": "miniflux",
            "status": "running",
            "installed_at": "2025-01-01T00:00:00Z",
            "updated_at": "2025-01-01T00:00:00Z"
        }"#;
        fs::write(StateLayout::new(dir.path()).record_path("miniflux"), json).unwrap();
        let record = store.get("miniflux").unwrap().unwrap();
        assert_eq!(record.status, AppStatus::Running);
        assert!(record.integration_config.is_empty());
    }

    #[test]
    fn set_status_updates_and_persists() {
        let (_dir, store) = test_store();
        store.put(&sample()).unwrap();
        store.set_status("radarr", AppStatus::Running).unwrap();
        assert_eq!(
            store.get("radarr").unwrap().unwrap().status,
            AppStatus::Running
        );
    }

    #[test]
    fn set_status_on_missing_record_fails() {
        let (_dir, store) = test_store();
        assert!(matches!(
            store.set_status("ghost", AppStatus::Running),
            Err(StoreError::AppNotFound(_))
        ));
    }

    #[test]
    fn list_is_sorted_and_skips_corruption() {
        let (dir, store) = test_store();
        store.put(&AppRecord::new("sonarr", "", "", 8989)).unwrap();
        store.put(&AppRecord::new("adguard", "", "", 3000)).unwrap();
        fs::write(
            StateLayout::new(dir.path()).record_path("broken"),
            "NOT JSON",
        )
        .unwrap();
        let names: Vec<String> = store
            .list()
            .unwrap()
            .into_iter()
            .map(|r| r.name.into_inner())
            .collect();
        assert_eq!(names, vec!["adguard", "sonarr"]);
    }

    #[test]
    fn remove_reports_whether_anything_was_deleted() {
        let (_dir, store) = test_store();
        store.put(&sample()).unwrap();
        assert!(store.remove("radarr").unwrap());
        assert!(!store.remove("radarr").unwrap());
        assert!(store.get("radarr").unwrap().is_none());
    }

    #[test]
    fn path_traversal_names_are_rejected() {
        let (_dir, store) = test_store();
        assert!(store.get("../secrets").is_err());
    }

    #[test]
    fn status_serializes_lowercase() {
        assert_eq!(
            serde_json::to_string(&AppStatus::Uninstalling).unwrap(),
            "\"uninstalling\""
        );
        assert_eq!(AppStatus::Failed.to_string(), "failed");
    }
}
